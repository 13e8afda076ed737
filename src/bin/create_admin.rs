use std::env;

use anyhow::{bail, Context, Result};
use diesel::prelude::*;
use uuid::Uuid;

use hvac_backend::{
    auth::password::hash_password,
    config::AppConfig,
    db,
    models::{NewUser, ROLE_ADMIN},
    schema::users,
};

const USAGE: &str = "Usage: create-admin <username> <email> <password> [full name]";

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    let (username, email, password) = match args.as_slice() {
        [username, email, password, ..] => (username.trim(), email.trim(), password.as_str()),
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    };
    if password.chars().count() < 6 {
        bail!("password must be at least 6 characters");
    }
    let full_name = if args.len() > 3 {
        args[3..].join(" ")
    } else {
        username.to_string()
    };

    let config = AppConfig::from_env()?;
    let pool = db::init_pool(&config.database_url)?;
    db::run_migrations(&pool)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let taken: Option<Uuid> = users::table
        .filter(users::username.eq(username).or(users::email.eq(email)))
        .select(users::id)
        .first(&mut conn)
        .optional()
        .context("failed to check existing users")?;
    if taken.is_some() {
        bail!("a user with that username or email already exists");
    }

    let new_user = NewUser {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email: email.to_lowercase(),
        full_name,
        password_hash: hash_password(password)?,
        role: ROLE_ADMIN.to_string(),
    };
    diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
        .context("failed to insert admin user")?;

    println!("Created admin {username} ({})", new_user.id);
    Ok(())
}
