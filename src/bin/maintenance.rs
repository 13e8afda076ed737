use std::{collections::HashSet, env, time::Duration};

use anyhow::{Context, Result};
use diesel::prelude::*;

use hvac_backend::{
    config::AppConfig,
    db,
    models::FileRecord,
    s3,
    schema::files,
    storage::{Artifact, FileStore, LocalStorage},
};

const USAGE: &str = "Usage: maintenance <scan-orphans|prune-orphans>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt().with_target(false).compact().init();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("scan-orphans") => {
            scan(false).await?;
        }
        Some("prune-orphans") => {
            scan(true).await?;
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn scan(prune: bool) -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        upload_folder = %config.upload_folder.display(),
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let store = FileStore::new(
        config.max_db_file_size,
        LocalStorage::new(config.upload_folder.clone()),
        s3::connect_remote(&config).await,
        Duration::from_secs(config.presigned_url_expiry_seconds),
    );

    let mut conn = pool.get().context("failed to get database connection")?;
    let records: Vec<FileRecord> = files::table
        .select(FileRecord::as_select())
        .load(&mut conn)
        .context("failed to load file records")?;

    let mut referenced = HashSet::new();
    let mut missing = 0usize;
    for record in &records {
        let artifact = match Artifact::from_record(
            &record.storage_kind,
            record.local_path.as_deref(),
            record.s3_key.as_deref(),
        ) {
            Ok(artifact) => artifact,
            Err(err) => {
                println!("{} ({}): {err}", record.id, record.original_name);
                missing += 1;
                continue;
            }
        };
        if let Artifact::Local(path) = &artifact {
            referenced.insert(path.clone());
        }
        match store.exists(&artifact).await {
            Ok(true) => {}
            Ok(false) => {
                println!(
                    "{} ({}): bytes missing from {} storage at {}",
                    record.id,
                    record.original_name,
                    artifact.kind(),
                    artifact.describe()
                );
                missing += 1;
            }
            Err(err) => {
                eprintln!("{}: could not check {}: {err}", record.id, artifact.describe());
            }
        }
    }

    let stored = store
        .local()
        .list()
        .await
        .context("failed to list upload folder")?;
    let orphans = unreferenced(&stored, &referenced);

    println!(
        "{} file records, {missing} missing their bytes, {} local files without a record",
        records.len(),
        orphans.len()
    );

    if !prune {
        for name in &orphans {
            println!("orphan: {name}");
        }
        return Ok(());
    }

    let mut removed = 0usize;
    for name in &orphans {
        match store.local().delete(name).await {
            Ok(()) => removed += 1,
            Err(err) => eprintln!("Failed to delete {name}: {err}"),
        }
    }
    println!("Removed {removed} orphaned local files.");
    Ok(())
}

fn unreferenced(stored: &[String], referenced: &HashSet<String>) -> Vec<String> {
    stored
        .iter()
        .filter(|name| !referenced.contains(*name))
        .cloned()
        .collect()
}
