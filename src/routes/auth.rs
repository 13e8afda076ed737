use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{password, session, AuthenticatedUser, ClientIp},
    error::{conflict_on_unique, AppError, AppResult},
    models::{NewUser, User, UserChanges, ROLES, ROLE_ADMIN, ROLE_USER},
    schema::users::{self, dsl},
    state::AppState,
    utils::json::to_iso,
};

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{3,50}$").expect("valid username pattern"));
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("valid email pattern")
});

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub is_active: bool,
    pub last_login_at: Option<String>,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            role: user.role,
            is_active: user.is_active,
            last_login_at: user.last_login_at.map(to_iso),
            created_at: to_iso(user.created_at),
        }
    }
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub email: Option<String>,
    pub full_name: Option<String>,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct VerifyTokenResponse {
    pub valid: bool,
    pub user: UserResponse,
}

pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let kv = state.kv.as_ref();
    if state.login_limiter.is_blocked(kv, &ip).await {
        warn!(ip = %ip, "login rate limit exceeded");
        return Err(AppError::too_many_requests(
            "too many login attempts, try again later",
        ));
    }

    let mut conn = state.db()?;

    let user: Option<User> = dsl::users
        .filter(dsl::username.eq(payload.username.trim()))
        .first(&mut conn)
        .optional()?;

    let authenticated = user.filter(|user| {
        user.is_active
            && password::verify_password(&payload.password, &user.password_hash).unwrap_or(false)
    });

    let Some(user) = authenticated else {
        state.login_limiter.record_attempt(kv, &ip).await;
        return Err(AppError::unauthorized());
    };

    state.login_limiter.reset(kv, &ip).await;

    let now = Utc::now().naive_utc();
    let user: User = diesel::update(dsl::users.find(user.id))
        .set(dsl::last_login_at.eq(Some(now)))
        .get_result(&mut conn)?;

    let epoch = session::current_epoch(kv, user.id).await.unwrap_or_else(|err| {
        warn!(user_id = %user.id, error = %err, "session epoch unavailable; issuing token for epoch 0");
        0
    });

    let access_token = state
        .jwt
        .generate_token(user.id, &user.username, &user.role, epoch)
        .map_err(AppError::from)?;

    info!(user_id = %user.id, "user logged in");

    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.expiry_seconds(),
        user: user.into(),
    }))
}

pub async fn register(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let kv = state.kv.as_ref();
    if state.register_limiter.is_blocked(kv, &ip).await {
        warn!(ip = %ip, "registration rate limit exceeded");
        return Err(AppError::too_many_requests(
            "too many registration attempts, try again later",
        ));
    }
    state.register_limiter.record_attempt(kv, &ip).await;

    let registration = validate_registration(payload).map_err(AppError::bad_request)?;

    let mut conn = state.db()?;

    let username_taken = diesel::select(diesel::dsl::exists(
        dsl::users.filter(dsl::username.eq(&registration.username)),
    ))
    .get_result::<bool>(&mut conn)?;
    if username_taken {
        return Err(AppError::conflict("username already taken"));
    }

    let email_taken = diesel::select(diesel::dsl::exists(
        dsl::users.filter(dsl::email.eq(&registration.email)),
    ))
    .get_result::<bool>(&mut conn)?;
    if email_taken {
        return Err(AppError::conflict("email already registered"));
    }

    let password_hash = password::hash_password(&registration.password)?;
    let new_user = NewUser {
        id: Uuid::new_v4(),
        username: registration.username,
        email: registration.email,
        full_name: registration.full_name,
        password_hash,
        role: ROLE_USER.to_string(),
    };

    let user: User = diesel::insert_into(users::table)
        .values(&new_user)
        .get_result(&mut conn)
        .map_err(|err| conflict_on_unique(err, "username or email already registered"))?;

    info!(user_id = %user.id, username = %user.username, "user registered");

    Ok((StatusCode::CREATED, Json(user.into())))
}

pub async fn verify_token(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<VerifyTokenResponse>> {
    let mut conn = state.db()?;
    let record: Option<User> = dsl::users.find(user.user_id).first(&mut conn).optional()?;

    match record {
        Some(record) if record.is_active => Ok(Json(VerifyTokenResponse {
            valid: true,
            user: record.into(),
        })),
        _ => Err(AppError::unauthorized()),
    }
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let epoch = session::revoke_sessions(state.kv.as_ref(), user.user_id).await?;
    info!(user_id = %user.user_id, epoch, "revoked outstanding sessions");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}

pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    let mut conn = state.db()?;
    let record: User = dsl::users.find(user.user_id).first(&mut conn)?;
    Ok(Json(record.into()))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<UserResponse>> {
    let email = payload
        .email
        .map(|email| validate_email(&email))
        .transpose()
        .map_err(AppError::bad_request)?;
    let full_name = payload
        .full_name
        .map(|name| validate_full_name(&name))
        .transpose()
        .map_err(AppError::bad_request)?;

    let mut conn = state.db()?;

    let record = conn.transaction::<User, AppError, _>(|conn| {
        let current: User = dsl::users.find(user.user_id).first(conn)?;

        let changes = UserChanges {
            email: email.filter(|email| *email != current.email),
            full_name: full_name.filter(|name| *name != current.full_name),
            ..UserChanges::default()
        };
        if changes.email.is_none() && changes.full_name.is_none() {
            return Ok(current);
        }

        if let Some(email) = &changes.email {
            let taken = diesel::select(diesel::dsl::exists(
                dsl::users
                    .filter(dsl::email.eq(email))
                    .filter(dsl::id.ne(user.user_id)),
            ))
            .get_result::<bool>(conn)?;
            if taken {
                return Err(AppError::conflict("email already registered"));
            }
        }

        diesel::update(dsl::users.find(user.user_id))
            .set(&changes)
            .get_result(conn)
            .map_err(|err| conflict_on_unique(err, "email already registered"))
    })?;

    info!(user_id = %record.id, "profile updated");
    Ok(Json(record.into()))
}

pub async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<StatusCode> {
    if payload.current_password.is_empty() {
        return Err(AppError::bad_request("current password is required"));
    }
    if payload.new_password != payload.confirm_password {
        return Err(AppError::bad_request(
            "new password and confirmation do not match",
        ));
    }
    validate_password(&payload.new_password).map_err(AppError::bad_request)?;

    let mut conn = state.db()?;
    let record: User = dsl::users.find(user.user_id).first(&mut conn)?;
    if !password::verify_password(&payload.current_password, &record.password_hash)? {
        warn!(user_id = %record.id, "password change rejected: wrong current password");
        return Err(AppError::unauthorized());
    }

    let changes = UserChanges {
        password_hash: Some(password::hash_password(&payload.new_password)?),
        ..UserChanges::default()
    };
    diesel::update(dsl::users.find(record.id))
        .set(&changes)
        .execute(&mut conn)?;

    info!(user_id = %record.id, "password changed");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserListResponse>> {
    user.require_role(&[ROLE_ADMIN])?;

    let mut conn = state.db()?;
    let records: Vec<User> = dsl::users
        .order(dsl::created_at.asc())
        .load(&mut conn)?;

    let users: Vec<UserResponse> = records.into_iter().map(UserResponse::from).collect();
    Ok(Json(UserListResponse {
        total: users.len(),
        users,
    }))
}

/// Role and activation changes also revoke the user's outstanding tokens, since tokens
/// carry the role.
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    admin: AuthenticatedUser,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    admin.require_role(&[ROLE_ADMIN])?;

    if let Some(role) = payload.role.as_deref() {
        if !ROLES.contains(&role) {
            return Err(AppError::bad_request(format!(
                "role must be one of: {}",
                ROLES.join(", ")
            )));
        }
    }

    let mut conn = state.db()?;

    let (record, changed) = conn.transaction::<(User, bool), AppError, _>(|conn| {
        let current: User = dsl::users.find(user_id).first(conn)?;

        let changes = UserChanges {
            role: payload.role.clone().filter(|role| *role != current.role),
            is_active: payload.is_active.filter(|active| *active != current.is_active),
            ..UserChanges::default()
        };
        if changes.role.is_none() && changes.is_active.is_none() {
            return Ok((current, false));
        }

        let updated: User = diesel::update(dsl::users.find(user_id))
            .set(&changes)
            .get_result(conn)?;
        Ok((updated, true))
    })?;

    if changed {
        session::revoke_sessions(state.kv.as_ref(), record.id).await?;
        info!(
            admin_id = %admin.user_id,
            user_id = %record.id,
            role = %record.role,
            is_active = record.is_active,
            "user updated by admin"
        );
    }

    Ok(Json(record.into()))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    admin: AuthenticatedUser,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    admin.require_role(&[ROLE_ADMIN])?;

    let confirmed = headers
        .get("x-confirm-delete")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("true"));
    if !confirmed {
        return Err(AppError::bad_request(
            "deletion must be confirmed with the X-Confirm-Delete: true header",
        ));
    }
    if user_id == admin.user_id {
        return Err(AppError::bad_request("you cannot delete your own account"));
    }

    let mut conn = state.db()?;
    let deleted = diesel::delete(dsl::users.find(user_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }

    if let Err(err) = session::revoke_sessions(state.kv.as_ref(), user_id).await {
        warn!(user_id = %user_id, error = %err, "failed to revoke sessions of deleted user");
    }

    info!(admin_id = %admin.user_id, user_id = %user_id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug)]
struct Registration {
    username: String,
    email: String,
    password: String,
    full_name: String,
}

fn validate_email(raw: &str) -> Result<String, String> {
    let email = raw.trim().to_lowercase();
    if !EMAIL_RE.is_match(&email) || email.chars().count() > 120 {
        return Err("invalid email address".to_string());
    }
    Ok(email)
}

fn validate_password(password: &str) -> Result<(), String> {
    let length = password.chars().count();
    if !(6..=128).contains(&length) {
        return Err("password must be between 6 and 128 characters".to_string());
    }
    let has_letter = password.chars().any(char::is_alphabetic);
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err("password must contain at least one letter and one digit".to_string());
    }
    Ok(())
}

fn validate_full_name(raw: &str) -> Result<String, String> {
    let full_name = raw.trim().to_string();
    let length = full_name.chars().count();
    if length < 2 {
        return Err("full name must have at least 2 characters".to_string());
    }
    if length > 200 {
        return Err("full name must have at most 200 characters".to_string());
    }
    Ok(full_name)
}

fn validate_registration(payload: RegisterRequest) -> Result<Registration, String> {
    let username = payload.username.trim().to_string();
    if !USERNAME_RE.is_match(&username) {
        return Err(
            "username must be 3-50 characters of letters, digits or underscores".to_string(),
        );
    }

    let email = validate_email(&payload.email)?;
    validate_password(&payload.password)?;
    let full_name = validate_full_name(&payload.full_name)?;

    Ok(Registration {
        username,
        email,
        password: payload.password,
        full_name,
    })
}
