use std::{sync::Arc, time::Duration};

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::{jwt::JwtService, rate_limit::AttemptLimiter},
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    kv::KeyValueStore,
    storage::FileStore,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub files: Arc<FileStore>,
    pub jwt: JwtService,
    pub kv: Arc<dyn KeyValueStore>,
    pub login_limiter: AttemptLimiter,
    pub register_limiter: AttemptLimiter,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        files: Arc<FileStore>,
        jwt: JwtService,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        let login_limiter = AttemptLimiter::new(
            "login",
            config.login_max_attempts,
            Duration::from_secs(config.login_window_seconds),
        );
        let register_limiter = AttemptLimiter::new(
            "register",
            config.register_max_attempts,
            Duration::from_secs(config.register_window_seconds),
        );

        Self {
            pool,
            config: Arc::new(config),
            files,
            jwt,
            kv,
            login_limiter,
            register_limiter,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
