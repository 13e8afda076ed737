use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hvac_backend::{
    auth::jwt::JwtService,
    config::AppConfig,
    db,
    kv::{KeyValueStore, MemoryStore, RedisStore},
    routes::create_router,
    s3,
    state::AppState,
    storage::{FileStore, LocalStorage},
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn connect_kv(config: &AppConfig) -> Arc<dyn KeyValueStore> {
    let Some(url) = config.redis_url.as_deref() else {
        warn!("REDIS_URL not set; rate limits and revocations are kept in process memory");
        return Arc::new(MemoryStore::new());
    };

    match RedisStore::connect(url).await {
        Ok(store) => {
            info!("connected to redis");
            Arc::new(store)
        }
        Err(err) => {
            warn!(error = %err, "redis unavailable; falling back to in-process store");
            Arc::new(MemoryStore::new())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    info!(
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        upload_folder = %config.upload_folder.display(),
        max_db_file_size = config.max_db_file_size,
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let applied = db::run_migrations(&pool)?;
    if applied > 0 {
        info!(applied, "database migrations applied");
    }

    let local = LocalStorage::new(config.upload_folder.clone());
    local
        .ensure_root()
        .await
        .context("failed to prepare upload folder")?;
    let remote = s3::connect_remote(&config).await;
    let files = Arc::new(FileStore::new(
        config.max_db_file_size,
        local,
        remote,
        Duration::from_secs(config.presigned_url_expiry_seconds),
    ));

    let kv = connect_kv(&config).await;
    let jwt = JwtService::from_config(&config)?;

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("SERVER_HOST and SERVER_PORT must form a socket address")?;

    let state = AppState::new(pool, config, files, jwt, kv);
    let app = create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "hvac backend listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
