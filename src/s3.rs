use std::sync::Arc;

use anyhow::Result;
use aws_config::meta::region::RegionProviderChain;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client as S3Client,
};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::storage::{ObjectStorage, RemoteTarget, S3Storage};

pub async fn build_client(config: &AppConfig) -> Result<S3Client> {
    let region = Region::new(config.aws_region.clone());
    let region_provider = RegionProviderChain::first_try(Some(region))
        .or_default_provider()
        .or_else("us-east-1");

    #[allow(deprecated)]
    let mut loader = aws_config::from_env().region(region_provider);

    if let Some(endpoint) = &config.aws_endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }

    if let (Some(access_key), Some(secret_key)) = (
        config.aws_access_key_id.clone(),
        config.aws_secret_access_key.clone(),
    ) {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");
        loader = loader.credentials_provider(credentials);
    }

    let base_config = loader.load().await;
    let s3_config = S3ConfigBuilder::from(&base_config)
        .force_path_style(true)
        .build();

    Ok(S3Client::from_conf(s3_config))
}

/// Returns the remote target when S3 is enabled and its bucket answers a probe.
pub async fn connect_remote(config: &AppConfig) -> Option<RemoteTarget> {
    let bucket = config.remote_bucket()?;

    let client = match build_client(config).await {
        Ok(client) => client,
        Err(err) => {
            warn!(error = %err, "failed to build S3 client; large files will be stored locally");
            return None;
        }
    };
    let storage = S3Storage::new(client, bucket);

    if let Err(err) = storage.probe().await {
        warn!(bucket = %bucket, error = %err, "S3 bucket unreachable; large files will be stored locally");
        return None;
    }

    info!(bucket = %bucket, region = %config.aws_region, "remote storage enabled");
    let storage: Arc<dyn ObjectStorage> = Arc::new(storage);
    Some(RemoteTarget::new(
        storage,
        bucket,
        &config.aws_region,
        config.aws_endpoint_url.as_deref(),
    ))
}
