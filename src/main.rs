use anyhow::{Context, Result};
use bucket_gateway::{
    config::{AppConfig, BackendKind},
    routes::routes::app,
    services::{
        backend::StorageBackend,
        local_backend::{LocalBackend, connect_pool},
        object_gateway::ObjectGateway,
        s3_backend::S3Backend,
        url_signer::UrlSigner,
    },
    state::AppState,
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use url::Url;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting bucket-gateway: backend={:?} endpoint={} bucket={} region={:?}",
        cfg.backend,
        cfg.endpoint,
        cfg.bucket_name,
        cfg.region
    );

    // --- Initialize backend ---
    let (backend, local): (Arc<dyn StorageBackend>, Option<Arc<LocalBackend>>) = match cfg.backend
    {
        BackendKind::Local => {
            tracing::debug!("Connecting to {}", cfg.database_url);
            let db = Arc::new(
                connect_pool(&cfg.database_url, 5)
                    .await
                    .with_context(|| format!("opening {}", cfg.database_url))?,
            );
            let public_url = Url::parse(&cfg.public_url)
                .with_context(|| format!("parsing public url `{}`", cfg.public_url))?;
            let signer = UrlSigner::new(cfg.secret_key.as_bytes(), public_url)?;
            let local = Arc::new(LocalBackend::new(db, &cfg.storage_dir, signer));
            local.migrate().await.context("running migrations")?;

            // --- Handle migration mode ---
            if migrate {
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }
            tracing::info!("Local storage at {}", cfg.storage_dir);
            let backend: Arc<dyn StorageBackend> = local.clone();
            (backend, Some(local))
        }
        BackendKind::S3 => {
            if migrate {
                tracing::warn!("--migrate has no effect with the s3 backend");
                return Ok(());
            }
            let s3 = S3Backend::connect(
                &cfg.endpoint,
                &cfg.access_key,
                &cfg.secret_key,
                cfg.region.as_deref(),
            );
            let backend: Arc<dyn StorageBackend> = Arc::new(s3);
            (backend, None)
        }
    };

    let state = AppState {
        gateway: ObjectGateway::new(backend, cfg.presign_expiry),
        default_bucket: cfg.bucket_name.clone(),
        region: cfg.region.clone(),
        local,
    };

    // --- Build router ---
    let app = app(state, cfg.max_upload_bytes);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
