use crate::services::{
    naming::{validate_bucket_name, validate_region},
    object_gateway::DEFAULT_PRESIGN_EXPIRY,
};
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

/// Which storage backend the gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Any S3-compatible server (MinIO, AWS S3, R2).
    S3,
    /// SQLite metadata plus local disk, served by this process.
    Local,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(value, true)
            .map_err(|_| anyhow::anyhow!("unknown backend `{}` (expected s3 or local)", value))
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendKind,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket_name: String,
    pub region: Option<String>,
    pub storage_dir: String,
    pub database_url: String,
    pub public_url: String,
    pub presign_expiry: Duration,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Bucket/object gateway in front of S3-compatible storage")]
pub struct Args {
    /// Host to bind to (overrides GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend (overrides GATEWAY_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Object storage endpoint URL (overrides MINIO_URL)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Access key (overrides MINIO_ACCESS_KEY)
    #[arg(long)]
    pub access_key: Option<String>,

    /// Secret key (overrides MINIO_SECRET_KEY)
    #[arg(long)]
    pub secret_key: Option<String>,

    /// Bucket used by the upload/download/delete endpoints (overrides MINIO_BUCKET_NAME)
    #[arg(long)]
    pub bucket_name: Option<String>,

    /// Region qualifier passed to every backend call (overrides MINIO_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Directory for object payloads of the local backend (overrides GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// SQLite URL for the local backend (overrides GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Externally reachable base URL for local presigned links (overrides GATEWAY_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Lifetime of presigned URLs in seconds (overrides GATEWAY_PRESIGN_EXPIRY_SECS)
    #[arg(long)]
    pub presign_expiry_secs: Option<u64>,

    /// Largest accepted upload body in bytes (overrides GATEWAY_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run local backend migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over variables looked up through `lookup`, then
    /// defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.into());

        let port = match args.port {
            Some(port) => port,
            None => parse_var(&lookup, "GATEWAY_PORT")?.unwrap_or(3000),
        };
        let backend = match args.backend {
            Some(backend) => backend,
            None => parse_var(&lookup, "GATEWAY_BACKEND")?.unwrap_or(BackendKind::S3),
        };
        let presign_secs = match args.presign_expiry_secs {
            Some(secs) => secs,
            None => parse_var(&lookup, "GATEWAY_PRESIGN_EXPIRY_SECS")?
                .unwrap_or(DEFAULT_PRESIGN_EXPIRY.as_secs()),
        };
        let max_upload_bytes = match args.max_upload_bytes {
            Some(bytes) => bytes,
            None => parse_var(&lookup, "GATEWAY_MAX_UPLOAD_BYTES")?.unwrap_or(100 * 1024 * 1024),
        };

        let cfg = Self {
            host: args.host.unwrap_or_else(|| var("GATEWAY_HOST", "0.0.0.0")),
            port,
            backend,
            endpoint: args
                .endpoint
                .unwrap_or_else(|| var("MINIO_URL", "http://127.0.0.1:9000")),
            access_key: args
                .access_key
                .unwrap_or_else(|| var("MINIO_ACCESS_KEY", "minioadmin")),
            secret_key: args
                .secret_key
                .unwrap_or_else(|| var("MINIO_SECRET_KEY", "minioadmin")),
            bucket_name: args
                .bucket_name
                .unwrap_or_else(|| var("MINIO_BUCKET_NAME", "default")),
            region: args
                .region
                .or_else(|| lookup("MINIO_REGION"))
                .filter(|r| !r.trim().is_empty()),
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| var("GATEWAY_STORAGE_DIR", "./data/objects")),
            database_url: args
                .database_url
                .unwrap_or_else(|| var("GATEWAY_DATABASE_URL", "sqlite://./data/meta/gateway.db")),
            public_url: args
                .public_url
                .or_else(|| lookup("GATEWAY_PUBLIC_URL"))
                .unwrap_or_else(|| format!("http://127.0.0.1:{}", port)),
            presign_expiry: Duration::from_secs(presign_secs),
            max_upload_bytes,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        validate_bucket_name(&self.bucket_name)
            .with_context(|| format!("invalid default bucket `{}`", self.bucket_name))?;
        if self.presign_expiry.is_zero() || self.presign_expiry > DEFAULT_PRESIGN_EXPIRY {
            bail!(
                "presign expiry must be between 1 and {} seconds, got {}",
                DEFAULT_PRESIGN_EXPIRY.as_secs(),
                self.presign_expiry.as_secs()
            );
        }
        if let (BackendKind::Local, Some(region)) = (self.backend, self.region.as_deref()) {
            validate_region(region)
                .with_context(|| format!("region `{}` is not served by the local backend", region))?;
        }
        if self.secret_key.is_empty() {
            bail!("secret key must not be empty");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(None),
    }
}
