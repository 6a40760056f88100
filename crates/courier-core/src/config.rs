//! Configuration module
//!
//! Environment-driven configuration for the transfer service: server basics,
//! ledger and storage backend selection, capability-token settings, transfer
//! TTLs, and the archive pipeline knobs.

use std::env;

use crate::storage_types::{LedgerBackend, StorageBackend};

// Common constants
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const JWT_EXPIRY_HOURS: i64 = 24;
const LOCATION_TOKEN_TTL_SECS: u64 = 600;
const UPLOAD_TTL_HOURS: i64 = 72;
const DOWNLOAD_TTL_HOURS: i64 = 168;
const ARCHIVE_CHUNK_BYTES: usize = 64 * 1024;
const ARCHIVE_CHANNEL_DEPTH: usize = 8;
const SWEEP_INTERVAL_SECS: u64 = 300;
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024 * 1024;

/// Base configuration shared by every deployment
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub environment: String,
}

/// Transfer service configuration
#[derive(Clone, Debug)]
pub struct TransferConfig {
    pub base: BaseConfig,
    pub database_url: Option<String>,
    pub ledger_backend: LedgerBackend,
    // Storage configuration
    pub storage_backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO etc.)
    pub local_storage_path: Option<String>,
    // Base URL clients use to reach this service; relayed transfer locations
    // are issued under it when the storage backend cannot presign natively.
    pub public_base_url: String,
    // Location capability tokens
    pub location_token_secret: String,
    pub location_token_ttl_secs: u64,
    // Transfer lifetimes
    pub upload_ttl_hours: i64,
    pub download_ttl_hours: i64,
    // Whether a write location may be re-issued for an already-written entry
    // when the request explicitly asks for an overwrite.
    pub allow_overwrite: bool,
    // Archive streaming pipeline
    pub archive_chunk_bytes: usize,
    pub archive_channel_depth: usize,
    // Expiry sweep interval in seconds. 0 = disabled.
    pub sweep_interval_secs: u64,
    pub max_body_bytes: usize,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<TransferConfig>);

impl Config {
    fn inner(&self) -> &TransferConfig {
        &self.0
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.inner().base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = TransferConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    // Convenience getters for common fields
    pub fn server_port(&self) -> u16 {
        self.inner().base.server_port
    }

    pub fn jwt_secret(&self) -> &str {
        &self.inner().base.jwt_secret
    }

    pub fn jwt_expiry_hours(&self) -> i64 {
        self.inner().base.jwt_expiry_hours
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.inner().base.cors_origins
    }

    pub fn environment(&self) -> &str {
        &self.inner().base.environment
    }

    pub fn db_max_connections(&self) -> u32 {
        self.inner().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.inner().base.db_timeout_seconds
    }

    pub fn database_url(&self) -> Option<&str> {
        self.inner().database_url.as_deref()
    }

    pub fn ledger_backend(&self) -> LedgerBackend {
        self.inner().ledger_backend
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.inner().storage_backend
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.inner().s3_bucket.as_deref()
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.inner().s3_region.as_deref()
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.inner().s3_endpoint.as_deref()
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.inner().local_storage_path.as_deref()
    }

    pub fn public_base_url(&self) -> &str {
        &self.inner().public_base_url
    }

    pub fn location_token_secret(&self) -> &str {
        &self.inner().location_token_secret
    }

    pub fn location_token_ttl_secs(&self) -> u64 {
        self.inner().location_token_ttl_secs
    }

    pub fn upload_ttl_hours(&self) -> i64 {
        self.inner().upload_ttl_hours
    }

    pub fn download_ttl_hours(&self) -> i64 {
        self.inner().download_ttl_hours
    }

    pub fn allow_overwrite(&self) -> bool {
        self.inner().allow_overwrite
    }

    pub fn archive_chunk_bytes(&self) -> usize {
        self.inner().archive_chunk_bytes
    }

    pub fn archive_channel_depth(&self) -> usize {
        self.inner().archive_channel_depth
    }

    pub fn sweep_interval_secs(&self) -> u64 {
        self.inner().sweep_interval_secs
    }

    pub fn max_body_bytes(&self) -> usize {
        self.inner().max_body_bytes
    }
}

impl TransferConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins_str = env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());
        let is_production =
            environment.to_lowercase() == "production" || environment.to_lowercase() == "prod";
        if is_production && cors_origins_str.trim() == "*" {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        let cors_origins: Vec<String> = cors_origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let server_port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "4000".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?;

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set for authentication"))?;

        let base = BaseConfig {
            server_port,
            cors_origins,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            jwt_secret: jwt_secret.clone(),
            jwt_expiry_hours: env::var("JWT_EXPIRY_HOURS")
                .unwrap_or_else(|_| JWT_EXPIRY_HOURS.to_string())
                .parse()
                .unwrap_or(JWT_EXPIRY_HOURS),
            environment,
        };

        let ledger_backend = match env::var("LEDGER_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => LedgerBackend::Memory,
            _ => LedgerBackend::Postgres,
        };

        let storage_backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "s3" => StorageBackend::S3,
            "memory" => StorageBackend::Memory,
            _ => StorageBackend::Local,
        };

        let config = TransferConfig {
            base,
            database_url: env::var("DATABASE_URL").ok(),
            ledger_backend,
            storage_backend,
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION").ok().or_else(|| env::var("AWS_REGION").ok()),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", server_port)),
            location_token_secret: env::var("LOCATION_TOKEN_SECRET").unwrap_or(jwt_secret),
            location_token_ttl_secs: env::var("LOCATION_TOKEN_TTL_SECS")
                .unwrap_or_else(|_| LOCATION_TOKEN_TTL_SECS.to_string())
                .parse()
                .unwrap_or(LOCATION_TOKEN_TTL_SECS),
            upload_ttl_hours: env::var("UPLOAD_TTL_HOURS")
                .unwrap_or_else(|_| UPLOAD_TTL_HOURS.to_string())
                .parse()
                .unwrap_or(UPLOAD_TTL_HOURS),
            download_ttl_hours: env::var("DOWNLOAD_TTL_HOURS")
                .unwrap_or_else(|_| DOWNLOAD_TTL_HOURS.to_string())
                .parse()
                .unwrap_or(DOWNLOAD_TTL_HOURS),
            allow_overwrite: env::var("ALLOW_OVERWRITE")
                .unwrap_or_else(|_| "false".to_string())
                .to_lowercase()
                .parse()
                .unwrap_or(false),
            archive_chunk_bytes: env::var("ARCHIVE_CHUNK_BYTES")
                .unwrap_or_else(|_| ARCHIVE_CHUNK_BYTES.to_string())
                .parse()
                .unwrap_or(ARCHIVE_CHUNK_BYTES),
            archive_channel_depth: env::var("ARCHIVE_CHANNEL_DEPTH")
                .unwrap_or_else(|_| ARCHIVE_CHANNEL_DEPTH.to_string())
                .parse()
                .unwrap_or(ARCHIVE_CHANNEL_DEPTH),
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| SWEEP_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(SWEEP_INTERVAL_SECS),
            max_body_bytes: env::var("MAX_BODY_BYTES")
                .unwrap_or_else(|_| MAX_BODY_BYTES.to_string())
                .parse()
                .unwrap_or(MAX_BODY_BYTES),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.base.jwt_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 characters long"
            ));
        }

        if self.location_token_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "LOCATION_TOKEN_SECRET must be at least 32 characters long"
            ));
        }

        if self.location_token_ttl_secs == 0 {
            return Err(anyhow::anyhow!("LOCATION_TOKEN_TTL_SECS must be non-zero"));
        }

        if self.ledger_backend == LedgerBackend::Postgres {
            match self.database_url {
                Some(ref url) if url.starts_with("postgresql://") => {}
                _ => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be a valid PostgreSQL connection string when using the postgres ledger"
                    ));
                }
            }
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
            }
            StorageBackend::Memory => {}
        }

        Ok(())
    }
}
