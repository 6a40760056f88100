//! Application wiring: backend construction, background sweeper, and router.

pub mod routes;
pub mod server;

use crate::state::AppState;
use anyhow::Context;
use axum::Router;
use chrono::Utc;
use courier_core::{Config, LedgerBackend, StorageBackend};
use courier_ledger::{Ledger, MemoryLedger, PgLedger};
use courier_storage::{LocalStorage, MemoryStorage, S3Storage, Storage};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

/// Build ledger, storage, services, the background sweeper, and the router.
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, Router), anyhow::Error> {
    let storage = build_storage(&config).await?;
    let ledger = build_ledger(&config).await?;

    let state = Arc::new(AppState::new(config, ledger, storage));
    spawn_expiry_sweeper(&state);

    let router = routes::build_router(state.clone())?;
    Ok((state, router))
}

async fn build_storage(config: &Config) -> Result<Arc<dyn Storage>, anyhow::Error> {
    let storage: Arc<dyn Storage> = match config.storage_backend() {
        StorageBackend::S3 => {
            let bucket = config
                .s3_bucket()
                .context("S3_BUCKET is required for the s3 storage backend")?;
            let region = config
                .s3_region()
                .context("S3_REGION is required for the s3 storage backend")?;
            Arc::new(
                S3Storage::new(
                    bucket.to_string(),
                    region.to_string(),
                    config.s3_endpoint().map(String::from),
                )
                .await?,
            )
        }
        StorageBackend::Local => {
            let path = config
                .local_storage_path()
                .context("LOCAL_STORAGE_PATH is required for the local storage backend")?;
            Arc::new(LocalStorage::new(path).await?)
        }
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
    };

    tracing::info!(backend = storage.backend_type().as_str(), "Storage ready");
    Ok(storage)
}

async fn build_ledger(config: &Config) -> Result<Arc<dyn Ledger>, anyhow::Error> {
    let ledger: Arc<dyn Ledger> = match config.ledger_backend() {
        LedgerBackend::Memory => Arc::new(MemoryLedger::new()),
        LedgerBackend::Postgres => {
            let url = config
                .database_url()
                .context("DATABASE_URL is required for the postgres ledger")?;
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections())
                .acquire_timeout(Duration::from_secs(config.db_timeout_seconds()))
                .connect(url)
                .await
                .context("Failed to connect to database")?;
            PgLedger::migrate(&pool).await?;
            Arc::new(PgLedger::new(pool))
        }
    };

    tracing::info!(backend = config.ledger_backend().as_str(), "Ledger ready");
    Ok(ledger)
}

/// Periodically flip uploads past their TTL to Expired. Logical only; a
/// separate reaper reclaims the stored bytes.
fn spawn_expiry_sweeper(state: &Arc<AppState>) {
    let interval_secs = state.config.sweep_interval_secs();
    if interval_secs == 0 {
        return;
    }

    let ledger = state.ledger.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = ledger.sweep_expired(Utc::now()).await {
                tracing::warn!(error = %e, "Expiry sweep failed");
            }
        }
    });
}
