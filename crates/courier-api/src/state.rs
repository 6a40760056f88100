//! Application state shared by every handler.

use courier_core::Config;
use courier_ledger::Ledger;
use courier_services::{ArchiveStreamer, CompletionCoordinator, LocationIssuer};
use courier_storage::Storage;
use std::sync::Arc;
use std::time::Duration;

pub struct AppState {
    pub config: Config,
    pub ledger: Arc<dyn Ledger>,
    pub storage: Arc<dyn Storage>,
    pub issuer: LocationIssuer,
    pub completion: CompletionCoordinator,
    pub archiver: ArchiveStreamer,
}

impl AppState {
    /// Wire the transfer services over the configured ledger and storage.
    pub fn new(config: Config, ledger: Arc<dyn Ledger>, storage: Arc<dyn Storage>) -> Self {
        let issuer = LocationIssuer::new(
            ledger.clone(),
            storage.clone(),
            config.location_token_secret().as_bytes().to_vec(),
            Duration::from_secs(config.location_token_ttl_secs()),
            config.public_base_url(),
            config.allow_overwrite(),
        );
        let completion = CompletionCoordinator::new(ledger.clone(), storage.clone());
        let archiver = ArchiveStreamer::new(
            storage.clone(),
            config.archive_chunk_bytes(),
            config.archive_channel_depth(),
        );

        AppState {
            config,
            ledger,
            storage,
            issuer,
            completion,
            archiver,
        }
    }
}
