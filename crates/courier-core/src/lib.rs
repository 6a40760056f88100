//! Core domain types for the courier transfer service.
//!
//! This crate holds everything the other crates agree on: the configuration
//! surface, the unified error taxonomy with its HTTP metadata, the transfer
//! data model (uploads, file entries, downloads, selections), and the
//! storage/ledger backend identifiers used by configuration.

pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;

pub use config::{BaseConfig, Config, TransferConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use storage_types::{LedgerBackend, StorageBackend};
