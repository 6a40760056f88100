//! Backend identifiers shared between configuration and wiring code.

use serde::{Deserialize, Serialize};

/// Storage backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Local,
    /// Volatile in-process storage. Useful for development and tests.
    Memory,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::S3 => "s3",
            StorageBackend::Local => "local",
            StorageBackend::Memory => "memory",
        }
    }
}

/// Ledger backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Postgres,
    Memory,
}

impl LedgerBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerBackend::Postgres => "postgres",
            LedgerBackend::Memory => "memory",
        }
    }
}
