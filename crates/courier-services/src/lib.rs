//! Transfer orchestration services: location issuance, completion
//! coordination, and streaming archive assembly.

pub mod archive;
pub mod completion;
pub mod issuer;

pub use archive::{ArchiveMember, ArchiveStream, ArchiveStreamer};
pub use completion::CompletionCoordinator;
pub use issuer::{LocationClaims, LocationIssuer, Operation};

use courier_core::AppError;
use courier_storage::StorageError;

/// Lift storage failures into the application error taxonomy.
pub(crate) fn map_storage_error(err: StorageError) -> AppError {
    match err {
        StorageError::NotFound(key) => AppError::NotFound(format!("Object not found: {}", key)),
        StorageError::InvalidKey(msg) => AppError::InvalidInput(msg),
        other => AppError::Storage(other.to_string()),
    }
}
