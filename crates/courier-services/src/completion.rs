//! Completion Coordinator: confirms that every declared file of an upload
//! was actually written before the ledger flips the upload to Completed.
//!
//! Relayed writes confirm their entry at write time; files pushed through
//! native presigned URLs are confirmed here by asking storage for the object.
//! The Pending→Completed transition itself is the ledger's entity-scoped
//! CAS, so concurrent completions of one upload converge on a single
//! transition and every caller observes success.

use courier_core::models::{Upload, UploadState};
use courier_core::AppError;
use courier_ledger::Ledger;
use courier_storage::{Storage, StorageError};
use std::sync::Arc;
use uuid::Uuid;

use crate::map_storage_error;

pub struct CompletionCoordinator {
    ledger: Arc<dyn Ledger>,
    storage: Arc<dyn Storage>,
}

impl CompletionCoordinator {
    pub fn new(ledger: Arc<dyn Ledger>, storage: Arc<dyn Storage>) -> Self {
        CompletionCoordinator { ledger, storage }
    }

    /// Complete an upload once every declared file is written.
    ///
    /// Fails with `Incomplete` carrying the still-missing entry ids, or with
    /// `SizeMismatch` when a stored object disagrees with its declared size.
    #[tracing::instrument(skip(self), fields(upload_id = %upload_id))]
    pub async fn complete(&self, upload_id: Uuid) -> Result<Upload, AppError> {
        let upload = self.ledger.get_upload(upload_id).await?;
        if upload.state == UploadState::Completed {
            return Ok(upload);
        }

        // Confirm unwritten entries against storage. Entries whose object
        // never arrived stay unwritten and end up in the Incomplete error.
        for entry in upload.files.iter().filter(|f| !f.is_written()) {
            match self.storage.head(&entry.storage_key).await {
                Ok(info) => {
                    self.ledger
                        .mark_file_written(upload_id, entry.id, info.size, info.etag)
                        .await?;
                }
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => return Err(map_storage_error(e)),
            }
        }

        let completed = self.ledger.complete_upload(upload_id).await?;
        tracing::info!(
            upload_id = %upload_id,
            files = completed.files.len(),
            "Upload completed"
        );
        Ok(completed)
    }
}
