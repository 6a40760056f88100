//! In-memory ledger.
//!
//! Uploads live behind per-entity mutexes inside an outer map guarded by a
//! read-write lock. The outer lock is held only for lookup and insertion;
//! every mutation (marking files written, the completion CAS, deletion)
//! happens under the one upload's own mutex, so unrelated transfers never
//! serialize against each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::models::{Download, FileSpec, Upload, UploadState, WriteState};
use courier_core::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{Ledger, LedgerResult};

#[derive(Default)]
pub struct MemoryLedger {
    uploads: RwLock<HashMap<Uuid, Arc<Mutex<Upload>>>>,
    downloads: RwLock<HashMap<Uuid, Arc<Mutex<Download>>>>,
    /// upload id → download id, guarding download get-or-create.
    download_by_upload: RwLock<HashMap<Uuid, Uuid>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn upload_entry(&self, id: Uuid) -> LedgerResult<Arc<Mutex<Upload>>> {
        self.uploads
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Upload not found: {}", id)))
    }

    fn readable(upload: &Upload, now: DateTime<Utc>) -> bool {
        !matches!(upload.state, UploadState::Deleted | UploadState::Expired)
            && !upload.is_past_expiry(now)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn create_upload(
        &self,
        owner: Option<Uuid>,
        specs: Vec<FileSpec>,
        expires_at: Option<DateTime<Utc>>,
    ) -> LedgerResult<Upload> {
        let upload = Upload::new(owner, specs, expires_at);
        self.uploads
            .write()
            .await
            .insert(upload.id, Arc::new(Mutex::new(upload.clone())));
        Ok(upload)
    }

    async fn get_upload(&self, id: Uuid) -> LedgerResult<Upload> {
        let entry = self.upload_entry(id).await?;
        let upload = entry.lock().await;
        if !Self::readable(&upload, Utc::now()) {
            return Err(AppError::NotFound(format!("Upload not found: {}", id)));
        }
        Ok(upload.clone())
    }

    async fn list_uploads(&self, owner: Uuid) -> LedgerResult<Vec<Upload>> {
        let entries: Vec<_> = self.uploads.read().await.values().cloned().collect();
        let now = Utc::now();
        let mut uploads = Vec::new();
        for entry in entries {
            let upload = entry.lock().await;
            if upload.owner == Some(owner) && Self::readable(&upload, now) {
                uploads.push(upload.clone());
            }
        }
        uploads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(uploads)
    }

    async fn mark_file_written(
        &self,
        upload_id: Uuid,
        file_id: Uuid,
        observed_size: u64,
        content_hash: Option<String>,
    ) -> LedgerResult<()> {
        let entry = self.upload_entry(upload_id).await?;
        let mut upload = entry.lock().await;
        if !Self::readable(&upload, Utc::now()) {
            return Err(AppError::NotFound(format!("Upload not found: {}", upload_id)));
        }

        let file = upload.file_mut(file_id).ok_or_else(|| {
            AppError::NotFound(format!("File not found: {}", file_id))
        })?;

        if observed_size != file.declared_size {
            let declared = file.declared_size;
            file.write_state = WriteState::Failed;
            file.observed_size = Some(observed_size);
            return Err(AppError::SizeMismatch {
                file_id,
                declared,
                observed: observed_size,
            });
        }

        file.write_state = WriteState::Written;
        file.observed_size = Some(observed_size);
        file.content_hash = content_hash;
        Ok(())
    }

    async fn complete_upload(&self, id: Uuid) -> LedgerResult<Upload> {
        let entry = self.upload_entry(id).await?;
        // The whole check-and-flip runs under this upload's mutex: of two
        // concurrent completions exactly one performs the transition and the
        // other observes Completed.
        let mut upload = entry.lock().await;
        if !Self::readable(&upload, Utc::now()) {
            return Err(AppError::NotFound(format!("Upload not found: {}", id)));
        }

        match upload.state {
            UploadState::Completed => Ok(upload.clone()),
            UploadState::Pending => {
                let missing = upload.missing_files();
                if !missing.is_empty() {
                    return Err(AppError::Incomplete { missing });
                }
                upload.state = UploadState::Completed;
                upload.completed_at = Some(Utc::now());
                Ok(upload.clone())
            }
            // Unreachable through the readable() guard.
            UploadState::Expired | UploadState::Deleted => {
                Err(AppError::NotFound(format!("Upload not found: {}", id)))
            }
        }
    }

    async fn delete_upload(&self, id: Uuid) -> LedgerResult<()> {
        let entry = self.upload_entry(id).await?;
        {
            let mut upload = entry.lock().await;
            if upload.state == UploadState::Deleted {
                return Err(AppError::NotFound(format!("Upload not found: {}", id)));
            }
            upload.state = UploadState::Deleted;
        }

        // Cascade: drop the derived download index entry.
        if let Some(download_id) = self.download_by_upload.write().await.remove(&id) {
            self.downloads.write().await.remove(&download_id);
        }
        Ok(())
    }

    async fn create_download(
        &self,
        upload_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> LedgerResult<Download> {
        {
            let entry = self.upload_entry(upload_id).await?;
            let upload = entry.lock().await;
            if !Self::readable(&upload, Utc::now()) {
                return Err(AppError::NotFound(format!("Upload not found: {}", upload_id)));
            }
            if upload.state != UploadState::Completed {
                return Err(AppError::InvalidInput(
                    "Upload is not completed".to_string(),
                ));
            }
        }

        // Holding the index write lock across lookup and insert makes the
        // get-or-create atomic under concurrent completions.
        let mut by_upload = self.download_by_upload.write().await;
        if let Some(existing_id) = by_upload.get(&upload_id) {
            if let Some(existing) = self.downloads.read().await.get(existing_id) {
                return Ok(existing.lock().await.clone());
            }
        }

        let download = Download::new(upload_id, expires_at);
        by_upload.insert(upload_id, download.id);
        self.downloads
            .write()
            .await
            .insert(download.id, Arc::new(Mutex::new(download.clone())));
        Ok(download)
    }

    async fn get_download(&self, id: Uuid) -> LedgerResult<Download> {
        let entry = self
            .downloads
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Download not found: {}", id)))?;

        let upload_id = entry.lock().await.upload_id;

        // The source upload gates every download read path.
        let upload_entry = self.upload_entry(upload_id).await.map_err(|_| {
            AppError::NotFound(format!("Download not found: {}", id))
        })?;
        {
            let upload = upload_entry.lock().await;
            if !Self::readable(&upload, Utc::now()) {
                return Err(AppError::NotFound(format!("Download not found: {}", id)));
            }
        }

        let mut download = entry.lock().await;
        if download.is_past_expiry(Utc::now()) {
            return Err(AppError::Expired(format!("Download expired: {}", id)));
        }
        download.access_count += 1;
        Ok(download.clone())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> LedgerResult<u64> {
        let entries: Vec<_> = self.uploads.read().await.values().cloned().collect();
        let mut flipped = 0;
        for entry in entries {
            let mut upload = entry.lock().await;
            if matches!(upload.state, UploadState::Pending | UploadState::Completed)
                && upload.is_past_expiry(now)
            {
                upload.state = UploadState::Expired;
                flipped += 1;
            }
        }
        if flipped > 0 {
            tracing::info!(flipped, "Expired uploads swept");
        }
        Ok(flipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> Vec<FileSpec> {
        vec![
            FileSpec {
                name: "a.txt".to_string(),
                size: 10,
            },
            FileSpec {
                name: "b.txt".to_string(),
                size: 20,
            },
        ]
    }

    async fn upload_with_all_written(ledger: &MemoryLedger) -> Upload {
        let upload = ledger.create_upload(None, specs(), None).await.unwrap();
        for file in &upload.files {
            ledger
                .mark_file_written(upload.id, file.id, file.declared_size, None)
                .await
                .unwrap();
        }
        upload
    }

    #[tokio::test]
    async fn test_complete_fails_until_every_file_is_written() {
        let ledger = MemoryLedger::new();
        let upload = ledger.create_upload(None, specs(), None).await.unwrap();

        // Nothing written yet.
        let err = ledger.complete_upload(upload.id).await.unwrap_err();
        assert!(matches!(&err, AppError::Incomplete { missing } if missing.len() == 2));

        // Write in reverse declaration order; the property holds regardless.
        ledger
            .mark_file_written(upload.id, upload.files[1].id, 20, None)
            .await
            .unwrap();
        let err = ledger.complete_upload(upload.id).await.unwrap_err();
        assert!(
            matches!(&err, AppError::Incomplete { missing } if missing == &vec![upload.files[0].id])
        );

        ledger
            .mark_file_written(upload.id, upload.files[0].id, 10, None)
            .await
            .unwrap();
        let completed = ledger.complete_upload(upload.id).await.unwrap();
        assert_eq!(completed.state, UploadState::Completed);
        assert!(completed.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_completion_has_one_winner_and_no_losers() {
        let ledger = Arc::new(MemoryLedger::new());
        let upload = upload_with_all_written(&ledger).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            let id = upload.id;
            handles.push(tokio::spawn(async move { ledger.complete_upload(id).await }));
        }

        let mut completed_at = Vec::new();
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.state, UploadState::Completed);
            completed_at.push(result.completed_at.unwrap());
        }
        // Every caller observed the same single transition.
        assert!(completed_at.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_size_mismatch_marks_entry_failed_and_blocks_completion() {
        let ledger = MemoryLedger::new();
        let upload = ledger.create_upload(None, specs(), None).await.unwrap();
        let short = upload.files[0].id;

        let err = ledger
            .mark_file_written(upload.id, short, 9, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::SizeMismatch {
                declared: 10,
                observed: 9,
                ..
            }
        ));

        let stored = ledger.get_upload(upload.id).await.unwrap();
        assert_eq!(stored.file(short).unwrap().write_state, WriteState::Failed);

        ledger
            .mark_file_written(upload.id, upload.files[1].id, 20, None)
            .await
            .unwrap();
        let err = ledger.complete_upload(upload.id).await.unwrap_err();
        assert!(matches!(&err, AppError::Incomplete { missing } if missing == &vec![short]));
    }

    #[tokio::test]
    async fn test_failed_entry_can_be_rewritten() {
        let ledger = MemoryLedger::new();
        let upload = ledger.create_upload(None, specs(), None).await.unwrap();
        let id = upload.files[0].id;

        let _ = ledger.mark_file_written(upload.id, id, 3, None).await;
        ledger
            .mark_file_written(upload.id, id, 10, Some("abc".to_string()))
            .await
            .unwrap();

        let stored = ledger.get_upload(upload.id).await.unwrap();
        let entry = stored.file(id).unwrap();
        assert_eq!(entry.write_state, WriteState::Written);
        assert_eq!(entry.content_hash.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_deleted_upload_unreachable_everywhere() {
        let ledger = MemoryLedger::new();
        let upload = upload_with_all_written(&ledger).await;
        ledger.complete_upload(upload.id).await.unwrap();
        let download = ledger.create_download(upload.id, None).await.unwrap();

        ledger.delete_upload(upload.id).await.unwrap();

        assert!(matches!(
            ledger.get_upload(upload.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            ledger.complete_upload(upload.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            ledger.get_download(download.id).await,
            Err(AppError::NotFound(_))
        ));
        // Deleting again reveals nothing either.
        assert!(matches!(
            ledger.delete_upload(upload.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_upload_unreachable_after_sweep() {
        let ledger = MemoryLedger::new();
        let expired_at = Some(Utc::now() - chrono::Duration::minutes(5));
        let upload = ledger
            .create_upload(None, specs(), expired_at)
            .await
            .unwrap();

        // Past-expiry uploads are excluded even before the sweep runs.
        assert!(matches!(
            ledger.get_upload(upload.id).await,
            Err(AppError::NotFound(_))
        ));

        let flipped = ledger.sweep_expired(Utc::now()).await.unwrap();
        assert_eq!(flipped, 1);
        assert_eq!(ledger.sweep_expired(Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_download_get_or_create_and_access_count() {
        let ledger = MemoryLedger::new();
        let upload = upload_with_all_written(&ledger).await;
        ledger.complete_upload(upload.id).await.unwrap();

        let first = ledger.create_download(upload.id, None).await.unwrap();
        let second = ledger.create_download(upload.id, None).await.unwrap();
        assert_eq!(first.id, second.id);

        assert_eq!(ledger.get_download(first.id).await.unwrap().access_count, 1);
        assert_eq!(ledger.get_download(first.id).await.unwrap().access_count, 2);
    }

    #[tokio::test]
    async fn test_download_for_pending_upload_rejected() {
        let ledger = MemoryLedger::new();
        let upload = ledger.create_upload(None, specs(), None).await.unwrap();
        assert!(matches!(
            ledger.create_download(upload.id, None).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_download_surfaces_expired() {
        let ledger = MemoryLedger::new();
        let upload = upload_with_all_written(&ledger).await;
        ledger.complete_upload(upload.id).await.unwrap();
        let download = ledger
            .create_download(upload.id, Some(Utc::now() - chrono::Duration::minutes(1)))
            .await
            .unwrap();

        assert!(matches!(
            ledger.get_download(download.id).await,
            Err(AppError::Expired(_))
        ));
    }

    #[tokio::test]
    async fn test_list_uploads_scoped_to_owner() {
        let ledger = MemoryLedger::new();
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();

        ledger
            .create_upload(Some(owner), specs(), None)
            .await
            .unwrap();
        ledger
            .create_upload(Some(other), specs(), None)
            .await
            .unwrap();
        ledger.create_upload(None, specs(), None).await.unwrap();

        let listed = ledger.list_uploads(owner).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].owner, Some(owner));
    }
}
