use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Upload lifecycle state.
///
/// Transitions are Pending→Completed and any→Expired/Deleted; a completed
/// upload never returns to Pending. The ledger enforces this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Pending,
    Completed,
    Expired,
    Deleted,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Pending => "pending",
            UploadState::Completed => "completed",
            UploadState::Expired => "expired",
            UploadState::Deleted => "deleted",
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadState {
    type Err = crate::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadState::Pending),
            "completed" => Ok(UploadState::Completed),
            "expired" => Ok(UploadState::Expired),
            "deleted" => Ok(UploadState::Deleted),
            other => Err(crate::AppError::Internal(format!(
                "Unknown upload state: {}",
                other
            ))),
        }
    }
}

/// Per-file write state within an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WriteState {
    Reserved,
    Written,
    Failed,
}

impl WriteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteState::Reserved => "reserved",
            WriteState::Written => "written",
            WriteState::Failed => "failed",
        }
    }
}

impl FromStr for WriteState {
    type Err = crate::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(WriteState::Reserved),
            "written" => Ok(WriteState::Written),
            "failed" => Ok(WriteState::Failed),
            other => Err(crate::AppError::Internal(format!(
                "Unknown write state: {}",
                other
            ))),
        }
    }
}

/// Declared metadata for one file, supplied when the upload is created.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct FileSpec {
    /// Original filename
    #[validate(length(
        min = 1,
        max = 255,
        message = "Filename must be between 1 and 255 characters"
    ))]
    pub name: String,
    /// Declared size in bytes
    pub size: u64,
}

/// One file inside an upload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FileEntry {
    pub id: Uuid,
    pub name: String,
    pub declared_size: u64,
    /// Storage object key the file bytes live under.
    #[serde(skip_serializing, default)]
    pub storage_key: String,
    pub write_state: WriteState,
    /// Size reported by storage when the write was confirmed.
    pub observed_size: Option<u64>,
    /// Content hash reported by storage when the write was confirmed.
    pub content_hash: Option<String>,
}

impl FileEntry {
    pub fn new(upload_id: Uuid, spec: FileSpec) -> Self {
        let id = Uuid::new_v4();
        FileEntry {
            id,
            name: spec.name,
            declared_size: spec.size,
            storage_key: format!("transfers/{}/{}", upload_id, id),
            write_state: WriteState::Reserved,
            observed_size: None,
            content_hash: None,
        }
    }

    pub fn is_written(&self) -> bool {
        self.write_state == WriteState::Written
    }
}

/// A sender-created batch of files awaiting or having completed transfer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Upload {
    pub id: Uuid,
    /// Authenticated owner, when the sender presented credentials. Anonymous
    /// uploads carry no owner and are reachable only through their id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Uuid>,
    pub state: UploadState,
    /// File entries in declaration order. Archive members are emitted in
    /// exactly this order.
    pub files: Vec<FileEntry>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Upload {
    /// Build a new pending upload with ids generated for every declared file.
    pub fn new(owner: Option<Uuid>, specs: Vec<FileSpec>, expires_at: Option<DateTime<Utc>>) -> Self {
        let id = Uuid::new_v4();
        let files = specs.into_iter().map(|s| FileEntry::new(id, s)).collect();
        Upload {
            id,
            owner,
            state: UploadState::Pending,
            files,
            created_at: Utc::now(),
            completed_at: None,
            expires_at,
        }
    }

    pub fn file(&self, file_id: Uuid) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.id == file_id)
    }

    pub fn file_mut(&mut self, file_id: Uuid) -> Option<&mut FileEntry> {
        self.files.iter_mut().find(|f| f.id == file_id)
    }

    /// Ids of the file entries not yet written, in declaration order.
    pub fn missing_files(&self) -> Vec<Uuid> {
        self.files
            .iter()
            .filter(|f| !f.is_written())
            .map(|f| f.id)
            .collect()
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
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

    #[test]
    fn test_new_upload_is_pending_with_reserved_entries() {
        let upload = Upload::new(None, specs(), None);
        assert_eq!(upload.state, UploadState::Pending);
        assert_eq!(upload.files.len(), 2);
        assert!(upload
            .files
            .iter()
            .all(|f| f.write_state == WriteState::Reserved));
        assert_eq!(upload.missing_files().len(), 2);
    }

    #[test]
    fn test_storage_keys_are_scoped_to_the_upload() {
        let upload = Upload::new(None, specs(), None);
        for entry in &upload.files {
            assert!(entry
                .storage_key
                .starts_with(&format!("transfers/{}/", upload.id)));
        }
    }

    #[test]
    fn test_missing_files_tracks_write_state() {
        let mut upload = Upload::new(None, specs(), None);
        let first = upload.files[0].id;
        upload.file_mut(first).unwrap().write_state = WriteState::Written;
        assert_eq!(upload.missing_files(), vec![upload.files[1].id]);
    }

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [
            UploadState::Pending,
            UploadState::Completed,
            UploadState::Expired,
            UploadState::Deleted,
        ] {
            assert_eq!(state.as_str().parse::<UploadState>().unwrap(), state);
        }
        for state in [WriteState::Reserved, WriteState::Written, WriteState::Failed] {
            assert_eq!(state.as_str().parse::<WriteState>().unwrap(), state);
        }
    }

    #[test]
    fn test_past_expiry() {
        let mut upload = Upload::new(None, specs(), None);
        assert!(!upload.is_past_expiry(Utc::now()));
        upload.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        assert!(upload.is_past_expiry(Utc::now()));
    }
}
