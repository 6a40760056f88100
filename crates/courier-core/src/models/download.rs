use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::upload::{FileEntry, Upload};

/// Recipient-facing view derived from a completed upload.
///
/// A download does not own file bytes; it only indexes the entries of its
/// source upload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Download {
    pub id: Uuid,
    pub upload_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: i64,
}

impl Download {
    pub fn new(upload_id: Uuid, expires_at: Option<DateTime<Utc>>) -> Self {
        Download {
            id: Uuid::new_v4(),
            upload_id,
            created_at: Utc::now(),
            expires_at,
            access_count: 0,
        }
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// A client-specified, non-empty set of file-entry ids requested as one
/// archive. Transient: validated per request, never persisted.
#[derive(Debug, Clone)]
pub struct Selection(Vec<Uuid>);

impl Selection {
    pub fn new(ids: Vec<Uuid>) -> Result<Self, AppError> {
        if ids.is_empty() {
            return Err(AppError::InvalidInput(
                "Selection must contain at least one file".to_string(),
            ));
        }
        let mut deduped = Vec::with_capacity(ids.len());
        for id in ids {
            if !deduped.contains(&id) {
                deduped.push(id);
            }
        }
        Ok(Selection(deduped))
    }

    pub fn ids(&self) -> &[Uuid] {
        &self.0
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.0.contains(&id)
    }
}

/// What to put in a requested archive: everything, or an explicit selection.
#[derive(Debug, Clone)]
pub enum ArchiveSelection {
    All,
    Files(Selection),
}

impl ArchiveSelection {
    /// Resolve the selection against the upload's file entries.
    ///
    /// Every requested id must belong to the upload; the result preserves
    /// declaration order regardless of the order ids were requested in, so
    /// repeated requests for the same selection produce identical archives.
    pub fn resolve<'a>(&self, upload: &'a Upload) -> Result<Vec<&'a FileEntry>, AppError> {
        match self {
            ArchiveSelection::All => Ok(upload.files.iter().collect()),
            ArchiveSelection::Files(selection) => {
                for id in selection.ids() {
                    if upload.file(*id).is_none() {
                        return Err(AppError::NotFound(format!(
                            "File {} is not part of this transfer",
                            id
                        )));
                    }
                }
                Ok(upload
                    .files
                    .iter()
                    .filter(|f| selection.contains(f.id))
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::upload::FileSpec;

    fn upload() -> Upload {
        Upload::new(
            None,
            vec![
                FileSpec {
                    name: "a.txt".to_string(),
                    size: 10,
                },
                FileSpec {
                    name: "b.txt".to_string(),
                    size: 20,
                },
                FileSpec {
                    name: "c.txt".to_string(),
                    size: 30,
                },
            ],
            None,
        )
    }

    #[test]
    fn test_empty_selection_rejected() {
        assert!(Selection::new(vec![]).is_err());
    }

    #[test]
    fn test_selection_deduplicates() {
        let id = Uuid::new_v4();
        let selection = Selection::new(vec![id, id]).unwrap();
        assert_eq!(selection.ids(), &[id]);
    }

    #[test]
    fn test_resolve_all_preserves_declaration_order() {
        let upload = upload();
        let entries = ArchiveSelection::All.resolve(&upload).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[test]
    fn test_resolve_selection_reorders_to_declaration_order() {
        let upload = upload();
        // Request c before a; members still come out in declaration order.
        let selection =
            Selection::new(vec![upload.files[2].id, upload.files[0].id]).unwrap();
        let entries = ArchiveSelection::Files(selection).resolve(&upload).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "c.txt"]);
    }

    #[test]
    fn test_resolve_rejects_foreign_ids() {
        let upload = upload();
        let selection = Selection::new(vec![upload.files[0].id, Uuid::new_v4()]).unwrap();
        let err = ArchiveSelection::Files(selection)
            .resolve(&upload)
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
