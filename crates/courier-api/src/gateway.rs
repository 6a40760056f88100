//! Access Gateway: maps principals to what they may do with ledger entities.
//!
//! The transfer core is capability-based rather than ACL-based: creating an
//! upload needs no identity, and completing one or requesting locations
//! needs only knowledge of its id — possession of the unguessable random id
//! *is* the grant. Identity enters only for owner-scoped operations
//! (listing, deletion). Ownership failures deliberately answer NotFound, not
//! Forbidden, so probing an id as the wrong principal reveals nothing about
//! its existence.

use crate::auth::Principal;
use courier_core::models::Upload;
use courier_core::AppError;

/// Require that the principal owns the upload. Anonymous uploads have no
/// owner and cannot be claimed by anyone.
pub fn require_owner(principal: &Principal, upload: &Upload) -> Result<(), AppError> {
    if upload.owner == Some(principal.account_id) {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("Upload not found: {}", upload.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::models::FileSpec;
    use uuid::Uuid;

    fn upload(owner: Option<Uuid>) -> Upload {
        Upload::new(
            owner,
            vec![FileSpec {
                name: "a.txt".to_string(),
                size: 1,
            }],
            None,
        )
    }

    #[test]
    fn test_owner_is_allowed() {
        let account_id = Uuid::new_v4();
        let principal = Principal { account_id };
        assert!(require_owner(&principal, &upload(Some(account_id))).is_ok());
    }

    #[test]
    fn test_non_owner_sees_not_found() {
        let principal = Principal {
            account_id: Uuid::new_v4(),
        };
        let err = require_owner(&principal, &upload(Some(Uuid::new_v4()))).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_anonymous_uploads_have_no_owner() {
        let principal = Principal {
            account_id: Uuid::new_v4(),
        };
        assert!(require_owner(&principal, &upload(None)).is_err());
    }
}
