//! Transfer Ledger: the durable record of uploads, their file entries, and
//! the downloads derived from them.
//!
//! The ledger owns the upload state machine. Transitions are
//! Pending→Completed and any→Expired/Deleted; a completed upload never
//! returns to Pending. Completion is an entity-scoped compare-and-swap:
//! concurrent attempts on one upload resolve to a single transition, losers
//! observe the completed state and report success. Deleted and expired
//! uploads are excluded from every read path the moment they transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::models::{Download, FileSpec, Upload};
use courier_core::AppError;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

pub type LedgerResult<T> = Result<T, AppError>;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Create a pending upload with one reserved file entry per spec.
    async fn create_upload(
        &self,
        owner: Option<Uuid>,
        specs: Vec<FileSpec>,
        expires_at: Option<DateTime<Utc>>,
    ) -> LedgerResult<Upload>;

    /// Fetch an upload. Unknown, deleted, and expired uploads all surface as
    /// NotFound so an id leaks nothing once it stops being valid.
    async fn get_upload(&self, id: Uuid) -> LedgerResult<Upload>;

    /// Uploads owned by the given principal, newest first.
    async fn list_uploads(&self, owner: Uuid) -> LedgerResult<Vec<Upload>>;

    /// Record a confirmed write for one file entry.
    ///
    /// The observed size must equal the declared size; a mismatch marks the
    /// entry Failed and returns `SizeMismatch` — partial writes never count
    /// toward completion. Distinct entries of one upload may be confirmed
    /// concurrently.
    async fn mark_file_written(
        &self,
        upload_id: Uuid,
        file_id: Uuid,
        observed_size: u64,
        content_hash: Option<String>,
    ) -> LedgerResult<()>;

    /// Atomically flip a fully-written upload to Completed.
    ///
    /// Fails with `Incomplete` (carrying the missing entry ids) while any
    /// entry is unwritten. Calling on an already-completed upload succeeds
    /// without a second transition, making the operation idempotent under
    /// concurrent retries.
    async fn complete_upload(&self, id: Uuid) -> LedgerResult<Upload>;

    /// Logically delete an upload and drop its derived downloads. Physical
    /// reclamation of stored bytes is the reaper's job, not the ledger's.
    async fn delete_upload(&self, id: Uuid) -> LedgerResult<()>;

    /// Get or create the download derived from a completed upload. Repeated
    /// calls return the same download, so retried completions stay
    /// idempotent end to end.
    async fn create_download(
        &self,
        upload_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> LedgerResult<Download>;

    /// Fetch a download and count the access. NotFound when the download is
    /// unknown or its upload left the readable set; Expired when the
    /// download itself is past its validity window.
    async fn get_download(&self, id: Uuid) -> LedgerResult<Download>;

    /// Flip uploads past their expiry to Expired. Returns how many flipped.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> LedgerResult<u64>;
}
