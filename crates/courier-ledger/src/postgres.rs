//! Postgres-backed ledger.
//!
//! Uses dynamic SQLx queries to avoid requiring DATABASE_URL/sqlx prepare at
//! build time. The completion CAS is a single conditional UPDATE scoped to
//! one upload row, so concurrent completions of the same upload resolve in
//! the database without any process-level lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::models::{Download, FileEntry, FileSpec, Upload, UploadState, WriteState};
use courier_core::AppError;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{Ledger, LedgerResult};

/// Filter applied to every upload read path: deleted/expired states and
/// past-expiry rows are invisible.
const READABLE: &str =
    "state NOT IN ('deleted', 'expired') AND (expires_at IS NULL OR expires_at > NOW())";

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the workspace migrations against the connected database.
    pub async fn migrate(pool: &PgPool) -> LedgerResult<()> {
        sqlx::migrate!("../../migrations")
            .run(pool)
            .await
            .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))?;
        Ok(())
    }

    async fn load_files(&self, upload_id: Uuid) -> LedgerResult<Vec<FileEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, declared_size, storage_key, write_state, observed_size, content_hash
            FROM upload_files
            WHERE upload_id = $1
            ORDER BY position
            "#,
        )
        .bind(upload_id)
        .fetch_all(&self.pool)
        .await?;

        let mut files = Vec::with_capacity(rows.len());
        for row in rows {
            let write_state: String = row.get("write_state");
            let declared_size: i64 = row.get("declared_size");
            let observed_size: Option<i64> = row.get("observed_size");
            files.push(FileEntry {
                id: row.get("id"),
                name: row.get("name"),
                declared_size: declared_size as u64,
                storage_key: row.get("storage_key"),
                write_state: write_state.parse::<WriteState>()?,
                observed_size: observed_size.map(|s| s as u64),
                content_hash: row.get("content_hash"),
            });
        }
        Ok(files)
    }

    async fn load_upload(&self, id: Uuid, readable_only: bool) -> LedgerResult<Option<Upload>> {
        let query = if readable_only {
            format!(
                "SELECT id, owner_id, state, created_at, completed_at, expires_at
                 FROM uploads WHERE id = $1 AND {}",
                READABLE
            )
        } else {
            "SELECT id, owner_id, state, created_at, completed_at, expires_at
             FROM uploads WHERE id = $1"
                .to_string()
        };

        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let state: String = row.get("state");
        Ok(Some(Upload {
            id: row.get("id"),
            owner: row.get("owner_id"),
            state: state.parse::<UploadState>()?,
            files: self.load_files(id).await?,
            created_at: row.get("created_at"),
            completed_at: row.get("completed_at"),
            expires_at: row.get("expires_at"),
        }))
    }

    fn download_from_row(row: &sqlx::postgres::PgRow) -> Download {
        Download {
            id: row.get("id"),
            upload_id: row.get("upload_id"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
            access_count: row.get("access_count"),
        }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn create_upload(
        &self,
        owner: Option<Uuid>,
        specs: Vec<FileSpec>,
        expires_at: Option<DateTime<Utc>>,
    ) -> LedgerResult<Upload> {
        let upload = Upload::new(owner, specs, expires_at);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO uploads (id, owner_id, state, created_at, expires_at)
            VALUES ($1, $2, 'pending', $3, $4)
            "#,
        )
        .bind(upload.id)
        .bind(upload.owner)
        .bind(upload.created_at)
        .bind(upload.expires_at)
        .execute(&mut *tx)
        .await?;

        for (position, file) in upload.files.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO upload_files (id, upload_id, name, declared_size, storage_key, write_state, position)
                VALUES ($1, $2, $3, $4, $5, 'reserved', $6)
                "#,
            )
            .bind(file.id)
            .bind(upload.id)
            .bind(&file.name)
            .bind(file.declared_size as i64)
            .bind(&file.storage_key)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(upload)
    }

    async fn get_upload(&self, id: Uuid) -> LedgerResult<Upload> {
        self.load_upload(id, true)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Upload not found: {}", id)))
    }

    async fn list_uploads(&self, owner: Uuid) -> LedgerResult<Vec<Upload>> {
        let rows = sqlx::query(&format!(
            "SELECT id FROM uploads WHERE owner_id = $1 AND {} ORDER BY created_at DESC",
            READABLE
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        let mut uploads = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.get("id");
            if let Some(upload) = self.load_upload(id, true).await? {
                uploads.push(upload);
            }
        }
        Ok(uploads)
    }

    async fn mark_file_written(
        &self,
        upload_id: Uuid,
        file_id: Uuid,
        observed_size: u64,
        content_hash: Option<String>,
    ) -> LedgerResult<()> {
        // The upload must still be in the readable set.
        self.get_upload(upload_id).await?;

        // Conditional update: only a matching declared size flips the entry
        // to written.
        let result = sqlx::query(
            r#"
            UPDATE upload_files
            SET write_state = 'written', observed_size = $3, content_hash = $4
            WHERE upload_id = $1 AND id = $2 AND declared_size = $3
            "#,
        )
        .bind(upload_id)
        .bind(file_id)
        .bind(observed_size as i64)
        .bind(content_hash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let row = sqlx::query(
            "SELECT declared_size FROM upload_files WHERE upload_id = $1 AND id = $2",
        )
        .bind(upload_id)
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("File not found: {}", file_id)))?;

        let declared: i64 = row.get("declared_size");

        // Declared size disagreed with what storage observed: the entry is a
        // hard failure until rewritten with the right size.
        sqlx::query(
            r#"
            UPDATE upload_files
            SET write_state = 'failed', observed_size = $3, content_hash = NULL
            WHERE upload_id = $1 AND id = $2
            "#,
        )
        .bind(upload_id)
        .bind(file_id)
        .bind(observed_size as i64)
        .execute(&self.pool)
        .await?;

        Err(AppError::SizeMismatch {
            file_id,
            declared: declared as u64,
            observed: observed_size,
        })
    }

    async fn complete_upload(&self, id: Uuid) -> LedgerResult<Upload> {
        // Single conditional update: the transition happens at most once no
        // matter how many completions race, and only when every entry is
        // written.
        let result = sqlx::query(&format!(
            r#"
            UPDATE uploads
            SET state = 'completed', completed_at = NOW()
            WHERE id = $1 AND state = 'pending' AND {}
              AND NOT EXISTS (
                  SELECT 1 FROM upload_files
                  WHERE upload_id = $1 AND write_state <> 'written'
              )
            "#,
            READABLE
        ))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            tracing::info!(upload_id = %id, "Upload completed");
            return self.get_upload(id).await;
        }

        // Lost the update: distinguish already-completed (idempotent
        // success) from missing files and missing upload.
        let upload = self
            .load_upload(id, true)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Upload not found: {}", id)))?;

        match upload.state {
            UploadState::Completed => Ok(upload),
            UploadState::Pending => Err(AppError::Incomplete {
                missing: upload.missing_files(),
            }),
            UploadState::Expired | UploadState::Deleted => {
                Err(AppError::NotFound(format!("Upload not found: {}", id)))
            }
        }
    }

    async fn delete_upload(&self, id: Uuid) -> LedgerResult<()> {
        let result = sqlx::query(
            "UPDATE uploads SET state = 'deleted' WHERE id = $1 AND state <> 'deleted'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Upload not found: {}", id)));
        }

        // Cascade: the derived download stops existing as an index entry.
        sqlx::query("DELETE FROM downloads WHERE upload_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::info!(upload_id = %id, "Upload deleted");
        Ok(())
    }

    async fn create_download(
        &self,
        upload_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> LedgerResult<Download> {
        let upload = self.get_upload(upload_id).await?;
        if upload.state != UploadState::Completed {
            return Err(AppError::InvalidInput("Upload is not completed".to_string()));
        }

        // Get-or-create keyed on the upload: the unique constraint makes
        // concurrent creations converge on one row.
        let download = Download::new(upload_id, expires_at);
        sqlx::query(
            r#"
            INSERT INTO downloads (id, upload_id, created_at, expires_at, access_count)
            VALUES ($1, $2, $3, $4, 0)
            ON CONFLICT (upload_id) DO NOTHING
            "#,
        )
        .bind(download.id)
        .bind(download.upload_id)
        .bind(download.created_at)
        .bind(download.expires_at)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, upload_id, created_at, expires_at, access_count
             FROM downloads WHERE upload_id = $1",
        )
        .bind(upload_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Self::download_from_row(&row))
    }

    async fn get_download(&self, id: Uuid) -> LedgerResult<Download> {
        // Count the access and fetch in one statement, gated on the source
        // upload still being readable.
        let row = sqlx::query(
            r#"
            UPDATE downloads d
            SET access_count = d.access_count + 1
            FROM uploads u
            WHERE d.id = $1 AND u.id = d.upload_id
              AND (d.expires_at IS NULL OR d.expires_at > NOW())
              AND u.state NOT IN ('deleted', 'expired')
              AND (u.expires_at IS NULL OR u.expires_at > NOW())
            RETURNING d.id, d.upload_id, d.created_at, d.expires_at, d.access_count
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(Self::download_from_row(&row));
        }

        // Distinguish an expired download from a vanished one.
        let row = sqlx::query(
            r#"
            SELECT d.expires_at
            FROM downloads d JOIN uploads u ON u.id = d.upload_id
            WHERE d.id = $1
              AND u.state NOT IN ('deleted', 'expired')
              AND (u.expires_at IS NULL OR u.expires_at > NOW())
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(_) => Err(AppError::Expired(format!("Download expired: {}", id))),
            None => Err(AppError::NotFound(format!("Download not found: {}", id))),
        }
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> LedgerResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE uploads
            SET state = 'expired'
            WHERE state IN ('pending', 'completed')
              AND expires_at IS NOT NULL AND expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        let flipped = result.rows_affected();
        if flipped > 0 {
            tracing::info!(flipped, "Expired uploads swept");
        }
        Ok(flipped)
    }
}
