//! Relayed transfer endpoints: redeem a signed location token against this
//! service when the storage backend cannot presign natively.
//!
//! Verification is stateless (signature + expiry); the ledger is consulted
//! only for entry state, and the bytes stream straight between the request
//! and storage.

use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use courier_core::AppError;
use courier_services::Operation;
use futures::TryStreamExt;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use tokio_util::io::StreamReader;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct WriteConfirmation {
    pub file_id: Uuid,
    /// Bytes observed by storage for this write
    pub written: u64,
}

/// Redeem a write location: store the request body and confirm the entry.
#[utoipa::path(
    put,
    path = "/v1/transfer/{token}",
    tag = "transfer",
    params(("token" = String, Path, description = "Signed write location token")),
    responses(
        (status = 200, description = "File written and confirmed", body = WriteConfirmation),
        (status = 400, description = "Malformed token", body = ErrorResponse),
        (status = 404, description = "Unknown upload or file", body = ErrorResponse),
        (status = 409, description = "File already written", body = ErrorResponse),
        (status = 410, description = "Token expired", body = ErrorResponse),
        (status = 422, description = "Observed size differs from declared", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, token, body), fields(operation = "transfer_write"))]
pub async fn put_transfer(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    body: Body,
) -> Result<impl IntoResponse, HttpAppError> {
    let claims = state.issuer.verify(&token, Operation::Write)?;

    let upload = state.ledger.get_upload(claims.upload_id).await?;
    let entry = upload
        .file(claims.file_id)
        .ok_or_else(|| AppError::NotFound(format!("File not found: {}", claims.file_id)))?;

    // The token may have been issued before another writer finished.
    if entry.is_written() && !state.config.allow_overwrite() {
        return Err(AppError::AlreadyWritten(format!(
            "File {} is already written",
            claims.file_id
        ))
        .into());
    }

    let reader = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
    let written = state
        .storage
        .put_stream(&entry.storage_key, Box::pin(reader))
        .await?;

    let content_hash = state
        .storage
        .head(&entry.storage_key)
        .await
        .ok()
        .and_then(|info| info.etag);

    match state
        .ledger
        .mark_file_written(claims.upload_id, claims.file_id, written, content_hash)
        .await
    {
        Ok(()) => {
            tracing::info!(
                upload_id = %claims.upload_id,
                file_id = %claims.file_id,
                written,
                "File written"
            );
            Ok(Json(WriteConfirmation {
                file_id: claims.file_id,
                written,
            }))
        }
        Err(err @ AppError::SizeMismatch { .. }) => {
            // Do not leave mis-sized bytes behind the key.
            if let Err(del_err) = state.storage.delete(&entry.storage_key).await {
                tracing::warn!(
                    error = %del_err,
                    file_id = %claims.file_id,
                    "Failed to remove mis-sized object"
                );
            }
            Err(err.into())
        }
        Err(other) => Err(other.into()),
    }
}

/// Redeem a read location: stream the file bytes back.
#[utoipa::path(
    get,
    path = "/v1/transfer/{token}",
    tag = "transfer",
    params(("token" = String, Path, description = "Signed read location token")),
    responses(
        (status = 200, description = "File byte stream"),
        (status = 400, description = "Malformed token", body = ErrorResponse),
        (status = 404, description = "Unknown upload or file", body = ErrorResponse),
        (status = 410, description = "Token expired", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, token), fields(operation = "transfer_read"))]
pub async fn get_transfer(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Response, HttpAppError> {
    let claims = state.issuer.verify(&token, Operation::Read)?;

    let upload = state.ledger.get_upload(claims.upload_id).await?;
    let entry = upload
        .file(claims.file_id)
        .filter(|f| f.is_written())
        .ok_or_else(|| AppError::NotFound(format!("File not found: {}", claims.file_id)))?;

    let stream = state.storage.get_stream(&entry.storage_key).await?;

    let filename = entry.name.replace(['"', '\\', '\r', '\n'], "_");
    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        );
    if let Some(size) = entry.observed_size {
        builder = builder.header(header::CONTENT_LENGTH, size);
    }

    builder
        .body(Body::from_stream(stream))
        .map_err(|e| HttpAppError(AppError::Internal(e.to_string())))
}
