//! Sender-facing handlers: create uploads, issue write locations, complete,
//! list, delete.

use crate::auth::{OptionalPrincipal, Principal};
use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::gateway;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Duration, Utc};
use courier_core::models::{FileSpec, Location, Upload};
use courier_core::AppError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateUploadRequest {
    /// Declared files, in the order archive members will later be emitted
    #[validate(
        length(min = 1, max = 100, message = "An upload must declare between 1 and 100 files"),
        nested
    )]
    pub files: Vec<FileSpec>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CompleteUploadResponse {
    pub upload: Upload,
    /// Recipient-facing download derived from the completed upload
    pub download_id: Uuid,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct UploadUrlQuery {
    /// Request a write location for an already-written file. Honored only
    /// when the deployment enables overwriting.
    #[serde(default)]
    pub overwrite: bool,
}

/// Create an upload from declared file specs. No authentication required; a
/// valid bearer token stamps the upload with its owner.
#[utoipa::path(
    post,
    path = "/v1/uploader",
    tag = "uploader",
    request_body = CreateUploadRequest,
    responses(
        (status = 201, description = "Upload created", body = Upload),
        (status = 400, description = "Invalid input", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request), fields(operation = "create_upload"))]
pub async fn create_upload(
    State(state): State<Arc<AppState>>,
    principal: OptionalPrincipal,
    ValidatedJson(request): ValidatedJson<CreateUploadRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    request.validate().map_err(AppError::from)?;

    let owner = principal.0.map(|p| p.account_id);
    let expires_at = Some(Utc::now() + Duration::hours(state.config.upload_ttl_hours()));
    let upload = state
        .ledger
        .create_upload(owner, request.files, expires_at)
        .await?;

    tracing::info!(
        upload_id = %upload.id,
        files = upload.files.len(),
        anonymous = owner.is_none(),
        "Upload created"
    );

    Ok((StatusCode::CREATED, Json(upload)))
}

/// Issue a write location for one file. Capability-based: knowledge of the
/// upload id is the grant.
#[utoipa::path(
    get,
    path = "/v1/uploader/{upload_id}/file/{file_id}/upload_url",
    tag = "uploader",
    params(
        ("upload_id" = Uuid, Path, description = "Upload id"),
        ("file_id" = Uuid, Path, description = "File entry id"),
        UploadUrlQuery
    ),
    responses(
        (status = 200, description = "Write location issued", body = Location),
        (status = 404, description = "Unknown upload or file", body = ErrorResponse),
        (status = 409, description = "File already written", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(upload_id = %upload_id, file_id = %file_id))]
pub async fn create_upload_url(
    State(state): State<Arc<AppState>>,
    Path((upload_id, file_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<UploadUrlQuery>,
) -> Result<impl IntoResponse, HttpAppError> {
    let location = state
        .issuer
        .issue_write_location(upload_id, file_id, query.overwrite)
        .await?;
    Ok(Json(location))
}

/// Complete an upload once every declared file is written, and hand back the
/// derived download. Idempotent: repeated calls return the same download.
#[utoipa::path(
    put,
    path = "/v1/uploader/{upload_id}/complete",
    tag = "uploader",
    params(("upload_id" = Uuid, Path, description = "Upload id")),
    responses(
        (status = 200, description = "Upload completed", body = CompleteUploadResponse),
        (status = 404, description = "Unknown upload", body = ErrorResponse),
        (status = 409, description = "Files still missing", body = ErrorResponse),
        (status = 422, description = "Observed size mismatch", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(upload_id = %upload_id, operation = "complete_upload"))]
pub async fn complete_upload(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let upload = state.completion.complete(upload_id).await?;

    let expires_at = Some(Utc::now() + Duration::hours(state.config.download_ttl_hours()));
    let download = state.ledger.create_download(upload.id, expires_at).await?;

    tracing::info!(
        upload_id = %upload.id,
        download_id = %download.id,
        "Upload completed and download derived"
    );

    Ok(Json(CompleteUploadResponse {
        upload,
        download_id: download.id,
    }))
}

/// List uploads owned by the authenticated principal, newest first.
#[utoipa::path(
    get,
    path = "/v1/uploader",
    tag = "uploader",
    responses(
        (status = 200, description = "Uploads owned by the caller", body = [Upload]),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, principal), fields(operation = "list_uploads"))]
pub async fn list_uploads(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<impl IntoResponse, HttpAppError> {
    let uploads = state.ledger.list_uploads(principal.account_id).await?;
    Ok(Json(uploads))
}

/// Logically delete an owned upload. Non-owners get the same 404 an unknown
/// id would produce.
#[utoipa::path(
    delete,
    path = "/v1/uploader/{upload_id}",
    tag = "uploader",
    params(("upload_id" = Uuid, Path, description = "Upload id")),
    responses(
        (status = 204, description = "Upload deleted"),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 404, description = "Unknown upload (or not the owner)", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, principal), fields(upload_id = %upload_id, operation = "delete_upload"))]
pub async fn delete_upload(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(upload_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let upload = state.ledger.get_upload(upload_id).await?;
    gateway::require_owner(&principal, &upload)?;

    state.ledger.delete_upload(upload_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
