//! Recipient-facing handlers: browse a download, issue read locations, and
//! stream archives of all or selected files.

use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use courier_core::models::{ArchiveSelection, Download, Location, Selection, Upload};
use courier_core::AppError;
use courier_services::ArchiveMember;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct DownloadFileResponse {
    pub id: Uuid,
    pub name: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DownloadResponse {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: i64,
    pub files: Vec<DownloadFileResponse>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SelectionRequest {
    /// File entry ids to include in the archive
    pub file_ids: Vec<Uuid>,
}

/// Resolve a download id to its record and source upload, hiding upload-level
/// failures behind the download id the caller actually knows about.
async fn resolve(
    state: &AppState,
    download_id: Uuid,
) -> Result<(Download, Upload), HttpAppError> {
    let download = state.ledger.get_download(download_id).await?;
    let upload = state
        .ledger
        .get_upload(download.upload_id)
        .await
        .map_err(|_| AppError::NotFound(format!("Download not found: {}", download_id)))?;
    Ok((download, upload))
}

/// Fetch download metadata and its file listing.
#[utoipa::path(
    get,
    path = "/v1/downloader/{download_id}",
    tag = "downloader",
    params(("download_id" = Uuid, Path, description = "Download id")),
    responses(
        (status = 200, description = "Download metadata", body = DownloadResponse),
        (status = 404, description = "Unknown download", body = ErrorResponse),
        (status = 410, description = "Download expired", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(download_id = %download_id))]
pub async fn show_download(
    State(state): State<Arc<AppState>>,
    Path(download_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let (download, upload) = resolve(&state, download_id).await?;

    let files = upload
        .files
        .iter()
        .map(|f| DownloadFileResponse {
            id: f.id,
            name: f.name.clone(),
            size: f.observed_size.unwrap_or(f.declared_size),
            content_hash: f.content_hash.clone(),
        })
        .collect();

    Ok(Json(DownloadResponse {
        id: download.id,
        created_at: download.created_at,
        expires_at: download.expires_at,
        access_count: download.access_count,
        files,
    }))
}

/// Issue a read location for one file of the download.
#[utoipa::path(
    get,
    path = "/v1/downloader/{download_id}/file/{file_id}/download_url",
    tag = "downloader",
    params(
        ("download_id" = Uuid, Path, description = "Download id"),
        ("file_id" = Uuid, Path, description = "File entry id")
    ),
    responses(
        (status = 200, description = "Read location issued", body = Location),
        (status = 404, description = "Unknown download or file", body = ErrorResponse),
        (status = 410, description = "Download expired", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(download_id = %download_id, file_id = %file_id))]
pub async fn create_download_url(
    State(state): State<Arc<AppState>>,
    Path((download_id, file_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, HttpAppError> {
    let location = state.issuer.issue_read_location(download_id, file_id).await?;
    Ok(Json(location))
}

/// Stream an archive of the full download.
#[utoipa::path(
    get,
    path = "/v1/downloader/{download_id}/zip",
    tag = "downloader",
    params(("download_id" = Uuid, Path, description = "Download id")),
    responses(
        (status = 200, description = "Archive stream (gzip-compressed tar)"),
        (status = 404, description = "Unknown download", body = ErrorResponse),
        (status = 410, description = "Download expired", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(download_id = %download_id, operation = "archive_all"))]
pub async fn download_archive(
    State(state): State<Arc<AppState>>,
    Path(download_id): Path<Uuid>,
) -> Result<Response, HttpAppError> {
    stream_archive(&state, download_id, ArchiveSelection::All).await
}

/// Stream an archive of an explicit selection of the download's files.
#[utoipa::path(
    post,
    path = "/v1/downloader/{download_id}/selection/zip",
    tag = "downloader",
    params(("download_id" = Uuid, Path, description = "Download id")),
    request_body = SelectionRequest,
    responses(
        (status = 200, description = "Archive stream (gzip-compressed tar)"),
        (status = 400, description = "Empty selection", body = ErrorResponse),
        (status = 404, description = "Unknown download or foreign file id", body = ErrorResponse),
        (status = 410, description = "Download expired", body = ErrorResponse)
    )
)]
#[tracing::instrument(
    skip(state, request),
    fields(download_id = %download_id, operation = "archive_selection")
)]
pub async fn download_selection_archive(
    State(state): State<Arc<AppState>>,
    Path(download_id): Path<Uuid>,
    Json(request): Json<SelectionRequest>,
) -> Result<Response, HttpAppError> {
    let selection = Selection::new(request.file_ids)?;
    stream_archive(&state, download_id, ArchiveSelection::Files(selection)).await
}

/// Validate the selection, then hand the resolved members to the archive
/// pipeline. Validation happens before the response starts so bad requests
/// fail with a status instead of a truncated stream.
async fn stream_archive(
    state: &AppState,
    download_id: Uuid,
    selection: ArchiveSelection,
) -> Result<Response, HttpAppError> {
    let (download, upload) = resolve(state, download_id).await?;
    let download_id = download.id;
    let entries = selection.resolve(&upload)?;

    let members: Vec<ArchiveMember> = entries.into_iter().map(ArchiveMember::from).collect();
    tracing::info!(
        download_id = %download_id,
        members = members.len(),
        "Streaming archive"
    );

    let body = Body::from_stream(state.archiver.stream(members));
    Response::builder()
        .header(header::CONTENT_TYPE, "application/gzip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.tar.gz\"", download_id),
        )
        .body(body)
        .map_err(|e| HttpAppError(AppError::Internal(e.to_string())))
}
