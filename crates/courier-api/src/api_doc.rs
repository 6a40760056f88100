//! OpenAPI document for the transfer API.

use axum::Json;
use courier_core::models::{
    Download, FileEntry, FileSpec, Location, Upload, UploadState, WriteState,
};
use utoipa::OpenApi;

use crate::error::ErrorResponse;
use crate::handlers::downloader::{DownloadFileResponse, DownloadResponse, SelectionRequest};
use crate::handlers::transfer::WriteConfirmation;
use crate::handlers::uploader::{CompleteUploadResponse, CreateUploadRequest};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Courier API",
        description = "Self-hosted file transfer: uploads, signed transfer locations, downloads, and streamed archives."
    ),
    paths(
        crate::handlers::uploader::create_upload,
        crate::handlers::uploader::create_upload_url,
        crate::handlers::uploader::complete_upload,
        crate::handlers::uploader::list_uploads,
        crate::handlers::uploader::delete_upload,
        crate::handlers::downloader::show_download,
        crate::handlers::downloader::create_download_url,
        crate::handlers::downloader::download_archive,
        crate::handlers::downloader::download_selection_archive,
        crate::handlers::transfer::put_transfer,
        crate::handlers::transfer::get_transfer,
    ),
    components(schemas(
        Upload,
        FileEntry,
        FileSpec,
        UploadState,
        WriteState,
        Download,
        Location,
        CreateUploadRequest,
        CompleteUploadResponse,
        DownloadResponse,
        DownloadFileResponse,
        SelectionRequest,
        WriteConfirmation,
        ErrorResponse,
    )),
    tags(
        (name = "uploader", description = "Sender-facing transfer sessions"),
        (name = "downloader", description = "Recipient-facing downloads and archives"),
        (name = "transfer", description = "Relayed location redemption")
    )
)]
pub struct ApiDoc;

pub async fn serve_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
