//! Route configuration and setup

use crate::api_doc;
use crate::constants::API_PREFIX;
use crate::handlers;
use crate::state::AppState;
use axum::{
    http::{header, HeaderValue, Method},
    routing::{delete, get, post, put},
    Router,
};
use courier_core::Config;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Setup all application routes
pub fn build_router(state: Arc<AppState>) -> Result<Router<()>, anyhow::Error> {
    let cors = setup_cors(&state.config)?;

    let api = Router::new()
        .route("/", get(handlers::health::index))
        .route("/health", get(handlers::health::health))
        // Sender surface
        .route(
            "/uploader",
            post(handlers::uploader::create_upload).get(handlers::uploader::list_uploads),
        )
        .route("/uploader/{upload_id}", delete(handlers::uploader::delete_upload))
        .route(
            "/uploader/{upload_id}/complete",
            put(handlers::uploader::complete_upload),
        )
        .route(
            "/uploader/{upload_id}/file/{file_id}/upload_url",
            get(handlers::uploader::create_upload_url),
        )
        // Recipient surface
        .route(
            "/downloader/{download_id}",
            get(handlers::downloader::show_download),
        )
        .route(
            "/downloader/{download_id}/file/{file_id}/download_url",
            get(handlers::downloader::create_download_url),
        )
        .route(
            "/downloader/{download_id}/zip",
            get(handlers::downloader::download_archive),
        )
        .route(
            "/downloader/{download_id}/selection/zip",
            post(handlers::downloader::download_selection_archive),
        )
        // Relayed transfer locations
        .route(
            "/transfer/{token}",
            put(handlers::transfer::put_transfer).get(handlers::transfer::get_transfer),
        );

    let app = Router::new()
        .nest(API_PREFIX, api)
        // axum's `nest` serves the inner `/` route at `/v1` but not `/v1/`;
        // the spec requires the banner at `/v1/`, so wire it explicitly too.
        .route(
            &format!("{API_PREFIX}/"),
            get(handlers::health::index),
        )
        .route("/api/openapi.json", get(api_doc::serve_openapi))
        .layer(RequestBodyLimitLayer::new(state.config.max_body_bytes()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}

/// Setup CORS configuration
fn setup_cors(config: &Config) -> Result<CorsLayer, anyhow::Error> {
    let cors = if config.cors_origins().contains(&"*".to_string()) {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins = config
            .cors_origins()
            .iter()
            .map(|origin| {
                origin
                    .parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin '{}': {}", origin, e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::PUT, Method::POST, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
    };

    Ok(cors)
}
