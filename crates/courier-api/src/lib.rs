//! HTTP surface of the courier transfer service.
//!
//! Routing mirrors the capability-URL model of the transfer core: upload
//! creation, completion, and location issuance need nothing but knowledge of
//! the upload id; listing and deletion require an authenticated owner;
//! download paths are public. Handlers return
//! `Result<impl IntoResponse, HttpAppError>` so every failure renders as the
//! shared `ErrorResponse` shape.

pub mod api_doc;
pub mod auth;
pub mod constants;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod setup;
pub mod state;
pub mod telemetry;
