use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A time-bounded capability for one read or write of one file: an endpoint
/// plus whatever credential the endpoint embeds (a native presigned URL, or
/// a relayed transfer URL carrying a signed token).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Location {
    /// URL to send the file bytes to (write) or fetch them from (read).
    pub url: String,
    /// HTTP method to use against `url`.
    pub method: String,
    pub expires_at: DateTime<Utc>,
}
