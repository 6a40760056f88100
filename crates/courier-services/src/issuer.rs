//! Location Issuer: time-bounded, single-purpose transfer capabilities.
//!
//! A location is an endpoint plus a signed token. Tokens are stateless:
//! payload `expiry_ts (u64 BE) || upload_id (16 bytes) || file_id (16 bytes)
//! || operation (1 byte)`, token = base64url(payload || HMAC-SHA256(secret,
//! payload)). Expiry and tampering are checked locally at redemption, with no
//! ledger round trip and no server-side revocation before expiry — the short
//! validity window is what makes that tradeoff acceptable.
//!
//! Backends that can presign natively (S3) get presigned URLs; the others
//! get relayed transfer URLs carrying the signed token.

use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use courier_core::models::{Location, UploadState};
use courier_core::AppError;
use courier_ledger::Ledger;
use courier_storage::Storage;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::map_storage_error;

const PAYLOAD_LEN: usize = 8 + 16 + 16 + 1; // expiry + upload_id + file_id + operation
const MAC_LEN: usize = 32; // SHA256
const TOKEN_LEN: usize = PAYLOAD_LEN + MAC_LEN;

/// What a location authorizes: exactly one kind of access to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Write,
    Read,
}

impl Operation {
    fn as_byte(self) -> u8 {
        match self {
            Operation::Write => 1,
            Operation::Read => 2,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Operation::Write),
            2 => Some(Operation::Read),
            _ => None,
        }
    }

    pub fn http_method(self) -> &'static str {
        match self {
            Operation::Write => "PUT",
            Operation::Read => "GET",
        }
    }
}

/// Verified content of a location token.
#[derive(Debug, Clone)]
pub struct LocationClaims {
    pub upload_id: Uuid,
    pub file_id: Uuid,
    pub operation: Operation,
}

pub struct LocationIssuer {
    ledger: Arc<dyn Ledger>,
    storage: Arc<dyn Storage>,
    secret: Vec<u8>,
    ttl: Duration,
    public_base_url: String,
    allow_overwrite: bool,
}

impl LocationIssuer {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        storage: Arc<dyn Storage>,
        secret: impl Into<Vec<u8>>,
        ttl: Duration,
        public_base_url: impl Into<String>,
        allow_overwrite: bool,
    ) -> Self {
        LocationIssuer {
            ledger,
            storage,
            secret: secret.into(),
            ttl,
            public_base_url: public_base_url.into(),
            allow_overwrite,
        }
    }

    /// Issue a write location for one reserved (or failed) file entry.
    ///
    /// An already-written entry is refused with `AlreadyWritten` unless the
    /// deployment enables overwriting and the caller asked for it.
    pub async fn issue_write_location(
        &self,
        upload_id: Uuid,
        file_id: Uuid,
        overwrite: bool,
    ) -> Result<Location, AppError> {
        let upload = self.ledger.get_upload(upload_id).await?;
        let entry = upload
            .file(file_id)
            .ok_or_else(|| AppError::NotFound(format!("File not found: {}", file_id)))?;

        if entry.is_written() && !(self.allow_overwrite && overwrite) {
            return Err(AppError::AlreadyWritten(format!(
                "File {} is already written",
                file_id
            )));
        }

        let location = self
            .build_location(upload_id, file_id, &entry.storage_key, Operation::Write)
            .await?;
        tracing::debug!(
            upload_id = %upload_id,
            file_id = %file_id,
            expires_at = %location.expires_at,
            "Issued write location"
        );
        Ok(location)
    }

    /// Issue a read location for one file of a download.
    pub async fn issue_read_location(
        &self,
        download_id: Uuid,
        file_id: Uuid,
    ) -> Result<Location, AppError> {
        let download = self.ledger.get_download(download_id).await?;
        let upload = self.ledger.get_upload(download.upload_id).await?;

        if upload.state != UploadState::Completed {
            return Err(AppError::NotFound(format!("Download not found: {}", download_id)));
        }

        let entry = upload
            .file(file_id)
            .filter(|f| f.is_written())
            .ok_or_else(|| AppError::NotFound(format!("File not found: {}", file_id)))?;

        self.build_location(upload.id, file_id, &entry.storage_key, Operation::Read)
            .await
    }

    async fn build_location(
        &self,
        upload_id: Uuid,
        file_id: Uuid,
        storage_key: &str,
        operation: Operation,
    ) -> Result<Location, AppError> {
        let expires_at = Utc::now()
            + ChronoDuration::seconds(self.ttl.as_secs().min(i64::MAX as u64) as i64);

        let native = match operation {
            Operation::Write => self.storage.presigned_put_url(storage_key, self.ttl).await,
            Operation::Read => self.storage.presigned_get_url(storage_key, self.ttl).await,
        }
        .map_err(map_storage_error)?;

        let url = match native {
            Some(url) => url,
            None => {
                let token = self.sign(upload_id, file_id, operation, expires_at);
                format!(
                    "{}/v1/transfer/{}",
                    self.public_base_url.trim_end_matches('/'),
                    token
                )
            }
        };

        Ok(Location {
            url,
            method: operation.http_method().to_string(),
            expires_at,
        })
    }

    /// Build a signed token for the given claims.
    fn sign(
        &self,
        upload_id: Uuid,
        file_id: Uuid,
        operation: Operation,
        expires_at: DateTime<Utc>,
    ) -> String {
        let expiry_ts = expires_at.timestamp().max(0) as u64;
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[0..8].copy_from_slice(&expiry_ts.to_be_bytes());
        payload[8..24].copy_from_slice(upload_id.as_bytes());
        payload[24..40].copy_from_slice(file_id.as_bytes());
        payload[40] = operation.as_byte();

        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.secret).expect("HMAC accepts any key size");
        mac.update(&payload);
        let tag = mac.finalize().into_bytes();

        let mut token_bytes = [0u8; TOKEN_LEN];
        token_bytes[0..PAYLOAD_LEN].copy_from_slice(&payload);
        token_bytes[PAYLOAD_LEN..].copy_from_slice(&tag);

        base64_url_encode(&token_bytes)
    }

    /// Verify a token and return its claims, checking signature, expiry, and
    /// that it authorizes the expected operation.
    pub fn verify(&self, token: &str, expected: Operation) -> Result<LocationClaims, AppError> {
        let decoded = base64_url_decode(token)
            .map_err(|_| AppError::InvalidInput("Invalid transfer token".to_string()))?;
        if decoded.len() != TOKEN_LEN {
            return Err(AppError::InvalidInput("Invalid transfer token".to_string()));
        }

        let (payload, tag) = decoded.split_at(PAYLOAD_LEN);
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.secret).expect("HMAC accepts any key size");
        mac.update(payload);
        mac.verify_slice(tag)
            .map_err(|_| AppError::InvalidInput("Invalid transfer token".to_string()))?;

        let expiry_bytes: [u8; 8] = payload[0..8]
            .try_into()
            .map_err(|_| AppError::InvalidInput("Invalid transfer token".to_string()))?;
        let expiry_ts = u64::from_be_bytes(expiry_bytes);
        let now = Utc::now().timestamp().max(0) as u64;
        if now > expiry_ts {
            return Err(AppError::Expired("Transfer token has expired".to_string()));
        }

        let operation = Operation::from_byte(payload[40])
            .ok_or_else(|| AppError::InvalidInput("Invalid transfer token".to_string()))?;
        if operation != expected {
            return Err(AppError::InvalidInput(
                "Transfer token does not authorize this operation".to_string(),
            ));
        }

        let upload_bytes: [u8; 16] = payload[8..24]
            .try_into()
            .map_err(|_| AppError::InvalidInput("Invalid transfer token".to_string()))?;
        let file_bytes: [u8; 16] = payload[24..40]
            .try_into()
            .map_err(|_| AppError::InvalidInput("Invalid transfer token".to_string()))?;

        Ok(LocationClaims {
            upload_id: Uuid::from_bytes(upload_bytes),
            file_id: Uuid::from_bytes(file_bytes),
            operation,
        })
    }
}

fn base64_url_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

fn base64_url_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(s)
}
