//! Object-storage backends for transfer payloads.
//!
//! File bytes are addressed by opaque keys of the form
//! `transfers/{upload_id}/{file_id}`; this crate neither generates nor
//! interprets keys. Backends that can mint native presigned URLs report them
//! through `presigned_put_url`/`presigned_get_url`; the others return `None`
//! and the location issuer falls back to relayed transfer endpoints.

pub mod local;
pub mod memory;
pub mod s3;
pub mod traits;

pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use s3::S3Storage;
pub use traits::{ByteStream, ObjectInfo, Storage, StorageError, StorageResult};
