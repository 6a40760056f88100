//! Transfer domain model: uploads and their file entries, downloads derived
//! from completed uploads, and archive selections.

pub mod download;
pub mod location;
pub mod upload;

pub use download::{ArchiveSelection, Download, Selection};
pub use location::Location;
pub use upload::{FileEntry, FileSpec, Upload, UploadState, WriteState};
