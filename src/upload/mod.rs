//! Blob storage upload
//!
//! Uploading is optional and never invalidates the local CSV: callers log a
//! failed upload and report it in the run summary.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub mod azure;

pub use azure::{AzureBlobUploader, ConnectionString};

/// Upload errors
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// A required setting is missing
    #[error("missing upload configuration: {0}")]
    MissingConfig(String),

    /// Connection string could not be understood
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// Local file does not exist
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// Local file could not be read
    #[error("cannot read {path}: {message}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// Request could not be sent
    #[error("upload request failed: {0}")]
    Http(String),

    /// Storage service rejected the upload
    #[error("upload rejected with status {status_code}: {message}")]
    Status {
        /// HTTP status code
        status_code: u16,
        /// Response body
        message: String,
    },
}

/// Destination for finished CSV files
#[async_trait]
pub trait BlobUploader: Send + Sync {
    /// Upload `path` as `blob_name`, overwriting any existing blob, and
    /// return the blob URL.
    async fn upload(&self, path: &Path, blob_name: &str) -> Result<String, UploadError>;
}
