//! Invoice sync checkpoint
//!
//! Stored as a small JSON document:
//!
//! ```json
//! {
//!   "last_purchase_date": "2024-05-01T09:15:00.0000000",
//!   "last_invoice_id": 1201,
//!   "updated_at": "2024-05-01T02:20:11Z"
//! }
//! ```
//!
//! Only `last_purchase_date` drives the sync; the other fields are
//! informational and unknown fields are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::lock::RunLock;
use crate::output::write_atomic;

/// Checkpoint files larger than this are treated as corrupt (1 MiB)
pub const MAX_CHECKPOINT_FILE_SIZE: u64 = 1024 * 1024;

/// Checkpoint persistence errors
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// IO error writing the checkpoint or opening the lock file
    #[error("checkpoint IO error at {path}: {message}")]
    IoError {
        /// File involved
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// Checkpoint could not be serialized
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Another run holds the lock
    #[error("another sync holds {0}")]
    Locked(PathBuf),

    /// Lock could not be taken for another reason
    #[error("lock error: {0}")]
    LockError(String),
}

/// High-water marker of the last committed invoice page
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    /// Purchase date of the newest committed invoice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_purchase_date: Option<String>,
    /// Id of the invoice that set the marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_invoice_id: Option<i64>,
    /// When the marker last moved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// The "beginning of time" sentinel
    pub fn beginning() -> Self {
        Self::default()
    }

    /// Whether no marker has been recorded
    pub fn is_beginning(&self) -> bool {
        self.marker().is_none()
    }

    /// Current marker, if any
    pub fn marker(&self) -> Option<&str> {
        self.last_purchase_date.as_deref().filter(|d| !d.is_empty())
    }

    /// Move the marker forward to `purchase_date`.
    ///
    /// Returns `false` and leaves the checkpoint unchanged when the date is
    /// empty or not strictly newer than the current marker.
    pub fn advance(&mut self, purchase_date: &str, invoice_id: i64) -> bool {
        if purchase_date.is_empty() {
            return false;
        }
        if self.marker().is_some_and(|current| purchase_date <= current) {
            return false;
        }

        self.last_purchase_date = Some(purchase_date.to_string());
        self.last_invoice_id = Some(invoice_id);
        self.updated_at = Some(Utc::now());
        true
    }
}

/// Loads and saves a [`Checkpoint`] at a fixed path
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Checkpoint file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint.
    ///
    /// Never fails: a missing, unreadable, oversized or malformed file yields
    /// [`Checkpoint::beginning`] and a warning.
    pub fn load(&self) -> Checkpoint {
        let path = &self.path;
        debug!(path = %path.display(), "Loading checkpoint");

        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No checkpoint, starting from the beginning");
                return Checkpoint::beginning();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot stat checkpoint, starting from the beginning");
                return Checkpoint::beginning();
            }
        };

        if metadata.len() > MAX_CHECKPOINT_FILE_SIZE {
            warn!(
                path = %path.display(),
                size = metadata.len(),
                max = MAX_CHECKPOINT_FILE_SIZE,
                "Checkpoint file too large, starting from the beginning"
            );
            return Checkpoint::beginning();
        }

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read checkpoint, starting from the beginning");
                return Checkpoint::beginning();
            }
        };

        match serde_json::from_str::<Checkpoint>(&contents) {
            Ok(checkpoint) => {
                info!(
                    path = %path.display(),
                    marker = checkpoint.marker().unwrap_or("none"),
                    "Checkpoint loaded"
                );
                checkpoint
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Malformed checkpoint, starting from the beginning");
                Checkpoint::beginning()
            }
        }
    }

    /// Atomically persist `checkpoint`
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| CheckpointError::SerializationError(e.to_string()))?;

        write_atomic(&self.path, &json).map_err(|e| CheckpointError::IoError {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        info!(
            path = %self.path.display(),
            marker = checkpoint.marker().unwrap_or("none"),
            invoice_id = checkpoint.last_invoice_id,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Open the run lock that guards this checkpoint
    pub fn run_lock(&self) -> Result<RunLock, CheckpointError> {
        RunLock::open(&self.path)
    }
}
