//! Invoice sync and product export engines
//!
//! Both engines page strictly sequentially: page N+1 is requested only after
//! page N has been written (and, for incremental invoice runs, checkpointed).

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::checkpoint::CheckpointError;
use crate::client::ApiError;
use crate::config::ConfigError;
use crate::credentials::CredentialsError;
use crate::output::OutputError;

pub mod invoices;
pub mod products;

pub use invoices::InvoiceSyncEngine;
pub use products::ProductExportEngine;

/// Safety stop for runaway pagination
pub const MAX_PAGES: usize = 10_000;

/// Sync errors
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Credentials could not be loaded
    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    /// Vendor API failure after retries
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Checkpoint could not be persisted
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// CSV output failure
    #[error(transparent)]
    Output(#[from] OutputError),

    /// Another invoice sync holds the run lock
    #[error("another invoice sync is already running (lock file {0})")]
    AlreadyRunning(PathBuf),

    /// The endpoint kept returning pages past [`MAX_PAGES`]
    #[error("pagination aborted after {0} pages")]
    PaginationLimit(usize),
}

/// How an invoice sync selects invoices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Only invoices newer than the stored checkpoint
    Incremental,
    /// Every invoice, ignoring the stored checkpoint
    Full,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incremental => write!(f, "incremental"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Summary of an invoice sync run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceSyncResult {
    /// Invoices written
    pub invoices: u64,
    /// CSV rows (invoice lines) written
    pub lines: u64,
    /// Invoices whose details could not be fetched
    pub skipped: u64,
    /// Invoices listed again but already present in the output
    pub already_synced: u64,
    /// Listing pages processed
    pub pages: u64,
    /// Marker after the run
    pub newest_purchase_date: Option<String>,
    /// Whether the persisted checkpoint moved
    pub checkpoint_updated: bool,
    /// Whether the run continued from a checkpoint
    pub incremental: bool,
    /// Output CSV
    pub output_file: PathBuf,
    /// Wall-clock duration in seconds
    pub duration_secs: f64,
}

/// Summary of a product export
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductExportResult {
    /// Products written
    pub products: u64,
    /// Pages fetched with data
    pub pages: u64,
    /// Output CSV
    pub output_file: PathBuf,
    /// Wall-clock duration in seconds
    pub duration_secs: f64,
}
