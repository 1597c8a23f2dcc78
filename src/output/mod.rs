//! Data output writers

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

pub mod csv;

pub use self::csv::{read_invoice_ids, InvoiceCsvWriter, ProductCsvWriter, INVOICE_HEADER};

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write or read error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Buffer flush or fsync error
    #[error("flush error: {0}")]
    FlushError(String),

    /// Staged file could not replace the target
    #[error("failed to replace {path}: {message}")]
    PersistError {
        /// Target path
        path: String,
        /// Underlying error
        message: String,
    },
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Common lifecycle of the CSV writers
pub trait OutputWriter {
    /// Flush buffered rows and fsync them to disk
    fn flush(&mut self) -> OutputResult<()>;

    /// Finalize the output; staged writers replace their target here
    fn close(self) -> OutputResult<()>;
}

/// Write `bytes` to `path` through a temp file in the same directory.
///
/// The temp file is fsynced, renamed over `path`, and the directory is fsynced
/// so the rename itself survives a crash.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = parent_dir(path);
    std::fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    sync_dir(parent)
}

/// Directory containing `path`, `.` for bare file names
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// fsync a directory so renames inside it are durable.
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Directory handles cannot be fsynced on this platform.
#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
