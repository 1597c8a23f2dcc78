//! CLI error types and conversions

use crate::config::ConfigError;
use crate::credentials::CredentialsError;
use crate::sync::SyncError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Credentials error
    #[error("credentials error: {0}")]
    Credentials(#[from] CredentialsError),

    /// Sync or export failure
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Output could not be rendered
    #[error("cannot render output: {0}")]
    Render(#[from] serde_json::Error),
}
