//! Access credentials for the KiotViet API
//!
//! Tokens are obtained outside this crate (an interactive browser flow) and
//! dropped into a JSON file:
//!
//! ```json
//! {
//!   "access_token": "eyJhbGciOi...",
//!   "retailer_id": "myshop",
//!   "branch_id": 12345,
//!   "expires_at": "2024-06-01T10:00:00Z"
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::output::write_atomic;

/// Credential loading errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    /// Token file does not exist
    #[error("token file not found: {0}")]
    NotFound(PathBuf),

    /// Token file could not be read or written
    #[error("cannot access token file {path}: {message}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// Token file is not JSON
    #[error("invalid JSON in token file {path}: {message}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Token file is JSON but a field is missing or wrong
    #[error("invalid token file: {0}")]
    Invalid(String),
}

/// Bearer token plus the retailer and branch it is scoped to.
///
/// Loaded once per run and never mutated.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    /// Bearer token
    pub access_token: String,
    /// Retailer (shop) identifier sent in the `Retailer` header
    pub retailer_id: String,
    /// Branch id sent in the `BranchId` header and request bodies
    pub branch_id: i64,
    /// Expiry timestamp as written by the token provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &self.masked_token())
            .field("retailer_id", &self.retailer_id)
            .field("branch_id", &self.branch_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credentials {
    /// Validate a decoded token document.
    ///
    /// `branch_id` may be a number or a numeric string and must be positive;
    /// `retailer_id` may be a string or a number.
    pub fn from_json(value: &Value) -> Result<Self, CredentialsError> {
        let object = value
            .as_object()
            .ok_or_else(|| CredentialsError::Invalid("expected a JSON object".to_string()))?;

        let missing: Vec<&str> = ["access_token", "retailer_id", "branch_id"]
            .into_iter()
            .filter(|key| !object.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(CredentialsError::Invalid(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let access_token = match object.get("access_token") {
            Some(Value::String(token)) if !token.trim().is_empty() => token.clone(),
            _ => {
                return Err(CredentialsError::Invalid(
                    "access_token must be a non-empty string".to_string(),
                ))
            }
        };

        let retailer_id = match object.get("retailer_id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(CredentialsError::Invalid(
                    "retailer_id must be a non-empty string or number".to_string(),
                ))
            }
        };

        let branch_id = parse_branch_id(object)?;

        let expires_at = match object.get("expires_at") {
            None | Some(Value::Null) => None,
            Some(Value::String(at)) => Some(at.clone()),
            Some(_) => {
                return Err(CredentialsError::Invalid(
                    "expires_at must be a string if provided".to_string(),
                ))
            }
        };

        Ok(Self {
            access_token,
            retailer_id,
            branch_id,
            expires_at,
        })
    }

    /// Token with everything but the first and last four characters hidden
    pub fn masked_token(&self) -> String {
        let chars: Vec<char> = self.access_token.chars().collect();
        if chars.len() <= 8 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }

    /// Parsed expiry, if present and RFC 3339
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .as_deref()
            .and_then(|at| DateTime::parse_from_rfc3339(at).ok())
            .map(|at| at.with_timezone(&Utc))
    }

    /// Whether the token is known to be expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry().is_some_and(|expiry| expiry <= now)
    }
}

fn parse_branch_id(object: &Map<String, Value>) -> Result<i64, CredentialsError> {
    let branch_id = match object.get("branch_id") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => {
            s.parse().ok()
        }
        _ => None,
    }
    .ok_or_else(|| CredentialsError::Invalid("branch_id must be an integer".to_string()))?;

    if branch_id <= 0 {
        return Err(CredentialsError::Invalid(
            "branch_id must be positive".to_string(),
        ));
    }
    Ok(branch_id)
}

/// Source of API credentials
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// Load credentials for this run
    async fn provide_credentials(&self) -> Result<Credentials, CredentialsError>;
}

/// Reads credentials from the JSON token file
#[derive(Debug, Clone)]
pub struct TokenFileProvider {
    path: PathBuf,
}

impl TokenFileProvider {
    /// Create a provider for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Token file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the token file exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read and validate the token file
    pub fn load(&self) -> Result<Credentials, CredentialsError> {
        if !self.path.exists() {
            return Err(CredentialsError::NotFound(self.path.clone()));
        }

        let contents = std::fs::read_to_string(&self.path).map_err(|e| CredentialsError::Io {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        let value: Value = serde_json::from_str(&contents).map_err(|e| CredentialsError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        let credentials = Credentials::from_json(&value)?;
        if credentials.is_expired_at(Utc::now()) {
            warn!(
                path = %self.path.display(),
                expires_at = credentials.expires_at.as_deref().unwrap_or_default(),
                "Access token appears to be expired"
            );
        }
        Ok(credentials)
    }

    /// Atomically persist credentials, omitting an absent expiry
    pub fn save(&self, credentials: &Credentials) -> Result<(), CredentialsError> {
        let io_error = |e: std::io::Error| CredentialsError::Io {
            path: self.path.clone(),
            message: e.to_string(),
        };

        let json = serde_json::to_vec_pretty(credentials).map_err(|e| CredentialsError::Io {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        write_atomic(&self.path, &json).map_err(io_error)?;

        info!(path = %self.path.display(), "Access token saved");
        Ok(())
    }
}

#[async_trait]
impl CredentialsProvider for TokenFileProvider {
    async fn provide_credentials(&self) -> Result<Credentials, CredentialsError> {
        self.load()
    }
}
