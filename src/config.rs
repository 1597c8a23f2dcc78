//! Layered application configuration
//!
//! Values are resolved in this order, later layers winning:
//!
//! 1. Built-in defaults
//! 2. `config/default.toml`, then `config/<KIOTVIET_ENV>.toml` (tables are
//!    merged key by key), or a single file passed with `--config`
//! 3. Environment variables (a `.env` file is honoured)
//! 4. CLI flags, applied by the caller
//!
//! [`AppConfig::validate`] must run after the last layer; every engine
//! constructor validates its own section again so a bad page size or field
//! selection fails before any request is sent.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::client::retry::RetryPolicy;
use crate::{DEFAULT_PRODUCT_FIELDS, KNOWN_PRODUCT_FIELDS};

/// Default KiotViet API base URL
pub const DEFAULT_BASE_URL: &str = "https://api-man1.kiotviet.vn/api";

/// Largest page the KiotViet listing endpoints accept
pub const MAX_PAGE_SIZE: usize = 1000;

/// Upper bound for `api.max_retries`
pub const MAX_RETRIES_LIMIT: u32 = 20;

/// Directory probed for layered config files
pub const CONFIG_DIR: &str = "config";

/// Environment variable selecting the environment overlay file
pub const ENV_SELECTOR: &str = "KIOTVIET_ENV";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Explicit config file does not exist
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    /// Config file could not be read
    #[error("cannot read config file {path}: {message}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// Config file is not valid TOML or has wrong types
    #[error("invalid config file {path}: {message}")]
    Parse {
        /// File path (or "<merged>" for the merged document)
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Environment override could not be parsed
    #[error("invalid environment variable {name}: {message}")]
    Env {
        /// Variable name
        name: String,
        /// Parse failure
        message: String,
    },

    /// A value is out of range or otherwise unusable
    #[error("invalid {field}: {message}")]
    Invalid {
        /// Dotted key of the offending setting
        field: String,
        /// What is wrong with it
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// API base URL
    pub base_url: String,
    /// Overall request timeout in seconds
    pub timeout_secs: u64,
    /// TCP connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Retries after the first attempt for 429/5xx/network failures
    pub max_retries: u32,
    /// First backoff delay in milliseconds
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub retry_max_delay_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
        }
    }
}

impl ApiConfig {
    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Retry policy for list and export calls
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    /// Validate ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::invalid("api.base_url", "must not be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::invalid("api.timeout_secs", "must be positive"));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::invalid(
                "api.max_retries",
                format!("{} exceeds maximum of {MAX_RETRIES_LIMIT}", self.max_retries),
            ));
        }
        Ok(())
    }
}

/// Data directories
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    /// Base directory for relative output files
    pub output_dir: PathBuf,
    /// Base directory for relative checkpoint files
    pub checkpoint_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data/output"),
            checkpoint_dir: PathBuf::from("data/checkpoints"),
        }
    }
}

/// Credential file location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CredentialsConfig {
    /// JSON token file written by the token provider
    pub token_file: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            token_file: PathBuf::from("data/credentials/token.json"),
        }
    }
}

/// Invoice sync settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InvoiceConfig {
    /// Invoices requested per listing page
    pub page_size: usize,
    /// Output CSV (relative to `data.output_dir`)
    pub output_file: PathBuf,
    /// Checkpoint JSON (relative to `data.checkpoint_dir`)
    pub checkpoint_file: PathBuf,
    /// Base backoff for per-invoice detail calls, in milliseconds
    pub detail_retry_delay_ms: u64,
    /// Vendor `TimeRange` used when there is no checkpoint marker
    pub full_time_range: String,
}

impl Default for InvoiceConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            output_file: PathBuf::from("invoice_details.csv"),
            checkpoint_file: PathBuf::from("invoices_checkpoint.json"),
            detail_retry_delay_ms: 200,
            full_time_range: "alltime".to_string(),
        }
    }
}

impl InvoiceConfig {
    /// Validate ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_page_size("invoices.page_size", self.page_size)?;
        if self.full_time_range.trim().is_empty() {
            return Err(ConfigError::invalid(
                "invoices.full_time_range",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

/// Product export settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProductConfig {
    /// Products requested per page
    pub page_size: usize,
    /// Output CSV (relative to `data.output_dir`)
    pub output_file: PathBuf,
    /// Exported columns, in order
    pub fields: Vec<String>,
    /// Prefix the file with a UTF-8 byte order mark for spreadsheet tools
    pub utf8_bom: bool,
}

impl Default for ProductConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            output_file: PathBuf::from("master_products.csv"),
            fields: DEFAULT_PRODUCT_FIELDS.iter().map(|f| f.to_string()).collect(),
            utf8_bom: true,
        }
    }
}

impl ProductConfig {
    /// Validate page size and field selection
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_page_size("products.page_size", self.page_size)?;
        validate_fields(&self.fields)
    }
}

/// Blob upload settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// Upload finished CSV files after each run
    pub enabled: bool,
    /// Prefix prepended to the file name to form the blob name
    pub blob_prefix: String,
}

impl UploadConfig {
    /// Blob name for a local file
    pub fn blob_name(&self, path: &Path) -> String {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let prefix = self.blob_prefix.trim_matches('/');
        if prefix.is_empty() {
            file_name
        } else {
            format!("{prefix}/{file_name}")
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP client
    pub api: ApiConfig,
    /// Data directories
    pub data: DataConfig,
    /// Credential file
    pub credentials: CredentialsConfig,
    /// Invoice sync
    pub invoices: InvoiceConfig,
    /// Product export
    pub products: ProductConfig,
    /// Blob upload
    pub upload: UploadConfig,
}

impl AppConfig {
    /// Load configuration from files and the process environment.
    ///
    /// With `path`, only that file is read and it must exist. Without it the
    /// layered files under [`CONFIG_DIR`] are used when present; having none
    /// is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let env_name = std::env::var(ENV_SELECTOR).ok();
        let mut config = Self::from_files(path, Path::new(CONFIG_DIR), env_name.as_deref())?;
        config.apply_env_with(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Merge defaults with the config files only (no environment).
    pub fn from_files(
        path: Option<&Path>,
        config_dir: &Path,
        env_name: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        match path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(ConfigError::NotFound(explicit.to_path_buf()));
                }
                merge_tables(&mut merged, read_table(explicit)?);
            }
            None => {
                let default_path = config_dir.join("default.toml");
                if default_path.exists() {
                    merge_tables(&mut merged, read_table(&default_path)?);
                }
                if let Some(env_name) = env_name {
                    let env_path = config_dir.join(format!("{env_name}.toml"));
                    if env_path.exists() {
                        merge_tables(&mut merged, read_table(&env_path)?);
                    }
                }
            }
        }

        toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: PathBuf::from("<merged>"),
                message: e.to_string(),
            })
    }

    /// Apply environment overrides from an arbitrary lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("KIOTVIET_BASE_URL") {
            self.api.base_url = url;
        }
        if let Some(path) = lookup("KIOTVIET_TOKEN_FILE") {
            self.credentials.token_file = PathBuf::from(path);
        }
        if let Some(path) = lookup("KIOTVIET_OUTPUT_DIR") {
            self.data.output_dir = PathBuf::from(path);
        }
        if let Some(path) = lookup("KIOTVIET_CHECKPOINT_DIR") {
            self.data.checkpoint_dir = PathBuf::from(path);
        }
        if let Some(value) = lookup("KIOTVIET_MAX_RETRIES") {
            self.api.max_retries = parse_env("KIOTVIET_MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("KIOTVIET_TIMEOUT_SECS") {
            self.api.timeout_secs = parse_env("KIOTVIET_TIMEOUT_SECS", &value)?;
        }
        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api.validate()?;
        self.invoices.validate()?;
        self.products.validate()?;
        debug!("Configuration validated");
        Ok(())
    }

    /// Token file path
    pub fn token_file(&self) -> &Path {
        &self.credentials.token_file
    }

    /// Resolved invoice CSV path
    pub fn invoice_output_path(&self) -> PathBuf {
        resolve(&self.data.output_dir, &self.invoices.output_file)
    }

    /// Resolved invoice checkpoint path
    pub fn invoice_checkpoint_path(&self) -> PathBuf {
        resolve(&self.data.checkpoint_dir, &self.invoices.checkpoint_file)
    }

    /// Resolved product CSV path
    pub fn product_output_path(&self) -> PathBuf {
        resolve(&self.data.output_dir, &self.products.output_file)
    }
}

fn resolve(base: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        base.join(file)
    }
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let table = contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    info!(path = %path.display(), "Loaded config file");
    Ok(table)
}

/// Merge `overlay` into `base`, recursing into nested tables.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        name: name.to_string(),
        message: e.to_string(),
    })
}

fn validate_page_size(field: &str, page_size: usize) -> Result<(), ConfigError> {
    if page_size == 0 {
        return Err(ConfigError::invalid(field, "page size must be at least 1"));
    }
    if page_size > MAX_PAGE_SIZE {
        return Err(ConfigError::invalid(
            field,
            format!("page size {page_size} exceeds maximum of {MAX_PAGE_SIZE}"),
        ));
    }
    Ok(())
}

fn validate_fields(fields: &[String]) -> Result<(), ConfigError> {
    if fields.is_empty() {
        return Err(ConfigError::invalid(
            "products.fields",
            "at least one field is required",
        ));
    }

    let mut seen = HashSet::new();
    let mut unknown = Vec::new();
    for field in fields {
        if !seen.insert(field.as_str()) {
            return Err(ConfigError::invalid(
                "products.fields",
                format!("duplicate field '{field}'"),
            ));
        }
        if !KNOWN_PRODUCT_FIELDS.contains(&field.as_str()) {
            unknown.push(field.as_str());
        }
    }

    if !unknown.is_empty() {
        return Err(ConfigError::invalid(
            "products.fields",
            format!("unknown field(s): {}", unknown.join(", ")),
        ));
    }
    Ok(())
}
