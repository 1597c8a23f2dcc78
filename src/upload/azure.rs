//! Azure Blob Storage uploader
//!
//! Reads `AZURE_STORAGE_CONNECTION_STRING` and `AZURE_STORAGE_CONTAINER`
//! (default `kiotviet-data`). Two connection string shapes are supported:
//!
//! - Shared Key: `AccountName=...;AccountKey=...;EndpointSuffix=...`
//! - SAS: `BlobEndpoint=https://...;SharedAccessSignature=sv=...`
//!
//! Files are sent with a single Put Blob request, which covers CSV exports of
//! any realistic size.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{BlobUploader, UploadError};

/// Storage service API version sent with every request
pub const STORAGE_API_VERSION: &str = "2021-08-06";

/// Container used when `AZURE_STORAGE_CONTAINER` is unset
pub const DEFAULT_CONTAINER: &str = "kiotviet-data";

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// How requests are authorized
#[derive(Clone, PartialEq, Eq)]
enum Credential {
    SharedKey { account: String, key: Vec<u8> },
    Sas(String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SharedKey { account, .. } => write!(f, "SharedKey({account})"),
            Self::Sas(_) => write!(f, "Sas(..)"),
        }
    }
}

/// Parsed storage connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    endpoint: String,
    credential: Credential,
}

impl ConnectionString {
    /// Parse `Key=Value;Key=Value` pairs.
    pub fn parse(raw: &str) -> Result<Self, UploadError> {
        let parts: HashMap<&str, &str> = raw
            .split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .filter_map(|part| part.split_once('='))
            .collect();

        let account = parts.get("AccountName").copied();
        let endpoint = match (parts.get("BlobEndpoint"), account) {
            (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
            (None, Some(account)) => format!(
                "{}://{}.blob.{}",
                parts.get("DefaultEndpointsProtocol").copied().unwrap_or("https"),
                account,
                parts.get("EndpointSuffix").copied().unwrap_or("core.windows.net")
            ),
            (None, None) => {
                return Err(UploadError::InvalidConnectionString(
                    "either BlobEndpoint or AccountName is required".to_string(),
                ))
            }
        };

        let credential = match (parts.get("SharedAccessSignature"), account, parts.get("AccountKey")) {
            (Some(sas), _, _) => Credential::Sas(sas.trim_start_matches('?').to_string()),
            (None, Some(account), Some(key)) => Credential::SharedKey {
                account: account.to_string(),
                key: STANDARD.decode(key).map_err(|e| {
                    UploadError::InvalidConnectionString(format!("AccountKey is not base64: {e}"))
                })?,
            },
            _ => {
                return Err(UploadError::InvalidConnectionString(
                    "either SharedAccessSignature or AccountName with AccountKey is required"
                        .to_string(),
                ))
            }
        };

        Ok(Self {
            endpoint,
            credential,
        })
    }

    /// Blob service endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Uploads files with the Put Blob operation
#[derive(Debug, Clone)]
pub struct AzureBlobUploader {
    http: Client,
    connection: ConnectionString,
    container: String,
}

impl AzureBlobUploader {
    /// Uploader for `container`
    pub fn new(connection: ConnectionString, container: impl Into<String>) -> Result<Self, UploadError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(|e| UploadError::Http(e.to_string()))?;
        Ok(Self {
            http,
            connection,
            container: container.into(),
        })
    }

    /// Uploader configured from the process environment
    pub fn from_env() -> Result<Self, UploadError> {
        let raw = std::env::var("AZURE_STORAGE_CONNECTION_STRING")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| UploadError::MissingConfig("AZURE_STORAGE_CONNECTION_STRING".to_string()))?;
        let container = std::env::var("AZURE_STORAGE_CONTAINER")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONTAINER.to_string());
        Self::new(ConnectionString::parse(&raw)?, container)
    }

    /// Public URL of a blob (without any SAS token)
    pub fn blob_url(&self, blob_name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.connection.endpoint,
            self.container,
            encode_blob_path(blob_name)
        )
    }

    fn canonical_resource(&self, account: &str, blob_name: &str) -> String {
        format!("/{}/{}/{}", account, self.container, encode_blob_path(blob_name))
    }
}

#[async_trait]
impl BlobUploader for AzureBlobUploader {
    async fn upload(&self, path: &Path, blob_name: &str) -> Result<String, UploadError> {
        if !path.exists() {
            return Err(UploadError::FileNotFound(path.to_path_buf()));
        }
        let body = tokio::fs::read(path).await.map_err(|e| UploadError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let blob_url = self.blob_url(blob_name);
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let content_type = "text/csv; charset=utf-8";
        let content_length = body.len();

        let mut request_url = blob_url.clone();
        let mut authorization = None;
        match &self.connection.credential {
            Credential::Sas(sas) => {
                request_url = format!("{blob_url}?{sas}");
            }
            Credential::SharedKey { account, key } => {
                let string_to_sign = put_blob_string_to_sign(
                    content_length,
                    content_type,
                    &date,
                    &self.canonical_resource(account, blob_name),
                );
                authorization = Some(format!(
                    "SharedKey {account}:{}",
                    sign(key, &string_to_sign)?
                ));
            }
        }

        debug!(url = %blob_url, bytes = content_length, "Uploading blob");
        let mut request = self
            .http
            .put(&request_url)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-date", &date)
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("Content-Type", content_type)
            .body(body);
        if let Some(authorization) = authorization {
            request = request.header("Authorization", authorization);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UploadError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UploadError::Status {
                status_code: status.as_u16(),
                message,
            });
        }

        info!(path = %path.display(), url = %blob_url, bytes = content_length, "Uploaded blob");
        Ok(blob_url)
    }
}

/// Shared Key string-to-sign for Put Blob.
fn put_blob_string_to_sign(
    content_length: usize,
    content_type: &str,
    date: &str,
    canonical_resource: &str,
) -> String {
    let content_length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let standard_headers = [
        "PUT",
        "",              // Content-Encoding
        "",              // Content-Language
        &content_length, // Content-Length
        "",              // Content-MD5
        content_type,    // Content-Type
        "",              // Date (x-ms-date is used instead)
        "",              // If-Modified-Since
        "",              // If-Match
        "",              // If-None-Match
        "",              // If-Unmodified-Since
        "",              // Range
    ];

    let mut canonical_headers = [
        ("x-ms-blob-type", "BlockBlob"),
        ("x-ms-date", date),
        ("x-ms-version", STORAGE_API_VERSION),
    ];
    canonical_headers.sort_by_key(|(name, _)| *name);

    let mut string_to_sign = standard_headers.join("\n");
    string_to_sign.push('\n');
    for (name, value) in canonical_headers {
        string_to_sign.push_str(&format!("{name}:{value}\n"));
    }
    string_to_sign.push_str(canonical_resource);
    string_to_sign
}

/// Base64 HMAC-SHA256 of `message` under the decoded account key.
fn sign(key: &[u8], message: &str) -> Result<String, UploadError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| UploadError::InvalidConnectionString(format!("unusable AccountKey: {e}")))?;
    mac.update(message.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Percent-encode a blob name, keeping `/` as a path separator.
fn encode_blob_path(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}
