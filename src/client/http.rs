//! KiotViet HTTP client
//!
//! One pooled [`reqwest::Client`] per run. Every request carries:
//! - `Authorization: Bearer <access_token>`
//! - `Retailer: <retailer_id>`
//! - `BranchId: <branch_id>`

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::retry::{extract_error_type, with_backoff, Attempt, RetryPolicy};
use super::{ApiError, ApiResult};
use crate::config::ApiConfig;
use crate::credentials::Credentials;

/// Longest response body kept in an error message
const MAX_ERROR_BODY: usize = 500;

/// Authenticated client for the KiotViet REST API
#[derive(Debug, Clone)]
pub struct KiotVietClient {
    http: Client,
    base_url: String,
    credentials: Credentials,
    policy: RetryPolicy,
}

impl KiotVietClient {
    /// Build a client from API settings and loaded credentials
    pub fn new(config: &ApiConfig, credentials: Credentials) -> ApiResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.timeout())
            .build()
            .map_err(|e| ApiError::ClientBuild(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            policy: config.retry_policy(),
        })
    }

    /// Replace the default retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Default retry policy
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Credentials attached to each request
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Join an endpoint to the base URL; absolute URLs pass through.
    pub fn build_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// GET and parse the JSON body
    pub async fn get<T>(&self, endpoint: &str, query: &[(&str, String)]) -> ApiResult<T>
    where
        T: DeserializeOwned,
    {
        self.request::<T, ()>(Method::GET, endpoint, query, None, &self.policy)
            .await
    }

    /// POST a JSON body and parse the JSON response
    pub async fn post<T, B>(&self, endpoint: &str, query: &[(&str, String)], body: &B) -> ApiResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, endpoint, query, Some(body), &self.policy)
            .await
    }

    /// Send a request under an explicit retry policy.
    ///
    /// 429, 5xx and transport failures are retried; 401 and every other
    /// status are returned as [`ApiError::Status`] straight away.
    pub async fn request<T, B>(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, String)],
        body: Option<&B>,
        policy: &RetryPolicy,
    ) -> ApiResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.build_url(endpoint);
        let url = url.as_str();
        debug!(%method, url, params = query.len(), "Sending request");

        with_backoff(policy, endpoint, move |_| {
            self.send_once(method.clone(), url, endpoint, query, body)
        })
        .await
    }

    async fn send_once<T, B>(
        &self,
        method: Method,
        url: &str,
        endpoint: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<T, Attempt<ApiError>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&self.credentials.access_token)
            .header("Retailer", &self.credentials.retailer_id)
            .header("BranchId", self.credentials.branch_id.to_string())
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return Err(Attempt::Retry(
                    extract_error_type(None, Some(&e)),
                    ApiError::Transport {
                        endpoint: endpoint.to_string(),
                        message: e.to_string(),
                    },
                ));
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return Err(Attempt::Retry(
                    extract_error_type(Some(status), Some(&e)),
                    ApiError::Transport {
                        endpoint: endpoint.to_string(),
                        message: format!("failed to read response body: {e}"),
                    },
                ));
            }
        };

        if !status.is_success() {
            let error = ApiError::Status {
                status_code: status.as_u16(),
                endpoint: endpoint.to_string(),
                message: truncate(&text),
            };
            return if is_retryable_status(status) {
                Err(Attempt::Retry(extract_error_type(Some(status), None), error))
            } else {
                Err(Attempt::Fail(error))
            };
        }

        parse_body(endpoint, &text).map_err(Attempt::Fail)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn parse_body<T: DeserializeOwned>(endpoint: &str, text: &str) -> ApiResult<T> {
    let text = text.trim();
    let text = if text.is_empty() { "{}" } else { text };
    serde_json::from_str(text).map_err(|e| ApiError::InvalidResponse {
        endpoint: endpoint.to_string(),
        message: format!("failed to deserialize response: {e}"),
    })
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}
