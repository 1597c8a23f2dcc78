//! KiotViet REST endpoints

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{InvoiceQuery, InvoiceWindow, RetailSource};
use crate::client::{ApiResult, KiotVietClient, RetryPolicy};
use crate::config::AppConfig;
use crate::credentials::Credentials;
use crate::{InvoiceLine, InvoiceSummary, Page, Product};

/// Invoice status code for completed sales
const INVOICE_STATUS_COMPLETED: i64 = 1;

/// Relations requested with invoice details
const DETAIL_INCLUDES: [&str; 4] = ["ProductName", "ProductCode", "SubTotal", "Product"];

/// [`RetailSource`] backed by the KiotViet API
#[derive(Debug, Clone)]
pub struct KiotVietFetcher {
    client: KiotVietClient,
    detail_policy: RetryPolicy,
}

impl KiotVietFetcher {
    /// Wrap a client; invoice details retry under `detail_policy`
    pub fn new(client: KiotVietClient, detail_policy: RetryPolicy) -> Self {
        Self {
            client,
            detail_policy,
        }
    }

    /// Build the client and detail policy from configuration
    pub fn from_config(config: &AppConfig, credentials: Credentials) -> ApiResult<Self> {
        let client = KiotVietClient::new(&config.api, credentials)?;
        let detail_policy = client
            .retry_policy()
            .with_base_delay(Duration::from_millis(config.invoices.detail_retry_delay_ms));
        Ok(Self::new(client, detail_policy))
    }

    /// Underlying client
    pub fn client(&self) -> &KiotVietClient {
        &self.client
    }

    fn branch_id(&self) -> i64 {
        self.client.credentials().branch_id
    }
}

/// Request body for `POST /invoices/list`
pub fn invoice_list_body(branch_id: i64, query: &InvoiceQuery) -> Value {
    let mut body = json!({
        "BranchIds": [branch_id],
        "InvoiceStatus": [INVOICE_STATUS_COMPLETED],
        "Skip": query.skip,
        "Take": query.take,
        "ForSummaryRow": false,
    });
    match &query.window {
        InvoiceWindow::Since(marker) => body["PurchaseDateFrom"] = json!(marker),
        InvoiceWindow::TimeRange(range) => body["TimeRange"] = json!(range),
    }
    body
}

/// Request body for `POST /branchs/{branch_id}/masterproducts`
pub fn product_list_body(branch_id: i64, skip: usize, take: usize) -> Value {
    json!({
        "Id": branch_id,
        "Skip": skip,
        "Take": take,
        "Includes": ["ProductAttributes"],
        "ForSummaryRow": true,
        "IsActive": true,
        "IsNewFilter": true,
    })
}

#[async_trait]
impl RetailSource for KiotVietFetcher {
    async fn list_invoices(&self, query: &InvoiceQuery) -> ApiResult<Page<InvoiceSummary>> {
        debug!(skip = query.skip, take = query.take, window = ?query.window, "Listing invoices");
        let body = invoice_list_body(self.branch_id(), query);
        self.client
            .post("/invoices/list", &[("format", "json".to_string())], &body)
            .await
    }

    async fn invoice_details(&self, invoice_id: i64) -> ApiResult<Vec<InvoiceLine>> {
        let endpoint = format!("/invoices/{invoice_id}/details");
        let mut query = vec![("format", "json".to_string())];
        query.extend(DETAIL_INCLUDES.iter().map(|i| ("Includes", i.to_string())));

        let page: Page<InvoiceLine> = self
            .client
            .request::<_, ()>(Method::GET, &endpoint, &query, None, &self.detail_policy)
            .await?;
        Ok(page.data)
    }

    async fn list_products(&self, skip: usize, take: usize) -> ApiResult<Page<Product>> {
        let branch_id = self.branch_id();
        debug!(branch_id, skip, take, "Listing master products");
        let endpoint = format!("/branchs/{branch_id}/masterproducts");
        let query = [
            ("format", "json".to_string()),
            ("Includes", "ProductAttributes".to_string()),
            ("ForSummaryRow", "true".to_string()),
        ];
        self.client
            .post(&endpoint, &query, &product_list_body(branch_id, skip, take))
            .await
    }
}
