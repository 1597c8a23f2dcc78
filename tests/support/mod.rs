//! Shared fixtures: a paginating mock KiotViet API and configuration helpers

#![allow(dead_code)]

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use kiotviet_sync::config::AppConfig;
use kiotviet_sync::Credentials;

pub const BRANCH_ID: i64 = 7;

/// Serves `records` sliced by the `Skip`/`Take` of the JSON request body,
/// honouring `PurchaseDateFrom` (inclusive) like the vendor does.
pub struct ListResponder {
    pub records: Vec<Value>,
}

impl Respond for ListResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let skip = body["Skip"].as_u64().unwrap_or(0) as usize;
        let take = body["Take"].as_u64().unwrap_or(100) as usize;
        let since = body.get("PurchaseDateFrom").and_then(Value::as_str);

        let matching: Vec<&Value> = self
            .records
            .iter()
            .filter(|r| match since {
                Some(since) => r["PurchaseDate"].as_str().unwrap_or_default() >= since,
                None => true,
            })
            .collect();
        let data: Vec<Value> = matching.iter().skip(skip).take(take).map(|v| (*v).clone()).collect();

        ResponseTemplate::new(200).set_body_json(json!({
            "Data": data,
            "Total": matching.len(),
        }))
    }
}

/// Answers `/invoices/{id}/details` with one line per invoice.
pub struct DetailsResponder;

impl Respond for DetailsResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let id: i64 = request
            .url
            .path()
            .split('/')
            .nth(2)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        ResponseTemplate::new(200).set_body_json(json!({
            "Data": [{
                "ProductId": id * 10,
                "ProductCode": format!("SP{id}"),
                "ProductName": format!("Product {id}"),
                "Quantity": 2,
                "Price": 15000,
                "Discount": 0,
                "SubTotal": 30000
            }]
        }))
    }
}

pub fn invoice(id: i64, purchase_date: &str) -> Value {
    json!({
        "Id": id,
        "Code": format!("HD{id:06}"),
        "PurchaseDate": purchase_date,
        "CustomerCode": "KH001",
        "CustomerName": "Nguyen Van A",
        "SoldByName": "Thu ngan",
        "Total": 30000,
        "TotalPayment": 30000,
        "Status": 1
    })
}

pub fn product(id: i64) -> Value {
    json!({
        "Id": id,
        "Code": format!("SP{id:03}"),
        "Name": format!("Product {id}"),
        "BasePrice": 1000 * id,
        "OnHand": 5
    })
}

/// Invoices purchased a day apart, oldest first.
pub fn invoices(count: i64) -> Vec<Value> {
    (1..=count)
        .map(|i| invoice(100 + i, &format!("2024-05-{i:02}T09:00:00")))
        .collect()
}

pub async fn mount_invoice_list(server: &MockServer, records: Vec<Value>) {
    Mock::given(method("POST"))
        .and(path("/invoices/list"))
        .respond_with(ListResponder { records })
        .mount(server)
        .await;
}

pub async fn mount_details(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/invoices/\d+/details$"))
        .respond_with(DetailsResponder)
        .mount(server)
        .await;
}

pub async fn mount_products(server: &MockServer, records: Vec<Value>) {
    Mock::given(method("POST"))
        .and(path(format!("/branchs/{BRANCH_ID}/masterproducts")))
        .respond_with(ListResponder { records })
        .mount(server)
        .await;
}

/// Configuration pointing at `server`, with fast retries and paths in `dir`.
pub fn app_config(server: &MockServer, dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.api.base_url = server.uri();
    config.api.max_retries = 2;
    config.api.retry_base_delay_ms = 1;
    config.api.retry_max_delay_ms = 5;
    config.data.output_dir = dir.path().join("output");
    config.data.checkpoint_dir = dir.path().join("checkpoints");
    config.invoices.page_size = 2;
    config.invoices.detail_retry_delay_ms = 1;
    config.products.fields = vec!["Code".to_string(), "Name".to_string(), "BasePrice".to_string()];
    config.products.utf8_bom = false;
    config
}

pub fn credentials() -> Credentials {
    Credentials {
        access_token: "integration-token".to_string(),
        retailer_id: "shop".to_string(),
        branch_id: BRANCH_ID,
        expires_at: None,
    }
}

/// Invoice ids in column order of the output CSV, header excluded.
pub fn invoice_ids_in(csv: &str) -> Vec<i64> {
    csv.lines()
        .skip(1)
        .filter_map(|line| line.split(',').next())
        .filter_map(|id| id.parse().ok())
        .collect()
}
