//! End-to-end product export against a mock KiotViet API

use serde_json::Value;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kiotviet_sync::sync::{ProductExportEngine, SyncError};

use crate::support::{app_config, credentials, mount_products, product, BRANCH_ID};

#[tokio::test]
async fn test_two_pages_then_empty_page() {
    let server = MockServer::start().await;
    mount_products(&server, (1..=4).map(product).collect()).await;

    let dir = TempDir::new().unwrap();
    let mut config = app_config(&server, &dir);
    config.products.page_size = 2;

    let result = ProductExportEngine::from_config(&config, credentials())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(result.products, 4);
    assert_eq!(result.pages, 2);
    let csv = std::fs::read_to_string(config.product_output_path()).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], "Code,Name,BasePrice");
    assert_eq!(lines[1], "SP001,Product 1,1000");
    assert_eq!(lines[4], "SP004,Product 4,4000");

    // Skip 0, Skip 2, then the empty Skip 4 page.
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_rate_limited_twice_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/branchs/{BRANCH_ID}/masterproducts")))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_products(&server, vec![product(1)]).await;

    let dir = TempDir::new().unwrap();
    let config = app_config(&server, &dir);
    let result = ProductExportEngine::from_config(&config, credentials())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(result.products, 1);

    let first_page_calls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| {
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            body["Skip"] == 0
        })
        .count();
    assert_eq!(first_page_calls, 3);
}

#[tokio::test]
async fn test_failed_export_keeps_previous_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = app_config(&server, &dir);
    let output = config.product_output_path();
    std::fs::create_dir_all(output.parent().unwrap()).unwrap();
    std::fs::write(&output, "Code\nOLD\n").unwrap();

    let err = ProductExportEngine::from_config(&config, credentials())
        .unwrap()
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Api(_)));
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "Code\nOLD\n");
}

#[tokio::test]
async fn test_request_carries_branch_and_auth() {
    let server = MockServer::start().await;
    mount_products(&server, vec![]).await;

    let dir = TempDir::new().unwrap();
    let config = app_config(&server, &dir);
    ProductExportEngine::from_config(&config, credentials())
        .unwrap()
        .run()
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    assert_eq!(
        request.headers.get("Authorization").unwrap().to_str().unwrap(),
        "Bearer integration-token"
    );
    assert_eq!(request.headers.get("Retailer").unwrap().to_str().unwrap(), "shop");
    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["Id"], BRANCH_ID);
}
