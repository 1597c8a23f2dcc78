//! End-to-end invoice sync against a mock KiotViet API

use std::collections::HashSet;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kiotviet_sync::checkpoint::CheckpointStore;
use kiotviet_sync::sync::{InvoiceSyncEngine, SyncError, SyncMode};

use crate::support::{
    app_config, credentials, invoice, invoice_ids_in, invoices, mount_details,
    mount_invoice_list, DetailsResponder,
};

#[tokio::test]
async fn test_second_incremental_run_is_a_no_op() {
    let server = MockServer::start().await;
    mount_invoice_list(&server, invoices(3)).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/invoices/\d+/details$"))
        .respond_with(DetailsResponder)
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = app_config(&server, &dir);

    let first = InvoiceSyncEngine::from_config(&config, credentials())
        .unwrap()
        .run(SyncMode::Incremental)
        .await
        .unwrap();
    assert_eq!(first.invoices, 3);
    assert_eq!(first.lines, 3);
    assert!(!first.incremental);
    assert_eq!(first.newest_purchase_date.as_deref(), Some("2024-05-03T09:00:00"));

    let store = CheckpointStore::new(config.invoice_checkpoint_path());
    let checkpoint_bytes = std::fs::read(store.path()).unwrap();
    let output_before = std::fs::read_to_string(config.invoice_output_path()).unwrap();

    let second = InvoiceSyncEngine::from_config(&config, credentials())
        .unwrap()
        .run(SyncMode::Incremental)
        .await
        .unwrap();
    assert!(second.incremental);
    assert_eq!(second.invoices, 0);
    assert_eq!(second.lines, 0);
    assert!(!second.checkpoint_updated);

    assert_eq!(std::fs::read(store.path()).unwrap(), checkpoint_bytes);
    assert_eq!(
        std::fs::read_to_string(config.invoice_output_path()).unwrap(),
        output_before
    );
}

#[tokio::test]
async fn test_incremental_run_appends_only_new_invoices() {
    let dir = TempDir::new().unwrap();

    let before = MockServer::start().await;
    mount_invoice_list(&before, invoices(3)).await;
    mount_details(&before).await;
    let config = app_config(&before, &dir);
    InvoiceSyncEngine::from_config(&config, credentials())
        .unwrap()
        .run(SyncMode::Incremental)
        .await
        .unwrap();

    let after = MockServer::start().await;
    mount_invoice_list(&after, invoices(5)).await;
    mount_details(&after).await;
    let config = app_config(&after, &dir);
    let result = InvoiceSyncEngine::from_config(&config, credentials())
        .unwrap()
        .run(SyncMode::Incremental)
        .await
        .unwrap();

    assert_eq!(result.invoices, 2);
    assert!(result.checkpoint_updated);
    assert_eq!(result.newest_purchase_date.as_deref(), Some("2024-05-05T09:00:00"));

    let csv = std::fs::read_to_string(config.invoice_output_path()).unwrap();
    assert_eq!(invoice_ids_in(&csv), vec![101, 102, 103, 104, 105]);
    assert_eq!(csv.lines().filter(|l| l.starts_with("InvoiceId")).count(), 1);
}

#[tokio::test]
async fn test_invoice_sharing_marker_timestamp_survives_failed_page() {
    let records = vec![
        invoice(101, "2024-05-01T09:00:00"),
        invoice(102, "2024-05-02T09:00:00"),
        invoice(103, "2024-05-03T09:00:00"),
        invoice(104, "2024-05-03T09:00:00"),
        invoice(105, "2024-05-04T09:00:00"),
    ];
    let dir = TempDir::new().unwrap();

    let seed = MockServer::start().await;
    mount_invoice_list(&seed, records[..1].to_vec()).await;
    mount_details(&seed).await;
    let mut config = app_config(&seed, &dir);
    config.invoices.page_size = 3;
    InvoiceSyncEngine::from_config(&config, credentials())
        .unwrap()
        .run(SyncMode::Incremental)
        .await
        .unwrap();

    let flaky = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/invoices/list"))
        .and(body_partial_json(serde_json::json!({ "Skip": 3 })))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&flaky)
        .await;
    mount_invoice_list(&flaky, records.clone()).await;
    mount_details(&flaky).await;
    let mut config = app_config(&flaky, &dir);
    config.invoices.page_size = 3;
    InvoiceSyncEngine::from_config(&config, credentials())
        .unwrap()
        .run(SyncMode::Incremental)
        .await
        .unwrap_err();

    let healthy = MockServer::start().await;
    mount_invoice_list(&healthy, records).await;
    mount_details(&healthy).await;
    let mut config = app_config(&healthy, &dir);
    config.invoices.page_size = 3;
    let result = InvoiceSyncEngine::from_config(&config, credentials())
        .unwrap()
        .run(SyncMode::Incremental)
        .await
        .unwrap();

    assert_eq!(result.invoices, 2);
    assert_eq!(result.already_synced, 1);
    let csv = std::fs::read_to_string(config.invoice_output_path()).unwrap();
    assert_eq!(invoice_ids_in(&csv), vec![101, 102, 103, 104, 105]);
}

#[tokio::test]
async fn test_collected_invoices_do_not_depend_on_page_size() {
    let server = MockServer::start().await;
    mount_invoice_list(&server, invoices(5)).await;
    mount_details(&server).await;

    let expected: HashSet<i64> = (101..=105).collect();
    for page_size in 1..=6 {
        let dir = TempDir::new().unwrap();
        let mut config = app_config(&server, &dir);
        config.invoices.page_size = page_size;

        let result = InvoiceSyncEngine::from_config(&config, credentials())
            .unwrap()
            .run(SyncMode::Incremental)
            .await
            .unwrap();

        let csv = std::fs::read_to_string(config.invoice_output_path()).unwrap();
        let ids: HashSet<i64> = invoice_ids_in(&csv).into_iter().collect();
        assert_eq!(ids, expected, "page size {page_size}");
        assert_eq!(result.invoices, 5, "page size {page_size}");
    }
}

#[tokio::test]
async fn test_detail_failure_skips_only_that_invoice() {
    let server = MockServer::start().await;
    mount_invoice_list(&server, invoices(3)).await;
    Mock::given(method("GET"))
        .and(path("/invoices/102/details"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .expect(3)
        .mount(&server)
        .await;
    mount_details(&server).await;

    let dir = TempDir::new().unwrap();
    let config = app_config(&server, &dir);
    let result = InvoiceSyncEngine::from_config(&config, credentials())
        .unwrap()
        .run(SyncMode::Incremental)
        .await
        .unwrap();

    assert_eq!(result.skipped, 1);
    assert_eq!(result.invoices, 2);
    let csv = std::fs::read_to_string(config.invoice_output_path()).unwrap();
    assert_eq!(invoice_ids_in(&csv), vec![101, 103]);
}

#[tokio::test]
async fn test_malformed_checkpoint_behaves_like_no_checkpoint() {
    let server = MockServer::start().await;
    mount_invoice_list(&server, invoices(3)).await;
    mount_details(&server).await;

    let clean_dir = TempDir::new().unwrap();
    let clean_config = app_config(&server, &clean_dir);
    let clean = InvoiceSyncEngine::from_config(&clean_config, credentials())
        .unwrap()
        .run(SyncMode::Incremental)
        .await
        .unwrap();

    let dirty_dir = TempDir::new().unwrap();
    let dirty_config = app_config(&server, &dirty_dir);
    let checkpoint_path = dirty_config.invoice_checkpoint_path();
    std::fs::create_dir_all(checkpoint_path.parent().unwrap()).unwrap();
    std::fs::write(&checkpoint_path, "{\"last_purchase_date\": 42, ").unwrap();

    let dirty = InvoiceSyncEngine::from_config(&dirty_config, credentials())
        .unwrap()
        .run(SyncMode::Incremental)
        .await
        .unwrap();

    assert_eq!(dirty.invoices, clean.invoices);
    assert_eq!(dirty.incremental, clean.incremental);
    assert_eq!(
        std::fs::read_to_string(dirty_config.invoice_output_path()).unwrap(),
        std::fs::read_to_string(clean_config.invoice_output_path()).unwrap()
    );
    assert_eq!(
        CheckpointStore::new(&checkpoint_path).load().marker(),
        Some("2024-05-03T09:00:00")
    );
}

#[tokio::test]
async fn test_unauthorized_details_abort_the_run() {
    let server = MockServer::start().await;
    mount_invoice_list(&server, invoices(2)).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/invoices/\d+/details$"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = app_config(&server, &dir);
    let err = InvoiceSyncEngine::from_config(&config, credentials())
        .unwrap()
        .run(SyncMode::Incremental)
        .await
        .unwrap_err();

    match err {
        SyncError::Api(api) => assert_eq!(api.status_code(), Some(401)),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!config.invoice_checkpoint_path().exists());
}

#[tokio::test]
async fn test_full_sync_rewrites_output() {
    let server = MockServer::start().await;
    mount_invoice_list(&server, invoices(3)).await;
    mount_details(&server).await;

    let dir = TempDir::new().unwrap();
    let config = app_config(&server, &dir);
    for _ in 0..2 {
        let result = InvoiceSyncEngine::from_config(&config, credentials())
            .unwrap()
            .run(SyncMode::Full)
            .await
            .unwrap();
        assert_eq!(result.invoices, 3);
        assert!(!result.incremental);
    }

    let csv = std::fs::read_to_string(config.invoice_output_path()).unwrap();
    assert_eq!(invoice_ids_in(&csv), vec![101, 102, 103]);
}
