//! Unit tests for the token file provider

use serde_json::json;
use tempfile::TempDir;

use kiotviet_sync::credentials::{CredentialsError, CredentialsProvider, TokenFileProvider};
use kiotviet_sync::Credentials;

#[tokio::test]
async fn test_saved_credentials_are_provided_back() {
    let dir = TempDir::new().unwrap();
    let provider = TokenFileProvider::new(dir.path().join("credentials/token.json"));
    let credentials = Credentials {
        access_token: "eyJhbGciOi.payload.signature".to_string(),
        retailer_id: "cuahang01".to_string(),
        branch_id: 12,
        expires_at: Some("2030-01-01T00:00:00Z".to_string()),
    };

    provider.save(&credentials).unwrap();
    let loaded = provider.provide_credentials().await.unwrap();

    assert_eq!(loaded, credentials);
}

#[tokio::test]
async fn test_missing_token_file() {
    let dir = TempDir::new().unwrap();
    let provider = TokenFileProvider::new(dir.path().join("token.json"));
    assert!(!provider.exists());
    assert!(matches!(
        provider.provide_credentials().await,
        Err(CredentialsError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_token_file_with_missing_fields_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("token.json");
    std::fs::write(&path, json!({ "access_token": "abc" }).to_string()).unwrap();

    let err = TokenFileProvider::new(&path)
        .provide_credentials()
        .await
        .unwrap_err();
    match err {
        CredentialsError::Invalid(message) => {
            assert!(message.contains("retailer_id"));
            assert!(message.contains("branch_id"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_debug_output_masks_token() {
    let credentials = Credentials {
        access_token: "supersecrettokenvalue".to_string(),
        retailer_id: "shop".to_string(),
        branch_id: 1,
        expires_at: None,
    };
    let rendered = format!("{credentials:?}");
    assert!(!rendered.contains("supersecrettokenvalue"));
}
