//! Unit tests for layered configuration

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use kiotviet_sync::config::{AppConfig, ConfigError};

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_environment_file_overrides_default_file() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "default.toml",
        "[invoices]\npage_size = 200\noutput_file = \"all.csv\"\n",
    );
    write(dir.path(), "production.toml", "[invoices]\npage_size = 500\n");

    let config = AppConfig::from_files(None, dir.path(), Some("production")).unwrap();

    assert_eq!(config.invoices.page_size, 500);
    assert_eq!(config.invoices.output_file, PathBuf::from("all.csv"));
    assert_eq!(config.products.page_size, 100);
}

#[test]
fn test_missing_layer_files_yield_defaults() {
    let dir = TempDir::new().unwrap();
    let config = AppConfig::from_files(None, dir.path(), Some("staging")).unwrap();
    assert_eq!(config, AppConfig::default());
}

#[test]
fn test_explicit_file_must_exist() {
    let dir = TempDir::new().unwrap();
    let err = AppConfig::from_files(Some(dir.path().join("nope.toml").as_path()), dir.path(), None)
        .unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(_)));
}

#[test]
fn test_environment_variables_win_over_files() {
    let dir = TempDir::new().unwrap();
    let file = write(dir.path(), "custom.toml", "[api]\nmax_retries = 4\ntimeout_secs = 10\n");
    let mut config = AppConfig::from_files(Some(file.as_path()), dir.path(), None).unwrap();

    let env: HashMap<&str, &str> = HashMap::from([
        ("KIOTVIET_MAX_RETRIES", "9"),
        ("KIOTVIET_OUTPUT_DIR", "/srv/exports"),
    ]);
    config
        .apply_env_with(|name| env.get(name).map(|v| v.to_string()))
        .unwrap();

    assert_eq!(config.api.max_retries, 9);
    assert_eq!(config.api.timeout_secs, 10);
    assert_eq!(
        config.invoice_output_path(),
        PathBuf::from("/srv/exports/invoice_details.csv")
    );
}

#[test]
fn test_validation_rejects_out_of_range_values() {
    let mut config = AppConfig::default();
    config.products.page_size = 1001;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

    let mut config = AppConfig::default();
    config.api.max_retries = 21;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.products.fields = vec!["Code".to_string(), "Colour".to_string()];
    assert!(config.validate().is_err());

    assert!(AppConfig::default().validate().is_ok());
}
