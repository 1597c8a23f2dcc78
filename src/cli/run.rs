//! Command execution
//!
//! Each command loads configuration, layers CLI overrides on top, validates
//! the result and only then touches credentials or the network.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{
    Cli, CliError, Commands, CredentialsCommand, ExportCommand, InvoiceArgs, OutputFormat,
    ProductArgs, RunAllArgs, SyncCommand, WatchArgs,
};
use crate::config::AppConfig;
use crate::credentials::{Credentials, CredentialsProvider, TokenFileProvider};
use crate::sync::{
    InvoiceSyncEngine, InvoiceSyncResult, ProductExportEngine, ProductExportResult, SyncMode,
};
use crate::upload::{AzureBlobUploader, BlobUploader};

/// Result of an optional upload step
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    /// Blob name used
    pub blob_name: String,
    /// Blob URL on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Invoice step report
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceReport {
    /// Sync mode requested
    pub mode: SyncMode,
    /// Engine result
    #[serde(flatten)]
    pub result: InvoiceSyncResult,
    /// Upload outcome, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadOutcome>,
}

/// Product step report
#[derive(Debug, Clone, Serialize)]
pub struct ProductReport {
    /// Engine result
    #[serde(flatten)]
    pub result: ProductExportResult,
    /// Upload outcome, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadOutcome>,
}

/// `run-all` report
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunAllReport {
    /// Invoice step, unless skipped
    pub invoices: Option<InvoiceReport>,
    /// Product step, unless skipped
    pub products: Option<ProductReport>,
}

#[derive(Debug, Serialize)]
struct CredentialsSummary {
    token_file: PathBuf,
    retailer: String,
    branch_id: i64,
    access_token: String,
    expires_at: Option<String>,
    expired: bool,
}

impl Cli {
    /// Run the selected command
    pub async fn execute(&self) -> Result<(), CliError> {
        match &self.command {
            Commands::Sync(SyncCommand::Invoices(args)) => {
                let config = self.load_config()?;
                let report = self.sync_invoices(config, args).await?;
                self.print_invoice_report(&report)
            }
            Commands::Export(ExportCommand::Products(args)) => {
                let config = self.load_config()?;
                let report = self.export_products(config, args).await?;
                self.print_product_report(&report)
            }
            Commands::RunAll(args) => {
                if args.skip_invoice && args.skip_product {
                    self.print_nothing_to_do();
                    return Ok(());
                }
                let report = self.run_all(args).await?;
                self.print_run_all_report(&report)
            }
            Commands::Watch(args) => self.watch(args).await,
            Commands::Credentials(CredentialsCommand::Check) => self.check_credentials().await,
        }
    }

    /// Configuration with global flags applied
    pub fn load_config(&self) -> Result<AppConfig, CliError> {
        let mut config = AppConfig::load(self.config.as_deref())?;
        if let Some(token_file) = &self.token_file {
            config.credentials.token_file = token_file.clone();
        }
        if let Some(max_retries) = self.max_retries {
            config.api.max_retries = max_retries;
        }
        Ok(config)
    }

    async fn sync_invoices(
        &self,
        mut config: AppConfig,
        args: &InvoiceArgs,
    ) -> Result<InvoiceReport, CliError> {
        if let Some(page_size) = args.page_size {
            config.invoices.page_size = page_size;
        }
        if let Some(output) = &args.output {
            config.invoices.output_file = from_current_dir(output)?;
        }
        config.validate()?;

        let credentials = load_credentials(&config).await?;
        let mode = if args.full {
            SyncMode::Full
        } else {
            SyncMode::Incremental
        };

        let engine = InvoiceSyncEngine::from_config(&config, credentials)?
            .with_progress(self.progress_bar("Syncing invoices"));
        let result = engine.run(mode).await?;

        let upload = if args.upload || config.upload.enabled {
            Some(upload_output(&config, &result.output_file).await)
        } else {
            None
        };
        Ok(InvoiceReport {
            mode,
            result,
            upload,
        })
    }

    async fn export_products(
        &self,
        mut config: AppConfig,
        args: &ProductArgs,
    ) -> Result<ProductReport, CliError> {
        if let Some(page_size) = args.page_size {
            config.products.page_size = page_size;
        }
        if let Some(output) = &args.output {
            config.products.output_file = from_current_dir(output)?;
        }
        if let Some(fields) = &args.fields {
            config.products.fields = fields
                .iter()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect();
        }
        config.validate()?;

        let credentials = load_credentials(&config).await?;
        let engine = ProductExportEngine::from_config(&config, credentials)?
            .with_progress(self.progress_bar("Exporting products"));
        let result = engine.run().await?;

        let upload = if args.upload || config.upload.enabled {
            Some(upload_output(&config, &result.output_file).await)
        } else {
            None
        };
        Ok(ProductReport { result, upload })
    }

    /// Invoice sync then product export; the first failure aborts the run.
    async fn run_all(&self, args: &RunAllArgs) -> Result<RunAllReport, CliError> {
        let mut report = RunAllReport::default();

        if args.skip_invoice {
            info!("Invoice sync skipped by flag");
        } else {
            info!("Starting invoice synchronization");
            let config = self.load_config()?;
            report.invoices = Some(self.sync_invoices(config, &args.invoice_args()).await?);
        }

        if args.skip_product {
            info!("Product export skipped by flag");
        } else {
            info!("Starting product export");
            let config = self.load_config()?;
            report.products = Some(self.export_products(config, &args.product_args()).await?);
        }

        Ok(report)
    }

    /// Repeat `run-all` until Ctrl+C. Runs never overlap; a failed run is
    /// logged and the next one starts after the interval.
    async fn watch(&self, args: &WatchArgs) -> Result<(), CliError> {
        if args.run.skip_invoice && args.run.skip_product {
            self.print_nothing_to_do();
            return Ok(());
        }
        // Catch bad flags and config before entering the loop.
        let mut config = self.load_config()?;
        if let Some(page_size) = args.run.invoice_page_size {
            config.invoices.page_size = page_size;
        }
        if let Some(page_size) = args.run.product_page_size {
            config.products.page_size = page_size;
        }
        config.validate()?;

        let (stop_tx, mut stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("Ctrl+C received - stopping watch...");
                    let _ = stop_tx.send(true);
                }
                Err(e) => {
                    warn!(error = %e, "Cannot listen for Ctrl+C");
                    // Keep the sender alive so the loop is not stopped.
                    std::future::pending::<()>().await;
                    drop(stop_tx);
                }
            }
        });

        let interval_secs = args.interval.as_secs();
        let mut iteration = 0u64;
        loop {
            iteration += 1;
            info!(iteration, "Starting scheduled run");

            tokio::select! {
                outcome = self.run_all(&args.run) => match outcome {
                    Ok(report) => {
                        info!(iteration, "Scheduled run completed");
                        if let Err(e) = self.print_run_all_report(&report) {
                            error!(iteration, error = %e, "Cannot print run report");
                        }
                    }
                    Err(e) => error!(iteration, error = %e, "Scheduled run failed"),
                },
                _ = stop_rx.changed() => {
                    warn!(iteration, "Scheduled run interrupted");
                    break;
                }
            }

            if *stop_rx.borrow() {
                break;
            }
            info!(interval_secs, "Waiting for next run");
            tokio::select! {
                _ = tokio::time::sleep(args.interval) => {}
                _ = stop_rx.changed() => break,
            }
        }

        info!(iterations = iteration, "Watch stopped");
        Ok(())
    }

    async fn check_credentials(&self) -> Result<(), CliError> {
        let config = self.load_config()?;
        let provider = TokenFileProvider::new(config.token_file());
        let credentials = provider.provide_credentials().await?;

        let summary = CredentialsSummary {
            token_file: provider.path().to_path_buf(),
            retailer: credentials.retailer_id.clone(),
            branch_id: credentials.branch_id,
            access_token: credentials.masked_token(),
            expires_at: credentials.expires_at.clone(),
            expired: credentials.is_expired_at(chrono::Utc::now()),
        };

        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
            OutputFormat::Human => {
                println!("Token file: {}", summary.token_file.display());
                println!("Retailer: {}", summary.retailer);
                println!("Branch ID: {}", summary.branch_id);
                println!("Access token: {}", summary.access_token);
                match &summary.expires_at {
                    Some(at) if summary.expired => println!("Expires at: {at} (EXPIRED)"),
                    Some(at) => println!("Expires at: {at}"),
                    None => println!("Expires at: unknown"),
                }
            }
        }
        Ok(())
    }

    fn progress_bar(&self, message: &'static str) -> ProgressBar {
        if self.output_format == OutputFormat::Json {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(message);
        pb
    }

    fn print_nothing_to_do(&self) {
        match self.output_format {
            OutputFormat::Json => println!(r#"{{"status":"nothing_to_do"}}"#),
            OutputFormat::Human => {
                println!("Nothing to do: both invoice and product steps are skipped.")
            }
        }
    }

    fn print_invoice_report(&self, report: &InvoiceReport) -> Result<(), CliError> {
        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
            OutputFormat::Human => print_invoice_human(report),
        }
        Ok(())
    }

    fn print_product_report(&self, report: &ProductReport) -> Result<(), CliError> {
        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
            OutputFormat::Human => print_product_human(report),
        }
        Ok(())
    }

    fn print_run_all_report(&self, report: &RunAllReport) -> Result<(), CliError> {
        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
            OutputFormat::Human => {
                if let Some(invoices) = &report.invoices {
                    print_invoice_human(invoices);
                }
                if let Some(products) = &report.products {
                    print_product_human(products);
                }
            }
        }
        Ok(())
    }
}

async fn load_credentials(config: &AppConfig) -> Result<Credentials, CliError> {
    let credentials = TokenFileProvider::new(config.token_file())
        .provide_credentials()
        .await?;
    info!(
        retailer = %credentials.retailer_id,
        branch_id = credentials.branch_id,
        "Credentials loaded"
    );
    Ok(credentials)
}

/// Upload a finished CSV. Failures are logged and reported, never raised.
async fn upload_output(config: &AppConfig, path: &Path) -> UploadOutcome {
    let blob_name = config.upload.blob_name(path);
    let uploaded = match AzureBlobUploader::from_env() {
        Ok(uploader) => uploader.upload(path, &blob_name).await,
        Err(e) => Err(e),
    };

    match uploaded {
        Ok(url) => UploadOutcome {
            blob_name,
            url: Some(url),
            error: None,
        },
        Err(e) => {
            error!(path = %path.display(), blob = %blob_name, error = %e, "Upload failed, local file kept");
            UploadOutcome {
                blob_name,
                url: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// CLI paths are relative to the working directory, not `data.output_dir`.
fn from_current_dir(path: &Path) -> Result<PathBuf, CliError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| CliError::InvalidArgument(format!("cannot resolve {}: {e}", path.display())))?;
    Ok(cwd.join(path))
}

fn print_upload_human(upload: &Option<UploadOutcome>) {
    match upload {
        Some(UploadOutcome { url: Some(url), .. }) => println!("Uploaded: {url}"),
        Some(UploadOutcome {
            error: Some(error), ..
        }) => eprintln!("Upload failed: {error}"),
        _ => {}
    }
}

fn print_invoice_human(report: &InvoiceReport) {
    let result = &report.result;
    println!(
        "Invoice sync completed ({}): invoices={} lines={} skipped={} duration={:.1}s output={}",
        report.mode,
        result.invoices,
        result.lines,
        result.skipped,
        result.duration_secs,
        result.output_file.display()
    );
    if result.already_synced > 0 {
        println!("Already synced: {}", result.already_synced);
    }
    if let Some(date) = &result.newest_purchase_date {
        println!("Newest purchase date: {date}");
    }
    println!(
        "{}",
        if result.checkpoint_updated {
            "Checkpoint updated"
        } else {
            "Checkpoint unchanged"
        }
    );
    print_upload_human(&report.upload);
}

fn print_product_human(report: &ProductReport) {
    let result = &report.result;
    println!(
        "Product export completed: products={} pages={} duration={:.1}s output={}",
        result.products,
        result.pages,
        result.duration_secs,
        result.output_file.display()
    );
    print_upload_human(&report.upload);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn test_global_flags_override_config() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("custom.toml");
        std::fs::write(&config_path, "[api]\nmax_retries = 7\n").unwrap();

        let cli = Cli::try_parse_from([
            "kiotviet-sync",
            "--config",
            config_path.to_str().unwrap(),
            "--token-file",
            "/tmp/other-token.json",
            "--max-retries",
            "2",
            "credentials",
            "check",
        ])
        .unwrap();

        let config = cli.load_config().unwrap();
        assert_eq!(config.api.max_retries, 2);
        assert_eq!(config.token_file(), Path::new("/tmp/other-token.json"));
    }

    #[test]
    fn test_from_current_dir_keeps_absolute_paths() {
        assert_eq!(
            from_current_dir(Path::new("/data/out.csv")).unwrap(),
            PathBuf::from("/data/out.csv")
        );
        assert!(from_current_dir(Path::new("out.csv")).unwrap().is_absolute());
    }

    #[tokio::test]
    async fn test_invalid_page_size_fails_before_credentials() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("custom.toml");
        std::fs::write(&config_path, "").unwrap();
        let cli = Cli::try_parse_from([
            "kiotviet-sync",
            "--config",
            config_path.to_str().unwrap(),
            "--token-file",
            dir.path().join("missing.json").to_str().unwrap(),
            "sync",
            "invoices",
            "--page-size",
            "0",
        ])
        .unwrap();

        let err = cli.execute().await.unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[tokio::test]
    async fn test_missing_token_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("custom.toml");
        std::fs::write(&config_path, "").unwrap();
        let cli = Cli::try_parse_from([
            "kiotviet-sync",
            "--config",
            config_path.to_str().unwrap(),
            "--token-file",
            dir.path().join("missing.json").to_str().unwrap(),
            "credentials",
            "check",
        ])
        .unwrap();

        let err = cli.execute().await.unwrap_err();
        assert!(matches!(err, CliError::Credentials(_)));
    }

    #[test]
    fn test_json_report_flattens_results() {
        let report = ProductReport {
            result: ProductExportResult {
                products: 4,
                pages: 2,
                output_file: PathBuf::from("out.csv"),
                duration_secs: 0.5,
            },
            upload: None,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["products"], 4);
        assert!(value.get("upload").is_none());
    }
}
