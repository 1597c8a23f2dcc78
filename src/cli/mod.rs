//! Command line surface

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub mod error;
pub mod run;

pub use error::CliError;

/// KiotViet sync CLI
#[derive(Parser, Debug)]
#[command(name = "kiotviet-sync")]
#[command(about = "Sync KiotViet invoices and products to CSV", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (replaces config/default.toml and config/<env>.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Token file written by the token provider
    #[arg(long, global = true)]
    pub token_file: Option<PathBuf>,

    /// Maximum number of retries for failed requests (range: 0-20)
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(0..=20))]
    pub max_retries: Option<u32>,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sync data from KiotViet
    #[command(subcommand)]
    Sync(SyncCommand),

    /// Export snapshots from KiotViet
    #[command(subcommand)]
    Export(ExportCommand),

    /// Invoice sync followed by product export
    RunAll(RunAllArgs),

    /// Repeat run-all on an interval until Ctrl+C
    Watch(WatchArgs),

    /// Inspect the token file
    #[command(subcommand)]
    Credentials(CredentialsCommand),
}

/// `sync` subcommands
#[derive(Subcommand, Debug)]
pub enum SyncCommand {
    /// Sync invoice line items
    Invoices(InvoiceArgs),
}

/// `export` subcommands
#[derive(Subcommand, Debug)]
pub enum ExportCommand {
    /// Export the master product list
    Products(ProductArgs),
}

/// `credentials` subcommands
#[derive(Subcommand, Debug)]
pub enum CredentialsCommand {
    /// Validate the token file and print a masked summary
    Check,
}

/// Invoice sync arguments
#[derive(Args, Debug, Clone, Default)]
pub struct InvoiceArgs {
    /// Ignore the checkpoint and rewrite the whole output
    #[arg(long)]
    pub full: bool,

    /// Invoices per listing page (1-1000)
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Output CSV
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Upload the CSV to blob storage afterwards
    #[arg(long)]
    pub upload: bool,
}

/// Product export arguments
#[derive(Args, Debug, Clone, Default)]
pub struct ProductArgs {
    /// Products per page (1-1000)
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Output CSV
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Comma-separated product fields, in column order
    #[arg(long, value_delimiter = ',')]
    pub fields: Option<Vec<String>>,

    /// Upload the CSV to blob storage afterwards
    #[arg(long)]
    pub upload: bool,
}

/// `run-all` arguments
#[derive(Args, Debug, Clone, Default)]
pub struct RunAllArgs {
    /// Run the invoice sync in full mode
    #[arg(long)]
    pub full_invoice: bool,

    /// Invoices per listing page
    #[arg(long)]
    pub invoice_page_size: Option<usize>,

    /// Products per page
    #[arg(long)]
    pub product_page_size: Option<usize>,

    /// Invoice output CSV
    #[arg(long)]
    pub invoice_output: Option<PathBuf>,

    /// Product output CSV
    #[arg(long)]
    pub product_output: Option<PathBuf>,

    /// Skip the invoice sync
    #[arg(long)]
    pub skip_invoice: bool,

    /// Skip the product export
    #[arg(long)]
    pub skip_product: bool,

    /// Upload finished CSV files to blob storage
    #[arg(long)]
    pub upload: bool,
}

impl RunAllArgs {
    /// Invoice step arguments
    pub fn invoice_args(&self) -> InvoiceArgs {
        InvoiceArgs {
            full: self.full_invoice,
            page_size: self.invoice_page_size,
            output: self.invoice_output.clone(),
            upload: self.upload,
        }
    }

    /// Product step arguments
    pub fn product_args(&self) -> ProductArgs {
        ProductArgs {
            page_size: self.product_page_size,
            output: self.product_output.clone(),
            fields: None,
            upload: self.upload,
        }
    }
}

/// `watch` arguments
#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Pause between runs, e.g. 90s, 2m, 1h
    #[arg(long, default_value = "2m", value_parser = parse_interval)]
    pub interval: Duration,

    /// Steps to run on every iteration
    #[command(flatten)]
    pub run: RunAllArgs,
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Parse `<number>[s|m|h]`; a bare number is seconds.
pub fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: u64 = number
        .parse()
        .map_err(|_| format!("'{s}' is not a valid interval"))?;

    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        other => return Err(format!("unknown interval unit '{other}' (use s, m or h)")),
    };
    let seconds = value
        .checked_mul(multiplier)
        .ok_or_else(|| "interval too large".to_string())?;
    if seconds == 0 {
        return Err("interval must be positive".to_string());
    }
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_invoices() {
        let cli = Cli::try_parse_from([
            "kiotviet-sync",
            "--max-retries",
            "5",
            "sync",
            "invoices",
            "--full",
            "--page-size",
            "50",
        ])
        .unwrap();

        assert_eq!(cli.max_retries, Some(5));
        match cli.command {
            Commands::Sync(SyncCommand::Invoices(args)) => {
                assert!(args.full);
                assert_eq!(args.page_size, Some(50));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_product_fields() {
        let cli = Cli::try_parse_from([
            "kiotviet-sync",
            "export",
            "products",
            "--fields",
            "Code,Name,BasePrice",
        ])
        .unwrap();

        match cli.command {
            Commands::Export(ExportCommand::Products(args)) => {
                assert_eq!(
                    args.fields,
                    Some(vec!["Code".to_string(), "Name".to_string(), "BasePrice".to_string()])
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_max_retries_range() {
        assert!(Cli::try_parse_from(["kiotviet-sync", "--max-retries", "0", "run-all"]).is_ok());
        assert!(Cli::try_parse_from(["kiotviet-sync", "--max-retries", "21", "run-all"]).is_err());
    }

    #[test]
    fn test_watch_flattens_run_all_flags() {
        let cli = Cli::try_parse_from([
            "kiotviet-sync",
            "watch",
            "--interval",
            "5m",
            "--skip-product",
        ])
        .unwrap();

        match cli.command {
            Commands::Watch(args) => {
                assert_eq!(args.interval, Duration::from_secs(300));
                assert!(args.run.skip_product);
                assert!(!args.run.skip_invoice);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("90"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_interval("45s"), Ok(Duration::from_secs(45)));
        assert_eq!(parse_interval("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_interval("1h"), Ok(Duration::from_secs(3600)));
        assert!(parse_interval("0s").is_err());
        assert!(parse_interval("2d").is_err());
        assert!(parse_interval("soon").is_err());
    }

    #[test]
    fn test_parse_interval_rejects_overflow() {
        assert_eq!(
            parse_interval("10000000000000000h"),
            Err("interval too large".to_string())
        );
        assert_eq!(
            parse_interval("18446744073709551615s"),
            Ok(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("human".parse::<OutputFormat>(), Ok(OutputFormat::Human));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
