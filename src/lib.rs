//! # KiotViet Sync Library
//!
//! Pulls sales invoices and the product catalog from the KiotViet retail API
//! and writes them to CSV, ready for upload to blob storage or loading into a
//! warehouse.
//!
//! ## Features
//!
//! - **Incremental invoice sync**: a persisted checkpoint keeps each run to the
//!   invoices purchased since the previous one
//! - **Product snapshots**: full catalog export with configurable columns
//! - **Retry with backoff**: 429 and 5xx responses are retried with jittered
//!   exponential backoff, 401 surfaces immediately
//! - **Crash resilience**: checkpoint and rows are committed page by page, and
//!   full rewrites replace the output atomically
//! - **Optional upload**: finished CSV files can be pushed to Azure Blob Storage
//!
//! ## Quick Start
//!
//! ```no_run
//! use kiotviet_sync::config::AppConfig;
//! use kiotviet_sync::credentials::{CredentialsProvider, TokenFileProvider};
//! use kiotviet_sync::sync::{InvoiceSyncEngine, SyncMode};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load(None)?;
//! let credentials = TokenFileProvider::new(config.token_file())
//!     .provide_credentials()
//!     .await?;
//!
//! let engine = InvoiceSyncEngine::from_config(&config, credentials)?;
//! let result = engine.run(SyncMode::Incremental).await?;
//! println!("{} invoices, {} lines", result.invoices, result.lines);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`config`] - Layered configuration (defaults, TOML files, environment)
//! - [`credentials`] - Token file loading behind the [`credentials::CredentialsProvider`] seam
//! - [`client`] - HTTP client with retry/backoff and error translation
//! - [`fetcher`] - KiotViet endpoints (invoice list, invoice details, products)
//! - [`checkpoint`] - Persisted sync marker with atomic writes and a run lock
//! - [`output`] - CSV writers for invoice lines and product snapshots
//! - [`sync`] - Invoice sync and product export engines
//! - [`upload`] - Optional blob storage upload
//! - [`cli`] - Command line surface

#![warn(missing_docs)]
#![warn(clippy::all)]

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Persisted sync marker and run lock
pub mod checkpoint;

/// CLI command implementations
pub mod cli;

/// HTTP client with retry
pub mod client;

/// Layered application configuration
pub mod config;

/// Credential loading
pub mod credentials;

/// KiotViet endpoint access
pub mod fetcher;

/// CSV output writers
pub mod output;

/// Invoice sync and product export engines
pub mod sync;

/// Blob storage upload
pub mod upload;

pub use credentials::Credentials;

/// Product columns exported when no field selection is configured.
pub const DEFAULT_PRODUCT_FIELDS: &[&str] = &[
    "Id",
    "ProductId",
    "MasterCode",
    "Code",
    "Barcode",
    "Name",
    "FullName",
    "CategoryName",
    "CategoryNameTree",
    "BasePrice",
    "Cost",
    "LatestPurchasePrice",
    "OnHand",
    "OnOrder",
    "ProductImage",
    "CreatedDate",
];

/// Every product field the master product endpoint is known to return.
///
/// Field selections are validated against this list before any request is
/// made, so a typo fails the run up front instead of producing an empty column.
pub const KNOWN_PRODUCT_FIELDS: &[&str] = &[
    "Id",
    "ProductId",
    "MasterProductId",
    "MasterUnitId",
    "MasterCode",
    "Code",
    "Barcode",
    "Name",
    "FullName",
    "CategoryId",
    "CategoryName",
    "CategoryNameTree",
    "TradeMarkName",
    "BasePrice",
    "Cost",
    "LatestPurchasePrice",
    "OnHand",
    "OnOrder",
    "Reserved",
    "MinQuantity",
    "MaxQuantity",
    "Unit",
    "ConversionValue",
    "Weight",
    "Description",
    "AllowsSale",
    "IsActive",
    "HasVariants",
    "ProductType",
    "ProductImage",
    "CreatedDate",
    "ModifiedDate",
];

/// Treat an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One page of a KiotViet listing endpoint
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Page<T> {
    /// Records on this page
    #[serde(rename = "Data", default = "Vec::new", deserialize_with = "null_as_default")]
    pub data: Vec<T>,
    /// Total record count reported by invoice listings
    #[serde(rename = "Total", default)]
    pub total: Option<u64>,
    /// Total record count reported by the master product listing
    #[serde(rename = "TotalProduct", default)]
    pub total_product: Option<u64>,
}

impl<T> Page<T> {
    /// Whether the page carries no records
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of records on the page
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Total reported by the vendor, whichever key it used
    pub fn reported_total(&self) -> Option<u64> {
        self.total.or(self.total_product)
    }
}

/// Invoice summary as returned by the invoice listing
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct InvoiceSummary {
    /// Vendor invoice id
    #[serde(default)]
    pub id: Option<i64>,
    /// Human-facing invoice code (e.g. "HD012345")
    #[serde(default)]
    pub code: Option<String>,
    /// Purchase timestamp in the vendor's ISO-8601 local format
    #[serde(default)]
    pub purchase_date: Option<String>,
    /// Invoice total after discounts
    #[serde(default)]
    pub total: Option<Decimal>,
    /// Amount paid by the customer
    #[serde(default)]
    pub total_payment: Option<Decimal>,
    /// Customer code, empty for walk-in sales
    #[serde(default)]
    pub customer_code: Option<String>,
    /// Customer display name
    #[serde(default)]
    pub customer_name: Option<String>,
    /// Cashier or seller name
    #[serde(default)]
    pub sold_by_name: Option<String>,
    /// Vendor invoice status code (1 = completed)
    #[serde(default)]
    pub status: Option<i64>,
}

impl InvoiceSummary {
    /// Invoice id, zero when the vendor omitted it
    pub fn id(&self) -> i64 {
        self.id.unwrap_or(0)
    }

    /// Purchase date, empty when the vendor omitted it
    pub fn purchase_date(&self) -> &str {
        self.purchase_date.as_deref().unwrap_or("")
    }

    /// Whether this invoice was purchased at or after `marker`.
    ///
    /// Vendor timestamps share one fixed-width format, so string ordering
    /// matches chronological ordering.
    pub fn purchased_since(&self, marker: &str) -> bool {
        self.purchase_date() >= marker
    }
}

/// A single line item of an invoice
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct InvoiceLine {
    /// Vendor product id
    #[serde(default)]
    pub product_id: Option<i64>,
    /// Product code (SKU)
    #[serde(default)]
    pub product_code: Option<String>,
    /// Product name at time of sale
    #[serde(default)]
    pub product_name: Option<String>,
    /// Quantity sold
    #[serde(default)]
    pub quantity: Option<Decimal>,
    /// Unit price
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Line discount
    #[serde(default)]
    pub discount: Option<Decimal>,
    /// Line subtotal
    #[serde(default)]
    pub sub_total: Option<Decimal>,
}

/// A product record from the master product listing.
///
/// Kept as the raw vendor object because the exported columns are chosen at
/// runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Product(pub Map<String, Value>);

impl Product {
    /// Vendor product id
    pub fn id(&self) -> Option<i64> {
        self.0.get("Id").and_then(Value::as_i64)
    }

    /// Product code (SKU)
    pub fn code(&self) -> Option<&str> {
        self.0.get("Code").and_then(Value::as_str)
    }

    /// Render a field as a CSV cell.
    ///
    /// Strings are written as-is, missing and null fields are empty, nested
    /// values are written as compact JSON.
    pub fn field(&self, name: &str) -> String {
        match self.0.get(name) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => other.to_string(),
        }
    }
}
