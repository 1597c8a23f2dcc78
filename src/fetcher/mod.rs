//! KiotViet endpoint access
//!
//! [`RetailSource`] is the seam between the sync engines and the vendor API:
//! the engines only page through it, so they can be driven by the real
//! [`KiotVietFetcher`] or by an in-memory source in tests.

use async_trait::async_trait;

use crate::client::ApiResult;
use crate::{InvoiceLine, InvoiceSummary, Page, Product};

pub mod kiotviet;

pub use kiotviet::KiotVietFetcher;

/// Which invoices a listing covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceWindow {
    /// Invoices purchased from this marker on (`PurchaseDateFrom`)
    Since(String),
    /// A vendor preset range such as `alltime` or `month` (`TimeRange`)
    TimeRange(String),
}

/// One invoice listing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceQuery {
    /// Records to skip
    pub skip: usize,
    /// Page size
    pub take: usize,
    /// Date window
    pub window: InvoiceWindow,
}

/// Paged access to the retail API
#[async_trait]
pub trait RetailSource: Send + Sync {
    /// One page of completed invoices for the branch
    async fn list_invoices(&self, query: &InvoiceQuery) -> ApiResult<Page<InvoiceSummary>>;

    /// Line items of one invoice
    async fn invoice_details(&self, invoice_id: i64) -> ApiResult<Vec<InvoiceLine>>;

    /// One page of the branch's master product list
    async fn list_products(&self, skip: usize, take: usize) -> ApiResult<Page<Product>>;
}
