//! Product catalog export
//!
//! Pages through the master product list until an empty page and writes a
//! fresh snapshot. The snapshot is staged and renamed over the previous
//! export only after the last page, so a failed run keeps the old file.

use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{ProductExportResult, SyncError, MAX_PAGES};
use crate::config::{AppConfig, ProductConfig};
use crate::credentials::Credentials;
use crate::fetcher::{KiotVietFetcher, RetailSource};
use crate::output::{OutputWriter, ProductCsvWriter};

/// Exports the master product list to CSV
pub struct ProductExportEngine<S = KiotVietFetcher> {
    source: S,
    config: ProductConfig,
    output_path: PathBuf,
    progress: ProgressBar,
}

impl ProductExportEngine<KiotVietFetcher> {
    /// Engine wired to the KiotViet API with paths from `config`
    pub fn from_config(config: &AppConfig, credentials: Credentials) -> Result<Self, SyncError> {
        config.api.validate()?;
        config.products.validate()?;
        let source = KiotVietFetcher::from_config(config, credentials)?;
        Self::new(source, config.products.clone(), config.product_output_path())
    }
}

impl<S: RetailSource> ProductExportEngine<S> {
    /// Engine over any [`RetailSource`]; fails on a bad page size or field list
    pub fn new(
        source: S,
        config: ProductConfig,
        output_path: impl Into<PathBuf>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            output_path: output_path.into(),
            progress: ProgressBar::hidden(),
        })
    }

    /// Report progress on `bar` (hidden by default)
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = bar;
        self
    }

    /// Output CSV path
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Export every product
    pub async fn run(&self) -> Result<ProductExportResult, SyncError> {
        let started = Instant::now();
        let page_size = self.config.page_size;

        info!(
            page_size,
            fields = self.config.fields.len(),
            output = %self.output_path.display(),
            "Starting product export"
        );

        let mut writer =
            ProductCsvWriter::new(&self.output_path, &self.config.fields, self.config.utf8_bom)?;
        let mut skip = 0usize;
        let mut pages = 0u64;

        loop {
            if pages as usize >= MAX_PAGES {
                return Err(SyncError::PaginationLimit(MAX_PAGES));
            }

            let page = self.source.list_products(skip, page_size).await?;
            if pages == 0 {
                if let Some(total) = page.reported_total() {
                    self.progress.set_length(total);
                }
            }
            if page.is_empty() {
                debug!(skip, "Empty page, export complete");
                break;
            }

            writer.write_products(&page.data)?;
            pages += 1;
            self.progress.inc(page.len() as u64);
            debug!(page = pages, skip, products = page.len(), "Wrote product page");
            skip += page_size;
        }

        let products = writer.rows_written();
        if products == 0 {
            warn!("No products returned, writing header-only export");
        }
        writer.close()?;
        self.progress.finish_and_clear();

        let result = ProductExportResult {
            products,
            pages,
            output_file: self.output_path.clone(),
            duration_secs: started.elapsed().as_secs_f64(),
        };
        info!(
            products = result.products,
            pages = result.pages,
            duration_secs = result.duration_secs,
            "Product export finished"
        );
        Ok(result)
    }
}
