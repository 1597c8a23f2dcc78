//! Incremental invoice sync
//!
//! Per page:
//! 1. List the page (`Skip`/`Take`) inside a fixed date window
//! 2. Drop invoices already handled (non-positive id, seen this run,
//!    purchased before the starting marker, already in the output). Invoices
//!    stamped exactly at the marker are listed again, since a failed page may
//!    have split a run of equal timestamps; the output ids catch repeats.
//! 3. Fetch details for each remaining invoice; failures are counted as
//!    skipped and the run continues, except 401/403 which abort it
//! 4. Flush and fsync the rows, then advance and persist the checkpoint
//!
//! Runs without a usable checkpoint (full mode, first run, malformed
//! checkpoint) stream into a staging file that replaces the output only once
//! every page has been written. The checkpoint is saved after that
//! replacement, so an aborted full run leaves both untouched.

use indicatif::ProgressBar;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{InvoiceSyncResult, SyncError, SyncMode, MAX_PAGES};
use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use crate::config::{AppConfig, InvoiceConfig};
use crate::credentials::Credentials;
use crate::fetcher::{InvoiceQuery, InvoiceWindow, KiotVietFetcher, RetailSource};
use crate::output::{read_invoice_ids, InvoiceCsvWriter, OutputWriter};
use crate::InvoiceSummary;

/// Listing page after filtering
#[derive(Debug, Default)]
struct Selection {
    /// Invoices to fetch and write
    fresh: Vec<InvoiceSummary>,
    /// Invoices already present in the output
    already_synced: Vec<InvoiceSummary>,
}

/// Split a raw listing page into new and already-written invoices.
///
/// `seen` collects every id accepted during this run.
fn select_invoices(
    page: Vec<InvoiceSummary>,
    seen: &mut HashSet<i64>,
    marker: Option<&str>,
    existing: &HashSet<i64>,
) -> Selection {
    let mut selection = Selection::default();
    for invoice in page {
        let id = invoice.id();
        if id <= 0 || seen.contains(&id) {
            continue;
        }
        if marker.is_some_and(|m| !invoice.purchased_since(m)) {
            continue;
        }
        seen.insert(id);
        if existing.contains(&id) {
            selection.already_synced.push(invoice);
        } else {
            selection.fresh.push(invoice);
        }
    }
    selection
}

/// Running totals for one sync
#[derive(Debug, Default)]
struct Counters {
    invoices: u64,
    lines: u64,
    skipped: u64,
    already_synced: u64,
    pages: u64,
}

/// Pulls invoices page by page into the invoice CSV
pub struct InvoiceSyncEngine<S = KiotVietFetcher> {
    source: S,
    config: InvoiceConfig,
    output_path: PathBuf,
    store: CheckpointStore,
    progress: ProgressBar,
}

impl InvoiceSyncEngine<KiotVietFetcher> {
    /// Engine wired to the KiotViet API with paths from `config`
    pub fn from_config(config: &AppConfig, credentials: Credentials) -> Result<Self, SyncError> {
        config.api.validate()?;
        let source = KiotVietFetcher::from_config(config, credentials)?;
        Self::new(
            source,
            config.invoices.clone(),
            config.invoice_output_path(),
            CheckpointStore::new(config.invoice_checkpoint_path()),
        )
    }
}

impl<S: RetailSource> InvoiceSyncEngine<S> {
    /// Engine over any [`RetailSource`]; fails on an invalid page size
    pub fn new(
        source: S,
        config: InvoiceConfig,
        output_path: impl Into<PathBuf>,
        store: CheckpointStore,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            output_path: output_path.into(),
            store,
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

    /// Checkpoint store
    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Run one sync.
    pub async fn run(&self, mode: SyncMode) -> Result<InvoiceSyncResult, SyncError> {
        let started = Instant::now();

        let mut lock = self.store.run_lock()?;
        let _guard = lock.try_acquire().map_err(|e| match e {
            CheckpointError::Locked(path) => SyncError::AlreadyRunning(path),
            other => SyncError::Checkpoint(other),
        })?;

        let stored = match mode {
            SyncMode::Incremental => self.store.load(),
            SyncMode::Full => Checkpoint::beginning(),
        };
        let marker = stored.marker().map(str::to_string);
        let incremental = marker.is_some();
        let window = match &marker {
            Some(marker) => InvoiceWindow::Since(marker.clone()),
            None => InvoiceWindow::TimeRange(self.config.full_time_range.clone()),
        };

        let (mut writer, existing) = if incremental {
            let existing = read_invoice_ids(&self.output_path)?;
            (InvoiceCsvWriter::append(&self.output_path)?, existing)
        } else {
            (InvoiceCsvWriter::staged(&self.output_path)?, HashSet::new())
        };

        info!(
            mode = %mode,
            incremental,
            checkpoint = marker.as_deref().unwrap_or("none"),
            known_invoices = existing.len(),
            output = %self.output_path.display(),
            page_size = self.config.page_size,
            "Starting invoice sync"
        );

        let page_size = self.config.page_size;
        let mut checkpoint = stored.clone();
        let mut persisted = stored;
        let mut checkpoint_updated = false;
        let mut seen = HashSet::new();
        let mut counters = Counters::default();
        let mut skip = 0usize;

        loop {
            if counters.pages as usize >= MAX_PAGES {
                return Err(SyncError::PaginationLimit(MAX_PAGES));
            }

            let query = InvoiceQuery {
                skip,
                take: page_size,
                window: window.clone(),
            };
            let page = self.source.list_invoices(&query).await?;
            if page.is_empty() {
                debug!(skip, "Empty page, listing complete");
                break;
            }
            if counters.pages == 0 {
                if let Some(total) = page.reported_total() {
                    self.progress.set_length(total);
                }
            }

            let raw_len = page.len();
            let selection = select_invoices(page.data, &mut seen, marker.as_deref(), &existing);
            debug!(
                page = counters.pages + 1,
                skip,
                listed = raw_len,
                fresh = selection.fresh.len(),
                already_synced = selection.already_synced.len(),
                "Fetched invoice page"
            );

            for invoice in &selection.already_synced {
                checkpoint.advance(invoice.purchase_date(), invoice.id());
            }
            counters.already_synced += selection.already_synced.len() as u64;

            for invoice in &selection.fresh {
                let id = invoice.id();
                match self.source.invoice_details(id).await {
                    Ok(lines) => {
                        counters.lines += writer.write_invoice(invoice, &lines)? as u64;
                        counters.invoices += 1;
                        checkpoint.advance(invoice.purchase_date(), id);
                    }
                    Err(e) if e.is_auth_failure() => {
                        warn!(invoice_id = id, error = %e, "Authorization rejected, aborting sync");
                        return Err(e.into());
                    }
                    Err(e) => {
                        warn!(invoice_id = id, error = %e, "Skipping invoice, details unavailable");
                        counters.skipped += 1;
                    }
                }
            }

            writer.flush()?;
            if incremental && checkpoint.marker() != persisted.marker() {
                self.store.save(&checkpoint)?;
                persisted = checkpoint.clone();
                checkpoint_updated = true;
            }

            counters.pages += 1;
            self.progress.inc(raw_len as u64);
            self.progress.set_message(format!(
                "{} invoices, {} lines, {} skipped",
                counters.invoices, counters.lines, counters.skipped
            ));

            if incremental && raw_len < page_size {
                debug!(listed = raw_len, page_size, "Short page, listing complete");
                break;
            }
            skip += page_size;
        }

        writer.close()?;

        if !incremental {
            self.store.save(&checkpoint)?;
            checkpoint_updated = true;
        }

        self.progress.finish_and_clear();

        let result = InvoiceSyncResult {
            invoices: counters.invoices,
            lines: counters.lines,
            skipped: counters.skipped,
            already_synced: counters.already_synced,
            pages: counters.pages,
            newest_purchase_date: checkpoint.marker().map(str::to_string),
            checkpoint_updated,
            incremental,
            output_file: self.output_path.clone(),
            duration_secs: started.elapsed().as_secs_f64(),
        };

        info!(
            invoices = result.invoices,
            lines = result.lines,
            skipped = result.skipped,
            already_synced = result.already_synced,
            pages = result.pages,
            checkpoint = result.newest_purchase_date.as_deref().unwrap_or("none"),
            checkpoint_updated = result.checkpoint_updated,
            duration_secs = result.duration_secs,
            "Invoice sync finished"
        );
        Ok(result)
    }
}
