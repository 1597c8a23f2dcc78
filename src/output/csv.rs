//! CSV writers for invoice lines and product snapshots
//!
//! Invoice output is either appended to (incremental runs) or staged in a
//! temp file and renamed over the target on close (full runs). Product
//! output is always staged so a failed export never leaves a half-written
//! snapshot behind.

use csv::{ReaderBuilder, Writer, WriterBuilder};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{parent_dir, sync_dir, OutputError, OutputResult, OutputWriter};
use crate::{InvoiceLine, InvoiceSummary, Product};

const DEFAULT_BUFFER_SIZE: usize = 8192;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Column order of the invoice detail CSV
pub const INVOICE_HEADER: [&str; 15] = [
    "InvoiceId",
    "InvoiceCode",
    "PurchaseDate",
    "CustomerCode",
    "CustomerName",
    "SoldByName",
    "Total",
    "TotalPayment",
    "ProductId",
    "ProductCode",
    "ProductName",
    "Quantity",
    "Price",
    "Discount",
    "SubTotal",
];

/// Where rows end up
enum Sink {
    /// Existing output opened for append
    Append(File),
    /// Temp file next to the target, renamed over it on close
    Staged(NamedTempFile),
}

impl Sink {
    fn staged(target: &Path) -> OutputResult<Self> {
        let parent = parent_dir(target);
        std::fs::create_dir_all(parent)
            .map_err(|e| OutputError::IoError(format!("Failed to create directory: {}", e)))?;

        let prefix = format!(
            ".{}.",
            target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "output".to_string())
        );
        let temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".partial")
            .tempfile_in(parent)
            .map_err(|e| OutputError::IoError(format!("Failed to create staging file: {}", e)))?;
        debug!(target = %target.display(), staging = %temp.path().display(), "Staging output");
        Ok(Self::Staged(temp))
    }

    fn file(&self) -> &File {
        match self {
            Self::Append(file) => file,
            Self::Staged(temp) => temp.as_file(),
        }
    }

    /// Make the written bytes visible at `target`.
    fn finish(self, target: &Path) -> OutputResult<()> {
        match self {
            Self::Append(_) => Ok(()),
            Self::Staged(temp) => {
                temp.persist(target).map_err(|e| OutputError::PersistError {
                    path: target.display().to_string(),
                    message: e.error.to_string(),
                })?;
                sync_dir(parent_dir(target))
                    .map_err(|e| OutputError::FlushError(format!("Failed to sync directory: {}", e)))
            }
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Append(file) => file.write(buf),
            Self::Staged(temp) => temp.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Append(file) => file.flush(),
            Self::Staged(temp) => temp.flush(),
        }
    }
}

fn csv_writer(sink: Sink) -> Writer<BufWriter<Sink>> {
    WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, sink))
}

fn flush_and_sync(writer: &mut Writer<BufWriter<Sink>>) -> OutputResult<()> {
    writer
        .flush()
        .map_err(|e| OutputError::FlushError(format!("Failed to flush: {}", e)))?;
    writer
        .get_ref()
        .get_ref()
        .file()
        .sync_all()
        .map_err(|e| OutputError::FlushError(format!("Failed to sync file: {}", e)))
}

fn into_sink(writer: Writer<BufWriter<Sink>>) -> OutputResult<Sink> {
    let buf_writer = writer
        .into_inner()
        .map_err(|e| OutputError::IoError(format!("Failed to get inner writer: {}", e)))?;
    buf_writer
        .into_inner()
        .map_err(|e| OutputError::IoError(format!("Failed to get file handle: {}", e)))
}

fn decimal_cell(value: Option<Decimal>) -> String {
    value.map(|d| d.normalize().to_string()).unwrap_or_default()
}

/// CSV writer for invoice lines, one row per line item
pub struct InvoiceCsvWriter {
    writer: Writer<BufWriter<Sink>>,
    path: PathBuf,
    rows_written: u64,
}

impl InvoiceCsvWriter {
    /// Open `path` for append, writing the header if the file is new or empty.
    pub fn append<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(parent_dir(path))
            .map_err(|e| OutputError::IoError(format!("Failed to create directory: {}", e)))?;

        let existing_len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let needs_newline = existing_len > 0 && !ends_with_newline(path)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| OutputError::IoError(format!("Failed to open file: {}", e)))?;

        if needs_newline {
            warn!(path = %path.display(), "Output ends mid-row, terminating it before appending");
            file.write_all(b"\n")
                .map_err(|e| OutputError::IoError(format!("Failed to repair file: {}", e)))?;
        }

        info!(path = %path.display(), existing_bytes = existing_len, "Appending to invoice CSV");
        let mut writer = Self {
            writer: csv_writer(Sink::Append(file)),
            path: path.to_path_buf(),
            rows_written: 0,
        };
        if existing_len == 0 {
            writer.write_header()?;
        }
        Ok(writer)
    }

    /// Stage a fresh file that replaces `path` on [`OutputWriter::close`].
    ///
    /// Dropping the writer without closing it discards the staged rows.
    pub fn staged<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref();
        let mut writer = Self {
            writer: csv_writer(Sink::staged(path)?),
            path: path.to_path_buf(),
            rows_written: 0,
        };
        writer.write_header()?;
        Ok(writer)
    }

    fn write_header(&mut self) -> OutputResult<()> {
        self.writer
            .write_record(INVOICE_HEADER)
            .map_err(|e| OutputError::CsvError(format!("Failed to write header: {}", e)))
    }

    /// Target path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written by this writer
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Write every line of `invoice`, returning the number of rows.
    pub fn write_invoice(
        &mut self,
        invoice: &InvoiceSummary,
        lines: &[InvoiceLine],
    ) -> OutputResult<usize> {
        let invoice_id = invoice.id().to_string();
        let code = invoice.code.as_deref().unwrap_or_default();
        let customer_code = invoice.customer_code.as_deref().unwrap_or_default();
        let customer_name = invoice.customer_name.as_deref().unwrap_or_default();
        let sold_by = invoice.sold_by_name.as_deref().unwrap_or_default();
        let total = decimal_cell(invoice.total);
        let total_payment = decimal_cell(invoice.total_payment);

        for line in lines {
            let product_id = line.product_id.map(|id| id.to_string()).unwrap_or_default();
            let quantity = decimal_cell(line.quantity);
            let price = decimal_cell(line.price);
            let discount = decimal_cell(line.discount);
            let sub_total = decimal_cell(line.sub_total);
            let record: [&str; 15] = [
                invoice_id.as_str(),
                code,
                invoice.purchase_date(),
                customer_code,
                customer_name,
                sold_by,
                total.as_str(),
                total_payment.as_str(),
                product_id.as_str(),
                line.product_code.as_deref().unwrap_or_default(),
                line.product_name.as_deref().unwrap_or_default(),
                quantity.as_str(),
                price.as_str(),
                discount.as_str(),
                sub_total.as_str(),
            ];
            self.writer.write_record(record).map_err(|e| {
                OutputError::CsvError(format!("Failed to write invoice {}: {}", invoice_id, e))
            })?;
            self.rows_written += 1;
        }

        Ok(lines.len())
    }
}

impl OutputWriter for InvoiceCsvWriter {
    fn flush(&mut self) -> OutputResult<()> {
        flush_and_sync(&mut self.writer)
    }

    fn close(mut self) -> OutputResult<()> {
        self.flush()?;
        let sink = into_sink(self.writer)?;
        sink.finish(&self.path)?;
        info!(path = %self.path.display(), rows = self.rows_written, "Invoice CSV closed");
        Ok(())
    }
}

fn ends_with_newline(path: &Path) -> OutputResult<bool> {
    let mut file =
        File::open(path).map_err(|e| OutputError::IoError(format!("Failed to open file: {}", e)))?;
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))
        .and_then(|_| file.read_exact(&mut last))
        .map_err(|e| OutputError::IoError(format!("Failed to read file: {}", e)))?;
    Ok(last[0] == b'\n')
}

/// Invoice ids already present in an invoice CSV.
///
/// A missing file yields an empty set; rows whose id does not parse are
/// ignored.
pub fn read_invoice_ids<P: AsRef<Path>>(path: P) -> OutputResult<HashSet<i64>> {
    let path = path.as_ref();
    let mut ids = HashSet::new();
    if !path.exists() {
        return Ok(ids);
    }

    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| OutputError::CsvError(format!("Failed to open {}: {}", path.display(), e)))?;

    let headers = reader
        .headers()
        .map_err(|e| OutputError::CsvError(format!("Failed to read header: {}", e)))?
        .clone();
    let Some(column) = headers
        .iter()
        .position(|h| h.trim_start_matches('\u{feff}') == INVOICE_HEADER[0])
    else {
        if headers.is_empty() {
            return Ok(ids);
        }
        return Err(OutputError::CsvError(format!(
            "{} has no {} column",
            path.display(),
            INVOICE_HEADER[0]
        )));
    };

    for record in reader.records() {
        let record =
            record.map_err(|e| OutputError::CsvError(format!("Failed to read row: {}", e)))?;
        if let Some(id) = record.get(column).and_then(|v| v.trim().parse::<i64>().ok()) {
            ids.insert(id);
        }
    }

    debug!(path = %path.display(), ids = ids.len(), "Read existing invoice ids");
    Ok(ids)
}

/// Staged CSV writer for product snapshots
pub struct ProductCsvWriter {
    writer: Writer<BufWriter<Sink>>,
    path: PathBuf,
    fields: Vec<String>,
    rows_written: u64,
}

impl ProductCsvWriter {
    /// Stage a snapshot for `path` with the given columns.
    pub fn new<P: AsRef<Path>>(path: P, fields: &[String], utf8_bom: bool) -> OutputResult<Self> {
        let path = path.as_ref();
        let mut sink = Sink::staged(path)?;
        if utf8_bom {
            sink.write_all(UTF8_BOM)
                .map_err(|e| OutputError::IoError(format!("Failed to write BOM: {}", e)))?;
        }

        let mut writer = csv_writer(sink);
        writer
            .write_record(fields)
            .map_err(|e| OutputError::CsvError(format!("Failed to write header: {}", e)))?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            fields: fields.to_vec(),
            rows_written: 0,
        })
    }

    /// Target path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written so far
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Write one product through the field selection
    pub fn write_product(&mut self, product: &Product) -> OutputResult<()> {
        let record: Vec<String> = self.fields.iter().map(|f| product.field(f)).collect();
        self.writer.write_record(&record).map_err(|e| {
            OutputError::CsvError(format!("Failed to write product {:?}: {}", product.id(), e))
        })?;
        self.rows_written += 1;
        Ok(())
    }

    /// Write a page of products
    pub fn write_products(&mut self, products: &[Product]) -> OutputResult<()> {
        for product in products {
            self.write_product(product)?;
        }
        Ok(())
    }
}

impl OutputWriter for ProductCsvWriter {
    fn flush(&mut self) -> OutputResult<()> {
        flush_and_sync(&mut self.writer)
    }

    fn close(mut self) -> OutputResult<()> {
        self.flush()?;
        let sink = into_sink(self.writer)?;
        sink.finish(&self.path)?;
        info!(path = %self.path.display(), rows = self.rows_written, "Product CSV closed");
        Ok(())
    }
}
