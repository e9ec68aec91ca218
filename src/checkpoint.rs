//! Append-only CSV checkpoints
//!
//! Every crawl stage owns one CSV file with a fixed header. Accepted records
//! are appended and flushed to disk before the crawler moves on, so a crash
//! loses at most the page that was in flight. Reopening the file rebuilds the
//! collected records for resume.

use anyhow::{bail, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::types::{RawRecord, Scalar};

/// Column layout of a checkpoint file
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub columns: &'static [&'static str],
    /// Column holding `RawRecord::source_url`
    pub url_column: &'static str,
    /// Column holding `RawRecord::source_id`
    pub id_column: Option<&'static str>,
    /// Column naming the crawl target a row came from (detail stages)
    pub target_column: Option<&'static str>,
    /// Column whose value scopes crawl dedup: the same url or id under two
    /// different values of it is kept twice
    pub identity_scope: Option<&'static str>,
}

impl Schema {
    /// Cell text of `column` for a record
    fn cell(&self, record: &RawRecord, column: &str) -> String {
        match record.get(column) {
            Scalar::Null if column == self.url_column => record.source_url.clone(),
            Scalar::Null if Some(column) == self.id_column => {
                record.source_id.clone().unwrap_or_default()
            }
            value => value.to_cell(),
        }
    }

    /// Target key a stored record belongs to
    pub fn target_of(&self, record: &RawRecord) -> Option<String> {
        let column = self.target_column?;
        let cell = self.cell(record, column);
        (!cell.is_empty()).then_some(cell)
    }
}

pub struct CheckpointStore {
    path: PathBuf,
    schema: Schema,
    /// Header order of the file on disk
    columns: Vec<String>,
    writer: csv::Writer<File>,
    rows: usize,
}

impl CheckpointStore {
    /// Open (or create) a checkpoint and return the records already in it.
    ///
    /// `fresh` deletes an existing file first. A torn last line from an
    /// interrupted write is cut off before reading.
    pub fn open(path: &Path, schema: Schema, fresh: bool) -> Result<(Self, Vec<RawRecord>)> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        if fresh && path.exists() {
            info!("Discarding checkpoint {}", path.display());
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove checkpoint: {}", path.display()))?;
        }

        let existing = if path.exists() {
            truncate_partial_line(path)?;
            fs::read(path).with_context(|| format!("Failed to read checkpoint: {}", path.display()))?
        } else {
            Vec::new()
        };

        let (columns, records, write_header) = if existing.is_empty() {
            let columns = schema.columns.iter().map(|c| c.to_string()).collect();
            (columns, Vec::new(), true)
        } else {
            let table = parse_table(&existing, schema.url_column, schema.id_column)
                .with_context(|| format!("Failed to parse checkpoint: {}", path.display()))?;
            require_columns(&table.headers, schema.columns)
                .with_context(|| format!("Checkpoint header mismatch: {}", path.display()))?;
            (table.headers, table.records, false)
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open checkpoint: {}", path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if write_header {
            writer.write_record(&columns)?;
            writer.flush()?;
        }

        let store = Self {
            path: path.to_path_buf(),
            schema,
            columns,
            writer,
            rows: records.len(),
        };
        Ok((store, records))
    }

    /// Append records and force them to disk
    pub fn append(&mut self, records: &[RawRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            let row: Vec<String> = self
                .columns
                .iter()
                .map(|c| self.schema.cell(record, c))
                .collect();
            self.writer
                .write_record(&row)
                .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        }
        self.writer.flush()?;
        self.writer
            .get_ref()
            .sync_data()
            .with_context(|| format!("Failed to sync {}", self.path.display()))?;
        self.rows += records.len();
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}

/// Drop trailing bytes after the last newline
fn truncate_partial_line(path: &Path) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(());
    }
    let keep = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
    warn!(
        "Dropping {} bytes of an incomplete row at the end of {}",
        bytes.len() - keep,
        path.display()
    );
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.set_len(keep as u64)?;
    Ok(())
}

fn require_columns(headers: &[String], required: &[&str]) -> Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|r| !headers.iter().any(|h| h == r))
        .collect();
    if !missing.is_empty() {
        bail!(
            "Missing required column(s): {} (found: {})",
            missing.join(", "),
            headers.join(", ")
        );
    }
    Ok(())
}

/// A whole CSV file loaded as records
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub records: Vec<RawRecord>,
}

fn parse_table(bytes: &[u8], url_column: &str, id_column: Option<&str>) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let cell = |i: usize| row.get(i).unwrap_or("");
        let mut url = String::new();
        let mut id = None;
        let mut fields = Vec::with_capacity(headers.len());
        for (i, h) in headers.iter().enumerate() {
            if h == url_column {
                url = cell(i).to_string();
            }
            if Some(h.as_str()) == id_column && !cell(i).is_empty() {
                id = Some(cell(i).to_string());
            }
            fields.push((h.as_str(), Scalar::from_cell(cell(i))));
        }
        let record = fields
            .into_iter()
            .fold(RawRecord::new(url, id), |r, (name, value)| r.with(name, value));
        records.push(record);
    }
    Ok(Table { headers, records })
}

/// Load a CSV input, failing when the file or a required column is missing
pub fn read_table(path: &Path, required: &[&str], url_column: &str) -> Result<Table> {
    if !path.exists() {
        bail!("Input file not found: {}", path.display());
    }
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let table = parse_table(&bytes, url_column, None)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    require_columns(&table.headers, required)
        .with_context(|| format!("Unusable input: {}", path.display()))?;
    Ok(table)
}

/// Write a complete CSV file, replacing any previous content
pub fn write_table<I>(path: &Path, headers: &[String], rows: I) -> Result<usize>
where
    I: IntoIterator<Item = Vec<String>>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(headers)?;
    let mut count = 0;
    for row in rows {
        writer.write_record(&row)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

/// Write records in a schema's column order
pub fn write_records(path: &Path, schema: &Schema, records: &[RawRecord]) -> Result<usize> {
    let headers: Vec<String> = schema.columns.iter().map(|c| c.to_string()).collect();
    let rows = records
        .iter()
        .map(|r| schema.columns.iter().map(|c| schema.cell(r, c)).collect());
    write_table(path, &headers, rows)
}
