//! Loading and persisting barcode tables as delimited text.

use crate::core::cancel::CancelToken;
use crate::core::error::{Result, SpatialError};
use crate::core::fs::{delimiter_for, is_gzipped, make_parent_dirs};
use crate::core::io::{get_reader, writer_for_file};
use crate::table::barcode_table::BarcodeTable;
use crate::table::record::{
    is_known_column, BarcodeRecord, BARCODE, MT_PERCENT, N_GENES, N_READS, REGION, X_COORD,
    Y_COORD,
};
use log::debug;
use rustc_hash::FxHashSet;
use std::path::Path;
use tempfile::NamedTempFile;

/// Rows read between two cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 4096;
const GZIP_LEVEL: u32 = 6;

/// Load a table from `path`, decoding gzip when the extension says so.
pub fn read_table<P: AsRef<Path>>(path: P) -> Result<BarcodeTable> {
    read_table_with_cancel(path, &CancelToken::new())
}

/// Load a table, aborting with `Cancelled` once `cancel` is tripped.
pub fn read_table_with_cancel<P: AsRef<Path>>(path: P, cancel: &CancelToken) -> Result<BarcodeTable> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SpatialError::not_found(path));
    }
    let source = path.display().to_string();
    let mut reader = get_reader(path, true)?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| SpatialError::format(&source, format!("unreadable header: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let layout = HeaderLayout::from_headers(&source, &headers)?;
    let mut records = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        if idx % CANCEL_CHECK_INTERVAL == 0 {
            cancel.check(&format!("reading {}", source))?;
        }
        let row_number = idx + 1;
        let row = row.map_err(|e| SpatialError::Format {
            source_name: source.clone(),
            row: Some(row_number),
            column: None,
            message: e.to_string(),
        })?;
        records.push(layout.parse_row(&source, row_number, &row)?);
    }
    debug!("Read {} barcodes from {}", records.len(), source);

    BarcodeTable::new(source, headers, records)
}

/// Parse a table from in-memory delimited text. Used for fixtures and stdin.
pub fn parse_table(name: &str, text: &str, delimiter: u8) -> Result<BarcodeTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let layout = HeaderLayout::from_headers(name, &headers)?;
    let mut records = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row?;
        records.push(layout.parse_row(name, idx + 1, &row)?);
    }
    BarcodeTable::new(name, headers, records)
}

/// Persist `table` at `path`.
///
/// The table is written to a temporary file beside the target and renamed into
/// place, so a failure never leaves a truncated output behind.
pub fn write_table<P: AsRef<Path>>(table: &BarcodeTable, path: P, threads: usize) -> Result<()> {
    let path = path.as_ref();
    make_parent_dirs(path)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let staged = NamedTempFile::new_in(&dir)?;
    {
        let mut writer = writer_for_file(
            staged.reopen()?,
            delimiter_for(path),
            is_gzipped(path),
            threads.max(1),
            GZIP_LEVEL,
        );
        writer.write_record(table.columns())?;
        for record in table {
            writer.write_record(table.columns().iter().map(|c| record.cell(c)))?;
        }
        let sink = writer
            .into_inner()
            .map_err(|e| SpatialError::Io(e.into_error()))?;
        sink.finish()?;
    }
    staged.persist(path).map_err(|e| SpatialError::Io(e.error))?;
    debug!("Wrote {} barcodes to {}", table.size(), path.display());
    Ok(())
}

/// Position of each recognised column in a header row.
struct HeaderLayout {
    barcode: usize,
    n_reads: Option<usize>,
    n_genes: Option<usize>,
    mt_percent: Option<usize>,
    x: Option<usize>,
    y: Option<usize>,
    region: Option<usize>,
    extra: Vec<(usize, String)>,
}

impl HeaderLayout {
    fn from_headers(source: &str, headers: &[String]) -> Result<Self> {
        let mut seen = FxHashSet::default();
        for header in headers {
            if header.is_empty() {
                return Err(SpatialError::format(source, "header contains an empty column name"));
            }
            if !seen.insert(header.as_str()) {
                return Err(SpatialError::format(
                    source,
                    format!("column '{}' appears more than once in the header", header),
                ));
            }
        }
        let find = |name: &str| headers.iter().position(|h| h == name);
        let barcode = find(BARCODE).ok_or_else(|| {
            SpatialError::format(source, format!("required column '{}' is missing", BARCODE))
        })?;
        let extra = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !is_known_column(h))
            .map(|(i, h)| (i, h.clone()))
            .collect();

        Ok(HeaderLayout {
            barcode,
            n_reads: find(N_READS),
            n_genes: find(N_GENES),
            mt_percent: find(MT_PERCENT),
            x: find(X_COORD),
            y: find(Y_COORD),
            region: find(REGION),
            extra,
        })
    }

    fn parse_row(&self, source: &str, row: usize, fields: &csv::StringRecord) -> Result<BarcodeRecord> {
        let cell = |idx: Option<usize>| {
            idx.and_then(|i| fields.get(i))
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };

        let barcode = cell(Some(self.barcode))
            .ok_or_else(|| SpatialError::format_at(source, row, BARCODE, "barcode is empty"))?;

        let mut record = BarcodeRecord::new(barcode);
        record.read_count = parse_count(source, row, N_READS, cell(self.n_reads))?;
        record.gene_count = parse_count(source, row, N_GENES, cell(self.n_genes))?;
        record.mt_percent = parse_float(source, row, MT_PERCENT, cell(self.mt_percent))?;
        if let Some(mt) = record.mt_percent {
            if !(0.0..=100.0).contains(&mt) {
                return Err(SpatialError::format_at(
                    source,
                    row,
                    MT_PERCENT,
                    format!("percentage must be within [0, 100], got {}", mt),
                ));
            }
        }
        record.x = parse_float(source, row, X_COORD, cell(self.x))?;
        record.y = parse_float(source, row, Y_COORD, cell(self.y))?;
        record.region = cell(self.region).map(str::to_string);
        for (idx, name) in &self.extra {
            if let Some(value) = parse_float(source, row, name, cell(Some(*idx)))? {
                record.extra.insert(name.clone(), value);
            }
        }
        Ok(record)
    }
}

fn parse_float(source: &str, row: usize, column: &str, raw: Option<&str>) -> Result<Option<f64>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(SpatialError::format_at(
            source,
            row,
            column,
            format!("expected a finite number, got '{}'", raw),
        )),
    }
}

fn parse_count(source: &str, row: usize, column: &str, raw: Option<&str>) -> Result<Option<u64>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    if let Ok(value) = raw.parse::<u64>() {
        return Ok(Some(value));
    }
    // Counts written by float-typed tools, e.g. `200.0`.
    match raw.parse::<f64>() {
        Ok(value)
            if value.is_finite()
                && value >= 0.0
                && value.fract() == 0.0
                && value <= u64::MAX as f64 =>
        {
            Ok(Some(value as u64))
        }
        _ => Err(SpatialError::format_at(
            source,
            row,
            column,
            format!("expected a non-negative integer count, got '{}'", raw),
        )),
    }
}
