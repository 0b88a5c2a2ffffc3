//! The barcode-indexed table every engine consumes and produces.

use crate::core::error::{Result, SpatialError};
use crate::table::record::{
    BarcodeRecord, BARCODE, MT_PERCENT, N_GENES, N_READS, REGION, X_COORD, Y_COORD,
};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

/// An ordered, immutable sequence of [`BarcodeRecord`]s with a shared schema.
///
/// Barcodes are unique within one table. Every transforming operation returns
/// a new table, so a caller holding a reference never observes a partially
/// applied step.
#[derive(Debug, Clone, PartialEq)]
pub struct BarcodeTable {
    name: String,
    columns: Vec<String>,
    records: Vec<BarcodeRecord>,
}

impl BarcodeTable {
    /// Build a table with an explicit column order.
    ///
    /// `columns` must contain `barcode`; `extra` keys missing from it are
    /// appended in first-seen order.
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        records: Vec<BarcodeRecord>,
    ) -> Result<Self> {
        let name = name.into();
        if !columns.iter().any(|c| c == BARCODE) {
            return Err(SpatialError::format(
                name,
                format!("required column '{}' is missing", BARCODE),
            ));
        }
        check_unique(&name, &records)?;

        let mut columns = columns;
        let mut seen: FxHashSet<String> = columns.iter().cloned().collect();
        for record in &records {
            let mut keys: Vec<&String> = record.extra.keys().filter(|k| !seen.contains(*k)).collect();
            keys.sort();
            for key in keys {
                seen.insert(key.clone());
                columns.push(key.clone());
            }
        }

        Ok(BarcodeTable {
            name,
            columns,
            records,
        })
    }

    /// Build a table whose schema is inferred from the values its records carry.
    pub fn from_records(name: impl Into<String>, records: Vec<BarcodeRecord>) -> Result<Self> {
        let mut columns = vec![BARCODE.to_string()];
        for known in [N_READS, N_GENES, MT_PERCENT, X_COORD, Y_COORD, REGION] {
            if records.iter().any(|r| r.has_value(known)) {
                columns.push(known.to_string());
            }
        }
        Self::new(name, columns, records)
    }

    /// An empty table with the same name and schema.
    pub fn empty_like(&self) -> Self {
        BarcodeTable {
            name: self.name.clone(),
            columns: self.columns.clone(),
            records: Vec::new(),
        }
    }

    /// Derive a table from this one's schema and a new record set.
    ///
    /// Records must come from this table (or a transformation of it that
    /// keeps barcodes unique).
    pub(crate) fn derive(&self, name: impl Into<String>, records: Vec<BarcodeRecord>) -> Self {
        BarcodeTable {
            name: name.into(),
            columns: self.columns.clone(),
            records,
        }
    }

    /// A copy of this table with `column` appended to the schema when absent.
    pub(crate) fn with_column(&self, column: &str, records: Vec<BarcodeRecord>) -> Self {
        let mut columns = self.columns.clone();
        if !columns.iter().any(|c| c == column) {
            columns.push(column.to_string());
        }
        BarcodeTable {
            name: self.name.clone(),
            columns,
            records,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[BarcodeRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<BarcodeRecord> {
        self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BarcodeRecord> {
        self.records.iter()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Fail with a format error naming every column `operation` needs but the
    /// schema lacks.
    pub fn require_columns(&self, required: &[&str], operation: &str) -> Result<()> {
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|c| !self.has_column(c))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SpatialError::format(
                self.name.clone(),
                format!(
                    "{} requires column(s) {} which the table does not provide",
                    operation,
                    missing.join(", ")
                ),
            ))
        }
    }

    pub fn get(&self, barcode: &str) -> Option<&BarcodeRecord> {
        self.records.iter().find(|r| r.barcode == barcode)
    }

    /// Stable filter: the records satisfying `predicate`, in their original order.
    ///
    /// The predicate is evaluated in parallel; it must be a pure function of
    /// the record.
    pub fn select<F>(&self, predicate: F) -> BarcodeTable
    where
        F: Fn(&BarcodeRecord) -> bool + Sync,
    {
        let records: Vec<BarcodeRecord> = self
            .records
            .par_iter()
            .filter(|record| predicate(record))
            .cloned()
            .collect();
        self.derive(self.name.clone(), records)
    }

    /// Values of a numeric column, one per record; unset cells read as 0.
    pub fn column(&self, column: &str) -> Result<Vec<f64>> {
        self.require_columns(&[column], "column lookup")?;
        if column == BARCODE || column == REGION {
            return Err(SpatialError::format(
                self.name.clone(),
                format!("column '{}' is not numeric", column),
            ));
        }
        Ok(self
            .records
            .iter()
            .map(|r| r.numeric(column).unwrap_or(0.0))
            .collect())
    }
}

impl<'a> IntoIterator for &'a BarcodeTable {
    type Item = &'a BarcodeRecord;
    type IntoIter = std::slice::Iter<'a, BarcodeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

fn check_unique(name: &str, records: &[BarcodeRecord]) -> Result<()> {
    let mut seen: FxHashMap<&str, usize> =
        FxHashMap::with_capacity_and_hasher(records.len(), Default::default());
    for (idx, record) in records.iter().enumerate() {
        if record.barcode.is_empty() {
            return Err(SpatialError::format_at(
                name,
                idx + 1,
                BARCODE,
                "barcode is empty",
            ));
        }
        if let Some(first) = seen.insert(record.barcode.as_str(), idx) {
            return Err(SpatialError::DuplicateBarcode {
                source_name: name.to_string(),
                barcode: record.barcode.clone(),
                first_row: first + 1,
                second_row: idx + 1,
            });
        }
    }
    Ok(())
}
