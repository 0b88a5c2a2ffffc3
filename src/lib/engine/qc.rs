//! Quality-control filtering of barcode tables.
//!
//! This module exposes the [`BarcodeFilter`] trait along with the default
//! threshold filter, [`QcThresholds`], and the [`filter`] operation that
//! applies it and summarises what survived.

use crate::core::error::{Result, SpatialError};
use crate::table::record::{BarcodeRecord, QC_COLUMNS};
use crate::table::BarcodeTable;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// A per-barcode predicate.
///
/// Implementations must be pure functions of the record so they can be
/// evaluated in parallel and reproduce exactly. Return `true` if the barcode
/// passes.
pub trait BarcodeFilter: Sync {
    fn passes(&self, record: &BarcodeRecord) -> bool;
}

/// Absolute quality thresholds, compared against each barcode on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QcThresholds {
    /// Barcodes need at least this many reads.
    pub min_reads: u64,
    /// Barcodes need at least this many detected genes.
    pub min_genes: u64,
    /// Barcodes may carry at most this mitochondrial percentage.
    pub max_mt_percent: f64,
}

impl Default for QcThresholds {
    fn default() -> Self {
        QcThresholds {
            min_reads: 1000,
            min_genes: 200,
            max_mt_percent: 20.0,
        }
    }
}

impl QcThresholds {
    pub fn new(min_reads: u64, min_genes: u64, max_mt_percent: f64) -> Self {
        QcThresholds {
            min_reads,
            min_genes,
            max_mt_percent,
        }
    }

    /// Range-check the thresholds. Counts are unsigned, so only the
    /// percentage can be out of range.
    pub fn validate(&self) -> Result<()> {
        if !self.max_mt_percent.is_finite() {
            return Err(SpatialError::InvalidParameter(format!(
                "max_mt_percent must be a finite number, got {}",
                self.max_mt_percent
            )));
        }
        if !(0.0..=100.0).contains(&self.max_mt_percent) {
            return Err(SpatialError::ThresholdValidation {
                field: "max_mt_percent".to_string(),
                min: 0.0,
                max: 100.0,
                value: self.max_mt_percent,
            });
        }
        Ok(())
    }
}

impl BarcodeFilter for QcThresholds {
    /// Unset quality values count as zero, so a barcode missing its read count
    /// never slips past a non-zero minimum.
    #[inline(always)]
    fn passes(&self, record: &BarcodeRecord) -> bool {
        record.read_count.unwrap_or(0) >= self.min_reads
            && record.gene_count.unwrap_or(0) >= self.min_genes
            && record.mt_percent.unwrap_or(0.0) <= self.max_mt_percent
    }
}

/// Summary of one filtering pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcStats {
    pub barcodes_before: usize,
    pub barcodes_after: usize,
    /// Largest `n_genes` among retained barcodes (0 when none remain).
    pub genes_detected: u64,
    pub mean_reads_per_barcode: f64,
    pub median_genes_per_barcode: f64,
    pub mean_mt_percent: f64,
    /// `barcodes_after / barcodes_before`, 0 for an empty input.
    pub retention_rate: f64,
}

impl QcStats {
    /// Statistics of `kept` relative to an input of `before` barcodes.
    pub fn summarise(before: usize, kept: &BarcodeTable) -> Self {
        let after = kept.size();
        let reads: Vec<f64> = kept.iter().map(|r| r.read_count.unwrap_or(0) as f64).collect();
        let mut genes: Vec<u64> = kept.iter().map(|r| r.gene_count.unwrap_or(0)).collect();
        let mt: Vec<f64> = kept.iter().map(|r| r.mt_percent.unwrap_or(0.0)).collect();
        genes.sort_unstable();

        QcStats {
            barcodes_before: before,
            barcodes_after: after,
            genes_detected: genes.last().copied().unwrap_or(0),
            mean_reads_per_barcode: mean(&reads),
            median_genes_per_barcode: median_sorted(&genes),
            mean_mt_percent: mean(&mt),
            retention_rate: if before == 0 {
                0.0
            } else {
                after as f64 / before as f64
            },
        }
    }
}

/// Keep the barcodes of `table` passing `filter`, preserving order.
pub fn apply<F: BarcodeFilter>(table: &BarcodeTable, filter: &F) -> (BarcodeTable, QcStats) {
    let kept = table.select(|record| filter.passes(record));
    let stats = QcStats::summarise(table.size(), &kept);
    (kept, stats)
}

/// Filter `table` with absolute thresholds.
///
/// Fails with `InvalidParameter` for out-of-range thresholds and with a format
/// error when the table lacks any of `n_reads`, `n_genes` or `mt_percent`.
pub fn filter(table: &BarcodeTable, thresholds: &QcThresholds) -> Result<(BarcodeTable, QcStats)> {
    thresholds.validate()?;
    table.require_columns(QC_COLUMNS, "quality filtering")?;

    let (kept, stats) = apply(table, thresholds);
    if stats.barcodes_before > 0 && stats.barcodes_after == 0 {
        warn!(
            "Quality filtering removed every barcode from {} (min_reads={}, min_genes={}, max_mt_percent={})",
            table.name(),
            thresholds.min_reads,
            thresholds.min_genes,
            thresholds.max_mt_percent
        );
    }
    info!(
        "Quality filtering {}: kept {} of {} barcodes ({:.1}%)",
        table.name(),
        stats.barcodes_after,
        stats.barcodes_before,
        stats.retention_rate * 100.0
    );
    Ok((kept, stats))
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn median_sorted(values: &[u64]) -> f64 {
    let n = values.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => values[n / 2] as f64,
        _ => (values[n / 2 - 1] as f64 + values[n / 2] as f64) / 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    fn spot(barcode: &str, reads: u64, genes: u64, mt: f64) -> BarcodeRecord {
        BarcodeRecord::new(barcode)
            .with_reads(reads)
            .with_genes(genes)
            .with_mt_percent(mt)
    }

    fn tile() -> BarcodeTable {
        BarcodeTable::from_records(
            "tile",
            vec![
                spot("A", 1500, 300, 5.0),
                spot("B", 900, 400, 2.0),
                spot("C", 2000, 150, 1.0),
                spot("D", 3000, 500, 25.0),
                spot("E", 1000, 200, 20.0),
                spot("F", 4000, 800, 10.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn each_predicate_is_applied_independently() {
        let (kept, stats) = filter(&tile(), &QcThresholds::new(1000, 200, 20.0)).unwrap();
        let barcodes: Vec<&str> = kept.iter().map(|r| r.barcode.as_str()).collect();
        assert_eq!(barcodes, vec!["A", "E", "F"]);
        assert_eq!(stats.barcodes_before, 6);
        assert_eq!(stats.barcodes_after, 3);
        assert_eq!(stats.genes_detected, 800);
        assert!((stats.retention_rate - 0.5).abs() < 1e-12);
        assert!((stats.mean_reads_per_barcode - 6500.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.median_genes_per_barcode, 300.0);
        assert!((stats.mean_mt_percent - 35.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn filtering_is_idempotent() {
        let thresholds = QcThresholds::new(1000, 200, 20.0);
        let (once, _) = filter(&tile(), &thresholds).unwrap();
        let (twice, stats) = filter(&once, &thresholds).unwrap();
        assert_eq!(once, twice);
        assert_eq!(stats.retention_rate, 1.0);
    }

    #[test]
    fn empty_table_has_zero_retention() {
        let empty = tile().empty_like();
        let (kept, stats) = filter(&empty, &QcThresholds::default()).unwrap();
        assert!(kept.is_empty());
        assert_eq!(stats.retention_rate, 0.0);
        assert_eq!(stats.genes_detected, 0);
        assert_eq!(stats.median_genes_per_barcode, 0.0);
    }

    #[test]
    fn retention_rate_stays_within_unit_interval() {
        for min_reads in [0, 500, 1000, 2500, 10_000] {
            let (_, stats) = filter(&tile(), &QcThresholds::new(min_reads, 0, 100.0)).unwrap();
            assert!((0.0..=1.0).contains(&stats.retention_rate));
        }
    }

    #[test]
    fn even_sized_results_average_the_middle_genes() {
        let (_, stats) = filter(&tile(), &QcThresholds::new(0, 0, 100.0)).unwrap();
        // 150, 200, 300, 400, 500, 800
        assert_eq!(stats.median_genes_per_barcode, 350.0);
    }

    #[test]
    fn invalid_percentage_fails_before_filtering() {
        for bad in [-1.0, 100.5, f64::NAN] {
            let err = filter(&tile(), &QcThresholds::new(0, 0, bad)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        }
    }

    #[test]
    fn missing_quality_columns_are_a_format_error() {
        let table = BarcodeTable::from_records(
            "no_mt",
            vec![BarcodeRecord::new("A").with_reads(10).with_genes(10)],
        )
        .unwrap();
        let err = filter(&table, &QcThresholds::new(0, 0, 100.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains("mt_percent"));
    }

    #[test]
    fn unset_values_count_as_zero() {
        let table = BarcodeTable::new(
            "gaps",
            vec!["barcode".into(), "n_reads".into(), "n_genes".into(), "mt_percent".into()],
            vec![
                BarcodeRecord::new("A").with_genes(10),
                spot("B", 10, 10, 1.0),
            ],
        )
        .unwrap();
        let (kept, _) = filter(&table, &QcThresholds::new(1, 1, 100.0)).unwrap();
        assert_eq!(kept.size(), 1);
        assert!(kept.get("B").is_some());
    }
}
