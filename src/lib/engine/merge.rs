//! Merging overlapping tiles into one barcode table.
//!
//! Tiles are concatenated in submission order, then every barcode seen in
//! more than one tile is collapsed into a single record according to a
//! [`MergePolicy`]. Barcode groups are resolved in parallel; `average` and
//! `max` are order-independent reductions, and `first` relies only on the
//! concatenation order, so the result never depends on scheduling.

use crate::core::error::{Result, SpatialError};
use crate::table::record::BarcodeRecord;
use crate::table::BarcodeTable;
use log::{debug, info};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::fmt;
use std::str::FromStr;

/// Name given to merged tables.
pub const MERGED_TABLE_NAME: &str = "merged";

/// How duplicate barcodes across tiles are collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Keep the earliest occurrence in tile order.
    First,
    /// Per numeric attribute, the mean over occurrences that have it.
    Average,
    /// Per numeric attribute, the maximum over occurrences that have it.
    Max,
}

impl FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "first" => Ok(MergePolicy::First),
            "average" | "mean" => Ok(MergePolicy::Average),
            "max" => Ok(MergePolicy::Max),
            _ => Err(format!(
                "Invalid overlap resolution method: {}. Valid methods: first, average, max",
                s
            )),
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MergePolicy::First => write!(f, "first"),
            MergePolicy::Average => write!(f, "average"),
            MergePolicy::Max => write!(f, "max"),
        }
    }
}

impl MergePolicy {
    /// Parse a policy name, mapping failures to `InvalidParameter`.
    pub fn parse(name: &str) -> Result<Self> {
        name.parse().map_err(SpatialError::InvalidParameter)
    }
}

/// Overlap statistics of one merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeStats {
    pub tiles_merged: usize,
    /// Barcodes after collision resolution.
    pub total_barcodes: usize,
    /// Sum of tile sizes minus `total_barcodes`.
    pub overlapping_barcodes: usize,
    /// `overlapping_barcodes / total_barcodes * 100`, 0 for an empty result.
    pub overlap_percent: f64,
}

impl MergeStats {
    fn new(tile_sizes: &[usize], total_barcodes: usize) -> Self {
        let candidates: usize = tile_sizes.iter().sum();
        let overlapping_barcodes = candidates - total_barcodes;
        MergeStats {
            tiles_merged: tile_sizes.len(),
            total_barcodes,
            overlapping_barcodes,
            overlap_percent: if total_barcodes == 0 {
                0.0
            } else {
                overlapping_barcodes as f64 / total_barcodes as f64 * 100.0
            },
        }
    }
}

/// A resolution policy bound to an ordered, non-empty list of tiles.
#[derive(Debug, Clone, Copy)]
pub struct MergePlan<'a> {
    policy: MergePolicy,
    tiles: &'a [BarcodeTable],
}

impl<'a> MergePlan<'a> {
    pub fn new(tiles: &'a [BarcodeTable], policy: MergePolicy) -> Result<Self> {
        if tiles.is_empty() {
            return Err(SpatialError::InvalidParameter(
                "no tiles provided to merge".to_string(),
            ));
        }
        Ok(MergePlan { policy, tiles })
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    pub fn tiles(&self) -> &'a [BarcodeTable] {
        self.tiles
    }

    /// Concatenate, group by barcode and resolve every group.
    pub fn execute(&self) -> Result<(BarcodeTable, MergeStats)> {
        let columns = union_columns(self.tiles);

        // Groups are numbered by first occurrence in concatenation order, and
        // members are pushed in that same order.
        let mut group_of: FxHashMap<&str, usize> = FxHashMap::default();
        let mut groups: Vec<Vec<&BarcodeRecord>> = Vec::new();
        for tile in self.tiles {
            for record in tile {
                let next = groups.len();
                match group_of.entry(record.barcode.as_str()) {
                    Entry::Occupied(slot) => groups[*slot.get()].push(record),
                    Entry::Vacant(slot) => {
                        slot.insert(next);
                        groups.push(vec![record]);
                    }
                }
            }
        }

        let policy = self.policy;
        let records: Vec<BarcodeRecord> = groups
            .par_iter()
            .map(|occurrences| resolve(occurrences, policy))
            .collect();

        let sizes: Vec<usize> = self.tiles.iter().map(BarcodeTable::size).collect();
        let stats = MergeStats::new(&sizes, records.len());
        for (tile, size) in self.tiles.iter().zip(&sizes) {
            debug!("Merge input {}: {} barcodes", tile.name(), size);
        }
        info!(
            "Merged {} tiles into {} barcodes ({} overlapping, {:.2}%) using '{}' resolution",
            stats.tiles_merged,
            stats.total_barcodes,
            stats.overlapping_barcodes,
            stats.overlap_percent,
            policy
        );

        let merged = BarcodeTable::new(MERGED_TABLE_NAME, columns, records)?;
        Ok((merged, stats))
    }
}

/// Merge `tiles` with `policy`.
pub fn merge(tiles: &[BarcodeTable], policy: MergePolicy) -> Result<(BarcodeTable, MergeStats)> {
    MergePlan::new(tiles, policy)?.execute()
}

fn union_columns(tiles: &[BarcodeTable]) -> Vec<String> {
    let mut seen = FxHashSet::default();
    let mut columns = Vec::new();
    for column in tiles.iter().flat_map(|t| t.columns()) {
        if seen.insert(column.as_str()) {
            columns.push(column.clone());
        }
    }
    columns
}

/// Collapse all occurrences of one barcode. Categorical attributes (`region`)
/// always come from the first occurrence.
fn resolve(occurrences: &[&BarcodeRecord], policy: MergePolicy) -> BarcodeRecord {
    let first = occurrences[0];
    if occurrences.len() == 1 || policy == MergePolicy::First {
        return first.clone();
    }

    let counts = |get: fn(&BarcodeRecord) -> Option<u64>| -> Option<u64> {
        let values: Vec<u64> = occurrences.iter().filter_map(|r| get(r)).collect();
        match policy {
            MergePolicy::Max => values.into_iter().max(),
            _ => mean_count(&values),
        }
    };
    let floats = |get: &dyn Fn(&BarcodeRecord) -> Option<f64>| -> Option<f64> {
        let values: Vec<f64> = occurrences.iter().filter_map(|r| get(r)).collect();
        match policy {
            MergePolicy::Max => values.into_iter().reduce(f64::max),
            _ => mean_float(values),
        }
    };

    let mut extra_keys: Vec<&String> = occurrences
        .iter()
        .flat_map(|r| r.extra.keys())
        .collect::<FxHashSet<_>>()
        .into_iter()
        .collect();
    extra_keys.sort();
    let extra = extra_keys
        .into_iter()
        .filter_map(|key| {
            floats(&|r: &BarcodeRecord| r.extra.get(key).copied()).map(|v| (key.clone(), v))
        })
        .collect();

    BarcodeRecord {
        barcode: first.barcode.clone(),
        read_count: counts(|r| r.read_count),
        gene_count: counts(|r| r.gene_count),
        mt_percent: floats(&|r: &BarcodeRecord| r.mt_percent),
        x: floats(&|r: &BarcodeRecord| r.x),
        y: floats(&|r: &BarcodeRecord| r.y),
        region: first.region.clone(),
        extra,
    }
}

/// Integer mean, rounded half up.
fn mean_count(values: &[u64]) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as u128;
    let sum: u128 = values.iter().map(|&v| v as u128).sum();
    Some(((2 * sum + n) / (2 * n)) as u64)
}

/// Mean over values summed in ascending order, so the result is identical for
/// any permutation of the input.
fn mean_float(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len() as f64;
    Some(values.iter().sum::<f64>() / n)
}
