//! Serializable request shapes and the responses the coordinator returns.

use crate::core::error::{Result, SpatialError};
use crate::engine::merge::{MergePolicy, MergeStats};
use crate::engine::qc::{QcStats, QcThresholds};
use crate::engine::region::{RegionCounts, SegmentationMode};
use crate::pipeline::aligner::AlignmentStats;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Value of the `mode` field on placeholder responses.
pub const DRY_RUN_MODE: &str = "dry_run";

#[derive(Debug, Clone, PartialEq)]
pub struct FilterRequest {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Falls back to the configured defaults.
    pub thresholds: Option<QcThresholds>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SegmentRequest {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub regions: Option<Vec<String>>,
    pub roi_file: Option<PathBuf>,
    /// Falls back to the configured grid bin count.
    pub bins: Option<usize>,
}

/// When QC runs inside a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QcStage {
    /// Filter every tile before merging.
    PerTile,
    /// Filter the merged table once.
    #[default]
    PostMerge,
}

impl FromStr for QcStage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "per_tile" => Ok(QcStage::PerTile),
            "post_merge" => Ok(QcStage::PostMerge),
            _ => Err(format!(
                "Invalid QC stage: {}. Valid stages: per-tile, post-merge",
                s
            )),
        }
    }
}

impl fmt::Display for QcStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QcStage::PerTile => write!(f, "per-tile"),
            QcStage::PostMerge => write!(f, "post-merge"),
        }
    }
}

impl QcStage {
    pub fn parse(name: &str) -> Result<Self> {
        name.parse().map_err(SpatialError::InvalidParameter)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeRequest {
    /// Tiles in submission order; this order decides the `first` policy.
    pub tile_files: Vec<PathBuf>,
    pub output_file: PathBuf,
    pub policy: MergePolicy,
    pub qc: Option<QcThresholds>,
    pub qc_stage: QcStage,
}

/// Post-filter statistics as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QcMetrics {
    pub mean_reads_per_barcode: f64,
    pub median_genes_per_barcode: f64,
    pub mean_mt_percent: f64,
    pub retention_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterResponse {
    pub output_file: PathBuf,
    pub barcodes_before: usize,
    pub barcodes_after: usize,
    pub genes_detected: u64,
    pub qc_metrics: QcMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<&'static str>,
}

impl FilterResponse {
    pub fn new(output_file: PathBuf, stats: &QcStats) -> Self {
        FilterResponse {
            output_file,
            barcodes_before: stats.barcodes_before,
            barcodes_after: stats.barcodes_after,
            genes_detected: stats.genes_detected,
            qc_metrics: QcMetrics {
                mean_reads_per_barcode: stats.mean_reads_per_barcode,
                median_genes_per_barcode: stats.median_genes_per_barcode,
                mean_mt_percent: stats.mean_mt_percent,
                retention_rate: stats.retention_rate,
            },
            mode: None,
        }
    }
}

/// One materialised region file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionFile {
    pub name: String,
    pub file: PathBuf,
    pub barcode_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentResponse {
    pub segmentation: SegmentationMode,
    pub regions: Vec<RegionFile>,
    pub total_regions: usize,
    pub barcodes_per_region: RegionCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlapSummary {
    pub overlapping_barcodes: usize,
    pub overlap_percent: f64,
}

/// QC statistics gathered during a merge, shaped by the stage it ran at.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", content = "stats", rename_all = "snake_case")]
pub enum MergeQc {
    PerTile(Vec<QcStats>),
    PostMerge(QcStats),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeResponse {
    pub output_file: PathBuf,
    pub policy: MergePolicy,
    pub tiles_merged: usize,
    pub total_barcodes: usize,
    pub overlap_regions: OverlapSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qc: Option<MergeQc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<&'static str>,
}

impl MergeResponse {
    pub fn new(output_file: PathBuf, policy: MergePolicy, stats: &MergeStats) -> Self {
        MergeResponse {
            output_file,
            policy,
            tiles_merged: stats.tiles_merged,
            total_barcodes: stats.total_barcodes,
            overlap_regions: OverlapSummary {
                overlapping_barcodes: stats.overlapping_barcodes,
                overlap_percent: stats.overlap_percent,
            },
            qc: None,
            mode: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignResponse {
    pub aligned_bam: PathBuf,
    pub alignment_stats: AlignmentStats,
    pub log_file: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<&'static str>,
}
