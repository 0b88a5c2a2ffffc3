//! The three table engines.
//!
//! - [`qc`]: threshold filtering and post-filter statistics
//! - [`region`]: pre-labelled, ROI and grid segmentation
//! - [`merge`]: tile concatenation and duplicate-barcode resolution
//!
//! Engines are pure functions from immutable tables to new tables.

pub mod merge;
pub mod qc;
pub mod region;

pub use merge::{merge, MergePlan, MergePolicy, MergeStats};
pub use qc::{filter, BarcodeFilter, QcStats, QcThresholds};
pub use region::{segment, RegionAssignment, RegionCounts, Roi, RoiShape, Segmentation, SegmentationMode};
