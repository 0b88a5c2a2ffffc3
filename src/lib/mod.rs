//! Spatial transcriptomics barcode table processing.
//!
//! The library filters barcode tables by quality, partitions them into
//! spatial regions and merges overlapping capture tiles into one table. It
//! also drives an external short-read aligner for the upstream FASTQ step.
//!
//! # Modules
//!
//! - [`core`]: errors, configuration, validation, I/O and thread-pool plumbing
//! - [`table`]: the barcode record and table model with delimited-text I/O
//! - [`engine`]: quality filtering, region segmentation and tile merging
//! - [`pipeline`]: the request coordinator, tile loading and the aligner

pub mod core;
pub mod engine;
pub mod pipeline;
pub mod table;

pub mod prelude {
    pub use crate::core::prelude::*;
    pub use crate::engine::{
        filter, merge, segment, MergePlan, MergePolicy, MergeStats, QcStats, QcThresholds, Roi,
        Segmentation, SegmentationMode,
    };
    pub use crate::pipeline::{
        AlignRequest, FilterRequest, MergeRequest, PipelineCoordinator, QcStage, SegmentRequest,
    };
    pub use crate::table::{read_table, write_table, BarcodeRecord, BarcodeTable};
}
