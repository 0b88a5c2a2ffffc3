//! `segment`: split one table into per-region tables.

use anyhow::Result;
use log::info;
use spatialtools_lib::pipeline::SegmentRequest;
use std::path::PathBuf;
use structopt::StructOpt;

use crate::commands::common::{self, CommonArgs};

/// Partition barcodes into spatial regions and write one table per region.
///
/// Existing `region` labels win; otherwise `--roi-file` boundaries are used,
/// and without either the x coordinate is cut into equal-width bins.
#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "segment")]
pub struct SegmentArgs {
    /// Input barcode table.
    #[structopt(parse(from_os_str))]
    pub input: PathBuf,

    /// Directory for the region tables (default: $SPATIAL_DATA_DIR/regions).
    #[structopt(long, short = "o", parse(from_os_str))]
    pub output_dir: Option<PathBuf>,

    /// Comma-separated regions to extract, or the grid bin labels.
    #[structopt(long, short = "r", use_delimiter = true)]
    pub regions: Vec<String>,

    /// JSON file of named bounding boxes and polygons.
    #[structopt(long, parse(from_os_str))]
    pub roi_file: Option<PathBuf>,

    /// Number of grid bins when no labels or ROIs apply. Overrides SPATIAL_GRID_BINS.
    #[structopt(long, short = "k")]
    pub bins: Option<usize>,

    #[structopt(flatten)]
    pub common: CommonArgs,
}

pub fn run_segment(args: SegmentArgs) -> Result<()> {
    let coordinator = common::build_coordinator(&args.common)?;
    let request = SegmentRequest {
        input: args.input,
        output_dir: args
            .output_dir
            .unwrap_or_else(|| coordinator.config().data_dir.join("regions")),
        regions: (!args.regions.is_empty()).then_some(args.regions),
        roi_file: args.roi_file,
        bins: args.bins,
    };
    info!("Segmenting {}", request.input.display());
    let response = coordinator.split_by_region(&request)?;
    common::print_json(&response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_split_on_commas() {
        let args = SegmentArgs::from_iter_safe(&[
            "segment",
            "spots.tsv",
            "--regions",
            "cortex,medulla",
            "-k",
            "6",
        ])
        .unwrap();
        assert_eq!(args.regions, vec!["cortex".to_string(), "medulla".to_string()]);
        assert_eq!(args.bins, Some(6));
        assert!(args.roi_file.is_none());
    }
}
