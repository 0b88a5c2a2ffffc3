//! `filter`: drop low-quality barcodes from one table.

use anyhow::Result;
use log::info;
use spatialtools_lib::pipeline::FilterRequest;
use std::path::PathBuf;
use structopt::StructOpt;

use crate::commands::common::{self, CommonArgs, ThresholdArgs};

/// Filter barcodes by read count, gene count and mitochondrial percentage.
#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "filter")]
pub struct FilterArgs {
    /// Input barcode table (.csv, .tsv or .txt, optionally gzipped).
    #[structopt(parse(from_os_str))]
    pub input: PathBuf,

    /// Directory for `<stem>_filtered.<ext>` (default: $SPATIAL_DATA_DIR/filtered).
    #[structopt(long, short = "o", parse(from_os_str))]
    pub output_dir: Option<PathBuf>,

    #[structopt(flatten)]
    pub thresholds: ThresholdArgs,

    #[structopt(flatten)]
    pub common: CommonArgs,
}

pub fn run_filter(args: FilterArgs) -> Result<()> {
    let coordinator = common::build_coordinator(&args.common)?;
    let config = coordinator.config();
    let request = FilterRequest {
        input: args.input,
        output_dir: args.output_dir.unwrap_or_else(|| config.filtered_dir()),
        thresholds: Some(args.thresholds.resolve(config.qc)),
    };
    info!("Filtering {}", request.input.display());
    let response = coordinator.filter_quality(&request)?;
    common::print_json(&response)
}
