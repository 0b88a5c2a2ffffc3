//! `align`: run the external aligner on paired FASTQ files.

use anyhow::Result;
use log::info;
use spatialtools_lib::pipeline::{AlignRequest, PipelineCoordinator};
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

use crate::commands::common::{self, CommonArgs};

/// Align paired-end spatial reads with STAR (binary from $STAR_PATH).
#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "align")]
pub struct AlignArgs {
    /// Read 1 FASTQ (spatial barcode and UMI).
    #[structopt(long, parse(from_os_str))]
    pub r1: PathBuf,

    /// Read 2 FASTQ (cDNA).
    #[structopt(long, parse(from_os_str))]
    pub r2: PathBuf,

    /// STAR genome index directory.
    #[structopt(long, short = "g", parse(from_os_str))]
    pub genome_dir: PathBuf,

    /// Output directory (default: $SPATIAL_DATA_DIR/aligned).
    #[structopt(long, short = "o", parse(from_os_str))]
    pub output_dir: Option<PathBuf>,

    /// Alignment deadline in seconds. Overrides SPATIAL_ALIGN_TIMEOUT_SECONDS.
    #[structopt(long)]
    pub align_timeout: Option<u64>,

    #[structopt(flatten)]
    pub common: CommonArgs,
}

pub fn run_align(args: AlignArgs) -> Result<()> {
    let mut config = common::load_config(&args.common)?;
    if let Some(seconds) = args.align_timeout {
        config.align_timeout = Duration::from_secs(seconds);
    }
    let request = AlignRequest {
        fastq_r1: args.r1,
        fastq_r2: args.r2,
        genome_dir: args.genome_dir,
        output_dir: args.output_dir.unwrap_or_else(|| config.aligned_dir()),
        threads: config.threads,
    };
    let coordinator = PipelineCoordinator::new(config)?;
    info!("Aligning {}", request.fastq_r1.display());
    let response = coordinator.align_spatial_data(&request)?;
    common::print_json(&response)
}
