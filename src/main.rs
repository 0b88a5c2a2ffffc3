//! spatialtools - spatial transcriptomics barcode table processing
//!
//! spatialtools filters, segments and merges the barcode tables produced by
//! spatial transcriptomics capture tiles, and drives the STAR aligner for the
//! upstream FASTQ step.
//!
//! # Tools
//!
//! - `filter`: drop barcodes below read, gene or mitochondrial thresholds
//! - `segment`: split a table into spatial regions
//! - `merge`: combine overlapping tiles, resolving duplicate barcodes
//! - `align`: align paired FASTQ files with STAR
//! - `describe`: print the data layout and active defaults
//!
//! # Usage
//!
//! ```bash
//! # Quality-filter one tile with a stricter read threshold
//! spatialtools filter tile_01.csv --min-reads 2000 -o filtered/
//!
//! # Split a filtered tile into four x-axis bins
//! spatialtools segment filtered/tile_01_filtered.csv -k 4 -o regions/
//!
//! # Merge tiles, averaging barcodes seen in more than one
//! spatialtools merge tile_01.csv tile_02.csv tile_03.csv -o merged.csv --policy average
//! ```
//!
//! Every subcommand prints its statistics as JSON on stdout. Defaults come
//! from environment variables (SPATIAL_DATA_DIR, MIN_READS_PER_BARCODE, ...)
//! and `--dry-run` validates a request without touching any file.

extern crate spatialtools_lib;
pub mod commands;
use anyhow::Result;
use env_logger::Env;
use log::*;
use spatialtools_lib::core::errors::is_broken_pipe;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case", author, about)]
/// Spatial transcriptomics barcode table processing
struct Args {
    #[structopt(subcommand)]
    subcommand: Subcommand,
}

#[derive(StructOpt)]
enum Subcommand {
    /// Filter barcodes by quality thresholds
    Filter(commands::FilterArgs),
    /// Split a table into spatial regions
    Segment(commands::SegmentArgs),
    /// Merge overlapping tiles into one table
    Merge(commands::MergeArgs),
    /// Align paired FASTQ files with STAR
    Align(commands::AlignArgs),
    /// Describe the data directories and QC defaults
    Describe(commands::DescribeArgs),
}

impl Subcommand {
    fn run(self) -> Result<()> {
        match self {
            Subcommand::Filter(args) => commands::run_filter(args)?,
            Subcommand::Segment(args) => commands::run_segment(args)?,
            Subcommand::Merge(args) => commands::run_merge(args)?,
            Subcommand::Align(args) => commands::run_align(args)?,
            Subcommand::Describe(args) => commands::run_describe(args)?,
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    if let Err(err) = Args::from_args().subcommand.run() {
        if is_broken_pipe(&err) {
            std::process::exit(0);
        }
        error!("{:#}", err);
        std::process::exit(1);
    }
    Ok(())
}
