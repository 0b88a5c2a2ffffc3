//! `merge`: combine overlapping tiles into one table.

use anyhow::Result;
use log::info;
use spatialtools_lib::engine::merge::MergePolicy;
use spatialtools_lib::pipeline::{MergeRequest, QcStage};
use std::path::PathBuf;
use structopt::StructOpt;

use crate::commands::common::{self, CommonArgs, ThresholdArgs};

/// Merge tiles, resolving barcodes seen in more than one tile.
#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "merge")]
pub struct MergeArgs {
    /// Tile tables, in priority order for `--policy first`.
    #[structopt(parse(from_os_str))]
    pub tiles: Vec<PathBuf>,

    /// Merged output table.
    #[structopt(long, short = "o", parse(from_os_str))]
    pub output: PathBuf,

    /// Duplicate resolution: first, average or max.
    #[structopt(long, short = "p", default_value = "average")]
    pub policy: MergePolicy,

    /// Apply quality filtering as part of the merge.
    #[structopt(long)]
    pub qc: bool,

    /// When to filter: per-tile or post-merge.
    #[structopt(long, default_value = "post-merge")]
    pub qc_stage: QcStage,

    #[structopt(flatten)]
    pub thresholds: ThresholdArgs,

    #[structopt(flatten)]
    pub common: CommonArgs,
}

pub fn run_merge(args: MergeArgs) -> Result<()> {
    let coordinator = common::build_coordinator(&args.common)?;
    let qc = (args.qc || args.thresholds.is_set())
        .then(|| args.thresholds.resolve(coordinator.config().qc));
    let request = MergeRequest {
        tile_files: args.tiles,
        output_file: args.output,
        policy: args.policy,
        qc,
        qc_stage: args.qc_stage,
    };
    info!(
        "Merging {} tiles with the {} policy",
        request.tile_files.len(),
        request.policy
    );
    let response = coordinator.merge_tiles(&request)?;
    common::print_json(&response)
}
