//! `describe`: print the data layout and active defaults.

use anyhow::Result;
use structopt::StructOpt;

use crate::commands::common::{self, CommonArgs};

/// Describe the raw, filtered and aligned data directories.
#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "describe")]
pub struct DescribeArgs {
    #[structopt(flatten)]
    pub common: CommonArgs,
}

pub fn run_describe(args: DescribeArgs) -> Result<()> {
    let coordinator = common::build_coordinator(&args.common)?;
    common::print_json(&coordinator.describe())
}
