use anyhow::{Context, Result};
use serde::Serialize;
use spatialtools_lib::core::concurrency::configure_global_thread_pool;
use spatialtools_lib::core::config::SpatialConfig;
use spatialtools_lib::core::io::stdout_writer;
use spatialtools_lib::engine::qc::QcThresholds;
use spatialtools_lib::pipeline::PipelineCoordinator;
use std::io::Write;
use std::time::Duration;
use structopt::StructOpt;

// Options shared by every subcommand, overriding the matching environment variables.
#[derive(Debug, Clone, StructOpt)]
pub struct CommonArgs {
    /// Number of worker threads (1-64). Overrides SPATIAL_THREADS.
    #[structopt(long, short = "t")]
    pub threads: Option<usize>,

    /// Validate the request and return placeholder statistics without touching any file.
    #[structopt(long)]
    pub dry_run: bool,

    /// Deadline in seconds for loading input tables. Overrides SPATIAL_TIMEOUT_SECONDS.
    #[structopt(long)]
    pub timeout: Option<u64>,
}

// Quality thresholds given on the command line, each falling back to the
// configured default.
#[derive(Debug, Clone, StructOpt)]
pub struct ThresholdArgs {
    /// Minimum reads per barcode. Overrides MIN_READS_PER_BARCODE.
    #[structopt(long)]
    pub min_reads: Option<u64>,

    /// Minimum detected genes per barcode. Overrides MIN_GENES_PER_BARCODE.
    #[structopt(long)]
    pub min_genes: Option<u64>,

    /// Maximum mitochondrial read percentage (0-100). Overrides MAX_MT_PERCENT.
    #[structopt(long)]
    pub max_mt_percent: Option<f64>,
}

impl ThresholdArgs {
    pub fn is_set(&self) -> bool {
        self.min_reads.is_some() || self.min_genes.is_some() || self.max_mt_percent.is_some()
    }

    pub fn resolve(&self, defaults: QcThresholds) -> QcThresholds {
        QcThresholds {
            min_reads: self.min_reads.unwrap_or(defaults.min_reads),
            min_genes: self.min_genes.unwrap_or(defaults.min_genes),
            max_mt_percent: self.max_mt_percent.unwrap_or(defaults.max_mt_percent),
        }
    }
}

/// Read the environment and apply command-line overrides.
pub fn load_config(common: &CommonArgs) -> Result<SpatialConfig> {
    let mut config =
        SpatialConfig::from_env().context("Failed to read configuration from the environment")?;
    if let Some(threads) = common.threads {
        config.threads = threads;
    }
    if let Some(seconds) = common.timeout {
        config.io_timeout = Duration::from_secs(seconds);
    }
    config.dry_run |= common.dry_run;
    config.validate()?;
    log::debug!("Configuration: {:?}", config);
    Ok(config)
}

/// Size the global Rayon pool and build the coordinator for one invocation.
pub fn build_coordinator(common: &CommonArgs) -> Result<PipelineCoordinator> {
    let config = load_config(common)?;
    let threads = configure_global_thread_pool(config.threads)?;
    log::debug!("Using {} worker threads", threads);
    Ok(PipelineCoordinator::new(config)?)
}

/// Pretty-print a response to stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut out = stdout_writer();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_fall_back_per_field() {
        let args = ThresholdArgs {
            min_reads: Some(50),
            min_genes: None,
            max_mt_percent: None,
        };
        assert!(args.is_set());
        let resolved = args.resolve(QcThresholds::default());
        assert_eq!(resolved, QcThresholds::new(50, 200, 20.0));
    }
}
