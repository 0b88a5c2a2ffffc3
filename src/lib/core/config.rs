//! Runtime configuration, read once at process start.
//!
//! Values come from environment variables and are then passed explicitly to
//! the pipeline coordinator; nothing here is global or mutable afterwards.

use crate::core::concurrency::determine_allowed_cpus;
use crate::core::error::{Result, SpatialError};
use crate::engine::qc::QcThresholds;
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_GRID_BINS: usize = 4;
const GIB: u64 = 1024 * 1024 * 1024;

/// Configuration shared by every request handled by one coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct SpatialConfig {
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub star_path: String,
    pub threads: usize,
    pub dry_run: bool,
    pub qc: QcThresholds,
    pub max_file_size_bytes: u64,
    pub io_timeout: Duration,
    pub align_timeout: Duration,
    pub grid_bins: usize,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        SpatialConfig {
            data_dir: PathBuf::from("/workspace/data"),
            cache_dir: PathBuf::from("/workspace/cache"),
            star_path: "STAR".to_string(),
            threads: 8,
            dry_run: false,
            qc: QcThresholds::default(),
            max_file_size_bytes: 10 * GIB,
            io_timeout: Duration::from_secs(300),
            align_timeout: Duration::from_secs(1800),
            grid_bins: DEFAULT_GRID_BINS,
        }
    }
}

impl SpatialConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SpatialConfig::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = SpatialConfig {
            data_dir: get("SPATIAL_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            cache_dir: get("SPATIAL_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            star_path: get("STAR_PATH").unwrap_or(defaults.star_path),
            threads: parse_var("SPATIAL_THREADS", get("SPATIAL_THREADS"), defaults.threads)?,
            dry_run: match get("SPATIAL_DRY_RUN") {
                Some(value) => parse_bool("SPATIAL_DRY_RUN", &value)?,
                None => defaults.dry_run,
            },
            qc: QcThresholds {
                min_reads: parse_var(
                    "MIN_READS_PER_BARCODE",
                    get("MIN_READS_PER_BARCODE"),
                    defaults.qc.min_reads,
                )?,
                min_genes: parse_var(
                    "MIN_GENES_PER_BARCODE",
                    get("MIN_GENES_PER_BARCODE"),
                    defaults.qc.min_genes,
                )?,
                max_mt_percent: parse_var(
                    "MAX_MT_PERCENT",
                    get("MAX_MT_PERCENT"),
                    defaults.qc.max_mt_percent,
                )?,
            },
            max_file_size_bytes: parse_var::<u64>(
                "SPATIAL_MAX_FILE_SIZE_GB",
                get("SPATIAL_MAX_FILE_SIZE_GB"),
                defaults.max_file_size_bytes / GIB,
            )?
            .saturating_mul(GIB),
            io_timeout: Duration::from_secs(parse_var(
                "SPATIAL_TIMEOUT_SECONDS",
                get("SPATIAL_TIMEOUT_SECONDS"),
                defaults.io_timeout.as_secs(),
            )?),
            align_timeout: Duration::from_secs(parse_var(
                "SPATIAL_ALIGN_TIMEOUT_SECONDS",
                get("SPATIAL_ALIGN_TIMEOUT_SECONDS"),
                defaults.align_timeout.as_secs(),
            )?),
            grid_bins: parse_var("SPATIAL_GRID_BINS", get("SPATIAL_GRID_BINS"), defaults.grid_bins)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Range-check every field.
    pub fn validate(&self) -> Result<()> {
        determine_allowed_cpus(self.threads)?;
        self.qc.validate()?;
        if self.grid_bins == 0 {
            return Err(SpatialError::InvalidParameter(
                "grid_bins must be greater than 0".to_string(),
            ));
        }
        if self.io_timeout.is_zero() || self.align_timeout.is_zero() {
            return Err(SpatialError::InvalidParameter(
                "timeouts must be greater than 0 seconds".to_string(),
            ));
        }
        Ok(())
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    pub fn filtered_dir(&self) -> PathBuf {
        self.data_dir.join("filtered")
    }

    pub fn aligned_dir(&self) -> PathBuf {
        self.data_dir.join("aligned")
    }
}

fn parse_var<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T> {
    match value {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            SpatialError::InvalidParameter(format!(
                "environment variable {} has unparseable value '{}'",
                key, raw
            ))
        }),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(SpatialError::InvalidParameter(format!(
            "environment variable {} has unparseable value '{}'",
            key, raw
        ))),
    }
}
