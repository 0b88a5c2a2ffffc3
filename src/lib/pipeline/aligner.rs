//! Read alignment through an external aligner.
//!
//! The aligner is a collaborator behind the [`Aligner`] trait; the default
//! implementation drives the STAR binary and reads its final log for the
//! mapping statistics.

use crate::core::error::{Result, SpatialError};
use crate::core::fs::is_gzipped;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub const ALIGNED_BAM_NAME: &str = "Aligned.sortedByCoord.out.bam";
pub const FINAL_LOG_NAME: &str = "Log.final.out";
pub const FASTQ_EXTENSIONS: &[&str] = &["fastq", "fq"];

const BAM_SORT_RAM_BYTES: u64 = 32_000_000_000;
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Bytes of aligner stderr kept for error reports.
const STDERR_TAIL: usize = 4096;

const INPUT_READS: &str = "Number of input reads";
const UNIQUE_READS: &str = "Uniquely mapped reads number";
const MULTI_READS: &str = "Number of reads mapped to multiple loci";
const TOO_MANY_READS: &str = "Number of reads mapped to too many loci";

/// One paired-end alignment job.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignRequest {
    pub fastq_r1: PathBuf,
    pub fastq_r2: PathBuf,
    pub genome_dir: PathBuf,
    pub output_dir: PathBuf,
    pub threads: usize,
}

/// Read accounting for one alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentStats {
    pub total_reads: u64,
    pub uniquely_mapped: u64,
    pub multi_mapped: u64,
    pub unmapped: u64,
    /// Fraction of input reads mapped anywhere.
    pub alignment_rate: f64,
    /// Fraction of input reads mapped to exactly one locus.
    pub unique_mapping_rate: f64,
}

impl AlignmentStats {
    pub fn from_counts(total_reads: u64, uniquely_mapped: u64, multi_mapped: u64) -> Self {
        let mapped = uniquely_mapped.saturating_add(multi_mapped);
        let rate = |n: u64| {
            if total_reads == 0 {
                0.0
            } else {
                n as f64 / total_reads as f64
            }
        };
        AlignmentStats {
            total_reads,
            uniquely_mapped,
            multi_mapped,
            unmapped: total_reads.saturating_sub(mapped),
            alignment_rate: rate(mapped),
            unique_mapping_rate: rate(uniquely_mapped),
        }
    }
}

/// Files and statistics produced by a finished alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentOutput {
    pub aligned_bam: PathBuf,
    pub log_file: PathBuf,
    pub stats: AlignmentStats,
}

/// Anything that can turn a pair of FASTQ files into an aligned BAM.
pub trait Aligner: Send + Sync {
    /// Run `request`, giving up with `Timeout` once `timeout` has elapsed.
    fn align(&self, request: &AlignRequest, timeout: Duration) -> Result<AlignmentOutput>;
}

/// Drives the STAR aligner as a child process.
#[derive(Debug, Clone)]
pub struct StarAligner {
    program: String,
}

impl StarAligner {
    pub fn new<S: Into<String>>(program: S) -> Self {
        StarAligner {
            program: program.into(),
        }
    }

    /// Arguments for `request`. Read 2 carries the cDNA and goes first.
    pub fn command_args(&self, request: &AlignRequest) -> Vec<OsString> {
        let read_command = if is_gzipped(&request.fastq_r1) {
            "zcat"
        } else {
            "cat"
        };
        // STAR concatenates the prefix with its file names, so it needs the
        // trailing separator.
        let mut prefix = request.output_dir.clone().into_os_string();
        prefix.push(std::path::MAIN_SEPARATOR.to_string());

        let mut args: Vec<OsString> = Vec::new();
        args.push("--runThreadN".into());
        args.push(request.threads.to_string().into());
        args.push("--genomeDir".into());
        args.push(request.genome_dir.clone().into_os_string());
        args.push("--readFilesIn".into());
        args.push(request.fastq_r2.clone().into_os_string());
        args.push(request.fastq_r1.clone().into_os_string());
        args.push("--readFilesCommand".into());
        args.push(read_command.into());
        args.push("--outFileNamePrefix".into());
        args.push(prefix);
        args.push("--outSAMtype".into());
        args.push("BAM".into());
        args.push("SortedByCoordinate".into());
        args.push("--outSAMattributes".into());
        for attr in ["NH", "HI", "AS", "nM", "NM", "MD"] {
            args.push(attr.into());
        }
        args.push("--limitBAMsortRAM".into());
        args.push(BAM_SORT_RAM_BYTES.to_string().into());
        args
    }
}

impl Aligner for StarAligner {
    fn align(&self, request: &AlignRequest, timeout: Duration) -> Result<AlignmentOutput> {
        fs::create_dir_all(&request.output_dir)?;
        let args = self.command_args(request);
        debug!("Running {} {:?}", self.program, args);

        let started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SpatialError::ExternalProcess {
                program: self.program.clone(),
                status: "failed to start".to_string(),
                stderr: e.to_string(),
            })?;

        // Drain stderr on its own thread so a chatty aligner never blocks on a
        // full pipe while we poll for exit.
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                pipe.read_to_end(&mut buf).ok();
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= timeout {
                warn!("{} exceeded {:?}, killing it", self.program, timeout);
                child.kill().ok();
                child.wait().ok();
                return Err(SpatialError::Timeout {
                    operation: format!("alignment with {}", self.program),
                    elapsed: started.elapsed(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        if !status.success() {
            return Err(SpatialError::ExternalProcess {
                program: self.program.clone(),
                status: status.to_string(),
                stderr: tail(&stderr, STDERR_TAIL).trim().to_string(),
            });
        }

        let log_file = request.output_dir.join(FINAL_LOG_NAME);
        let stats = read_final_log(&log_file)?;
        info!(
            "Aligned {} reads in {:?}: {:.1}% mapped, {:.1}% unique",
            stats.total_reads,
            started.elapsed(),
            stats.alignment_rate * 100.0,
            stats.unique_mapping_rate * 100.0
        );
        Ok(AlignmentOutput {
            aligned_bam: request.output_dir.join(ALIGNED_BAM_NAME),
            log_file,
            stats,
        })
    }
}

/// Read and parse a STAR `Log.final.out`.
pub fn read_final_log(path: &Path) -> Result<AlignmentStats> {
    if !path.exists() {
        return Err(SpatialError::not_found(path));
    }
    parse_final_log(&path.display().to_string(), &fs::read_to_string(path)?)
}

/// Parse the `key | value` lines of a STAR final log.
pub fn parse_final_log(source: &str, text: &str) -> Result<AlignmentStats> {
    let mut total = None;
    let mut unique = None;
    let mut multi = None;
    let mut too_many = 0;

    for line in text.lines() {
        let Some((key, value)) = line.split_once('|') else {
            continue;
        };
        let slot = match key.trim() {
            INPUT_READS => &mut total,
            UNIQUE_READS => &mut unique,
            MULTI_READS => &mut multi,
            TOO_MANY_READS => {
                too_many = parse_log_count(source, TOO_MANY_READS, value)?;
                continue;
            }
            _ => continue,
        };
        *slot = Some(parse_log_count(source, key.trim(), value)?);
    }

    let require = |value: Option<u64>, key: &str| {
        value.ok_or_else(|| SpatialError::format(source, format!("missing '{}' line", key)))
    };
    Ok(AlignmentStats::from_counts(
        require(total, INPUT_READS)?,
        require(unique, UNIQUE_READS)?,
        require(multi, MULTI_READS)?.saturating_add(too_many),
    ))
}

fn parse_log_count(source: &str, key: &str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        SpatialError::format(
            source,
            format!("'{}' has non-numeric value '{}'", key, value.trim()),
        )
    })
}

fn tail(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
