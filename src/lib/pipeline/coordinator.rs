//! Request orchestration.
//!
//! [`PipelineCoordinator`] validates a request, loads its tables, runs the
//! engines and persists the results. It holds only the configuration it was
//! built with, so one coordinator can serve many independent requests. Each
//! request runs under its own [`CancelToken`]; the `*_with_cancel` variants
//! let the caller keep a handle on it.

use crate::core::cancel::CancelToken;
use crate::core::config::SpatialConfig;
use crate::core::error::{Result, SpatialError};
use crate::core::fs::{derived_path, table_stem, table_suffix, TABLE_EXTENSIONS};
use crate::core::validation::{
    sanitize_file_name, validate_file_path, validate_output_dir, validate_thread_count, PathRules,
};
use crate::engine::merge::{merge, MergeStats};
use crate::engine::qc::{self, QcStats};
use crate::engine::region::{
    load_rois, segment, validate_region_names, RegionCounts, SegmentationMode,
};
use crate::pipeline::aligner::{
    AlignRequest, Aligner, AlignmentStats, StarAligner, ALIGNED_BAM_NAME, FASTQ_EXTENSIONS,
    FINAL_LOG_NAME,
};
use crate::pipeline::response::{
    AlignResponse, FilterRequest, FilterResponse, MergeQc, MergeRequest, MergeResponse, QcStage,
    RegionFile, SegmentRequest, SegmentResponse, DRY_RUN_MODE,
};
use crate::pipeline::tiles::load_tiles;
use crate::table::{write_table, BarcodeTable};
use log::{info, warn};
use rustc_hash::FxHashSet;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

const ROI_EXTENSIONS: &[&str] = &["json"];
const DRY_RUN_REGIONS: &[&str] = &["region_1", "region_2", "region_3"];
const DRY_RUN_REGION_SIZES: &[usize] = &[5000, 10_000, 15_000];

pub struct PipelineCoordinator {
    config: SpatialConfig,
    aligner: Box<dyn Aligner>,
}

impl PipelineCoordinator {
    /// Build a coordinator backed by the STAR binary named in `config`.
    pub fn new(config: SpatialConfig) -> Result<Self> {
        config.validate()?;
        let aligner = Box::new(StarAligner::new(config.star_path.clone()));
        Ok(PipelineCoordinator { config, aligner })
    }

    pub fn with_aligner(mut self, aligner: Box<dyn Aligner>) -> Self {
        self.aligner = aligner;
        self
    }

    pub fn config(&self) -> &SpatialConfig {
        &self.config
    }

    fn table_rules(&self) -> PathRules<'static> {
        PathRules {
            must_exist: true,
            allowed_extensions: Some(TABLE_EXTENSIONS),
            max_size_bytes: Some(self.config.max_file_size_bytes),
        }
    }

    fn load(&self, paths: &[PathBuf], cancel: &CancelToken) -> Result<Vec<BarcodeTable>> {
        load_tiles(paths, self.config.io_timeout, cancel)
    }

    fn load_one(&self, path: &Path, cancel: &CancelToken) -> Result<BarcodeTable> {
        self.load(&[path.to_path_buf()], cancel)?
            .pop()
            .ok_or_else(|| SpatialError::not_found(path))
    }

    /// Drop barcodes failing the quality thresholds and write the survivors
    /// to `<output_dir>/<stem>_filtered<ext>`.
    pub fn filter_quality(&self, request: &FilterRequest) -> Result<FilterResponse> {
        self.filter_quality_with_cancel(request, &CancelToken::new())
    }

    pub fn filter_quality_with_cancel(
        &self,
        request: &FilterRequest,
        cancel: &CancelToken,
    ) -> Result<FilterResponse> {
        let thresholds = request.thresholds.unwrap_or(self.config.qc);
        thresholds.validate()?;
        let input = validate_file_path(
            &request.input,
            &PathRules {
                must_exist: false,
                ..self.table_rules()
            },
        )?;
        let output_dir = validate_output_dir(&request.output_dir)?;
        let output_file = derived_path(
            &output_dir,
            &format!("{}_filtered", table_stem(&input)?),
            &table_suffix(&input),
        );

        if self.config.dry_run {
            info!("Dry run: skipping quality filtering of {}", input.display());
            let mut response = FilterResponse::new(output_file, &dry_run_qc_stats());
            response.mode = Some(DRY_RUN_MODE);
            return Ok(response);
        }

        validate_file_path(&input, &self.table_rules())?;
        let table = self.load_one(&input, cancel)?;
        let (kept, stats) = qc::filter(&table, &thresholds)?;
        cancel.check("quality filtering")?;
        write_table(&kept, &output_file, self.config.threads)?;
        info!(
            "Wrote {} filtered barcodes to {}",
            kept.size(),
            output_file.display()
        );
        Ok(FilterResponse::new(output_file, &stats))
    }

    /// Partition a table into regions, writing one file per non-empty region.
    pub fn split_by_region(&self, request: &SegmentRequest) -> Result<SegmentResponse> {
        self.split_by_region_with_cancel(request, &CancelToken::new())
    }

    pub fn split_by_region_with_cancel(
        &self,
        request: &SegmentRequest,
        cancel: &CancelToken,
    ) -> Result<SegmentResponse> {
        let regions = request.regions.as_deref().filter(|r| !r.is_empty());
        if let Some(regions) = regions {
            validate_region_names(regions)?;
        }
        let bins = request.bins.unwrap_or(self.config.grid_bins);
        if bins == 0 {
            return Err(SpatialError::InvalidParameter(
                "number of grid bins must be greater than 0".to_string(),
            ));
        }
        let input = validate_file_path(
            &request.input,
            &PathRules {
                must_exist: false,
                ..self.table_rules()
            },
        )?;
        let roi_rules = PathRules {
            must_exist: false,
            allowed_extensions: Some(ROI_EXTENSIONS),
            max_size_bytes: Some(self.config.max_file_size_bytes),
        };
        let roi_file = request
            .roi_file
            .as_deref()
            .map(|path| validate_file_path(path, &roi_rules))
            .transpose()?;
        let output_dir = validate_output_dir(&request.output_dir)?;
        let suffix = table_suffix(&input);

        if self.config.dry_run {
            info!("Dry run: skipping segmentation of {}", input.display());
            return Ok(dry_run_segments(&output_dir, regions, &suffix));
        }

        validate_file_path(&input, &self.table_rules())?;
        let rois = match &roi_file {
            Some(path) => {
                validate_file_path(
                    path,
                    &PathRules {
                        must_exist: true,
                        ..roi_rules
                    },
                )?;
                Some(load_rois(path)?)
            }
            None => None,
        };
        let table = self.load_one(&input, cancel)?;
        let segmentation = segment(&table, regions, rois.as_deref(), bins)?;

        // Resolve every file name before the first write.
        let mut taken = FxHashSet::default();
        let mut files = Vec::with_capacity(segmentation.partitions.len());
        for partition in &segmentation.partitions {
            let file_name = sanitize_file_name(&partition.name);
            if !taken.insert(file_name.clone()) {
                return Err(SpatialError::InvalidParameter(format!(
                    "regions with different names map to the same file name '{}'",
                    file_name
                )));
            }
            files.push(derived_path(&output_dir, &file_name, &suffix));
        }

        cancel.check("segmentation")?;
        let mut written = Vec::with_capacity(files.len());
        for (partition, file) in segmentation.partitions.iter().zip(files) {
            write_table(&partition.table, &file, self.config.threads)?;
            written.push(RegionFile {
                name: partition.name.clone(),
                file,
                barcode_count: partition.table.size(),
            });
        }
        info!(
            "Wrote {} region files to {}",
            written.len(),
            output_dir.display()
        );

        Ok(SegmentResponse {
            segmentation: segmentation.mode,
            total_regions: written.len(),
            regions: written,
            barcodes_per_region: segmentation.counts,
            mode: None,
        })
    }

    /// Load every tile concurrently, optionally filter, merge and write.
    pub fn merge_tiles(&self, request: &MergeRequest) -> Result<MergeResponse> {
        self.merge_tiles_with_cancel(request, &CancelToken::new())
    }

    pub fn merge_tiles_with_cancel(
        &self,
        request: &MergeRequest,
        cancel: &CancelToken,
    ) -> Result<MergeResponse> {
        if request.tile_files.is_empty() {
            return Err(SpatialError::InvalidParameter(
                "no tiles provided to merge".to_string(),
            ));
        }
        if let Some(thresholds) = &request.qc {
            thresholds.validate()?;
        }
        let shape_only = PathRules {
            must_exist: false,
            ..self.table_rules()
        };
        for tile in &request.tile_files {
            validate_file_path(tile, &shape_only)?;
        }
        let output_file = validate_file_path(&request.output_file, &shape_only)?;

        if self.config.dry_run {
            info!(
                "Dry run: skipping merge of {} tiles",
                request.tile_files.len()
            );
            let stats = MergeStats {
                tiles_merged: request.tile_files.len(),
                total_barcodes: 85_000,
                overlapping_barcodes: 5000,
                overlap_percent: 5.9,
            };
            let mut response = MergeResponse::new(output_file, request.policy, &stats);
            if request.qc.is_some() {
                response.qc = Some(match request.qc_stage {
                    QcStage::PerTile => MergeQc::PerTile(
                        request.tile_files.iter().map(|_| dry_run_qc_stats()).collect(),
                    ),
                    QcStage::PostMerge => MergeQc::PostMerge(dry_run_qc_stats()),
                });
            }
            response.mode = Some(DRY_RUN_MODE);
            return Ok(response);
        }

        for tile in &request.tile_files {
            validate_file_path(tile, &self.table_rules())?;
        }
        let mut tiles = self.load(&request.tile_files, cancel)?;

        let mut qc_report = None;
        if let (Some(thresholds), QcStage::PerTile) = (&request.qc, request.qc_stage) {
            let mut per_tile = Vec::with_capacity(tiles.len());
            let mut filtered = Vec::with_capacity(tiles.len());
            for tile in &tiles {
                cancel.check("per-tile quality filtering")?;
                let (kept, stats) = qc::filter(tile, thresholds)?;
                filtered.push(kept);
                per_tile.push(stats);
            }
            tiles = filtered;
            qc_report = Some(MergeQc::PerTile(per_tile));
        }

        let (mut merged, stats) = merge(&tiles, request.policy)?;
        if let (Some(thresholds), QcStage::PostMerge) = (&request.qc, request.qc_stage) {
            let (kept, qc_stats) = qc::filter(&merged, thresholds)?;
            merged = kept;
            qc_report = Some(MergeQc::PostMerge(qc_stats));
        }

        cancel.check("merging tiles")?;
        write_table(&merged, &output_file, self.config.threads)?;
        info!(
            "Merged {} tiles into {} barcodes at {}",
            stats.tiles_merged,
            merged.size(),
            output_file.display()
        );

        let mut response = MergeResponse::new(output_file, request.policy, &stats);
        response.qc = qc_report;
        Ok(response)
    }

    /// Align paired FASTQ files with the configured aligner.
    pub fn align_spatial_data(&self, request: &AlignRequest) -> Result<AlignResponse> {
        self.align_spatial_data_with_cancel(request, &CancelToken::new())
    }

    pub fn align_spatial_data_with_cancel(
        &self,
        request: &AlignRequest,
        cancel: &CancelToken,
    ) -> Result<AlignResponse> {
        validate_thread_count(request.threads)?;
        let fastq_rules = PathRules {
            must_exist: false,
            allowed_extensions: Some(FASTQ_EXTENSIONS),
            max_size_bytes: None,
        };
        validate_file_path(&request.fastq_r1, &fastq_rules)?;
        validate_file_path(&request.fastq_r2, &fastq_rules)?;
        validate_file_path(&request.genome_dir, &PathRules::default())?;
        let output_dir = validate_output_dir(&request.output_dir)?;

        if self.config.dry_run {
            info!(
                "Dry run: skipping alignment of {}",
                request.fastq_r1.display()
            );
            return Ok(AlignResponse {
                aligned_bam: output_dir.join(ALIGNED_BAM_NAME),
                alignment_stats: AlignmentStats::from_counts(50_000_000, 42_500_000, 3_750_000),
                log_file: output_dir.join(FINAL_LOG_NAME),
                mode: Some(DRY_RUN_MODE),
            });
        }

        let existing = PathRules {
            must_exist: true,
            ..fastq_rules
        };
        validate_file_path(&request.fastq_r1, &existing)?;
        validate_file_path(&request.fastq_r2, &existing)?;
        if !request.genome_dir.is_dir() {
            return Err(SpatialError::not_found(&request.genome_dir));
        }
        cancel.check("alignment")?;

        let output = self.aligner.align(request, self.config.align_timeout)?;
        if output.stats.alignment_rate < 0.5 {
            warn!(
                "Only {:.1}% of reads aligned for {}",
                output.stats.alignment_rate * 100.0,
                request.fastq_r1.display()
            );
        }
        Ok(AlignResponse {
            aligned_bam: output.aligned_bam,
            alignment_stats: output.stats,
            log_file: output.log_file,
            mode: None,
        })
    }

    /// Describe the data directories and the active QC defaults.
    pub fn describe(&self) -> Value {
        let config = &self.config;
        json!({
            "data_dir": config.data_dir,
            "cache_dir": config.cache_dir,
            "datasets": {
                "raw": {
                    "directory": config.raw_dir(),
                    "description": "Unprocessed barcode tables and FASTQ files",
                },
                "filtered": {
                    "directory": config.filtered_dir(),
                    "description": "Barcode tables after quality filtering",
                    "filtering_criteria": {
                        "min_reads_per_barcode": config.qc.min_reads,
                        "min_genes_per_barcode": config.qc.min_genes,
                        "max_mt_percent": config.qc.max_mt_percent,
                    },
                },
                "aligned": {
                    "directory": config.aligned_dir(),
                    "description": "Coordinate-sorted alignments and aligner logs",
                    "aligner": config.star_path,
                },
            },
            "threads": config.threads,
            "grid_bins": config.grid_bins,
            "dry_run": config.dry_run,
        })
    }
}

fn dry_run_qc_stats() -> QcStats {
    QcStats {
        barcodes_before: 50_000,
        barcodes_after: 42_500,
        genes_detected: 15_000,
        mean_reads_per_barcode: 2500.0,
        median_genes_per_barcode: 850.0,
        mean_mt_percent: 5.2,
        retention_rate: 0.85,
    }
}

fn dry_run_segments(output_dir: &Path, regions: Option<&[String]>, suffix: &str) -> SegmentResponse {
    let names: Vec<String> = match regions {
        Some(regions) => regions.to_vec(),
        None => DRY_RUN_REGIONS.iter().map(|r| r.to_string()).collect(),
    };
    let files: Vec<RegionFile> = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| RegionFile {
            file: derived_path(output_dir, &sanitize_file_name(&name), suffix),
            name,
            barcode_count: DRY_RUN_REGION_SIZES[i % DRY_RUN_REGION_SIZES.len()],
        })
        .collect();
    let sizes: Vec<usize> = files.iter().map(|f| f.barcode_count).collect();
    let counts = match (sizes.iter().min(), sizes.iter().max()) {
        (Some(&min), Some(&max)) => RegionCounts {
            mean: sizes.iter().sum::<usize>() as f64 / sizes.len() as f64,
            min,
            max,
        },
        _ => RegionCounts::default(),
    };

    SegmentResponse {
        segmentation: match regions {
            Some(_) => SegmentationMode::PreLabeled,
            None => SegmentationMode::Grid,
        },
        total_regions: files.len(),
        regions: files,
        barcodes_per_region: counts,
        mode: Some(DRY_RUN_MODE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::engine::merge::MergePolicy;
    use crate::engine::qc::QcThresholds;
    use crate::pipeline::aligner::AlignmentOutput;
    use crate::table::read_table;
    use std::fs;
    use std::time::Duration;

    fn config(dir: &Path) -> SpatialConfig {
        SpatialConfig {
            data_dir: dir.join("data"),
            cache_dir: dir.join("cache"),
            threads: 2,
            ..SpatialConfig::default()
        }
    }

    fn coordinator(dir: &Path) -> PipelineCoordinator {
        PipelineCoordinator::new(config(dir)).unwrap()
    }

    fn dry_coordinator(dir: &Path) -> PipelineCoordinator {
        PipelineCoordinator::new(SpatialConfig {
            dry_run: true,
            ..config(dir)
        })
        .unwrap()
    }

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn tile_text(prefix: &str, range: std::ops::Range<usize>, reads: u64) -> String {
        let mut text = String::from("barcode,n_reads,n_genes,mt_percent\n");
        for i in range {
            text.push_str(&format!("{}{:03},{},{},{}\n", prefix, i, reads, 300, 2.5));
        }
        text
    }

    /// Tiles of 10, 10 and 5 barcodes where tiles 1 and 2 share three.
    fn scenario_tiles(dir: &Path) -> Vec<PathBuf> {
        let first = tile_text("AAA", 0..10, 1000);
        // The last three of tile 1 reappear at the start of tile 2.
        let second = tile_text("AAA", 7..17, 3000);
        let third = tile_text("CCC", 0..5, 1500);
        vec![
            write(dir, "tile_1.csv", &first),
            write(dir, "tile_2.csv", &second),
            write(dir, "tile_3.csv", &third),
        ]
    }

    fn merge_request(tiles: Vec<PathBuf>, output_file: PathBuf) -> MergeRequest {
        MergeRequest {
            tile_files: tiles,
            output_file,
            policy: MergePolicy::Average,
            qc: None,
            qc_stage: QcStage::PostMerge,
        }
    }

    #[test]
    fn three_tile_scenario_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let tiles = scenario_tiles(dir.path());
        let output = dir.path().join("out/merged.csv");
        let response = coordinator(dir.path())
            .merge_tiles(&merge_request(tiles, output.clone()))
            .unwrap();

        assert_eq!(response.tiles_merged, 3);
        assert_eq!(response.total_barcodes, 22);
        assert_eq!(response.overlap_regions.overlapping_barcodes, 3);
        assert!((response.overlap_regions.overlap_percent - 13.636).abs() < 0.01);
        assert!(response.mode.is_none());

        let merged = read_table(&output).unwrap();
        assert_eq!(merged.size(), 22);
        assert_eq!(merged.get("AAA008").unwrap().read_count, Some(2000));
        assert_eq!(merged.get("AAA001").unwrap().read_count, Some(1000));
        assert_eq!(merged.records()[0].barcode, "AAA000");
    }

    #[test]
    fn first_policy_keeps_submission_order_despite_concurrent_loads() {
        let dir = tempfile::tempdir().unwrap();
        let tiles = scenario_tiles(dir.path());
        let output = dir.path().join("first.tsv");
        let request = MergeRequest {
            policy: MergePolicy::First,
            ..merge_request(tiles, output.clone())
        };
        coordinator(dir.path()).merge_tiles(&request).unwrap();
        let merged = read_table(&output).unwrap();
        assert_eq!(merged.get("AAA009").unwrap().read_count, Some(1000));
    }

    #[test]
    fn per_tile_qc_reports_every_tile() {
        let dir = tempfile::tempdir().unwrap();
        let tiles = scenario_tiles(dir.path());
        let request = MergeRequest {
            qc: Some(QcThresholds::new(1200, 0, 100.0)),
            qc_stage: QcStage::PerTile,
            ..merge_request(tiles, dir.path().join("qc.csv"))
        };
        let response = coordinator(dir.path()).merge_tiles(&request).unwrap();
        match response.qc {
            Some(MergeQc::PerTile(stats)) => {
                let kept: Vec<usize> = stats.iter().map(|s| s.barcodes_after).collect();
                assert_eq!(kept, vec![0, 10, 5]);
            }
            other => panic!("unexpected QC report {:?}", other),
        }
        assert_eq!(response.total_barcodes, 15);
        assert_eq!(response.overlap_regions.overlapping_barcodes, 0);
    }

    #[test]
    fn post_merge_qc_filters_the_merged_table() {
        let dir = tempfile::tempdir().unwrap();
        let tiles = scenario_tiles(dir.path());
        let output = dir.path().join("post.csv");
        let request = MergeRequest {
            qc: Some(QcThresholds::new(1200, 0, 100.0)),
            ..merge_request(tiles, output.clone())
        };
        let response = coordinator(dir.path()).merge_tiles(&request).unwrap();
        assert_eq!(response.total_barcodes, 22);
        match response.qc {
            Some(MergeQc::PostMerge(stats)) => assert_eq!(stats.barcodes_after, 15),
            other => panic!("unexpected QC report {:?}", other),
        }
        assert_eq!(read_table(&output).unwrap().size(), 15);
    }

    #[test]
    fn bad_requests_fail_before_anything_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let tiles = scenario_tiles(dir.path());
        let coordinator = coordinator(dir.path());
        let output = dir.path().join("never.csv");

        let empty = merge_request(Vec::new(), output.clone());
        assert_eq!(
            coordinator.merge_tiles(&empty).unwrap_err().kind(),
            ErrorKind::InvalidParameter
        );

        let mut missing = tiles.clone();
        missing.push(dir.path().join("tile_9.csv"));
        assert_eq!(
            coordinator
                .merge_tiles(&merge_request(missing, output.clone()))
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );

        let bad_qc = MergeRequest {
            qc: Some(QcThresholds::new(0, 0, 250.0)),
            ..merge_request(tiles.clone(), output.clone())
        };
        assert_eq!(
            coordinator.merge_tiles(&bad_qc).unwrap_err().kind(),
            ErrorKind::InvalidParameter
        );

        let traversal = merge_request(tiles, dir.path().join("../escape.csv"));
        assert_eq!(
            coordinator.merge_tiles(&traversal).unwrap_err().kind(),
            ErrorKind::InvalidParameter
        );
        assert!(!output.exists());
    }

    #[test]
    fn cancelled_merge_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let tiles = scenario_tiles(dir.path());
        let output = dir.path().join("cancelled.csv");
        let token = CancelToken::new();
        token.cancel();
        let err = coordinator(dir.path())
            .merge_tiles_with_cancel(&merge_request(tiles, output.clone()), &token)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(!output.exists());
    }

    #[test]
    fn cancelling_one_request_leaves_the_next_one_alone() {
        let dir = tempfile::tempdir().unwrap();
        let tiles = scenario_tiles(dir.path());
        let coordinator = coordinator(dir.path());

        let token = CancelToken::new();
        token.cancel();
        let cancelled = dir.path().join("cancelled.csv");
        let err = coordinator
            .merge_tiles_with_cancel(&merge_request(tiles.clone(), cancelled.clone()), &token)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        let output = dir.path().join("after.csv");
        let response = coordinator
            .merge_tiles(&merge_request(tiles[2..].to_vec(), output.clone()))
            .unwrap();
        assert_eq!(response.total_barcodes, 5);
        assert_eq!(read_table(&output).unwrap().size(), 5);
        assert!(!cancelled.exists());
    }

    #[test]
    fn filter_writes_stem_filtered_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = write(
            dir.path(),
            "sample.tsv",
            "barcode\tn_reads\tn_genes\tmt_percent\nA\t1500\t300\t5\nB\t200\t100\t1\nC\t5000\t900\t30\n",
        );
        let response = coordinator(dir.path())
            .filter_quality(&FilterRequest {
                input,
                output_dir: dir.path().join("filtered"),
                thresholds: None,
            })
            .unwrap();
        assert_eq!(
            response.output_file,
            dir.path().join("filtered/sample_filtered.tsv")
        );
        assert_eq!(response.barcodes_before, 3);
        assert_eq!(response.barcodes_after, 1);
        assert_eq!(response.genes_detected, 300);
        let kept = read_table(&response.output_file).unwrap();
        assert!(kept.get("A").is_some());
    }

    #[test]
    fn filter_rejects_disallowed_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let input = write(dir.path(), "sample.h5ad", "barcode\nA\n");
        let err = coordinator(dir.path())
            .filter_quality(&FilterRequest {
                input,
                output_dir: dir.path().to_path_buf(),
                thresholds: None,
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn segment_writes_one_file_per_region() {
        let dir = tempfile::tempdir().unwrap();
        let input = write(
            dir.path(),
            "spots.csv",
            "barcode,x_coord,y_coord\nA,0,0\nB,1,1\nC,9,9\nD,10,10\n",
        );
        let response = coordinator(dir.path())
            .split_by_region(&SegmentRequest {
                input,
                output_dir: dir.path().join("regions"),
                bins: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.segmentation, SegmentationMode::Grid);
        assert_eq!(response.total_regions, 2);
        for region in &response.regions {
            let table = read_table(&region.file).unwrap();
            assert_eq!(table.size(), region.barcode_count);
            assert!(table.has_column("region"));
        }
        assert_eq!(response.barcodes_per_region.min, 2);
    }

    #[test]
    fn segment_with_roi_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = write(
            dir.path(),
            "spots.csv",
            "barcode,x_coord,y_coord\nA,1,1\nB,8,8\nC,50,50\n",
        );
        let rois = write(
            dir.path(),
            "rois.json",
            r#"[{"name": "tumor core", "type": "bounding_box", "x_min": 0, "x_max": 5, "y_min": 0, "y_max": 5},
                {"name": "edge", "type": "polygon", "vertices": [[6, 6], [10, 6], [10, 10], [6, 10]]}]"#,
        );
        let response = coordinator(dir.path())
            .split_by_region(&SegmentRequest {
                input,
                output_dir: dir.path().join("roi"),
                roi_file: Some(rois),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.segmentation, SegmentationMode::Roi);
        let names: Vec<&str> = response.regions.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["tumor core", "edge", "unassigned"]);
        assert_eq!(response.regions[0].file, dir.path().join("roi/tumor_core.csv"));
    }

    #[test]
    fn dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = dry_coordinator(dir.path());
        let out = dir.path().join("never");

        let filtered = coordinator
            .filter_quality(&FilterRequest {
                input: dir.path().join("absent.csv"),
                output_dir: out.clone(),
                thresholds: None,
            })
            .unwrap();
        assert_eq!(filtered.mode, Some(DRY_RUN_MODE));
        assert_eq!(filtered.barcodes_after, 42_500);

        let segments = coordinator
            .split_by_region(&SegmentRequest {
                input: dir.path().join("absent.csv"),
                output_dir: out.clone(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(segments.total_regions, 3);
        assert_eq!(segments.barcodes_per_region.mean, 10_000.0);

        let merged = coordinator
            .merge_tiles(&merge_request(
                vec![dir.path().join("a.csv"), dir.path().join("b.csv")],
                out.join("merged.csv"),
            ))
            .unwrap();
        assert_eq!(merged.total_barcodes, 85_000);
        assert_eq!(merged.tiles_merged, 2);

        let aligned = coordinator
            .align_spatial_data(&AlignRequest {
                fastq_r1: dir.path().join("r1.fastq.gz"),
                fastq_r2: dir.path().join("r2.fastq.gz"),
                genome_dir: dir.path().join("genome"),
                output_dir: out.clone(),
                threads: 8,
            })
            .unwrap();
        assert!((aligned.alignment_stats.alignment_rate - 0.925).abs() < 1e-12);

        assert!(!out.exists());
    }

    #[test]
    fn dry_run_still_validates_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let err = dry_coordinator(dir.path())
            .filter_quality(&FilterRequest {
                input: dir.path().join("a.csv"),
                output_dir: dir.path().to_path_buf(),
                thresholds: Some(QcThresholds::new(0, 0, -5.0)),
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    struct FixedAligner;

    impl Aligner for FixedAligner {
        fn align(&self, request: &AlignRequest, _timeout: Duration) -> Result<AlignmentOutput> {
            Ok(AlignmentOutput {
                aligned_bam: request.output_dir.join(ALIGNED_BAM_NAME),
                log_file: request.output_dir.join(FINAL_LOG_NAME),
                stats: AlignmentStats::from_counts(100, 80, 10),
            })
        }
    }

    fn align_request(dir: &Path, threads: usize) -> AlignRequest {
        AlignRequest {
            fastq_r1: write(dir, "s_R1.fastq", "@r\nACGT\n+\nIIII\n"),
            fastq_r2: write(dir, "s_R2.fastq", "@r\nACGT\n+\nIIII\n"),
            genome_dir: dir.to_path_buf(),
            output_dir: dir.join("aligned"),
            threads,
        }
    }

    #[test]
    fn alignment_delegates_to_the_aligner() {
        let dir = tempfile::tempdir().unwrap();
        let response = coordinator(dir.path())
            .with_aligner(Box::new(FixedAligner))
            .align_spatial_data(&align_request(dir.path(), 4))
            .unwrap();
        assert_eq!(response.alignment_stats.unmapped, 10);
        assert!((response.alignment_stats.alignment_rate - 0.9).abs() < 1e-12);
    }

    #[test]
    fn alignment_thread_count_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path()).with_aligner(Box::new(FixedAligner));
        for threads in [0, 65] {
            let err = coordinator
                .align_spatial_data(&align_request(dir.path(), threads))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        }
    }

    #[test]
    fn describe_lists_directories_and_criteria() {
        let dir = tempfile::tempdir().unwrap();
        let description = coordinator(dir.path()).describe();
        assert_eq!(
            description["datasets"]["filtered"]["filtering_criteria"]["min_reads_per_barcode"],
            json!(1000)
        );
        assert_eq!(
            description["datasets"]["raw"]["directory"],
            json!(dir.path().join("data/raw"))
        );
    }
}
