//! Spatial region segmentation.
//!
//! A table is partitioned into named regions by the first applicable mode:
//!
//! 1. **Pre-labelled**: records already carrying a `region` keep it.
//! 2. **ROI**: each barcode goes to the first listed region of interest whose
//!    bounds contain its `(x, y)`; barcodes outside every ROI are `unassigned`.
//! 3. **Grid**: the `x` coordinate (or the row position when the table has no
//!    coordinates) is cut into `k` equal-width bins labelled in ascending order.
//!
//! Every mode is a pure function of its input, and no record is ever dropped.

use crate::core::error::{Result, SpatialError};
use crate::table::record::{BarcodeRecord, REGION, X_COORD, Y_COORD};
use crate::table::BarcodeTable;
use log::{debug, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Region given to barcodes no ROI contains, and to blank pre-assigned labels.
pub const UNASSIGNED: &str = "unassigned";

/// Geometry of a region of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoiShape {
    /// Axis-aligned rectangle, bounds inclusive.
    BoundingBox {
        x_min: f64,
        x_max: f64,
        y_min: f64,
        y_max: f64,
    },
    /// Simple polygon evaluated with the even-odd rule.
    Polygon { vertices: Vec<[f64; 2]> },
}

/// A named region of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub name: String,
    #[serde(flatten)]
    pub shape: RoiShape,
}

impl Roi {
    pub fn bounding_box(
        name: impl Into<String>,
        x_min: f64,
        x_max: f64,
        y_min: f64,
        y_max: f64,
    ) -> Self {
        Roi {
            name: name.into(),
            shape: RoiShape::BoundingBox {
                x_min,
                x_max,
                y_min,
                y_max,
            },
        }
    }

    pub fn polygon(name: impl Into<String>, vertices: Vec<[f64; 2]>) -> Self {
        Roi {
            name: name.into(),
            shape: RoiShape::Polygon { vertices },
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        match &self.shape {
            RoiShape::BoundingBox {
                x_min,
                x_max,
                y_min,
                y_max,
            } => x >= *x_min && x <= *x_max && y >= *y_min && y <= *y_max,
            RoiShape::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return false;
                }
                let mut inside = false;
                let mut j = vertices.len() - 1;
                for i in 0..vertices.len() {
                    let [xi, yi] = vertices[i];
                    let [xj, yj] = vertices[j];
                    if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                        inside = !inside;
                    }
                    j = i;
                }
                inside
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SpatialError::InvalidParameter(
                "ROI names must not be empty".to_string(),
            ));
        }
        if self.name == UNASSIGNED {
            return Err(SpatialError::InvalidParameter(format!(
                "ROI name '{}' is reserved",
                UNASSIGNED
            )));
        }
        match &self.shape {
            RoiShape::BoundingBox {
                x_min,
                x_max,
                y_min,
                y_max,
            } => {
                let finite = [x_min, x_max, y_min, y_max].iter().all(|v| v.is_finite());
                if !finite || x_min > x_max || y_min > y_max {
                    return Err(SpatialError::InvalidParameter(format!(
                        "ROI '{}' has an invalid bounding box [{}, {}] x [{}, {}]",
                        self.name, x_min, x_max, y_min, y_max
                    )));
                }
            }
            RoiShape::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err(SpatialError::InvalidParameter(format!(
                        "ROI '{}' polygon needs at least 3 vertices, got {}",
                        self.name,
                        vertices.len()
                    )));
                }
                if vertices.iter().flatten().any(|v| !v.is_finite()) {
                    return Err(SpatialError::InvalidParameter(format!(
                        "ROI '{}' polygon has a non-finite vertex",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Check a list of ROIs: every shape valid, names unique.
pub fn validate_rois(rois: &[Roi]) -> Result<()> {
    let mut names = FxHashSet::default();
    for roi in rois {
        roi.validate()?;
        if !names.insert(roi.name.as_str()) {
            return Err(SpatialError::InvalidParameter(format!(
                "ROI name '{}' is defined more than once",
                roi.name
            )));
        }
    }
    Ok(())
}

/// Read ROI definitions from a JSON array.
pub fn load_rois<P: AsRef<Path>>(path: P) -> Result<Vec<Roi>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SpatialError::not_found(path));
    }
    let text = fs::read_to_string(path)?;
    let rois: Vec<Roi> = serde_json::from_str(&text).map_err(|e| {
        SpatialError::format(
            path.display().to_string(),
            format!("invalid ROI definitions: {}", e),
        )
    })?;
    validate_rois(&rois)?;
    debug!("Loaded {} ROI definitions from {}", rois.len(), path.display());
    Ok(rois)
}

/// How a segmentation decided each barcode's region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationMode {
    PreLabeled,
    Roi,
    Grid,
}

/// Barcode → region mapping, in table order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegionAssignment {
    entries: Vec<(String, String)>,
}

impl RegionAssignment {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn region_of(&self, barcode: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(b, _)| b == barcode)
            .map(|(_, region)| region.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(b, r)| (b.as_str(), r.as_str()))
    }
}

/// The barcodes of one region, as their own table.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionPartition {
    pub name: String,
    pub table: BarcodeTable,
}

/// Barcode counts across materialised regions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RegionCounts {
    pub mean: f64,
    pub min: usize,
    pub max: usize,
}

impl RegionCounts {
    fn from_sizes(sizes: &[usize]) -> Self {
        match (sizes.iter().min(), sizes.iter().max()) {
            (Some(&min), Some(&max)) => RegionCounts {
                mean: sizes.iter().sum::<usize>() as f64 / sizes.len() as f64,
                min,
                max,
            },
            _ => RegionCounts::default(),
        }
    }
}

/// Result of [`segment`].
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub mode: SegmentationMode,
    /// Input records with `region` stamped on, in the original order.
    pub table: BarcodeTable,
    pub assignment: RegionAssignment,
    /// Non-empty regions, in label order.
    pub partitions: Vec<RegionPartition>,
    pub counts: RegionCounts,
}

/// Partition `table` into regions.
///
/// `regions` names the regions to extract. In pre-labelled and ROI mode it
/// restricts which partitions are materialised; in grid mode it supplies the
/// bin labels, overriding `bins`.
pub fn segment(
    table: &BarcodeTable,
    regions: Option<&[String]>,
    rois: Option<&[Roi]>,
    bins: usize,
) -> Result<Segmentation> {
    let regions = regions.filter(|r| !r.is_empty());
    if let Some(requested) = regions {
        validate_region_names(requested)?;
    }
    let rois = rois.filter(|r| !r.is_empty());
    if let Some(rois) = rois {
        validate_rois(rois)?;
    }

    let (mode, labels, order) = if table.iter().any(|r| r.region.is_some()) {
        let labels: Vec<String> = table
            .iter()
            .map(|r| r.region.clone().unwrap_or_else(|| UNASSIGNED.to_string()))
            .collect();
        let order = first_seen(&labels);
        (SegmentationMode::PreLabeled, labels, order)
    } else if let Some(rois) = rois {
        let labels = assign_rois(table, rois)?;
        let mut order: Vec<String> = rois.iter().map(|r| r.name.clone()).collect();
        order.push(UNASSIGNED.to_string());
        (SegmentationMode::Roi, labels, order)
    } else {
        let names: Vec<String> = match regions {
            Some(requested) => requested.to_vec(),
            None => {
                if bins == 0 {
                    return Err(SpatialError::InvalidParameter(
                        "number of grid bins must be greater than 0".to_string(),
                    ));
                }
                (0..bins).map(|i| format!("region_{}", i)).collect()
            }
        };
        let labels = assign_grid(table, &names)?;
        (SegmentationMode::Grid, labels, names)
    };

    let extract: Option<FxHashSet<&str>> = match (mode, regions) {
        (SegmentationMode::Grid, _) | (_, None) => None,
        (_, Some(requested)) => {
            let available: FxHashSet<&str> = order.iter().map(String::as_str).collect();
            let unknown: Vec<&str> = requested
                .iter()
                .map(String::as_str)
                .filter(|name| !available.contains(name))
                .collect();
            if !unknown.is_empty() {
                return Err(SpatialError::InvalidParameter(format!(
                    "unknown region(s) {}; available regions: {}",
                    unknown.join(", "),
                    order.join(", ")
                )));
            }
            Some(requested.iter().map(String::as_str).collect())
        }
    };

    let stamped: Vec<BarcodeRecord> = table
        .iter()
        .zip(&labels)
        .map(|(record, label)| BarcodeRecord {
            region: Some(label.clone()),
            ..record.clone()
        })
        .collect();
    let stamped = table.with_column(REGION, stamped);

    let mut members: FxHashMap<&str, Vec<BarcodeRecord>> = FxHashMap::default();
    for (record, label) in stamped.iter().zip(&labels) {
        members
            .entry(label.as_str())
            .or_default()
            .push(record.clone());
    }

    let mut partitions = Vec::new();
    for name in &order {
        if let Some(wanted) = &extract {
            if !wanted.contains(name.as_str()) {
                continue;
            }
        }
        match members.remove(name.as_str()) {
            Some(records) => partitions.push(RegionPartition {
                name: name.clone(),
                table: stamped.derive(name.clone(), records),
            }),
            None if extract.is_some() => {
                warn!("Requested region '{}' contains no barcodes", name)
            }
            None => {}
        }
    }

    let sizes: Vec<usize> = partitions.iter().map(|p| p.table.size()).collect();
    let counts = RegionCounts::from_sizes(&sizes);
    info!(
        "Segmented {} barcodes from {} into {} regions ({:?} mode)",
        table.size(),
        table.name(),
        partitions.len(),
        mode
    );

    let assignment = RegionAssignment {
        entries: table
            .iter()
            .zip(labels)
            .map(|(record, label)| (record.barcode.clone(), label))
            .collect(),
    };

    Ok(Segmentation {
        mode,
        table: stamped,
        assignment,
        partitions,
        counts,
    })
}

/// Requested region names must be non-empty and unique.
pub fn validate_region_names(names: &[String]) -> Result<()> {
    let mut seen = FxHashSet::default();
    for name in names {
        if name.trim().is_empty() {
            return Err(SpatialError::InvalidParameter(
                "region names must not be empty".to_string(),
            ));
        }
        if !seen.insert(name.as_str()) {
            return Err(SpatialError::InvalidParameter(format!(
                "region '{}' is listed more than once",
                name
            )));
        }
    }
    Ok(())
}

fn first_seen(labels: &[String]) -> Vec<String> {
    let mut seen = FxHashSet::default();
    labels
        .iter()
        .filter(|label| seen.insert(label.as_str()))
        .cloned()
        .collect()
}

fn coordinate(table: &BarcodeTable, row: usize, column: &str, value: Option<f64>) -> Result<f64> {
    value.ok_or_else(|| {
        SpatialError::format_at(table.name(), row + 1, column, "coordinate is missing")
    })
}

fn assign_rois(table: &BarcodeTable, rois: &[Roi]) -> Result<Vec<String>> {
    table.require_columns(&[X_COORD, Y_COORD], "ROI segmentation")?;
    table
        .iter()
        .enumerate()
        .map(|(row, record)| {
            let x = coordinate(table, row, X_COORD, record.x)?;
            let y = coordinate(table, row, Y_COORD, record.y)?;
            Ok(rois
                .iter()
                .find(|roi| roi.contains(x, y))
                .map(|roi| roi.name.clone())
                .unwrap_or_else(|| UNASSIGNED.to_string()))
        })
        .collect()
}

fn assign_grid(table: &BarcodeTable, names: &[String]) -> Result<Vec<String>> {
    let keys: Vec<f64> = if table.has_column(X_COORD) {
        table
            .iter()
            .enumerate()
            .map(|(row, record)| coordinate(table, row, X_COORD, record.x))
            .collect::<Result<_>>()?
    } else {
        debug!(
            "{} has no {} column; binning by row position",
            table.name(),
            X_COORD
        );
        (0..table.size()).map(|i| i as f64).collect()
    };

    let min = keys.iter().copied().fold(f64::INFINITY, f64::min);
    let max = keys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let edges = right_edges(min, max, names.len());
    Ok(keys
        .iter()
        .map(|&key| names[grid_bin(key, &edges)].clone())
        .collect())
}

/// Right edges `min + i * width` of `bins` equal-width bins, the last pinned
/// to `max`. Empty when the range is degenerate.
fn right_edges(min: f64, max: f64, bins: usize) -> Vec<f64> {
    if bins <= 1 || max <= min {
        return Vec::new();
    }
    let width = (max - min) / bins as f64;
    let mut edges: Vec<f64> = (1..=bins).map(|i| min + i as f64 * width).collect();
    edges[bins - 1] = max;
    edges
}

/// Index of the right-closed bin holding `value`. The lowest edge is
/// inclusive, and with no edges everything lands in bin 0.
fn grid_bin(value: f64, edges: &[f64]) -> usize {
    match edges.split_last() {
        Some((_, inner)) => inner
            .iter()
            .position(|&edge| value <= edge)
            .unwrap_or(inner.len()),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    fn grid_table() -> BarcodeTable {
        BarcodeTable::from_records(
            "grid",
            (0..9)
                .map(|i| BarcodeRecord::new(format!("BC{}", i)).with_coords(i as f64 * 10.0, 0.0))
                .collect(),
        )
        .unwrap()
    }

    fn labels(seg: &Segmentation) -> Vec<String> {
        seg.table
            .iter()
            .map(|r| r.region.clone().unwrap_or_default())
            .collect()
    }

    fn grid_labels(xs: &[f64], bins: usize) -> Vec<String> {
        let table = BarcodeTable::from_records(
            "edges",
            xs.iter()
                .enumerate()
                .map(|(i, &x)| BarcodeRecord::new(format!("BC{}", i)).with_coords(x, 0.0))
                .collect(),
        )
        .unwrap();
        labels(&segment(&table, None, None, bins).unwrap())
    }

    #[test]
    fn values_on_fractional_edges_stay_in_the_lower_bin() {
        // Edges 0.1, 0.4, 0.7, 1.0: (0.4 - 0.1) / 0.3 rounds above 1.
        assert_eq!(
            grid_labels(&[0.1, 0.4, 0.7, 1.0], 3),
            vec!["region_0", "region_0", "region_1", "region_2"]
        );
        assert_eq!(
            grid_labels(&[0.1, 0.2, 0.3], 2),
            vec!["region_0", "region_0", "region_1"]
        );
    }

    #[test]
    fn edges_are_pinned_to_the_range() {
        assert_eq!(right_edges(0.0, 1.2, 4), vec![0.3, 0.6, 0.8999999999999999, 1.2]);
        assert!(right_edges(5.0, 5.0, 4).is_empty());
        assert_eq!(grid_bin(0.0, &right_edges(0.0, 1.2, 4)), 0);
        assert_eq!(grid_bin(1.2, &right_edges(0.0, 1.2, 4)), 3);
        assert_eq!(grid_bin(7.0, &[]), 0);
    }

    #[test]
    fn degenerate_polygons_contain_nothing() {
        assert!(!Roi::polygon("empty", Vec::new()).contains(0.0, 0.0));
        assert!(!Roi::polygon("segment", vec![[0.0, 0.0], [1.0, 1.0]]).contains(0.5, 0.5));
    }

    #[test]
    fn grid_bins_are_equal_width_and_right_closed() {
        let seg = segment(&grid_table(), None, None, 4).unwrap();
        assert_eq!(seg.mode, SegmentationMode::Grid);
        // x = 0..80 in steps of 10, bin width 20
        assert_eq!(
            labels(&seg),
            vec![
                "region_0", "region_0", "region_0", "region_1", "region_1", "region_2",
                "region_2", "region_3", "region_3"
            ]
        );
        let names: Vec<&str> = seg.partitions.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["region_0", "region_1", "region_2", "region_3"]);
        assert_eq!(seg.counts.min, 2);
        assert_eq!(seg.counts.max, 3);
        assert!((seg.counts.mean - 2.25).abs() < 1e-12);
    }

    #[test]
    fn grid_segmentation_is_deterministic() {
        let table = grid_table();
        let first = segment(&table, None, None, 3).unwrap();
        let second = segment(&table, None, None, 3).unwrap();
        assert_eq!(first.assignment, second.assignment);
        assert_eq!(first.table, second.table);
        let counts = |s: &Segmentation| -> Vec<usize> {
            s.partitions.iter().map(|p| p.table.size()).collect()
        };
        assert_eq!(counts(&first), counts(&second));
    }

    #[test]
    fn grid_without_coordinates_bins_by_row_position() {
        let table = BarcodeTable::from_records(
            "plain",
            (0..8).map(|i| BarcodeRecord::new(format!("BC{}", i)).with_reads(i)).collect(),
        )
        .unwrap();
        let seg = segment(&table, None, None, 2).unwrap();
        let sizes: Vec<usize> = seg.partitions.iter().map(|p| p.table.size()).collect();
        assert_eq!(sizes, vec![4, 4]);
        assert_eq!(seg.assignment.region_of("BC0"), Some("region_0"));
        assert_eq!(seg.assignment.region_of("BC7"), Some("region_1"));
    }

    #[test]
    fn requested_names_label_grid_bins() {
        let names = vec!["left".to_string(), "right".to_string()];
        let seg = segment(&grid_table(), Some(names.as_slice()), None, 4).unwrap();
        assert_eq!(seg.assignment.region_of("BC0"), Some("left"));
        assert_eq!(seg.assignment.region_of("BC8"), Some("right"));
        assert_eq!(seg.partitions.len(), 2);
    }

    #[test]
    fn identical_coordinates_share_the_first_bin() {
        let table = BarcodeTable::from_records(
            "flat",
            vec![
                BarcodeRecord::new("A").with_coords(5.0, 1.0),
                BarcodeRecord::new("B").with_coords(5.0, 2.0),
            ],
        )
        .unwrap();
        let seg = segment(&table, None, None, 4).unwrap();
        assert_eq!(seg.partitions.len(), 1);
        assert_eq!(seg.partitions[0].name, "region_0");
    }

    #[test]
    fn first_matching_roi_wins_and_misses_are_unassigned() {
        let rois = vec![
            Roi::bounding_box("tumor", 0.0, 25.0, -1.0, 1.0),
            Roi::bounding_box("stroma", 20.0, 50.0, -1.0, 1.0),
        ];
        let seg = segment(&grid_table(), None, Some(rois.as_slice()), 4).unwrap();
        assert_eq!(seg.mode, SegmentationMode::Roi);
        assert_eq!(seg.assignment.region_of("BC2"), Some("tumor"));
        assert_eq!(seg.assignment.region_of("BC3"), Some("stroma"));
        assert_eq!(seg.assignment.region_of("BC8"), Some(UNASSIGNED));
        assert_eq!(seg.table.size(), 9);
        let names: Vec<&str> = seg.partitions.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["tumor", "stroma", UNASSIGNED]);
    }

    #[test]
    fn polygon_containment_uses_even_odd_rule() {
        let triangle = Roi::polygon("tri", vec![[0.0, 0.0], [10.0, 0.0], [0.0, 10.0]]);
        assert!(triangle.contains(2.0, 2.0));
        assert!(!triangle.contains(8.0, 8.0));
        assert!(!triangle.contains(-1.0, 1.0));
    }

    #[test]
    fn pre_labelled_tables_are_left_untouched() {
        let seg = segment(&grid_table(), None, None, 4).unwrap();
        let everything = vec![Roi::bounding_box("all", -1e9, 1e9, -1e9, 1e9)];
        let again = segment(&seg.table, None, Some(everything.as_slice()), 2).unwrap();
        assert_eq!(again.mode, SegmentationMode::PreLabeled);
        assert_eq!(again.table, seg.table);
        assert_eq!(again.assignment, seg.assignment);
    }

    #[test]
    fn requested_regions_restrict_pre_labelled_partitions() {
        let table = BarcodeTable::from_records(
            "labelled",
            vec![
                BarcodeRecord::new("A").with_region("tumor"),
                BarcodeRecord::new("B").with_region("immune"),
                BarcodeRecord::new("C"),
            ],
        )
        .unwrap();
        let wanted = vec!["immune".to_string()];
        let seg = segment(&table, Some(wanted.as_slice()), None, 4).unwrap();
        assert_eq!(seg.partitions.len(), 1);
        assert_eq!(seg.partitions[0].table.size(), 1);
        assert_eq!(seg.assignment.region_of("C"), Some(UNASSIGNED));
        assert_eq!(seg.table.size(), 3);

        let unknown = vec!["necrosis".to_string()];
        let err = segment(&table, Some(unknown.as_slice()), None, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(err.to_string().contains("tumor, immune, unassigned"));
    }

    #[test]
    fn roi_mode_requires_coordinates() {
        let table =
            BarcodeTable::from_records("nocoords", vec![BarcodeRecord::new("A").with_reads(3)])
                .unwrap();
        let rois = vec![Roi::bounding_box("box", 0.0, 1.0, 0.0, 1.0)];
        let err = segment(&table, None, Some(rois.as_slice()), 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn invalid_rois_are_rejected() {
        let table = grid_table();
        let reserved = vec![Roi::bounding_box(UNASSIGNED, 0.0, 1.0, 0.0, 1.0)];
        assert!(segment(&table, None, Some(reserved.as_slice()), 4).is_err());
        let inverted = vec![Roi::bounding_box("box", 5.0, 1.0, 0.0, 1.0)];
        assert!(segment(&table, None, Some(inverted.as_slice()), 4).is_err());
        let line = vec![Roi::polygon("line", vec![[0.0, 0.0], [1.0, 1.0]])];
        assert!(segment(&table, None, Some(line.as_slice()), 4).is_err());
    }

    #[test]
    fn roi_definitions_load_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rois.json");
        fs::write(
            &path,
            r#"[
                {"name": "tumor", "type": "bounding_box", "x_min": 0, "x_max": 10, "y_min": 0, "y_max": 10},
                {"name": "edge", "type": "polygon", "vertices": [[0, 0], [5, 0], [0, 5]]}
            ]"#,
        )
        .unwrap();
        let rois = load_rois(&path).unwrap();
        assert_eq!(rois.len(), 2);
        assert_eq!(rois[0], Roi::bounding_box("tumor", 0.0, 10.0, 0.0, 10.0));
        assert!(matches!(rois[1].shape, RoiShape::Polygon { .. }));
    }

    #[test]
    fn empty_table_segments_to_no_regions() {
        let seg = segment(&grid_table().empty_like(), None, None, 4).unwrap();
        assert!(seg.partitions.is_empty());
        assert_eq!(seg.counts, RegionCounts::default());
    }
}
