//! One barcode observation and the column names it maps to.

use rustc_hash::FxHashMap;

pub const BARCODE: &str = "barcode";
pub const N_READS: &str = "n_reads";
pub const N_GENES: &str = "n_genes";
pub const MT_PERCENT: &str = "mt_percent";
pub const X_COORD: &str = "x_coord";
pub const Y_COORD: &str = "y_coord";
pub const REGION: &str = "region";

/// Columns with a dedicated field on [`BarcodeRecord`]; anything else is `extra`.
pub const KNOWN_COLUMNS: &[&str] = &[BARCODE, N_READS, N_GENES, MT_PERCENT, X_COORD, Y_COORD, REGION];

/// Columns every quality filter needs.
pub const QC_COLUMNS: &[&str] = &[N_READS, N_GENES, MT_PERCENT];

#[inline]
pub fn is_known_column(name: &str) -> bool {
    KNOWN_COLUMNS.contains(&name)
}

/// A single spot/cell observation within one tile.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BarcodeRecord {
    pub barcode: String,
    pub read_count: Option<u64>,
    pub gene_count: Option<u64>,
    /// Mitochondrial read percentage in `[0, 100]`.
    pub mt_percent: Option<f64>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    /// Set by segmentation, or carried over from a pre-labelled input.
    pub region: Option<String>,
    /// Additional numeric columns, keyed by header name.
    pub extra: FxHashMap<String, f64>,
}

impl BarcodeRecord {
    pub fn new(barcode: impl Into<String>) -> Self {
        BarcodeRecord {
            barcode: barcode.into(),
            ..Default::default()
        }
    }

    pub fn with_reads(mut self, reads: u64) -> Self {
        self.read_count = Some(reads);
        self
    }

    pub fn with_genes(mut self, genes: u64) -> Self {
        self.gene_count = Some(genes);
        self
    }

    pub fn with_mt_percent(mut self, mt_percent: f64) -> Self {
        self.mt_percent = Some(mt_percent);
        self
    }

    pub fn with_coords(mut self, x: f64, y: f64) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_extra(mut self, column: impl Into<String>, value: f64) -> Self {
        self.extra.insert(column.into(), value);
        self
    }

    /// Numeric value stored under `column`, if the column is numeric and set.
    pub fn numeric(&self, column: &str) -> Option<f64> {
        match column {
            N_READS => self.read_count.map(|v| v as f64),
            N_GENES => self.gene_count.map(|v| v as f64),
            MT_PERCENT => self.mt_percent,
            X_COORD => self.x,
            Y_COORD => self.y,
            BARCODE | REGION => None,
            other => self.extra.get(other).copied(),
        }
    }

    /// Text rendering of `column` for delimited output; missing values are empty.
    pub fn cell(&self, column: &str) -> String {
        match column {
            BARCODE => self.barcode.clone(),
            REGION => self.region.clone().unwrap_or_default(),
            N_READS => self.read_count.map(|v| v.to_string()).unwrap_or_default(),
            N_GENES => self.gene_count.map(|v| v.to_string()).unwrap_or_default(),
            other => self.numeric(other).map(|v| v.to_string()).unwrap_or_default(),
        }
    }

    /// Whether `column` holds a value on this record.
    pub fn has_value(&self, column: &str) -> bool {
        match column {
            BARCODE => true,
            REGION => self.region.is_some(),
            other => self.numeric(other).is_some(),
        }
    }
}
