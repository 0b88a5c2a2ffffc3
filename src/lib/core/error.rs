//! Error types for the spatialtools library

use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpatialError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Threshold validation error: {field} must be between {min} and {max}, got {value}")]
    ThresholdValidation {
        field: String,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("Format error in {source_name}{}: {message}", location(.row, .column))]
    Format {
        source_name: String,
        row: Option<usize>,
        column: Option<String>,
        message: String,
    },

    #[error("Duplicate barcode '{barcode}' in {source_name} (rows {first_row} and {second_row})")]
    DuplicateBarcode {
        source_name: String,
        barcode: String,
        first_row: usize,
        second_row: usize,
    },

    #[error("Timed out after {:.1}s while {operation}", .elapsed.as_secs_f64())]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    #[error("External process `{program}` failed ({status}): {stderr}")]
    ExternalProcess {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SpatialError>;

/// Coarse classification of a [`SpatialError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidParameter,
    Format,
    Timeout,
    ExternalProcess,
    Cancelled,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidParameter => "invalid_parameter",
            ErrorKind::Format => "format",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ExternalProcess => "external_process",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
        };
        write!(f, "{}", name)
    }
}

impl SpatialError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SpatialError::NotFound(_) => ErrorKind::NotFound,
            SpatialError::InvalidParameter(_) | SpatialError::ThresholdValidation { .. } => {
                ErrorKind::InvalidParameter
            }
            SpatialError::Format { .. }
            | SpatialError::DuplicateBarcode { .. }
            | SpatialError::Csv(_)
            | SpatialError::Json(_) => ErrorKind::Format,
            SpatialError::Timeout { .. } => ErrorKind::Timeout,
            SpatialError::ExternalProcess { .. } => ErrorKind::ExternalProcess,
            SpatialError::Cancelled(_) => ErrorKind::Cancelled,
            SpatialError::Io(err) if err.kind() == std::io::ErrorKind::NotFound => {
                ErrorKind::NotFound
            }
            SpatialError::Io(_) => ErrorKind::Io,
        }
    }

    /// Shorthand for a schema-level format error without row context.
    pub fn format(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        SpatialError::Format {
            source_name: source_name.into(),
            row: None,
            column: None,
            message: message.into(),
        }
    }

    /// Format error pinned to a 1-based data row and a column.
    pub fn format_at(
        source_name: impl Into<String>,
        row: usize,
        column: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        SpatialError::Format {
            source_name: source_name.into(),
            row: Some(row),
            column: Some(column.into()),
            message: message.into(),
        }
    }

    pub fn not_found(path: &Path) -> Self {
        SpatialError::NotFound(path.display().to_string())
    }
}

fn location(row: &Option<usize>, column: &Option<String>) -> String {
    match (row, column) {
        (Some(row), Some(column)) => format!(" (row {}, column '{}')", row, column),
        (Some(row), None) => format!(" (row {})", row),
        (None, Some(column)) => format!(" (column '{}')", column),
        (None, None) => String::new(),
    }
}
