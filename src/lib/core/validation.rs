//! Path and parameter validation applied before any table is opened.
//!
//! Every check here runs ahead of engine work so that a bad request fails
//! without reading inputs or writing outputs.

use crate::core::error::{Result, SpatialError};
use crate::core::fs::table_extension;
use std::fs;
use std::path::{Component, Path, PathBuf};

pub use crate::core::concurrency::determine_allowed_cpus as validate_thread_count;

/// Constraints applied by [`validate_file_path`].
#[derive(Debug, Clone, Default)]
pub struct PathRules<'a> {
    /// Fail with `NotFound` when the path does not exist.
    pub must_exist: bool,
    /// Lowercase extensions (without dot) accepted after stripping `.gz`.
    pub allowed_extensions: Option<&'a [&'a str]>,
    /// Largest accepted file size in bytes.
    pub max_size_bytes: Option<u64>,
}

/// Reject any path that walks up through a `..` component.
pub fn reject_traversal(path: &Path) -> Result<()> {
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(SpatialError::InvalidParameter(format!(
            "path traversal detected in '{}'; paths containing '..' are not allowed",
            path.display()
        )));
    }
    Ok(())
}

/// Validate a file path against `rules`, returning it unchanged on success.
pub fn validate_file_path(path: &Path, rules: &PathRules) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(SpatialError::InvalidParameter("empty path".to_string()));
    }
    reject_traversal(path)?;

    if let Some(allowed) = rules.allowed_extensions {
        let ext = table_extension(path).unwrap_or_default();
        if !allowed.iter().any(|candidate| candidate.eq_ignore_ascii_case(&ext)) {
            return Err(SpatialError::InvalidParameter(format!(
                "invalid file extension '{}' for '{}'; allowed extensions: {}",
                ext,
                path.display(),
                allowed.join(", ")
            )));
        }
    }

    if rules.must_exist && !path.exists() {
        return Err(SpatialError::not_found(path));
    }

    if let Some(max_size) = rules.max_size_bytes {
        if let Ok(meta) = fs::metadata(path) {
            if meta.len() > max_size {
                return Err(SpatialError::InvalidParameter(format!(
                    "file '{}' is {} bytes, exceeding the maximum of {} bytes",
                    path.display(),
                    meta.len(),
                    max_size
                )));
            }
        }
    }

    Ok(path.to_path_buf())
}

/// Check that a directory path is well formed; it is created later on demand.
pub fn validate_output_dir(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(SpatialError::InvalidParameter(
            "empty output directory".to_string(),
        ));
    }
    reject_traversal(path)?;
    if path.is_file() {
        return Err(SpatialError::InvalidParameter(format!(
            "output directory '{}' is an existing file",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

/// Turn an arbitrary region label into a safe file name component.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        trimmed => trimmed.to_string(),
    }
}
