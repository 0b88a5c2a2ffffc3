use crate::core::error::{Result, SpatialError};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

/// Extensions recognised for barcode tables, without the optional `.gz` suffix.
pub const TABLE_EXTENSIONS: &[&str] = &["csv", "tsv", "txt"];

/// Create parent directories for a path when missing.
pub fn make_parent_dirs<P: AsRef<Path>>(path: P) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Detect whether a path uses a gzip-compatible extension.
pub fn is_gzipped<P: AsRef<Path>>(path: P) -> bool {
    matches!(
        path.as_ref().extension().unwrap_or_else(|| OsStr::new("")),
        ext if ext == "gz" || ext == "gzip" || ext == "bgzf"
    )
}

/// The table extension of a path (`csv`, `tsv`, `txt`), looking through a
/// trailing compression suffix. Returned lowercase.
pub fn table_extension<P: AsRef<Path>>(path: P) -> Option<String> {
    let path = path.as_ref();
    let inner = if is_gzipped(path) {
        Path::new(path.file_stem()?)
    } else {
        path
    };
    inner
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Field delimiter for a table path: comma for `.csv`, tab otherwise.
pub fn delimiter_for<P: AsRef<Path>>(path: P) -> u8 {
    match table_extension(path).as_deref() {
        Some("csv") => b',',
        _ => b'\t',
    }
}

/// File stem with both the table and compression extensions removed.
pub fn table_stem<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SpatialError::InvalidParameter(format!("'{}' has no file name", path.display())))?;
    let mut stem = name;
    if is_gzipped(path) {
        stem = stem.rsplit_once('.').map(|(head, _)| head).unwrap_or(stem);
    }
    if table_extension(path).is_some() {
        stem = stem.rsplit_once('.').map(|(head, _)| head).unwrap_or(stem);
    }
    Ok(stem.to_string())
}

/// Suffix (`.csv`, `.tsv.gz`, ...) to give derived outputs so they keep the
/// format of their input.
pub fn table_suffix<P: AsRef<Path>>(path: P) -> String {
    let ext = table_extension(&path).unwrap_or_else(|| "tsv".to_string());
    if is_gzipped(&path) {
        format!(".{}.gz", ext)
    } else {
        format!(".{}", ext)
    }
}

/// Join `dir` with `name` + `suffix`.
pub fn derived_path(dir: &Path, name: &str, suffix: &str) -> PathBuf {
    dir.join(format!("{}{}", name, suffix))
}
