use crate::core::error::SpatialError;
use anyhow::Error;
use std::io;

/// Returns `true` if the error chain bottoms out in a broken pipe, either as a
/// bare [`io::Error`], inside a JSON serializer error, or wrapped inside
/// [`SpatialError::Io`].
#[inline]
pub fn is_broken_pipe(err: &Error) -> bool {
    let root = err.root_cause();
    if let Some(io_err) = root.downcast_ref::<io::Error>() {
        return io_err.kind() == io::ErrorKind::BrokenPipe;
    }
    if let Some(json_err) = root.downcast_ref::<serde_json::Error>() {
        return json_err.io_error_kind() == Some(io::ErrorKind::BrokenPipe);
    }
    matches!(
        root.downcast_ref::<SpatialError>(),
        Some(SpatialError::Io(io_err)) if io_err.kind() == io::ErrorKind::BrokenPipe
    )
}
