//! Concurrent, deadline-bounded tile loading.
//!
//! Each tile is read on its own thread and reported back over a channel tagged
//! with its submission index; the caller reassembles the tables in submission
//! order, so concurrency never changes which occurrence of a barcode comes
//! first. When the deadline passes or any tile fails, the loaders' token is
//! tripped so they stop at their next row check, and anything they still send
//! is discarded.

use crate::core::cancel::CancelToken;
use crate::core::error::{Result, SpatialError};
use crate::table::{read_table_with_cancel, BarcodeTable};
use crossbeam::channel::{bounded, RecvTimeoutError};
use log::debug;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// How often a waiting coordinator re-checks for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Cancels the loaders' token when the receiving side returns.
struct StopLoaders(CancelToken);

impl Drop for StopLoaders {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Load every path in `paths`, returning the tables in the same order.
///
/// Cancelling `cancel` stops the load; a timeout or failed tile stops the
/// remaining loaders without tripping `cancel` itself.
pub fn load_tiles(
    paths: &[PathBuf],
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<Vec<BarcodeTable>> {
    let started = Instant::now();
    let deadline = started + timeout;
    let expected = paths.len();
    let loaders = StopLoaders(cancel.child());

    // One slot per tile, so loaders never block on send even after the
    // receiver is gone.
    let (sender, receiver) = bounded::<(usize, Result<BarcodeTable>)>(expected.max(1));
    for (idx, path) in paths.iter().enumerate() {
        let tx = sender.clone();
        let path = path.clone();
        let cancel = loaders.0.clone();
        thread::Builder::new()
            .name(format!("tile-loader-{}", idx))
            .spawn(move || {
                let result = read_table_with_cancel(&path, &cancel);
                // A closed channel means the request was abandoned.
                tx.send((idx, result)).ok();
            })?;
    }
    drop(sender);

    let mut slots: Vec<Option<BarcodeTable>> = (0..expected).map(|_| None).collect();
    let mut received = 0;
    while received < expected {
        cancel.check("loading tiles")?;
        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out(expected, received, timeout));
        }
        match receiver.recv_timeout((deadline - now).min(POLL_INTERVAL)) {
            Ok((idx, Ok(table))) => {
                debug!(
                    "Loaded tile {} ({}) with {} barcodes after {:?}",
                    idx,
                    table.name(),
                    table.size(),
                    started.elapsed()
                );
                slots[idx] = Some(table);
                received += 1;
            }
            Ok((_, Err(err))) => return Err(err),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(SpatialError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!(
                        "tile loader exited without a result ({} of {} tiles loaded)",
                        received, expected
                    ),
                )))
            }
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

fn timed_out(expected: usize, received: usize, timeout: Duration) -> SpatialError {
    SpatialError::Timeout {
        operation: format!("loading tiles ({} of {} loaded)", received, expected),
        elapsed: timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use std::fs;

    fn write_tiles(dir: &std::path::Path, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("tile_{}.csv", i));
                let rows: String = (0..=i).map(|j| format!("T{}_{},{}\n", i, j, j)).collect();
                fs::write(&path, format!("barcode,n_reads\n{}", rows)).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn tables_come_back_in_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_tiles(dir.path(), 6);
        let tables = load_tiles(&paths, Duration::from_secs(30), &CancelToken::new()).unwrap();
        let sizes: Vec<usize> = tables.iter().map(BarcodeTable::size).collect();
        assert_eq!(sizes, vec![1, 2, 3, 4, 5, 6]);
        for (table, path) in tables.iter().zip(&paths) {
            assert_eq!(table.name(), path.display().to_string());
        }
    }

    #[test]
    fn any_failing_tile_fails_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = write_tiles(dir.path(), 2);
        paths.push(dir.path().join("missing.csv"));
        let err = load_tiles(&paths, Duration::from_secs(30), &CancelToken::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn zero_deadline_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_tiles(dir.path(), 2);
        let err = load_tiles(&paths, Duration::ZERO, &CancelToken::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn timeout_stops_loaders_but_not_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_tiles(dir.path(), 2);
        let token = CancelToken::new();
        let err = load_tiles(&paths, Duration::ZERO, &token).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!token.is_cancelled());
        let tables = load_tiles(&paths, Duration::from_secs(30), &token).unwrap();
        assert_eq!(tables.len(), 2);
    }

    #[test]
    fn loader_token_is_tripped_once_the_load_returns() {
        let token = CancelToken::new();
        let loaders = StopLoaders(token.child());
        let seen_by_loader = loaders.0.clone();
        assert!(!seen_by_loader.is_cancelled());
        drop(loaders);
        assert!(seen_by_loader.is_cancelled());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancelled_requests_load_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_tiles(dir.path(), 3);
        let token = CancelToken::new();
        token.cancel();
        let err = load_tiles(&paths, Duration::from_secs(30), &token).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
