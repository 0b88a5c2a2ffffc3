//! Cooperative cancellation for in-flight requests.

use crate::core::error::{Result, SpatialError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable flag shared between the caller and the workers of one request.
///
/// Workers poll [`CancelToken::check`] at their suspension points (between
/// rows while reading, between tiles while merging). Once cancelled a token
/// stays cancelled. A token made with [`CancelToken::child`] also reports
/// cancellation of its parent, but cancelling it leaves the parent untouched.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is cancelled when either it or `self` is cancelled.
    pub fn child(&self) -> Self {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
            || self.parent.as_ref().map_or(false, |parent| parent.is_cancelled())
    }

    /// Fail with [`SpatialError::Cancelled`] if the token has been tripped.
    #[inline]
    pub fn check(&self, during: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(SpatialError::Cancelled(during.to_string()))
        } else {
            Ok(())
        }
    }
}
