use crate::core::error::{Result, SpatialError};
use log::{debug, warn};
use once_cell::sync::OnceCell;
use rayon::ThreadPoolBuilder;

/// Upper bound accepted for any worker count, matching the aligner's limit.
pub const MAX_THREADS: usize = 64;

static GLOBAL_RAYON_THREADS: OnceCell<usize> = OnceCell::new();

/// Validate and normalize a requested CPU count.
pub fn determine_allowed_cpus(desired: usize) -> Result<usize> {
    if desired == 0 {
        Err(SpatialError::InvalidParameter(
            "thread count must be at least 1, got 0".to_string(),
        ))
    } else if desired > MAX_THREADS {
        Err(SpatialError::InvalidParameter(format!(
            "thread count {} exceeds maximum of {}",
            desired, MAX_THREADS
        )))
    } else {
        if desired > num_cpus::get() {
            warn!(
                "Specified {} threads but only {} CPUs are available",
                desired,
                num_cpus::get()
            );
        }
        Ok(desired)
    }
}

/// Configure the global Rayon thread pool exactly once, returning the active
/// worker count. Later calls reuse the first configured pool.
pub fn configure_global_thread_pool(threads: usize) -> Result<usize> {
    let requested = determine_allowed_cpus(threads)?;

    if let Some(active) = GLOBAL_RAYON_THREADS.get() {
        if *active != requested {
            warn!(
                "Rayon global thread pool already initialised with {} threads; ignoring request for {}",
                active, requested
            );
        }
        return Ok(*active);
    }

    match ThreadPoolBuilder::new().num_threads(requested).build_global() {
        Ok(_) => {
            GLOBAL_RAYON_THREADS.set(requested).ok();
            Ok(requested)
        }
        Err(err) => {
            // Someone else built the global pool first.
            debug!("Global Rayon thread pool initialisation skipped: {}", err);
            let fallback = rayon::current_num_threads();
            if fallback != requested {
                warn!(
                    "Using existing Rayon pool with {} threads instead of requested {}",
                    fallback, requested
                );
            }
            GLOBAL_RAYON_THREADS.set(fallback).ok();
            Ok(fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_and_oversized_thread_counts() {
        assert!(determine_allowed_cpus(0).is_err());
        assert!(determine_allowed_cpus(65).is_err());
        assert_eq!(determine_allowed_cpus(1).unwrap(), 1);
        assert_eq!(determine_allowed_cpus(64).unwrap(), 64);
    }

    #[test]
    fn repeated_configuration_returns_the_active_size() {
        let first = configure_global_thread_pool(2).unwrap();
        let second = configure_global_thread_pool(3).unwrap();
        assert_eq!(first, second);
    }
}
