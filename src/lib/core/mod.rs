pub mod cancel;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod errors;
pub mod fs;
pub mod io;
pub mod validation;

pub mod prelude {
    pub use super::cancel::CancelToken;
    pub use super::concurrency::{configure_global_thread_pool, determine_allowed_cpus};
    pub use super::config::SpatialConfig;
    pub use super::error::{ErrorKind, Result, SpatialError};
    pub use super::errors::is_broken_pipe;
    pub use super::fs::{is_gzipped, make_parent_dirs};
    pub use super::io::{get_reader, stdout_writer};
}
