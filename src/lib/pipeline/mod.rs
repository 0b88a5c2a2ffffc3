//! Request handling on top of the engines.
//!
//! - [`coordinator`]: validation, loading, engine sequencing and persistence
//! - [`tiles`]: concurrent, deadline-bounded tile loading
//! - [`aligner`]: the external short-read aligner collaborator
//! - [`response`]: request shapes and serializable responses

pub mod aligner;
pub mod coordinator;
pub mod response;
pub mod tiles;

pub use aligner::{AlignRequest, Aligner, AlignmentOutput, AlignmentStats, StarAligner};
pub use coordinator::PipelineCoordinator;
pub use response::{
    AlignResponse, FilterRequest, FilterResponse, MergeQc, MergeRequest, MergeResponse, QcStage,
    RegionFile, SegmentRequest, SegmentResponse,
};
pub use tiles::load_tiles;
