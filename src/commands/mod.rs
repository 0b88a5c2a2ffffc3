pub mod align;
pub mod common;
pub mod describe;
pub mod filter;
pub mod merge;
pub mod segment;

pub use align::{run_align, AlignArgs};
pub use describe::{run_describe, DescribeArgs};
pub use filter::{run_filter, FilterArgs};
pub use merge::{run_merge, MergeArgs};
pub use segment::{run_segment, SegmentArgs};
