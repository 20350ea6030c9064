//! Semantics-preserving rewrites over a built query.
//!
//! - [`filter`] - boolean filter normalization
//! - [`sketch`] - sketch consolidation, sizing and row-leak repair

pub mod filter;
pub mod sketch;

pub use filter::{normalize, normalize_query, DEFAULT_DEPTH_LIMIT};
pub use sketch::{optimize as optimize_sketches, ROW_TRACER};
