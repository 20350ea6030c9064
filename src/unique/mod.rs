//! Unique-count strategies.
//!
//! Four interchangeable ways to count distinct values of a dimension:
//!
//! - [`SketchPassthrough`] - a column that already holds a sketch
//! - [`ExactCount`] - exact count via a nested-query rewrite
//! - [`ThetaSketchCount`] - approximate theta sketch per field
//! - [`TupleSketchCount`] - one tuple sketch with many filtered metrics

pub mod exact;
pub mod sketch;
pub mod tuple;

pub use exact::{ExactCount, ExactUniqueCount};
pub use sketch::{
    clamp_sketch_size, SketchPassthrough, ThetaSketchCount, DEFAULT_SKETCH_SIZE, MAX_SKETCH_SIZE,
    MIN_SKETCH_SIZE,
};
pub use tuple::{TupleSketchCount, COUNT_METRIC};

use crate::model::Calculation;

/// A way of counting distinct values, installed into a calculation under
/// a result name.
pub trait UniqueCount {
    fn apply(&self, name: &str, calculation: &mut Calculation);
}
