//! Value types of the calculation model.
//!
//! Everything here is an immutable value: rewrites build new values
//! instead of mutating shared ones, so clones never alias.

pub mod aggregator;
pub mod calculation;
pub mod dimension;
pub mod filter;
pub mod granularity;
pub mod hash;
pub mod post_aggregator;

pub use aggregator::{Aggregator, MetricFilter};
pub use calculation::Calculation;
pub use dimension::{Dimension, DimensionSpec, TimeFormat};
pub use filter::{Filter, FilterKind, TIME_DIMENSION};
pub use granularity::{Granularity, GranularityUnit};
pub use post_aggregator::{ArithmeticOp, PostAggregator, SetOp};
