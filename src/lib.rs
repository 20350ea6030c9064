//! # Strata
//!
//! An analytical query compiler and optimizer for Druid.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Calculations                          │
//! │  (aggregators, formulas, unique counts, stock measures)  │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [QueryBuilder]
//! ┌─────────────────────────────────────────────────────────┐
//! │        Query (resolved aggregations, subtotals,          │
//! │        strict-null trackers, combination filters)        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [optimizer]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Filter normalization + sketch consolidation/sizing     │
//! │   + query modifiers (exact unique counts)                │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [serialize]
//! ┌─────────────────────────────────────────────────────────┐
//! │                  Native query JSON                       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [parse_response]
//! ┌─────────────────────────────────────────────────────────┐
//! │                    ResultRows                            │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod aggregation;
pub mod compile;
pub mod config;
pub mod formula;
pub mod model;
pub mod optimizer;
pub mod query;
pub mod unique;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::aggregation::{Aggregation, Calendar, GregorianCalendar, StockAggregation};
    pub use crate::compile::{compile_request, CompileError, QueryRequest};
    pub use crate::config::Settings;
    pub use crate::model::{
        Aggregator, Calculation, Dimension, Filter, Granularity, GranularityUnit, PostAggregator,
    };
    pub use crate::query::{
        BuildError, FieldValue, Having, PreparedQuery, QueryBuilder, QueryState, ResultRow,
    };
    pub use crate::unique::{ExactCount, ThetaSketchCount, TupleSketchCount, UniqueCount};
}

pub use compile::{compile_request, CompileError, CompileResult};
pub use query::{PreparedQuery, QueryBuilder};
