//! Query construction, serialization and response decoding.
//!
//! A query moves through four states:
//!
//! ```text
//! Assembling ──build()──▶ Optimized ──serialize()──▶ Serialized ──parse_response()──▶ ResponseParsed
//! ```
//!
//! `QueryBuilder` is the Assembling state; `PreparedQuery` carries the
//! rest.

pub mod builder;
pub mod native;
pub mod response;

use std::fmt;

use thiserror::Error;

use crate::aggregation::CalendarError;
use crate::formula::FormulaError;

pub use builder::{PreparedQuery, QueryBuilder};
pub use native::{DataSource, Having, Query, QueryType, SubtotalConfig};
pub use response::{FieldValue, ResultRow};

/// Lifecycle state of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Assembling,
    Optimized,
    Serialized,
    ResponseParsed,
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryState::Assembling => "assembling",
            QueryState::Optimized => "optimized",
            QueryState::Serialized => "serialized",
            QueryState::ResponseParsed => "response-parsed",
        };
        f.write_str(s)
    }
}

/// Errors that abort building or decoding a query.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Incompatible query modifiers: {existing} cannot be combined with {incoming}")]
    IncompatibleModifier { existing: String, incoming: String },

    #[error("Conflicting definitions for output field `{0}`")]
    OuterAggregationConflict(String),

    #[error("Malformed result: {0}")]
    MalformedResult(String),

    #[error("Subtotal dimension `{0}` is not a grouping dimension")]
    UnknownSubtotalDimension(String),

    #[error("Invalid query state: expected {expected}, found {actual}")]
    InvalidState {
        expected: QueryState,
        actual: QueryState,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Calendar(#[from] CalendarError),

    #[error(transparent)]
    Formula(#[from] FormulaError),
}

pub type BuildResult<T> = Result<T, BuildError>;
