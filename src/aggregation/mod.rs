//! Query-time aggregation protocol.
//!
//! An entry of a calculation is one of three kinds:
//!
//! - [`Aggregation::Native`] - a plain aggregator, used as is
//! - [`Aggregation::QueryDependent`] - resolved into an aggregator once the
//!   query's granularity, intervals and dimensions are known
//! - [`Aggregation::QueryModifying`] - rewrites the whole query after the
//!   rest of the build has finished

pub mod calendar;
pub mod stock;

pub use calendar::{normalize_intervals, Calendar, CalendarError, GregorianCalendar};
pub use stock::StockAggregation;

use crate::model::{Aggregator, Dimension, Filter, Granularity};
use crate::query::{BuildResult, Query};
use crate::unique::ExactUniqueCount;

/// Query shape handed to query-dependent aggregations.
#[derive(Debug, Clone, Copy)]
pub struct QueryContext<'a> {
    pub granularity: &'a Granularity,
    pub intervals: &'a [String],
    pub dimensions: &'a [Dimension],
}

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Native(Aggregator),
    QueryDependent(QueryDependent),
    QueryModifying(QueryModifier),
}

impl Aggregation {
    /// Row filter of the aggregation. Query modifiers report `Empty`: their
    /// rows are selected in a nested query.
    pub fn filter(&self) -> Filter {
        match self {
            Aggregation::Native(agg) => agg.filter(),
            Aggregation::QueryDependent(dep) => dep.filter(),
            Aggregation::QueryModifying(_) => Filter::Empty,
        }
    }

    /// Same aggregation with `filter` ANDed in. Modifier outputs are also
    /// renamed with `suffix`; the other kinds are renamed by their key.
    pub fn with_suffix(&self, suffix: &str, filter: &Filter) -> Self {
        match self {
            Aggregation::Native(agg) => Aggregation::Native(agg.with_filter(filter)),
            Aggregation::QueryDependent(dep) => {
                Aggregation::QueryDependent(dep.with_filter(filter))
            }
            Aggregation::QueryModifying(modifier) => {
                Aggregation::QueryModifying(modifier.with_suffix(suffix, filter))
            }
        }
    }

    pub fn is_query_modifying(&self) -> bool {
        matches!(self, Aggregation::QueryModifying(_))
    }
}

impl From<Aggregator> for Aggregation {
    fn from(agg: Aggregator) -> Self {
        Aggregation::Native(agg)
    }
}

/// Aggregations that depend on the query they end up in.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryDependent {
    Stock(StockAggregation),
}

impl QueryDependent {
    pub fn resolve(
        &self,
        ctx: &QueryContext<'_>,
        calendar: &dyn Calendar,
    ) -> BuildResult<Aggregator> {
        match self {
            QueryDependent::Stock(stock) => Ok(stock.resolve(ctx, calendar)?),
        }
    }

    pub fn filter(&self) -> Filter {
        match self {
            QueryDependent::Stock(stock) => stock.filter(),
        }
    }

    pub fn with_filter(&self, filter: &Filter) -> Self {
        match self {
            QueryDependent::Stock(stock) => QueryDependent::Stock(stock.with_filter(filter)),
        }
    }
}

/// Whole-query rewrites. At most one survives per query: further ones are
/// merged into it or rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryModifier {
    ExactUniqueCount(ExactUniqueCount),
}

impl QueryModifier {
    pub fn merge(self, other: QueryModifier) -> BuildResult<Self> {
        match (self, other) {
            (QueryModifier::ExactUniqueCount(a), QueryModifier::ExactUniqueCount(b)) => {
                Ok(QueryModifier::ExactUniqueCount(a.merge(b)?))
            }
        }
    }

    pub fn modify(&self, query: Query) -> Query {
        match self {
            QueryModifier::ExactUniqueCount(count) => count.modify(query),
        }
    }

    pub fn with_suffix(&self, suffix: &str, filter: &Filter) -> Self {
        match self {
            QueryModifier::ExactUniqueCount(count) => {
                QueryModifier::ExactUniqueCount(count.with_suffix(suffix, filter))
            }
        }
    }

    /// Row filter of one output, if the modifier produces it.
    pub fn output_filter(&self, name: &str) -> Option<Filter> {
        match self {
            QueryModifier::ExactUniqueCount(count) => count.outputs.get(name).cloned(),
        }
    }

    /// Result fields the modifier produces.
    pub fn output_names(&self) -> Vec<String> {
        match self {
            QueryModifier::ExactUniqueCount(count) => count.outputs.keys().cloned().collect(),
        }
    }
}
