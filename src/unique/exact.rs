//! Exact distinct counts.
//!
//! `COUNT(DISTINCT d)` has no native aggregator, so the whole query is
//! rewritten: an inner groupBy groups additionally on `d` and emits 1 per
//! matching inner group, and the outer query sums those ones.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::aggregation::{Aggregation, QueryModifier};
use crate::model::{
    Aggregator, ArithmeticOp, Calculation, Dimension, Filter, Granularity, PostAggregator,
};
use crate::query::{BuildError, BuildResult, DataSource, Query, QueryType};

use super::UniqueCount;

/// Exact distinct count of one dimension, possibly under several output
/// names with their own row filters.
#[derive(Debug, Clone, PartialEq)]
pub struct ExactUniqueCount {
    pub dimension: String,
    /// Output name to row filter.
    pub outputs: BTreeMap<String, Filter>,
    /// Count the empty string as a value.
    pub include_empty: bool,
}

impl ExactUniqueCount {
    pub fn new(dimension: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            outputs: BTreeMap::new(),
            include_empty: false,
        }
    }

    pub fn including_empty(mut self, include: bool) -> Self {
        self.include_empty = include;
        self
    }

    /// Count under `name`, restricted to rows matching `filter`.
    pub fn output(mut self, name: impl Into<String>, filter: Filter) -> Self {
        self.outputs.insert(name.into(), filter);
        self
    }

    fn describe(&self) -> String {
        format!(
            "exact unique count of `{}` (include_empty={})",
            self.dimension, self.include_empty
        )
    }

    /// Fold `other` into `self`. Both must count the same dimension the
    /// same way, and shared output names must carry identical filters.
    pub fn merge(mut self, other: ExactUniqueCount) -> BuildResult<Self> {
        if self.dimension != other.dimension || self.include_empty != other.include_empty {
            return Err(BuildError::IncompatibleModifier {
                existing: self.describe(),
                incoming: other.describe(),
            });
        }
        for (name, filter) in other.outputs {
            match self.outputs.get(&name) {
                Some(existing) if *existing != filter => {
                    return Err(BuildError::OuterAggregationConflict(name));
                }
                Some(_) => {}
                None => {
                    self.outputs.insert(name, filter);
                }
            }
        }
        Ok(self)
    }

    /// Rename outputs with `suffix` and AND `filter` into each.
    pub fn with_suffix(&self, suffix: &str, filter: &Filter) -> Self {
        Self {
            dimension: self.dimension.clone(),
            outputs: self
                .outputs
                .iter()
                .map(|(name, f)| (format!("{}{}", name, suffix), f.clone() & filter.clone()))
                .collect(),
            include_empty: self.include_empty,
        }
    }

    /// Outputs grouped by identical row filter, in first-name order.
    /// Each group is computed once in the inner query.
    fn output_groups(&self) -> Vec<(Filter, Vec<String>)> {
        let mut groups: Vec<(Filter, Vec<String>)> = Vec::new();
        for (name, filter) in &self.outputs {
            match groups.iter_mut().find(|(f, _)| f == filter) {
                Some((_, names)) => names.push(name.clone()),
                None => groups.push((filter.clone(), vec![name.clone()])),
            }
        }
        groups
    }

    /// Filter of the inner indicator for one output group. The empty
    /// string is excluded here rather than on the inner scan.
    fn indicator_filter(&self, filter: Filter) -> Filter {
        if self.include_empty {
            filter
        } else {
            filter & !Filter::selector(&self.dimension, "")
        }
    }

    /// Rewrite `outer` into a query over a nested groupBy.
    pub fn modify(&self, mut outer: Query) -> Query {
        let mut inner = outer.clone();
        inner.query_type = QueryType::GroupBy;
        inner.modifier = None;
        inner.subtotals = None;
        inner.having = None;
        inner.post_aggregations.clear();
        if !inner
            .dimensions
            .iter()
            .any(|d| d.output_name() == self.dimension)
        {
            inner.dimensions.push(Dimension::plain(&self.dimension));
        }

        // Row filters live in the inner aggregators; only the caller's
        // dimension filter restricts the inner scan, so metrics sharing the
        // query still see rows where the counted dimension is empty.
        inner.filter = outer.dimension_filter.clone();
        inner.aggregation_filter = Filter::Empty;

        let mut outer_aggregations = BTreeMap::new();
        for (name, agg) in &outer.aggregations {
            let reaggregated = agg.reaggregate(name).unwrap_or_else(|| {
                warn!(field = %name, "aggregator cannot be re-aggregated over a nested query");
                agg.clone()
            });
            outer_aggregations.insert(name.clone(), reaggregated);
        }

        for (filter, names) in self.output_groups() {
            let field = names[0].clone();
            let filter = self.indicator_filter(filter);
            if filter.is_empty() {
                inner
                    .post_aggregations
                    .insert(field.clone(), PostAggregator::constant(1.0));
            } else {
                let counter = format!("{}__count", field);
                inner.aggregations.insert(
                    counter.clone(),
                    Aggregator::filtered(filter, Aggregator::count()),
                );
                // count / count is 1 for a matching group and 0 otherwise
                inner.post_aggregations.insert(
                    field.clone(),
                    PostAggregator::Arithmetic {
                        op: ArithmeticOp::Divide,
                        fields: vec![
                            PostAggregator::field_access(&counter),
                            PostAggregator::field_access(&counter),
                        ],
                    },
                );
            }
            for name in names {
                outer_aggregations.insert(name, Aggregator::long_sum(&field));
            }
        }

        debug!(
            dimension = %self.dimension,
            outputs = self.outputs.len(),
            "rewrote query into nested exact unique count"
        );

        // The inner query already applied any extraction; the outer query
        // reads the extracted columns by name.
        outer.dimensions = outer
            .dimensions
            .iter()
            .map(|d| Dimension::plain(d.output_name()))
            .collect();
        if let Granularity::Dimension(spec) = &outer.granularity {
            outer
                .dimensions
                .insert(0, Dimension::plain(spec.output_name.clone()));
            outer.granularity = Granularity::all();
        }
        outer.query_type = QueryType::GroupBy;
        outer.data_source = DataSource::Query(Box::new(inner));
        outer.aggregations = outer_aggregations;
        outer.filter = Filter::Empty;
        outer.dimension_filter = Filter::Empty;
        outer.aggregation_filter = Filter::Empty;
        outer.modifier = None;
        outer
    }
}

/// Strategy that counts the distinct values of a dimension exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct ExactCount {
    pub dimension: String,
    pub filter: Filter,
    pub include_empty: bool,
}

impl ExactCount {
    pub fn new(dimension: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            filter: Filter::Empty,
            include_empty: false,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn including_empty(mut self, include: bool) -> Self {
        self.include_empty = include;
        self
    }
}

impl UniqueCount for ExactCount {
    fn apply(&self, name: &str, calculation: &mut Calculation) {
        let modifier = ExactUniqueCount::new(&self.dimension)
            .including_empty(self.include_empty)
            .output(name, self.filter.clone());
        calculation.aggregations.insert(
            name.to_string(),
            Aggregation::QueryModifying(QueryModifier::ExactUniqueCount(modifier)),
        );
    }
}
