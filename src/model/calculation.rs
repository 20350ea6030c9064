//! Calculations: named aggregations and the formulas derived from them.

use std::collections::{BTreeMap, BTreeSet};

use crate::aggregation::Aggregation;
use crate::formula::{self, FormulaResult};
use crate::query::{BuildError, BuildResult};
use crate::unique::UniqueCount;

use super::{Aggregator, Filter, PostAggregator};

/// One requested computation. Consumed by the query builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calculation {
    pub aggregations: BTreeMap<String, Aggregation>,
    pub post_aggregations: BTreeMap<String, PostAggregator>,
    /// Fields whose zero result means "no rows" and decodes to null.
    pub strict_null_fields: BTreeSet<String>,
}

impl Calculation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_aggregator(self, name: impl Into<String>, aggregator: Aggregator) -> Self {
        self.with_aggregation(name, Aggregation::Native(aggregator))
    }

    pub fn with_aggregation(mut self, name: impl Into<String>, aggregation: Aggregation) -> Self {
        self.aggregations.insert(name.into(), aggregation);
        self
    }

    pub fn with_post_aggregator(mut self, name: impl Into<String>, post: PostAggregator) -> Self {
        self.post_aggregations.insert(name.into(), post);
        self
    }

    /// Compile `formula` into a post-aggregator named `name`.
    pub fn with_formula(self, name: impl Into<String>, formula: &str) -> FormulaResult<Self> {
        let post = formula::compile(formula)?;
        Ok(self.with_post_aggregator(name, post))
    }

    pub fn with_unique_count(mut self, name: &str, strategy: &dyn UniqueCount) -> Self {
        strategy.apply(name, &mut self);
        self
    }

    pub fn strict_null(mut self, name: impl Into<String>) -> Self {
        self.strict_null_fields.insert(name.into());
        self
    }

    /// Every result name defined here.
    pub fn field_names(&self) -> BTreeSet<String> {
        self.aggregations
            .keys()
            .chain(self.post_aggregations.keys())
            .cloned()
            .collect()
    }

    /// OR of the aggregations' own filters: the rows any of them can read.
    ///
    /// `Empty` when some aggregation is unfiltered, since then every row
    /// may contribute. Query-modifying aggregations select their rows in a
    /// nested query and are left out.
    pub fn aggregation_filter(&self) -> Filter {
        let mut filters = Vec::new();
        for aggregation in self.aggregations.values() {
            if aggregation.is_query_modifying() {
                continue;
            }
            let filter = aggregation.filter();
            if filter.is_empty() {
                return Filter::Empty;
            }
            filters.push(filter);
        }
        Filter::any(filters)
    }

    /// Copy with every name suffixed and `filter` ANDed into every
    /// aggregation, so several copies can share one query.
    pub fn with_suffix(&self, suffix: &str, filter: &Filter) -> Self {
        let local = self.field_names();
        let rename = |name: &str| {
            if local.contains(name) {
                format!("{}{}", name, suffix)
            } else {
                name.to_string()
            }
        };

        Self {
            aggregations: self
                .aggregations
                .iter()
                .map(|(name, agg)| (rename(name), agg.with_suffix(suffix, filter)))
                .collect(),
            post_aggregations: self
                .post_aggregations
                .iter()
                .map(|(name, post)| (rename(name), post.rename_fields(&rename)))
                .collect(),
            strict_null_fields: self
                .strict_null_fields
                .iter()
                .map(|name| rename(name))
                .collect(),
        }
    }

    /// Combine two calculations. A name defined by both must have the same
    /// definition in each.
    pub fn merge(mut self, other: Calculation) -> BuildResult<Self> {
        for (name, aggregation) in other.aggregations {
            match self.aggregations.get(&name) {
                Some(existing) if *existing != aggregation => {
                    return Err(BuildError::OuterAggregationConflict(name));
                }
                Some(_) => {}
                None => {
                    self.aggregations.insert(name, aggregation);
                }
            }
        }
        for (name, post) in other.post_aggregations {
            match self.post_aggregations.get(&name) {
                Some(existing) if *existing != post => {
                    return Err(BuildError::OuterAggregationConflict(name));
                }
                Some(_) => {}
                None => {
                    self.post_aggregations.insert(name, post);
                }
            }
        }
        self.strict_null_fields.extend(other.strict_null_fields);
        Ok(self)
    }
}
