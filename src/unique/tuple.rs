//! Tuple-sketch unique counts.
//!
//! A single sketch over one dimension carries any number of metric
//! columns, each guarded by its own filter. Estimates are taken over the
//! sketch entries that satisfy a boolean expression over metric values,
//! where `$<index>` names the metric at that index.

use crate::aggregation::Aggregation;
use crate::model::{Aggregator, Calculation, Filter, MetricFilter, PostAggregator};

use super::sketch::clamp_sketch_size;
use super::UniqueCount;

/// Metric column that contributes 1 per matching row.
pub const COUNT_METRIC: &str = "count";

#[derive(Debug, Clone, PartialEq)]
pub struct TupleSketchCount {
    pub dimension: String,
    pub nominal_entries: Option<u32>,
    pub metrics: Vec<MetricFilter>,
    sketch_name: String,
}

impl TupleSketchCount {
    /// Sketch over `dimension`, stored under the aggregator `sketch_name`.
    pub fn new(sketch_name: impl Into<String>, dimension: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            nominal_entries: None,
            metrics: Vec::new(),
            sketch_name: sketch_name.into(),
        }
    }

    pub fn with_nominal_entries(mut self, entries: u64) -> Self {
        self.nominal_entries = clamp_sketch_size(Some(entries));
        self
    }

    pub fn sketch_name(&self) -> &str {
        &self.sketch_name
    }

    /// Add a metric column and return its index.
    pub fn add_metric(&mut self, column: impl Into<String>, filter: Filter) -> usize {
        self.metrics.push(MetricFilter::new(column, filter));
        self.metrics.len() - 1
    }

    /// Add a count metric that is 1 for every row.
    pub fn add_count_metric(&mut self) -> usize {
        self.add_metric(COUNT_METRIC, Filter::Empty)
    }

    /// Reference to the metric at `index` inside an estimate expression.
    pub fn metric_ref(index: usize) -> String {
        format!("${}", index)
    }

    /// Estimate of the entries satisfying `expression`, e.g. `"$0 > 0 && $1 > 0"`.
    pub fn estimate(&self, expression: impl Into<String>) -> PostAggregator {
        PostAggregator::tuple_estimate(PostAggregator::tuple_filter_expr(
            PostAggregator::field_access(&self.sketch_name),
            expression,
            self.nominal_entries,
        ))
    }

    /// Register an estimate post-aggregation under `name`.
    pub fn add_estimate_post_aggregation(
        &self,
        calculation: &mut Calculation,
        name: impl Into<String>,
        expression: impl Into<String>,
    ) -> PostAggregator {
        let estimate = self.estimate(expression);
        calculation
            .post_aggregations
            .insert(name.into(), estimate.clone());
        estimate
    }

    pub fn aggregator(&self) -> Aggregator {
        Aggregator::TupleSketch {
            field_name: self.dimension.clone(),
            nominal_entries: self.nominal_entries,
            metric_filters: self.metrics.clone(),
        }
    }
}

impl UniqueCount for TupleSketchCount {
    fn apply(&self, _name: &str, calculation: &mut Calculation) {
        calculation.aggregations.insert(
            self.sketch_name.clone(),
            Aggregation::Native(self.aggregator()),
        );
    }
}
