//! Aggregators: the per-row reductions a query computes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::filter::Filter;
use super::hash::compute_hash;

/// One guarded metric column of a tuple sketch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricFilter {
    /// Column summed into the metric; `"count"` contributes 1 per row.
    pub metric_column: String,
    /// Rows contributing to the metric. `Empty` means every row.
    #[serde(default)]
    pub filter: Filter,
}

impl MetricFilter {
    pub fn new(metric_column: impl Into<String>, filter: Filter) -> Self {
        Self {
            metric_column: metric_column.into(),
            filter,
        }
    }
}

/// An aggregator. Its result-field name is the key it is stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Aggregator {
    Count,

    #[serde(rename_all = "camelCase")]
    LongSum { field_name: String },

    #[serde(rename_all = "camelCase")]
    DoubleSum { field_name: String },

    #[serde(rename_all = "camelCase")]
    HyperUnique { field_name: String },

    #[serde(rename_all = "camelCase")]
    ThetaSketch {
        field_name: String,
        size: Option<u32>,
        #[serde(default)]
        is_input_theta_sketch: bool,
    },

    #[serde(rename = "tupleSketch", rename_all = "camelCase")]
    TupleSketch {
        field_name: String,
        nominal_entries: Option<u32>,
        metric_filters: Vec<MetricFilter>,
    },

    Filtered {
        filter: Filter,
        aggregator: Box<Aggregator>,
    },

    /// Passed through to the wire untouched (minus the name).
    Opaque { raw: Value },
}

impl Aggregator {
    pub fn count() -> Self {
        Aggregator::Count
    }

    pub fn long_sum(field: impl Into<String>) -> Self {
        Aggregator::LongSum {
            field_name: field.into(),
        }
    }

    pub fn double_sum(field: impl Into<String>) -> Self {
        Aggregator::DoubleSum {
            field_name: field.into(),
        }
    }

    pub fn hyper_unique(field: impl Into<String>) -> Self {
        Aggregator::HyperUnique {
            field_name: field.into(),
        }
    }

    pub fn theta_sketch(field: impl Into<String>, size: Option<u32>) -> Self {
        Aggregator::ThetaSketch {
            field_name: field.into(),
            size,
            is_input_theta_sketch: false,
        }
    }

    /// Wrap in a filter. An empty filter leaves the aggregator unchanged and
    /// an already-filtered aggregator has the filters ANDed.
    pub fn filtered(filter: Filter, aggregator: Aggregator) -> Self {
        if filter.is_empty() {
            return aggregator;
        }
        match aggregator {
            Aggregator::Filtered {
                filter: inner_filter,
                aggregator,
            } => Aggregator::Filtered {
                filter: inner_filter & filter,
                aggregator,
            },
            other => Aggregator::Filtered {
                filter,
                aggregator: Box::new(other),
            },
        }
    }

    /// Same aggregator with `extra` ANDed into its filter.
    pub fn with_filter(&self, extra: &Filter) -> Self {
        Aggregator::filtered(extra.clone(), self.clone())
    }

    /// The aggregator's own row filter, `Empty` if unfiltered.
    pub fn filter(&self) -> Filter {
        match self {
            Aggregator::Filtered { filter, aggregator } => {
                aggregator.filter() & filter.clone()
            }
            _ => Filter::Empty,
        }
    }

    /// The aggregator with all filter wrappers removed.
    pub fn base(&self) -> &Aggregator {
        match self {
            Aggregator::Filtered { aggregator, .. } => aggregator.base(),
            other => other,
        }
    }

    /// Rebuild with a new base, keeping the filter wrappers.
    pub fn map_base(&self, f: impl FnOnce(&Aggregator) -> Aggregator) -> Self {
        match self {
            Aggregator::Filtered { filter, aggregator } => Aggregator::Filtered {
                filter: filter.clone(),
                aggregator: Box::new(aggregator.map_base(f)),
            },
            other => f(other),
        }
    }

    pub fn is_theta_sketch(&self) -> bool {
        matches!(self.base(), Aggregator::ThetaSketch { .. })
    }

    pub fn is_sketch(&self) -> bool {
        matches!(
            self.base(),
            Aggregator::ThetaSketch { .. } | Aggregator::TupleSketch { .. }
        )
    }

    /// Column a sketch is computed over.
    pub fn sketch_field(&self) -> Option<&str> {
        match self.base() {
            Aggregator::ThetaSketch { field_name, .. }
            | Aggregator::TupleSketch { field_name, .. } => Some(field_name),
            _ => None,
        }
    }

    pub fn sketch_size(&self) -> Option<u32> {
        match self.base() {
            Aggregator::ThetaSketch { size, .. } => *size,
            Aggregator::TupleSketch {
                nominal_entries, ..
            } => *nominal_entries,
            _ => None,
        }
    }

    /// Same sketch with a different size; non-sketches are returned as is.
    pub fn with_sketch_size(&self, new_size: u32) -> Self {
        self.map_base(|base| match base {
            Aggregator::ThetaSketch {
                field_name,
                is_input_theta_sketch,
                ..
            } => Aggregator::ThetaSketch {
                field_name: field_name.clone(),
                size: Some(new_size),
                is_input_theta_sketch: *is_input_theta_sketch,
            },
            Aggregator::TupleSketch {
                field_name,
                metric_filters,
                ..
            } => Aggregator::TupleSketch {
                field_name: field_name.clone(),
                nominal_entries: Some(new_size),
                metric_filters: metric_filters.clone(),
            },
            other => other.clone(),
        })
    }

    /// Aggregator that re-aggregates this one's output column `name` in an
    /// outer query. Row filters were already applied by the inner query,
    /// and counts become sums of the inner counts.
    ///
    /// Returns `None` for opaque aggregators, which cannot be rewritten.
    pub fn reaggregate(&self, name: &str) -> Option<Aggregator> {
        let field_name = name.to_string();
        match self {
            Aggregator::Filtered { aggregator, .. } => aggregator.reaggregate(name),
            Aggregator::Count | Aggregator::LongSum { .. } => {
                Some(Aggregator::LongSum { field_name })
            }
            Aggregator::DoubleSum { .. } => Some(Aggregator::DoubleSum { field_name }),
            Aggregator::HyperUnique { .. } => Some(Aggregator::HyperUnique { field_name }),
            Aggregator::ThetaSketch { size, .. } => Some(Aggregator::ThetaSketch {
                field_name,
                size: *size,
                is_input_theta_sketch: true,
            }),
            Aggregator::TupleSketch {
                nominal_entries,
                metric_filters,
                ..
            } => Some(Aggregator::TupleSketch {
                field_name,
                nominal_entries: *nominal_entries,
                metric_filters: metric_filters
                    .iter()
                    .map(|m| MetricFilter::new(m.metric_column.clone(), Filter::Empty))
                    .collect(),
            }),
            Aggregator::Opaque { .. } => None,
        }
    }

    /// Hash of the full structure, independent of the result name.
    pub fn structural_hash(&self) -> Option<String> {
        compute_hash(self).ok()
    }

    /// Druid wire form under the given result name.
    pub fn to_druid(&self, name: &str) -> Value {
        match self {
            Aggregator::Count => json!({"type": "count", "name": name}),
            Aggregator::LongSum { field_name } => json!({
                "type": "longSum",
                "name": name,
                "fieldName": field_name,
            }),
            Aggregator::DoubleSum { field_name } => json!({
                "type": "doubleSum",
                "name": name,
                "fieldName": field_name,
            }),
            Aggregator::HyperUnique { field_name } => json!({
                "type": "hyperUnique",
                "name": name,
                "fieldName": field_name,
            }),
            Aggregator::ThetaSketch {
                field_name,
                size,
                is_input_theta_sketch,
            } => {
                let mut out = json!({
                    "type": "thetaSketch",
                    "name": name,
                    "fieldName": field_name,
                    "isInputThetaSketch": is_input_theta_sketch,
                });
                if let Some(size) = size {
                    out["size"] = json!(size);
                }
                out
            }
            Aggregator::TupleSketch {
                field_name,
                nominal_entries,
                metric_filters,
            } => {
                let mut out = json!({
                    "type": "arrayOfFilteredDoublesSketch",
                    "name": name,
                    "fieldName": field_name,
                    "metricColumns": metric_filters
                        .iter()
                        .map(|m| m.metric_column.clone())
                        .collect::<Vec<_>>(),
                    "filters": metric_filters
                        .iter()
                        .map(|m| m.filter.to_druid())
                        .collect::<Vec<_>>(),
                });
                if let Some(n) = nominal_entries {
                    out["nominalEntries"] = json!(n);
                }
                out
            }
            Aggregator::Filtered { filter, aggregator } => json!({
                "type": "filtered",
                "name": name,
                "filter": filter.to_druid(),
                "aggregator": aggregator.to_druid(name),
            }),
            Aggregator::Opaque { raw } => {
                let mut out = raw.clone();
                if let Value::Object(map) = &mut out {
                    map.insert("name".to_string(), json!(name));
                }
                out
            }
        }
    }
}
