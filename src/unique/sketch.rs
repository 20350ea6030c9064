//! Sketch-based unique counts.

use crate::aggregation::Aggregation;
use crate::model::{Aggregator, Calculation, Filter, PostAggregator, SetOp};

use super::UniqueCount;

/// Smallest sketch size the datastore accepts.
pub const MIN_SKETCH_SIZE: u32 = 16;

/// Largest sketch size the datastore accepts.
pub const MAX_SKETCH_SIZE: u32 = 67_108_864;

/// Theta sketch size used when none is given.
pub const DEFAULT_SKETCH_SIZE: u32 = 16_384;

/// Saturate a sketch size into the accepted range. `None` stays `None`.
pub fn clamp_sketch_size(size: Option<u64>) -> Option<u32> {
    size.map(|s| s.clamp(MIN_SKETCH_SIZE as u64, MAX_SKETCH_SIZE as u64) as u32)
}

/// Count over a column that already holds a precomputed sketch.
#[derive(Debug, Clone, PartialEq)]
pub struct SketchPassthrough {
    pub field: String,
    pub filter: Filter,
}

impl SketchPassthrough {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            filter: Filter::Empty,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
}

impl UniqueCount for SketchPassthrough {
    fn apply(&self, name: &str, calculation: &mut Calculation) {
        let aggregator =
            Aggregator::filtered(self.filter.clone(), Aggregator::hyper_unique(&self.field));
        calculation
            .aggregations
            .insert(name.to_string(), Aggregation::Native(aggregator));
    }
}

/// Approximate distinct count with one theta sketch per field.
///
/// With several fields the estimate is taken over the union of their
/// sketches.
#[derive(Debug, Clone, PartialEq)]
pub struct ThetaSketchCount {
    pub fields: Vec<String>,
    pub size: Option<u32>,
    pub filter: Filter,
}

impl ThetaSketchCount {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            fields: vec![field.into()],
            size: None,
            filter: Filter::Empty,
        }
    }

    pub fn over<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            size: None,
            filter: Filter::Empty,
        }
    }

    /// Requested size, clamped into the accepted range.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = clamp_sketch_size(Some(size));
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Name of the raw sketch aggregator for `field`.
    pub fn sketch_name(name: &str, field: &str) -> String {
        format!("{}__{}_sketch", name, field)
    }

    fn distinct_fields(&self) -> Vec<&String> {
        let mut seen = std::collections::BTreeSet::new();
        self.fields.iter().filter(|f| seen.insert(*f)).collect()
    }
}

impl UniqueCount for ThetaSketchCount {
    fn apply(&self, name: &str, calculation: &mut Calculation) {
        let mut sketches = Vec::new();
        for field in self.distinct_fields() {
            let sketch_name = Self::sketch_name(name, field);
            let aggregator = Aggregator::filtered(
                self.filter.clone(),
                Aggregator::theta_sketch(field.as_str(), self.size),
            );
            calculation
                .aggregations
                .insert(sketch_name.clone(), Aggregation::Native(aggregator));
            sketches.push(PostAggregator::field_access(sketch_name));
        }

        let estimate = match sketches.len() {
            0 => return,
            1 => PostAggregator::theta_estimate(sketches.remove(0)),
            _ => PostAggregator::theta_estimate(PostAggregator::theta_set_op(
                SetOp::Union,
                sketches,
                self.size,
            )),
        };
        calculation
            .post_aggregations
            .insert(name.to_string(), estimate);
    }
}
