//! Native query representation and its wire serialization.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::aggregation::QueryModifier;
use crate::model::{Aggregator, Dimension, Filter, Granularity, PostAggregator};

use super::{BuildError, BuildResult};

/// Context flag that drops time buckets with no rows from timeseries results.
pub const SKIP_EMPTY_BUCKETS: &str = "skipEmptyBuckets";

/// Context flag requesting positional array rows.
pub const RESULT_AS_ARRAY: &str = "resultAsArray";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    GroupBy,
    Timeseries,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::GroupBy => "groupBy",
            QueryType::Timeseries => "timeseries",
        }
    }
}

/// Where a query reads rows from.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    Table(String),
    /// Rows produced by a nested query.
    Query(Box<Query>),
}

impl DataSource {
    pub fn to_druid(&self) -> Value {
        match self {
            DataSource::Table(name) => json!(name),
            DataSource::Query(inner) => json!({
                "type": "query",
                "query": inner.to_json(),
            }),
        }
    }
}

/// Having clause evaluated against aggregated rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Having {
    GreaterThan { aggregation: String, value: f64 },
    LessThan { aggregation: String, value: f64 },
    EqualTo { aggregation: String, value: f64 },
    #[serde(rename_all = "camelCase")]
    And { having_specs: Vec<Having> },
    #[serde(rename_all = "camelCase")]
    Or { having_specs: Vec<Having> },
    #[serde(rename_all = "camelCase")]
    Not { having_spec: Box<Having> },
}

impl Having {
    pub fn greater_than_zero(aggregation: impl Into<String>) -> Self {
        Having::GreaterThan {
            aggregation: aggregation.into(),
            value: 0.0,
        }
    }

    /// OR of the clauses; a single clause is returned unwrapped.
    pub fn any(mut specs: Vec<Having>) -> Option<Self> {
        match specs.len() {
            0 => None,
            1 => specs.pop(),
            _ => Some(Having::Or {
                having_specs: specs,
            }),
        }
    }

    pub fn to_druid(&self) -> Value {
        match self {
            Having::GreaterThan { aggregation, value } => json!({
                "type": "greaterThan",
                "aggregation": aggregation,
                "value": value,
            }),
            Having::LessThan { aggregation, value } => json!({
                "type": "lessThan",
                "aggregation": aggregation,
                "value": value,
            }),
            Having::EqualTo { aggregation, value } => json!({
                "type": "equalTo",
                "aggregation": aggregation,
                "value": value,
            }),
            Having::And { having_specs } => json!({
                "type": "and",
                "havingSpecs": having_specs.iter().map(Having::to_druid).collect::<Vec<_>>(),
            }),
            Having::Or { having_specs } => json!({
                "type": "or",
                "havingSpecs": having_specs.iter().map(Having::to_druid).collect::<Vec<_>>(),
            }),
            Having::Not { having_spec } => json!({
                "type": "not",
                "havingSpec": having_spec.to_druid(),
            }),
        }
    }
}

/// Subtotal groups requested alongside the fully grouped rows.
///
/// Group 0 is always the full dimension list. The group for subtotal
/// dimension `d` is the prefix of the dimension list strictly before `d`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtotalConfig {
    pub dimensions: Vec<String>,
    pub groups: Vec<Vec<String>>,
    /// Value written into rolled-up dimensions of subtotal rows.
    pub label: String,
}

impl SubtotalConfig {
    pub fn new(
        dimensions: Vec<String>,
        subtotal_dimensions: &[String],
        label: impl Into<String>,
    ) -> BuildResult<Self> {
        let mut groups = vec![dimensions.clone()];
        for dim in subtotal_dimensions {
            let pos = dimensions
                .iter()
                .position(|d| d == dim)
                .ok_or_else(|| BuildError::UnknownSubtotalDimension(dim.clone()))?;
            let prefix = dimensions[..pos].to_vec();
            if !groups.contains(&prefix) {
                groups.push(prefix);
            }
        }
        Ok(Self {
            dimensions,
            groups,
            label: label.into(),
        })
    }

    /// Index of the group whose dimensions are exactly `present`.
    ///
    /// Membership is inferred from which dimension keys a row carries. This
    /// relies on the datastore omitting exactly the rolled-up dimensions
    /// from subtotal rows.
    pub fn group_for(&self, present: &BTreeSet<&str>) -> Option<usize> {
        self.groups.iter().position(|group| {
            group.len() == present.len() && group.iter().all(|d| present.contains(d.as_str()))
        })
    }

    /// Dimensions present in every group, including the full group.
    pub fn common_dimensions(&self) -> BTreeSet<&str> {
        let mut common: BTreeSet<&str> = self.dimensions.iter().map(String::as_str).collect();
        for group in &self.groups {
            let members: BTreeSet<&str> = group.iter().map(String::as_str).collect();
            common = common.intersection(&members).copied().collect();
        }
        common
    }

    pub fn to_druid(&self) -> Value {
        json!(self.groups)
    }
}

/// A native query under construction or ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub query_type: QueryType,
    pub data_source: DataSource,
    pub granularity: Granularity,
    /// Sorted, non-overlapping ISO intervals.
    pub intervals: Vec<String>,
    pub dimensions: Vec<Dimension>,
    /// Caller-supplied row restriction.
    pub dimension_filter: Filter,
    /// OR of every aggregator's own filter, `Empty` when not derivable.
    pub aggregation_filter: Filter,
    /// Filter sent on the wire.
    pub filter: Filter,
    pub aggregations: BTreeMap<String, Aggregator>,
    pub post_aggregations: BTreeMap<String, PostAggregator>,
    pub subtotals: Option<SubtotalConfig>,
    pub having: Option<Having>,
    pub context: Map<String, Value>,
    /// Whole-query rewrite still to be applied.
    pub modifier: Option<QueryModifier>,
}

impl Query {
    pub fn new(data_source: DataSource) -> Self {
        Self {
            query_type: QueryType::GroupBy,
            data_source,
            granularity: Granularity::all(),
            intervals: Vec::new(),
            dimensions: Vec::new(),
            dimension_filter: Filter::Empty,
            aggregation_filter: Filter::Empty,
            filter: Filter::Empty,
            aggregations: BTreeMap::new(),
            post_aggregations: BTreeMap::new(),
            subtotals: None,
            having: None,
            context: Map::new(),
            modifier: None,
        }
    }

    /// Dimensions the query groups on, including a granularity dimension.
    pub fn grouping_dimensions(&self) -> Vec<Dimension> {
        let mut dims = Vec::with_capacity(self.dimensions.len() + 1);
        if let Some(spec) = self.granularity.dimension() {
            dims.push(Dimension::Extraction(spec.clone()));
        }
        dims.extend(self.dimensions.iter().cloned());
        dims
    }

    /// Output names of the grouping dimensions.
    pub fn dimension_names(&self) -> Vec<String> {
        self.grouping_dimensions()
            .iter()
            .map(|d| d.output_name().to_string())
            .collect()
    }

    pub fn context_flag(&self, key: &str) -> Option<bool> {
        self.context.get(key).and_then(Value::as_bool)
    }

    /// Post-aggregators ordered so that each follows the post-aggregators
    /// it reads.
    pub fn ordered_post_aggregations(&self) -> Vec<(&String, &PostAggregator)> {
        fn visit<'a>(
            name: &'a String,
            all: &'a BTreeMap<String, PostAggregator>,
            visiting: &mut BTreeSet<&'a str>,
            done: &mut BTreeSet<&'a str>,
            out: &mut Vec<(&'a String, &'a PostAggregator)>,
        ) {
            if done.contains(name.as_str()) || !visiting.insert(name.as_str()) {
                return;
            }
            let post = &all[name];
            for dep in post.field_refs() {
                if let Some((dep_name, _)) = all.get_key_value(&dep) {
                    if dep_name != name {
                        visit(dep_name, all, visiting, done, out);
                    }
                }
            }
            visiting.remove(name.as_str());
            done.insert(name.as_str());
            out.push((name, post));
        }

        let mut out = Vec::with_capacity(self.post_aggregations.len());
        let mut visiting = BTreeSet::new();
        let mut done = BTreeSet::new();
        for name in self.post_aggregations.keys() {
            visit(
                name,
                &self.post_aggregations,
                &mut visiting,
                &mut done,
                &mut out,
            );
        }
        out
    }

    /// Column order of array-shaped result rows.
    pub fn default_header(&self) -> Vec<String> {
        let mut header = vec!["timestamp".to_string()];
        if self.query_type == QueryType::GroupBy {
            header.extend(self.dimension_names());
        }
        header.extend(self.aggregations.keys().cloned());
        header.extend(
            self.ordered_post_aggregations()
                .into_iter()
                .map(|(name, _)| name.clone()),
        );
        header
    }

    /// Druid native query JSON.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("queryType".into(), json!(self.query_type.as_str()));
        out.insert("dataSource".into(), self.data_source.to_druid());
        out.insert("granularity".into(), self.granularity.to_druid());
        out.insert("intervals".into(), json!(self.intervals));

        if self.query_type == QueryType::GroupBy {
            let dims: Vec<Value> = self
                .grouping_dimensions()
                .iter()
                .map(Dimension::to_druid)
                .collect();
            out.insert("dimensions".into(), Value::Array(dims));
            if let Some(subtotals) = &self.subtotals {
                out.insert("subtotalsSpec".into(), subtotals.to_druid());
            }
            if let Some(having) = &self.having {
                out.insert("having".into(), having.to_druid());
            }
        }

        if !self.filter.is_empty() {
            out.insert("filter".into(), self.filter.to_druid());
        }

        let aggregations: Vec<Value> = self
            .aggregations
            .iter()
            .map(|(name, agg)| agg.to_druid(name))
            .collect();
        out.insert("aggregations".into(), Value::Array(aggregations));

        let post_aggregations: Vec<Value> = self
            .ordered_post_aggregations()
            .into_iter()
            .map(|(name, post)| post.to_druid(name))
            .collect();
        out.insert("postAggregations".into(), Value::Array(post_aggregations));

        if !self.context.is_empty() {
            out.insert("context".into(), Value::Object(self.context.clone()));
        }

        Value::Object(out)
    }
}
