//! Query builder: calculations in, an optimized native query out.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::aggregation::{
    normalize_intervals, Aggregation, Calendar, GregorianCalendar, QueryContext, QueryModifier,
};
use crate::config::{DimensionSettings, Settings};
use crate::model::{
    Aggregator, Calculation, Dimension, Filter, Granularity, PostAggregator, TIME_DIMENSION,
};
use crate::optimizer::{normalize_query, optimize_sketches, ROW_TRACER};

use super::native::{DataSource, Having, Query, QueryType, SubtotalConfig, SKIP_EMPTY_BUCKETS};
use super::response::{DecodePlan, ResultRow};
use super::{BuildError, BuildResult, QueryState};

/// Name of the row counter backing a strict-null field.
pub fn tracker_name(field: &str) -> String {
    format!("{}__tracker", field)
}

/// OR over the combinations, each an AND of `dimension = value`
/// selectors. Dimensions with a configured ID column are filtered on that
/// column instead.
pub fn combination_filter(
    combinations: &[BTreeMap<String, String>],
    dimensions: &DimensionSettings,
) -> Filter {
    Filter::any(combinations.iter().map(|combination| {
        Filter::all(
            combination
                .iter()
                .map(|(dim, value)| Filter::selector(dimensions.filter_column(dim), value)),
        )
    }))
}

/// Assembles a query from calculations.
pub struct QueryBuilder<'a> {
    settings: &'a Settings,
    calendar: &'a dyn Calendar,
    data_source: String,
    intervals: Vec<String>,
    granularity: Granularity,
    dimensions: Vec<Dimension>,
    filter: Filter,
    calculations: Vec<Calculation>,
    subtotals: Vec<String>,
    having: Option<Having>,
    context: Map<String, Value>,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(settings: &'a Settings, data_source: impl Into<String>) -> Self {
        Self {
            settings,
            calendar: &GregorianCalendar,
            data_source: data_source.into(),
            intervals: Vec::new(),
            granularity: Granularity::all(),
            dimensions: Vec::new(),
            filter: Filter::Empty,
            calculations: Vec::new(),
            subtotals: Vec::new(),
            having: None,
            context: Map::new(),
        }
    }

    pub fn with_calendar(mut self, calendar: &'a dyn Calendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn interval(mut self, interval: impl Into<String>) -> Self {
        self.intervals.push(interval.into());
        self
    }

    pub fn intervals<I, S>(mut self, intervals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.intervals.extend(intervals.into_iter().map(Into::into));
        self
    }

    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn dimension(mut self, dimension: impl Into<Dimension>) -> Self {
        self.dimensions.push(dimension.into());
        self
    }

    /// AND `filter` into the dimension filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = std::mem::take(&mut self.filter) & filter;
        self
    }

    /// AND a combination filter (see [`combination_filter`]) into the
    /// dimension filter.
    pub fn combinations(self, combinations: &[BTreeMap<String, String>]) -> Self {
        let filter = combination_filter(combinations, &self.settings.dimensions);
        self.filter(filter)
    }

    pub fn calculation(mut self, calculation: Calculation) -> Self {
        self.calculations.push(calculation);
        self
    }

    /// Request subtotal rows rolled up before each of `dimensions`.
    pub fn subtotals<I, S>(mut self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subtotals
            .extend(dimensions.into_iter().map(Into::into));
        self
    }

    pub fn having(mut self, having: Having) -> Self {
        self.having = Some(having);
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Assemble, optimize and finalize the query.
    pub fn build(self) -> BuildResult<PreparedQuery> {
        let settings = self.settings;
        let intervals = sorted_intervals(self.intervals);

        let mut merged = Calculation::new();
        for calculation in self.calculations {
            merged = merged.merge(calculation)?;
        }
        let aggregation_filter = merged.aggregation_filter();

        let mut query = Query::new(DataSource::Table(self.data_source));
        query.granularity = self.granularity;
        query.intervals = intervals;
        query.dimensions = self.dimensions;
        query.having = self.having;
        query.context = self.context;

        // Resolve query-dependent aggregations and fold modifiers together
        let mut modifier: Option<QueryModifier> = None;
        {
            let ctx = QueryContext {
                granularity: &query.granularity,
                intervals: &query.intervals,
                dimensions: &query.dimensions,
            };
            for (name, aggregation) in merged.aggregations.iter() {
                match aggregation {
                    Aggregation::Native(agg) => {
                        query.aggregations.insert(name.clone(), agg.clone());
                    }
                    Aggregation::QueryDependent(dependent) => {
                        let resolved = dependent.resolve(&ctx, self.calendar)?;
                        query.aggregations.insert(name.clone(), resolved);
                    }
                    Aggregation::QueryModifying(incoming) => {
                        modifier = Some(match modifier.take() {
                            Some(existing) => existing.merge(incoming.clone())?,
                            None => incoming.clone(),
                        });
                    }
                }
            }
        }
        query.post_aggregations = merged.post_aggregations;
        query.modifier = modifier;

        let mut internal = BTreeSet::new();
        let mut strict_null = BTreeMap::new();
        for field in &merged.strict_null_fields {
            let tracker = tracker_name(field);
            let filter = field_filter(&query, field, &mut BTreeSet::new());
            query.aggregations.insert(
                tracker.clone(),
                Aggregator::filtered(filter, Aggregator::count()),
            );
            internal.insert(tracker.clone());
            strict_null.insert(field.clone(), tracker);
        }

        query.dimension_filter = self.filter;
        query.aggregation_filter = aggregation_filter;
        query.filter = query.dimension_filter.clone() & query.aggregation_filter.clone();

        if !self.subtotals.is_empty() {
            let config = SubtotalConfig::new(
                query.dimension_names(),
                &self.subtotals,
                settings.query.subtotal_label.clone(),
            )?;
            // Subtotal rows are re-checked against the row filter; keep them
            // from being dropped
            if !query.aggregation_filter.is_empty() {
                query.filter = query.dimension_filter.clone()
                    & (query.aggregation_filter.clone()
                        | Filter::numeric_at_least(TIME_DIMENSION, "0"));
            }
            query.subtotals = Some(config);
        }

        if query.modifier.is_none() {
            optimize_shape(&mut query, settings);
        }

        let query = normalize_query(query, settings.query.filter_depth_limit);
        let mut query = optimize_sketches(query, settings);
        if query.aggregations.contains_key(ROW_TRACER) {
            internal.insert(ROW_TRACER.to_string());
        }

        if let Some(modifier) = query.modifier.take() {
            query = modifier.modify(query);
        }

        let plan = DecodePlan::for_query(&query, strict_null, internal);
        trace!(state = %QueryState::Optimized, "query built");
        Ok(PreparedQuery {
            query,
            plan,
            state: QueryState::Optimized,
        })
    }
}

/// Sorted, merged intervals. Intervals the calendar cannot parse are kept
/// verbatim, sorted and deduplicated.
fn sorted_intervals(intervals: Vec<String>) -> Vec<String> {
    match normalize_intervals(&intervals) {
        Ok(merged) => merged,
        Err(e) => {
            debug!(error = %e, "keeping intervals as given");
            let unique: BTreeSet<String> = intervals.into_iter().collect();
            unique.into_iter().collect()
        }
    }
}

/// Rows a field is computed over: its aggregator's filter, or for a
/// post-aggregator the OR of the filters of the fields it reads. `Empty`
/// when any of them is unrestricted.
fn field_filter(query: &Query, field: &str, visiting: &mut BTreeSet<String>) -> Filter {
    if let Some(agg) = query.aggregations.get(field) {
        return agg.filter();
    }
    if let Some(filter) = query
        .modifier
        .as_ref()
        .and_then(|m| m.output_filter(field))
    {
        return filter;
    }
    let Some(post) = query.post_aggregations.get(field) else {
        return Filter::Empty;
    };
    if !visiting.insert(field.to_string()) {
        return Filter::Empty;
    }

    let mut filters = Vec::new();
    for dependency in post.field_refs() {
        let filter = field_filter(query, &dependency, visiting);
        if filter.is_empty() {
            return Filter::Empty;
        }
        filters.push(filter);
    }
    Filter::any(filters)
}

/// Cheaper equivalent query shapes.
fn optimize_shape(query: &mut Query, settings: &Settings) {
    if let Granularity::Arbitrary { intervals } = &query.granularity {
        if let [only] = intervals.as_slice() {
            debug!(interval = %only, "collapsed single arbitrary bucket to all");
            query.intervals = vec![only.clone()];
            query.granularity = Granularity::all();
        }
    }

    if query.grouping_dimensions().is_empty() {
        query.query_type = QueryType::Timeseries;
        query.subtotals = None;
        if !query.context.contains_key(SKIP_EMPTY_BUCKETS) {
            query.context.insert(
                SKIP_EMPTY_BUCKETS.to_string(),
                Value::Bool(settings.query.skip_empty_buckets),
            );
        }
        debug!("no grouping dimensions, using timeseries");
    }
}

/// A built query, ready to be sent and to decode its response.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    query: Query,
    plan: DecodePlan,
    state: QueryState,
}

impl PreparedQuery {
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn decode_plan(&self) -> &DecodePlan {
        &self.plan
    }

    /// Post-aggregator under `name`, if any.
    pub fn post_aggregation(&self, name: &str) -> Option<&PostAggregator> {
        self.query.post_aggregations.get(name)
    }

    /// Wire JSON of the query.
    pub fn serialize(&mut self) -> BuildResult<Value> {
        match self.state {
            QueryState::Optimized | QueryState::Serialized => {
                self.state = QueryState::Serialized;
                trace!(state = %self.state, "query serialized");
                Ok(self.query.to_json())
            }
            actual => Err(BuildError::InvalidState {
                expected: QueryState::Optimized,
                actual,
            }),
        }
    }

    /// Decode the response to the serialized query. `header` names the
    /// columns of array-shaped rows; the query's own column order is used
    /// when absent.
    pub fn parse_response(
        &mut self,
        response: &Value,
        header: Option<&[String]>,
    ) -> BuildResult<Vec<ResultRow>> {
        if self.state != QueryState::Serialized {
            return Err(BuildError::InvalidState {
                expected: QueryState::Serialized,
                actual: self.state,
            });
        }
        let rows = self.plan.decode(response, header)?;
        self.state = QueryState::ResponseParsed;
        trace!(state = %self.state, rows = rows.len(), "response parsed");
        Ok(rows)
    }

    /// Decode a response expected to hold at most one row.
    pub fn parse_single_row(
        &mut self,
        response: &Value,
        header: Option<&[String]>,
    ) -> BuildResult<Option<ResultRow>> {
        let mut rows = self.parse_response(response, header)?;
        if rows.len() > 1 {
            return Err(BuildError::MalformedResult(format!(
                "expected at most one row, got {}",
                rows.len()
            )));
        }
        Ok(rows.pop())
    }
}
