//! Boolean filter normalization.
//!
//! Flattens nested AND/OR trees, folds sibling NOTs together and drops
//! duplicate selector-family children. Never changes which rows match.

use std::collections::BTreeSet;

use tracing::trace;

use crate::model::{Aggregator, Filter, FilterKind, MetricFilter};
use crate::query::Query;

/// Nesting depth past which a filter is returned unchanged.
pub const DEFAULT_DEPTH_LIMIT: usize = 25;

/// Normalize `filter`, leaving any subtree deeper than `depth_limit` as is.
pub fn normalize(filter: &Filter, depth_limit: usize) -> Filter {
    normalize_at(filter, 0, depth_limit)
}

fn normalize_at(filter: &Filter, depth: usize, limit: usize) -> Filter {
    if depth > limit {
        trace!(depth, "filter depth limit reached, leaving subtree as is");
        return filter.clone();
    }
    match filter {
        Filter::Not { field } => !normalize_at(field, depth + 1, limit),
        Filter::And { fields } => combine(FilterKind::And, fields, depth, limit),
        Filter::Or { fields } => combine(FilterKind::Or, fields, depth, limit),
        other => other.clone(),
    }
}

fn combine(kind: FilterKind, fields: &[Filter], depth: usize, limit: usize) -> Filter {
    if let [only] = fields {
        return normalize_at(only, depth + 1, limit);
    }

    let mut children = Vec::with_capacity(fields.len());
    let mut negated = Vec::new();
    for field in fields {
        let child = normalize_at(field, depth + 1, limit);
        collect(kind, child, &mut children, &mut negated);
    }

    match negated.len() {
        0 => {}
        1 => children.extend(negated.into_iter().map(|f| Filter::Not { field: Box::new(f) })),
        _ => {
            // not a | not b == not (a & b), and dually for AND
            let inner = build(opposite(kind), dedup(negated));
            children.push(Filter::Not {
                field: Box::new(normalize_at(&inner, depth + 1, limit)),
            });
        }
    }

    let mut children = dedup(children);
    match children.len() {
        0 => Filter::Empty,
        1 => children.remove(0),
        _ => build(kind, children),
    }
}

/// Sort a normalized child into the spliced children or the negated list.
fn collect(kind: FilterKind, child: Filter, children: &mut Vec<Filter>, negated: &mut Vec<Filter>) {
    match child {
        Filter::Empty => {}
        Filter::And { fields } if kind == FilterKind::And => {
            for f in fields {
                collect(kind, f, children, negated);
            }
        }
        Filter::Or { fields } if kind == FilterKind::Or => {
            for f in fields {
                collect(kind, f, children, negated);
            }
        }
        Filter::Not { field } if field.is_empty() => {}
        Filter::Not { field } => negated.push(*field),
        other => children.push(other),
    }
}

/// Drop later duplicates among selector-family filters. Filters without a
/// dedup key are always kept.
fn dedup(filters: Vec<Filter>) -> Vec<Filter> {
    let mut seen = BTreeSet::new();
    filters
        .into_iter()
        .filter(|f| match f.dedup_key() {
            Some(key) => seen.insert(key),
            None => true,
        })
        .collect()
}

fn opposite(kind: FilterKind) -> FilterKind {
    match kind {
        FilterKind::And => FilterKind::Or,
        _ => FilterKind::And,
    }
}

fn build(kind: FilterKind, fields: Vec<Filter>) -> Filter {
    match kind {
        FilterKind::And => Filter::And { fields },
        _ => Filter::Or { fields },
    }
}

/// Normalize the filters of `query` and of every aggregator in it.
pub fn normalize_query(mut query: Query, depth_limit: usize) -> Query {
    query.filter = normalize(&query.filter, depth_limit);
    query.dimension_filter = normalize(&query.dimension_filter, depth_limit);
    query.aggregation_filter = normalize(&query.aggregation_filter, depth_limit);
    query.aggregations = query
        .aggregations
        .into_iter()
        .map(|(name, agg)| (name, normalize_aggregator(&agg, depth_limit)))
        .collect();
    query
}

fn normalize_aggregator(aggregator: &Aggregator, depth_limit: usize) -> Aggregator {
    match aggregator {
        Aggregator::Filtered { filter, aggregator } => Aggregator::filtered(
            normalize(filter, depth_limit),
            normalize_aggregator(aggregator, depth_limit),
        ),
        Aggregator::TupleSketch {
            field_name,
            nominal_entries,
            metric_filters,
        } => Aggregator::TupleSketch {
            field_name: field_name.clone(),
            nominal_entries: *nominal_entries,
            metric_filters: metric_filters
                .iter()
                .map(|m| {
                    MetricFilter::new(m.metric_column.clone(), normalize(&m.filter, depth_limit))
                })
                .collect(),
        },
        other => other.clone(),
    }
}
