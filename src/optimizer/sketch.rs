//! Sketch consolidation and sizing.
//!
//! Passes, in order:
//!
//! 1. merge structurally identical theta sketches
//! 2. fold theta sketches over the same column into one tuple sketch
//! 3. shrink sketch sizes using the grouping dimensions
//! 4. add a having clause so sketch-only rows do not leak into results
//!
//! None of the passes changes the value reported under any requested
//! field name.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::{Settings, SketchSettings};
use crate::model::{Aggregator, Filter, PostAggregator};
use crate::query::{Having, Query, QueryType};
use crate::unique::{TupleSketchCount, COUNT_METRIC, MIN_SKETCH_SIZE};

use super::filter::normalize;

/// Internal aggregator counting rows that match any non-sketch filter.
pub const ROW_TRACER: &str = "__row_tracer";

/// Run the sketch passes. With a pending query modifier the aggregators
/// are re-aggregated in an outer query afterwards, so only the passes that
/// keep aggregator kinds run.
pub fn optimize(query: Query, settings: &Settings) -> Query {
    let query = merge_duplicate_sketches(query);
    if query.modifier.is_some() {
        return shrink_sketch_sizes(query, &settings.sketch);
    }
    let query = unify_theta_sketches(query);
    let query = shrink_sketch_sizes(query, &settings.sketch);
    repair_row_leak(query, settings.query.filter_depth_limit)
}

/// Names read by any post-aggregator.
fn referenced_fields(query: &Query) -> BTreeSet<String> {
    query
        .post_aggregations
        .values()
        .flat_map(PostAggregator::field_refs)
        .collect()
}

/// Names read anywhere below a theta set operation.
fn set_operation_refs(query: &Query) -> BTreeSet<String> {
    fn walk(post: &PostAggregator, refs: &mut BTreeSet<String>) {
        match post {
            PostAggregator::ThetaSetOp { .. } => refs.extend(post.field_refs()),
            _ => {
                for child in post.children() {
                    walk(child, refs);
                }
            }
        }
    }
    let mut refs = BTreeSet::new();
    for post in query.post_aggregations.values() {
        walk(post, &mut refs);
    }
    refs
}

/// Collapse identical theta sketches onto the first name (in name order).
pub fn merge_duplicate_sketches(mut query: Query) -> Query {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, agg) in &query.aggregations {
        if !agg.is_theta_sketch() {
            continue;
        }
        if let Some(hash) = agg.structural_hash() {
            groups.entry(hash).or_default().push(name.clone());
        }
    }

    let mut renames: BTreeMap<String, String> = BTreeMap::new();
    for names in groups.into_values().filter(|names| names.len() > 1) {
        for removed in &names[1..] {
            renames.insert(removed.clone(), names[0].clone());
        }
    }
    if renames.is_empty() {
        return query;
    }

    let intermediate = referenced_fields(&query);
    for removed in renames.keys() {
        query.aggregations.remove(removed);
    }
    let rename = |field: &str| {
        renames
            .get(field)
            .cloned()
            .unwrap_or_else(|| field.to_string())
    };
    query.post_aggregations = query
        .post_aggregations
        .into_iter()
        .map(|(name, post)| (name, post.rename_fields(&rename)))
        .collect();

    for (removed, canonical) in &renames {
        debug!(removed = %removed, canonical = %canonical, "merged duplicate theta sketch");
        // Still requested on its own: keep the name resolving to the same estimate
        if !intermediate.contains(removed) && !query.post_aggregations.contains_key(removed) {
            query.post_aggregations.insert(
                removed.clone(),
                PostAggregator::theta_estimate(PostAggregator::field_access(canonical)),
            );
        }
    }
    query
}

/// Name of the tuple sketch replacing theta sketches over `field`.
pub fn tuple_sketch_name(field: &str) -> String {
    format!("{}__tuple_sketch", field)
}

/// Replace several theta sketches over one column with a single tuple
/// sketch carrying one filtered count metric per original sketch.
pub fn unify_theta_sketches(mut query: Query) -> Query {
    let in_set_ops = set_operation_refs(&query);
    let mut by_field: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, agg) in &query.aggregations {
        if let Aggregator::ThetaSketch {
            field_name,
            is_input_theta_sketch: false,
            ..
        } = agg.base()
        {
            if !in_set_ops.contains(name) {
                by_field
                    .entry(field_name.clone())
                    .or_default()
                    .push(name.clone());
            }
        }
    }

    for (field, names) in by_field {
        let tuple_name = tuple_sketch_name(&field);
        if names.len() < 2 || query.aggregations.contains_key(&tuple_name) {
            continue;
        }

        let mut tuple = TupleSketchCount::new(&tuple_name, &field);
        tuple.nominal_entries = names
            .iter()
            .filter_map(|n| query.aggregations.get(n).and_then(Aggregator::sketch_size))
            .max();

        let mut indices = Vec::with_capacity(names.len());
        for name in &names {
            if let Some(agg) = query.aggregations.remove(name) {
                indices.push((name.clone(), tuple.add_metric(COUNT_METRIC, agg.filter())));
            }
        }
        query
            .aggregations
            .insert(tuple_name.clone(), tuple.aggregator());

        let converted: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        query.post_aggregations = query
            .post_aggregations
            .into_iter()
            .map(|(name, post)| {
                let rewritten = post.rewrite(&mut |node| match node {
                    PostAggregator::ThetaEstimate { field } => match field.as_ref() {
                        PostAggregator::FieldAccess { field_name }
                            if converted.contains(field_name.as_str()) =>
                        {
                            Some(PostAggregator::field_access(field_name))
                        }
                        _ => None,
                    },
                    _ => None,
                });
                (name, rewritten)
            })
            .collect();

        for (name, index) in indices {
            let expression = format!("{} > 0", TupleSketchCount::metric_ref(index));
            query.post_aggregations.insert(name, tuple.estimate(expression));
        }
        debug!(
            field = %field,
            sketches = converted.len(),
            tuple = %tuple_name,
            "unified theta sketches into tuple sketch"
        );
    }
    query
}

/// Plain dimensions every result row is grouped by.
fn shrinkable_dimensions(query: &Query) -> BTreeSet<String> {
    let mut grouped: BTreeSet<String> = query
        .dimensions
        .iter()
        .filter(|d| d.is_plain())
        .map(|d| d.output_name().to_string())
        .collect();
    if let Some(subtotals) = &query.subtotals {
        let common = subtotals.common_dimensions();
        grouped.retain(|d| common.contains(d.as_str()));
    }
    grouped
}

/// Shrink sketches using the grouping dimensions, then resize sketch
/// post-aggregators to the largest sketch they read.
pub fn shrink_sketch_sizes(mut query: Query, settings: &SketchSettings) -> Query {
    let grouped = shrinkable_dimensions(&query);
    if grouped.is_empty() {
        return query;
    }

    let mut changed = false;
    for (name, agg) in query.aggregations.iter_mut() {
        let Some(field) = agg.sketch_field() else {
            continue;
        };
        let current = agg.sketch_size().unwrap_or(settings.default_size);
        let target = if grouped.contains(field) {
            MIN_SKETCH_SIZE
        } else {
            match grouped
                .iter()
                .filter_map(|dim| settings.size_hint(field, dim))
                .min()
            {
                Some(hint) => hint.min(current),
                None => continue,
            }
        };
        if agg.sketch_size() != Some(target) {
            debug!(aggregator = %name, from = current, to = target, "shrank sketch");
            *agg = agg.with_sketch_size(target);
            changed = true;
        }
    }
    if !changed {
        return query;
    }

    let mut sizes: BTreeMap<String, u32> = query
        .aggregations
        .iter()
        .filter(|(_, agg)| agg.is_sketch())
        .map(|(name, agg)| {
            (
                name.clone(),
                agg.sketch_size().unwrap_or(settings.default_size),
            )
        })
        .collect();

    let order: Vec<String> = query
        .ordered_post_aggregations()
        .into_iter()
        .map(|(name, _)| name.clone())
        .collect();
    for name in order {
        let Some(post) = query.post_aggregations.get(&name) else {
            continue;
        };
        let (resized, size) = fit_sizes(post, &sizes);
        if let Some(size) = size {
            sizes.insert(name.clone(), size);
        }
        query.post_aggregations.insert(name, resized);
    }
    query
}

/// Set every sketch-sized node to the largest sketch size below it.
/// Returns the rebuilt node and that size.
fn fit_sizes(post: &PostAggregator, sizes: &BTreeMap<String, u32>) -> (PostAggregator, Option<u32>) {
    match post {
        PostAggregator::FieldAccess { field_name } => (post.clone(), sizes.get(field_name).copied()),
        PostAggregator::ThetaSetOp { func, fields, size } => {
            let (fields, max) = fit_children(fields, sizes);
            let resized = PostAggregator::ThetaSetOp {
                func: *func,
                fields,
                size: max.or(*size),
            };
            (resized, max.or(*size))
        }
        PostAggregator::TupleFilterExpr {
            field,
            expression,
            nominal_entries,
        } => {
            let (field, max) = fit_sizes(field, sizes);
            let resized = PostAggregator::TupleFilterExpr {
                field: Box::new(field),
                expression: expression.clone(),
                nominal_entries: max.or(*nominal_entries),
            };
            (resized, max.or(*nominal_entries))
        }
        PostAggregator::ThetaEstimate { field } => {
            let (field, _) = fit_sizes(field, sizes);
            (PostAggregator::theta_estimate(field), None)
        }
        PostAggregator::TupleEstimate { field } => {
            let (field, _) = fit_sizes(field, sizes);
            (PostAggregator::tuple_estimate(field), None)
        }
        PostAggregator::Arithmetic { op, fields } => {
            let (fields, _) = fit_children(fields, sizes);
            (PostAggregator::Arithmetic { op: *op, fields }, None)
        }
        other => (other.clone(), None),
    }
}

fn fit_children(
    fields: &[PostAggregator],
    sizes: &BTreeMap<String, u32>,
) -> (Vec<PostAggregator>, Option<u32>) {
    let mut max = None;
    let fields: Vec<PostAggregator> = fields
        .iter()
        .map(|child| {
            let (child, size) = fit_sizes(child, sizes);
            max = max.max(size);
            child
        })
        .collect();
    (fields, max)
}

/// Require at least one meaningful metric per grouped row.
///
/// Unfiltered sketches stop the query filter from excluding any row, so a
/// grouped query would otherwise return groups none of the requested
/// metrics saw.
pub fn repair_row_leak(mut query: Query, depth_limit: usize) -> Query {
    if query.query_type != QueryType::GroupBy
        || query.grouping_dimensions().is_empty()
        || query.having.is_some()
    {
        return query;
    }
    let sketches: Vec<String> = query
        .aggregations
        .iter()
        .filter(|(_, agg)| agg.is_sketch())
        .map(|(name, _)| name.clone())
        .collect();
    if sketches.is_empty() {
        return query;
    }

    let mut clauses = Vec::new();
    let plain_filters: Vec<Filter> = query
        .aggregations
        .values()
        .filter(|agg| !agg.is_sketch())
        .map(Aggregator::filter)
        .collect();
    if !plain_filters.is_empty() {
        if plain_filters.iter().any(Filter::is_empty) {
            // an unfiltered metric already covers every row the query reads
            return query;
        }
        let tracer = Aggregator::filtered(
            normalize(&Filter::any(plain_filters), depth_limit),
            Aggregator::count(),
        );
        query.aggregations.insert(ROW_TRACER.to_string(), tracer);
        clauses.push(Having::greater_than_zero(ROW_TRACER));
    }

    let intermediate = referenced_fields(&query);
    for name in sketches.iter().filter(|n| !intermediate.contains(*n)) {
        clauses.push(Having::greater_than_zero(name.clone()));
    }
    for (name, post) in &query.post_aggregations {
        if !intermediate.contains(name) && is_sketch_estimate(post, &query) {
            clauses.push(Having::greater_than_zero(name.clone()));
        }
    }

    query.having = Having::any(clauses);
    if query.having.is_some() {
        debug!(sketches = sketches.len(), "added having clause against sketch row leak");
    }
    query
}

/// Whether `post` reports a sketch estimate, directly or through a field
/// access to one.
fn is_sketch_estimate(post: &PostAggregator, query: &Query) -> bool {
    match post {
        PostAggregator::ThetaEstimate { .. } | PostAggregator::TupleEstimate { .. } => true,
        PostAggregator::FieldAccess { field_name } => {
            match query.post_aggregations.get(field_name) {
                Some(target) if target != post => is_sketch_estimate(target, query),
                Some(_) => false,
                None => query
                    .aggregations
                    .get(field_name)
                    .is_some_and(Aggregator::is_sketch),
            }
        }
        _ => false,
    }
}
