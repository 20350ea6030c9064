use std::collections::BTreeMap;

use strata::config::Settings;
use strata::model::{Aggregator, Calculation, Filter, PostAggregator};
use strata::query::{Having, QueryBuilder};
use strata::unique::{ThetaSketchCount, MIN_SKETCH_SIZE};

fn estimate(sketch: &str) -> PostAggregator {
    PostAggregator::theta_estimate(PostAggregator::field_access(sketch))
}

#[test]
fn test_identical_sketches_consolidated() {
    let settings = Settings::default();
    let calc = Calculation::new()
        .with_aggregator("a_sketch", Aggregator::theta_sketch("user", Some(4096)))
        .with_aggregator("b_sketch", Aggregator::theta_sketch("user", Some(4096)))
        .with_post_aggregator("a", estimate("a_sketch"))
        .with_post_aggregator("b", estimate("b_sketch"));

    let prepared = QueryBuilder::new(&settings, "events")
        .interval("2024-01-01/2024-02-01")
        .calculation(calc)
        .build()
        .unwrap();
    let query = prepared.query();

    let sketches: Vec<&String> = query
        .aggregations
        .iter()
        .filter(|(_, agg)| agg.is_theta_sketch())
        .map(|(name, _)| name)
        .collect();
    assert_eq!(sketches, vec!["a_sketch"]);
    // both requested names read the surviving sketch
    assert_eq!(query.post_aggregations["a"], estimate("a_sketch"));
    assert_eq!(query.post_aggregations["b"], query.post_aggregations["a"]);
}

#[test]
fn test_standalone_duplicate_still_resolves() {
    let settings = Settings::default();
    let calc = Calculation::new()
        .with_aggregator("first", Aggregator::theta_sketch("user", None))
        .with_aggregator("second", Aggregator::theta_sketch("user", None));

    let prepared = QueryBuilder::new(&settings, "events")
        .calculation(calc)
        .build()
        .unwrap();
    let query = prepared.query();

    assert!(query.aggregations.contains_key("first"));
    assert!(!query.aggregations.contains_key("second"));
    assert_eq!(query.post_aggregations["second"], estimate("first"));
}

#[test]
fn test_same_column_sketches_share_tuple_sketch() {
    let settings = Settings::default();
    let calc = Calculation::new()
        .with_unique_count(
            "ios_users",
            &ThetaSketchCount::new("user").with_filter(Filter::selector("platform", "ios")),
        )
        .with_unique_count(
            "android_users",
            &ThetaSketchCount::new("user").with_filter(Filter::selector("platform", "android")),
        );

    let prepared = QueryBuilder::new(&settings, "events")
        .calculation(calc)
        .build()
        .unwrap();
    let query = prepared.query();

    assert_eq!(query.aggregations.len(), 1);
    match &query.aggregations["user__tuple_sketch"] {
        Aggregator::TupleSketch { metric_filters, .. } => {
            assert_eq!(metric_filters.len(), 2);
            assert_eq!(
                metric_filters[0].filter,
                Filter::selector("platform", "android")
            );
        }
        other => panic!("Expected tuple sketch, got {:?}", other),
    }
    for name in ["ios_users", "android_users"] {
        assert!(query.post_aggregations.contains_key(name));
    }
    assert!(matches!(
        query.post_aggregations["android_users__user_sketch"],
        PostAggregator::TupleEstimate { .. }
    ));
}

#[test]
fn test_sketch_over_grouped_dimension_shrinks_to_minimum() {
    let settings = Settings::default();
    let calc = Calculation::new()
        .with_unique_count("users", &ThetaSketchCount::new("user").with_size(65_536));

    let prepared = QueryBuilder::new(&settings, "events")
        .dimension("user")
        .calculation(calc)
        .build()
        .unwrap();

    assert_eq!(
        prepared.query().aggregations["users__user_sketch"].sketch_size(),
        Some(MIN_SKETCH_SIZE)
    );
}

#[test]
fn test_subtotal_rollup_blocks_shrink() {
    let settings = Settings::default();
    let calc = Calculation::new()
        .with_unique_count("users", &ThetaSketchCount::new("user").with_size(65_536));

    let prepared = QueryBuilder::new(&settings, "events")
        .dimension("country")
        .dimension("user")
        .subtotals(["user"])
        .calculation(calc)
        .build()
        .unwrap();

    // `user` is rolled up in the subtotal rows
    assert_eq!(
        prepared.query().aggregations["users__user_sketch"].sketch_size(),
        Some(65_536)
    );
}

#[test]
fn test_size_hint_applies_to_other_dimensions() {
    let mut settings = Settings::default();
    settings.sketch.size_hints.insert(
        "user".to_string(),
        BTreeMap::from([("country".to_string(), 1024)]),
    );
    let calc = Calculation::new().with_unique_count("users", &ThetaSketchCount::new("user"));

    let prepared = QueryBuilder::new(&settings, "events")
        .dimension("country")
        .calculation(calc)
        .build()
        .unwrap();

    assert_eq!(
        prepared.query().aggregations["users__user_sketch"].sketch_size(),
        Some(1024)
    );
}

#[test]
fn test_sketch_only_grouped_query_gets_having() {
    let settings = Settings::default();
    let calc = Calculation::new().with_unique_count("users", &ThetaSketchCount::new("user"));

    let prepared = QueryBuilder::new(&settings, "events")
        .dimension("country")
        .calculation(calc)
        .build()
        .unwrap();

    assert_eq!(
        prepared.query().having,
        Some(Having::greater_than_zero("users"))
    );
}

#[test]
fn test_filtered_metrics_add_row_tracer() {
    let settings = Settings::default();
    let calc = Calculation::new()
        .with_unique_count("users", &ThetaSketchCount::new("user"))
        .with_aggregator(
            "nz_orders",
            Aggregator::filtered(Filter::selector("country", "NZ"), Aggregator::count()),
        );

    let prepared = QueryBuilder::new(&settings, "events")
        .dimension("city")
        .calculation(calc)
        .build()
        .unwrap();
    let query = prepared.query();

    assert_eq!(
        query.aggregations["__row_tracer"],
        Aggregator::filtered(Filter::selector("country", "NZ"), Aggregator::count())
    );
    assert_eq!(
        query.having,
        Having::any(vec![
            Having::greater_than_zero("__row_tracer"),
            Having::greater_than_zero("users"),
        ])
    );
    assert!(prepared.decode_plan().internal.contains("__row_tracer"));
}
