use serde_json::json;
use strata::config::Settings;
use strata::model::{Aggregator, Calculation, Dimension, DimensionSpec, Filter, PostAggregator};
use strata::query::{BuildError, DataSource, FieldValue, Query, QueryBuilder};
use strata::unique::ExactCount;

fn inner(query: &Query) -> &Query {
    match &query.data_source {
        DataSource::Query(inner) => inner,
        other => panic!("Expected nested query, got {:?}", other),
    }
}

#[test]
fn test_rewrites_into_nested_query() {
    let settings = Settings::default();
    let calc = Calculation::new()
        .with_aggregator("orders", Aggregator::count())
        .with_unique_count("users", &ExactCount::new("user"));

    let prepared = QueryBuilder::new(&settings, "events")
        .dimension("country")
        .filter(Filter::selector("platform", "web"))
        .calculation(calc)
        .build()
        .unwrap();
    let outer = prepared.query();
    let nested = inner(outer);

    assert_eq!(
        nested.dimensions,
        vec![Dimension::plain("country"), Dimension::plain("user")]
    );
    assert_eq!(nested.filter, Filter::selector("platform", "web"));
    assert_eq!(nested.aggregations["orders"], Aggregator::count());
    assert_eq!(
        nested.aggregations["users__count"],
        Aggregator::filtered(!Filter::selector("user", ""), Aggregator::count())
    );
    assert!(matches!(
        nested.post_aggregations["users"],
        PostAggregator::Arithmetic { .. }
    ));

    assert_eq!(outer.dimensions, vec![Dimension::plain("country")]);
    assert_eq!(outer.aggregations["users"], Aggregator::long_sum("users"));
    assert_eq!(outer.aggregations["orders"], Aggregator::long_sum("orders"));
    assert!(outer.filter.is_empty());
}

#[test]
fn test_wire_form_nests_inner_query() {
    let settings = Settings::default();
    let calc = Calculation::new().with_unique_count("users", &ExactCount::new("user"));

    let mut prepared = QueryBuilder::new(&settings, "events")
        .dimension("country")
        .calculation(calc)
        .build()
        .unwrap();
    let wire = prepared.serialize().unwrap();

    assert_eq!(wire["queryType"], "groupBy");
    assert_eq!(wire["dataSource"]["type"], "query");
    assert_eq!(wire["dataSource"]["query"]["dataSource"], "events");
    assert_eq!(
        wire["dataSource"]["query"]["dimensions"],
        json!(["country", "user"])
    );
    assert_eq!(
        wire["aggregations"],
        json!([{"type": "longSum", "name": "users", "fieldName": "users"}])
    );
    assert!(wire.get("filter").is_none());
}

#[test]
fn test_row_filter_becomes_inner_indicator() {
    let settings = Settings::default();
    let ios = Filter::selector("platform", "ios");
    let calc = Calculation::new()
        .with_unique_count("ios_users", &ExactCount::new("user").with_filter(ios.clone()));

    let prepared = QueryBuilder::new(&settings, "events")
        .dimension("country")
        .calculation(calc)
        .build()
        .unwrap();
    let nested = inner(prepared.query());

    assert_eq!(
        nested.aggregations["ios_users__count"],
        Aggregator::filtered(ios & !Filter::selector("user", ""), Aggregator::count())
    );
    assert!(matches!(
        nested.post_aggregations["ios_users"],
        PostAggregator::Arithmetic { .. }
    ));
}

#[test]
fn test_same_dimension_and_filter_computed_once() {
    let settings = Settings::default();
    let ios = Filter::selector("platform", "ios");

    let prepared = QueryBuilder::new(&settings, "events")
        .dimension("country")
        .calculation(
            Calculation::new()
                .with_unique_count("a", &ExactCount::new("user").with_filter(ios.clone())),
        )
        .calculation(
            Calculation::new()
                .with_unique_count("b", &ExactCount::new("user").with_filter(ios.clone())),
        )
        .build()
        .unwrap();
    let outer = prepared.query();
    let nested = inner(outer);

    assert_eq!(nested.aggregations.len(), 1);
    assert_eq!(nested.post_aggregations.len(), 1);
    assert_eq!(outer.aggregations["a"], Aggregator::long_sum("a"));
    assert_eq!(outer.aggregations["b"], Aggregator::long_sum("a"));
}

#[test]
fn test_different_dimensions_rejected() {
    let settings = Settings::default();
    let calc = Calculation::new()
        .with_unique_count("users", &ExactCount::new("user"))
        .with_unique_count("sessions", &ExactCount::new("session"));

    let result = QueryBuilder::new(&settings, "events")
        .calculation(calc)
        .build();
    assert!(matches!(
        result,
        Err(BuildError::IncompatibleModifier { .. })
    ));
}

#[test]
fn test_including_empty_keeps_inner_filter() {
    let settings = Settings::default();
    let calc = Calculation::new()
        .with_unique_count("users", &ExactCount::new("user").including_empty(true));

    let prepared = QueryBuilder::new(&settings, "events")
        .calculation(calc)
        .build()
        .unwrap();

    let nested = inner(prepared.query());
    assert!(nested.filter.is_empty());
    assert_eq!(
        nested.post_aggregations["users"],
        PostAggregator::constant(1.0)
    );
}

#[test]
fn test_shared_metrics_keep_empty_dimension_rows() {
    let settings = Settings::default();
    let calc = Calculation::new()
        .with_aggregator("orders", Aggregator::count())
        .with_aggregator("revenue", Aggregator::double_sum("amount"))
        .with_unique_count("users", &ExactCount::new("user"));

    let mut prepared = QueryBuilder::new(&settings, "events")
        .dimension("country")
        .calculation(calc)
        .build()
        .unwrap();
    let nested = inner(prepared.query());

    assert!(nested.filter.is_empty());
    assert_eq!(nested.aggregations["orders"], Aggregator::count());
    assert_eq!(nested.aggregations["revenue"], Aggregator::double_sum("amount"));

    let wire = prepared.serialize().unwrap();
    assert!(wire["dataSource"]["query"].get("filter").is_none());
}

#[test]
fn test_extraction_dimension_read_by_name() {
    let settings = Settings::default();
    let week = Dimension::Extraction(DimensionSpec::time("week", "xxxx-ww"));
    let calc = Calculation::new().with_unique_count("users", &ExactCount::new("user"));

    let mut prepared = QueryBuilder::new(&settings, "events")
        .dimension(week.clone())
        .calculation(calc)
        .build()
        .unwrap();

    assert_eq!(prepared.query().dimensions, vec![Dimension::plain("week")]);
    assert_eq!(
        inner(prepared.query()).dimensions,
        vec![week, Dimension::plain("user")]
    );

    let wire = prepared.serialize().unwrap();
    assert_eq!(wire["dimensions"], json!(["week"]));
    assert_eq!(wire["dataSource"]["query"]["dimensions"][0]["outputName"], "week");
}

#[test]
fn test_strict_null_exact_count() {
    let settings = Settings::default();
    let ios = Filter::selector("platform", "ios");
    let calc = Calculation::new()
        .with_unique_count("ios_users", &ExactCount::new("user").with_filter(ios.clone()))
        .strict_null("ios_users");

    let mut prepared = QueryBuilder::new(&settings, "events")
        .dimension("country")
        .calculation(calc)
        .build()
        .unwrap();
    assert_eq!(
        inner(prepared.query()).aggregations["ios_users__tracker"],
        Aggregator::filtered(ios, Aggregator::count())
    );
    assert_eq!(
        prepared.query().aggregations["ios_users__tracker"],
        Aggregator::long_sum("ios_users__tracker")
    );

    prepared.serialize().unwrap();
    let rows = prepared
        .parse_response(
            &json!([
                {"version": "v1", "timestamp": "t",
                 "event": {"country": "NZ", "ios_users": 0, "ios_users__tracker": 0}},
                {"version": "v1", "timestamp": "t",
                 "event": {"country": "AU", "ios_users": 3, "ios_users__tracker": 9}}
            ]),
            None,
        )
        .unwrap();
    assert_eq!(rows[0].get("ios_users"), Some(&FieldValue::Null));
    assert_eq!(rows[1].get("ios_users"), Some(&FieldValue::Int(3)));
}
