use std::collections::BTreeMap;

use serde_json::json;
use strata::aggregation::{Aggregation, QueryDependent, StockAggregation};
use strata::config::Settings;
use strata::model::{
    Aggregator, Calculation, Filter, Granularity, GranularityUnit, PostAggregator, TIME_DIMENSION,
};
use strata::query::{BuildError, FieldValue, QueryBuilder, QueryState, QueryType};

fn orders() -> Calculation {
    Calculation::new().with_aggregator("orders", Aggregator::count())
}

#[test]
fn test_no_dimensions_becomes_timeseries() {
    let settings = Settings::default();
    let mut prepared = QueryBuilder::new(&settings, "events")
        .interval("2024-01-01/2024-02-01")
        .calculation(orders())
        .build()
        .unwrap();

    assert_eq!(prepared.query().query_type, QueryType::Timeseries);
    let wire = prepared.serialize().unwrap();
    assert_eq!(wire["queryType"], "timeseries");
    assert_eq!(wire["context"]["skipEmptyBuckets"], true);
    assert!(wire.get("dimensions").is_none());
}

#[test]
fn test_caller_skip_empty_buckets_kept() {
    let settings = Settings::default();
    let mut prepared = QueryBuilder::new(&settings, "events")
        .calculation(orders())
        .context("skipEmptyBuckets", false)
        .build()
        .unwrap();

    let wire = prepared.serialize().unwrap();
    assert_eq!(wire["context"]["skipEmptyBuckets"], false);
}

#[test]
fn test_single_arbitrary_bucket_collapses_to_all() {
    let settings = Settings::default();
    let prepared = QueryBuilder::new(&settings, "events")
        .granularity(Granularity::arbitrary(vec![
            "2024-01-01T00:00:00Z/2024-01-08T00:00:00Z".to_string(),
        ]))
        .dimension("country")
        .calculation(orders())
        .build()
        .unwrap();
    let query = prepared.query();

    assert_eq!(query.granularity, Granularity::all());
    assert_eq!(
        query.intervals,
        vec!["2024-01-01T00:00:00Z/2024-01-08T00:00:00Z".to_string()]
    );
    assert_eq!(query.query_type, QueryType::GroupBy);
}

#[test]
fn test_intervals_sorted_and_merged() {
    let settings = Settings::default();
    let prepared = QueryBuilder::new(&settings, "events")
        .interval("2024-03-01/2024-04-01")
        .interval("2024-01-01/2024-02-01")
        .interval("2024-01-20/2024-02-10")
        .calculation(orders())
        .build()
        .unwrap();

    assert_eq!(
        prepared.query().intervals,
        vec![
            "2024-01-01T00:00:00Z/2024-02-10T00:00:00Z".to_string(),
            "2024-03-01T00:00:00Z/2024-04-01T00:00:00Z".to_string(),
        ]
    );
}

#[test]
fn test_aggregation_filter_anded_with_dimension_filter() {
    let settings = Settings::default();
    let calc = Calculation::new()
        .with_aggregator(
            "ios",
            Aggregator::filtered(Filter::selector("platform", "ios"), Aggregator::count()),
        )
        .with_aggregator(
            "android",
            Aggregator::filtered(Filter::selector("platform", "android"), Aggregator::count()),
        );

    let prepared = QueryBuilder::new(&settings, "events")
        .dimension("country")
        .filter(Filter::selector("country", "NZ"))
        .calculation(calc)
        .build()
        .unwrap();

    assert_eq!(
        prepared.query().filter,
        Filter::And {
            fields: vec![
                Filter::selector("country", "NZ"),
                Filter::Or {
                    fields: vec![
                        Filter::selector("platform", "android"),
                        Filter::selector("platform", "ios"),
                    ],
                },
            ],
        }
    );
}

#[test]
fn test_unfiltered_aggregator_disables_aggregation_filter() {
    let settings = Settings::default();
    let calc = orders().with_aggregator(
        "ios",
        Aggregator::filtered(Filter::selector("platform", "ios"), Aggregator::count()),
    );

    let prepared = QueryBuilder::new(&settings, "events")
        .dimension("country")
        .calculation(calc)
        .build()
        .unwrap();

    assert!(prepared.query().filter.is_empty());
}

#[test]
fn test_combinations_or_of_ands() {
    let mut settings = Settings::default();
    settings
        .dimensions
        .id_columns
        .insert("store".to_string(), "store_id".to_string());
    let combinations = vec![
        BTreeMap::from([
            ("region".to_string(), "north".to_string()),
            ("store".to_string(), "17".to_string()),
        ]),
        BTreeMap::from([("region".to_string(), "south".to_string())]),
    ];

    let prepared = QueryBuilder::new(&settings, "sales")
        .dimension("region")
        .combinations(&combinations)
        .calculation(orders())
        .build()
        .unwrap();

    assert_eq!(
        prepared.query().filter,
        Filter::Or {
            fields: vec![
                Filter::And {
                    fields: vec![
                        Filter::selector("region", "north"),
                        Filter::selector("store_id", "17"),
                    ],
                },
                Filter::selector("region", "south"),
            ],
        }
    );
}

#[test]
fn test_subtotals_spec_and_filter_workaround() {
    let settings = Settings::default();
    let calc = Calculation::new().with_aggregator(
        "web_orders",
        Aggregator::filtered(Filter::selector("channel", "web"), Aggregator::count()),
    );

    let mut prepared = QueryBuilder::new(&settings, "events")
        .dimension("country")
        .dimension("city")
        .subtotals(["city"])
        .calculation(calc)
        .build()
        .unwrap();

    assert_eq!(
        prepared.query().filter,
        Filter::Or {
            fields: vec![
                Filter::selector("channel", "web"),
                Filter::numeric_at_least(TIME_DIMENSION, "0"),
            ],
        }
    );
    let wire = prepared.serialize().unwrap();
    assert_eq!(wire["subtotalsSpec"], json!([["country", "city"], ["country"]]));
}

#[test]
fn test_unknown_subtotal_dimension() {
    let settings = Settings::default();
    let result = QueryBuilder::new(&settings, "events")
        .dimension("country")
        .subtotals(["city"])
        .calculation(orders())
        .build();
    assert!(matches!(
        result,
        Err(BuildError::UnknownSubtotalDimension(d)) if d == "city"
    ));
}

#[test]
fn test_subtotal_rows_labelled() {
    let settings = Settings::default();
    let mut prepared = QueryBuilder::new(&settings, "events")
        .dimension("country")
        .dimension("city")
        .subtotals(["city"])
        .calculation(orders())
        .build()
        .unwrap();
    prepared.serialize().unwrap();

    let rows = prepared
        .parse_response(
            &json!([
                {"version": "v1", "timestamp": "2024-01-01T00:00:00.000Z",
                 "event": {"country": "NZ", "city": "Auckland", "orders": 3}},
                {"version": "v1", "timestamp": "2024-01-01T00:00:00.000Z",
                 "event": {"country": "NZ", "orders": 5}}
            ]),
            None,
        )
        .unwrap();

    assert_eq!(rows[0].subtotal_group, Some(0));
    assert!(!rows[0].is_subtotal());
    assert_eq!(rows[1].subtotal_group, Some(1));
    assert_eq!(
        rows[1].get("city"),
        Some(&FieldValue::String("Total".to_string()))
    );
    assert_eq!(rows[1].get("orders"), Some(&FieldValue::Int(5)));
}

#[test]
fn test_strict_null_round_trip() {
    let settings = Settings::default();
    let calc = Calculation::new()
        .with_aggregator(
            "nz_visits",
            Aggregator::filtered(
                Filter::selector("country", "NZ"),
                Aggregator::long_sum("visits"),
            ),
        )
        .strict_null("nz_visits");

    let mut prepared = QueryBuilder::new(&settings, "events")
        .dimension("city")
        .calculation(calc)
        .build()
        .unwrap();
    assert_eq!(
        prepared.query().aggregations["nz_visits__tracker"],
        Aggregator::filtered(Filter::selector("country", "NZ"), Aggregator::count())
    );
    prepared.serialize().unwrap();

    let rows = prepared
        .parse_response(
            &json!([
                {"version": "v1", "timestamp": "t",
                 "event": {"city": "Sydney", "nz_visits": 0, "nz_visits__tracker": 0}},
                {"version": "v1", "timestamp": "t",
                 "event": {"city": "Auckland", "nz_visits": 0, "nz_visits__tracker": 4}},
                {"version": "v1", "timestamp": "t",
                 "event": {"city": "Wellington", "nz_visits": 12, "nz_visits__tracker": 2}}
            ]),
            None,
        )
        .unwrap();

    assert_eq!(rows[0].get("nz_visits"), Some(&FieldValue::Null));
    assert_eq!(rows[1].get("nz_visits"), Some(&FieldValue::Int(0)));
    assert_eq!(rows[2].get("nz_visits"), Some(&FieldValue::Int(12)));
    assert!(rows.iter().all(|r| r.get("nz_visits__tracker").is_none()));
}

#[test]
fn test_stock_resolved_against_query_granularity() {
    let settings = Settings::default();
    let calc = Calculation::new().with_aggregation(
        "balance",
        Aggregation::QueryDependent(QueryDependent::Stock(StockAggregation::new(
            Aggregator::long_sum("balance"),
            GranularityUnit::Day,
        ))),
    );

    let prepared = QueryBuilder::new(&settings, "accounts")
        .interval("2024-01-01/2024-03-01")
        .granularity(Granularity::Simple(GranularityUnit::Month))
        .calculation(calc)
        .build()
        .unwrap();

    assert_eq!(
        prepared.query().aggregations["balance"],
        Aggregator::filtered(
            Filter::time_intervals(vec![
                "2024-01-31T00:00:00Z/2024-02-01T00:00:00Z".to_string(),
                "2024-02-29T00:00:00Z/2024-03-01T00:00:00Z".to_string(),
            ]),
            Aggregator::long_sum("balance"),
        )
    );
}

#[test]
fn test_conflicting_calculations_rejected() {
    let settings = Settings::default();
    let result = QueryBuilder::new(&settings, "events")
        .calculation(Calculation::new().with_aggregator("x", Aggregator::count()))
        .calculation(Calculation::new().with_aggregator("x", Aggregator::long_sum("x")))
        .build();
    assert!(matches!(
        result,
        Err(BuildError::OuterAggregationConflict(name)) if name == "x"
    ));
}

#[test]
fn test_suffixed_calculations_share_query() {
    let settings = Settings::default();
    let base = Calculation::new()
        .with_aggregator("revenue", Aggregator::double_sum("amount"))
        .with_aggregator("orders", Aggregator::count())
        .with_formula("aov", "revenue / orders")
        .unwrap();

    let prepared = QueryBuilder::new(&settings, "events")
        .dimension("city")
        .calculation(base.with_suffix("_nz", &Filter::selector("country", "NZ")))
        .calculation(base.with_suffix("_au", &Filter::selector("country", "AU")))
        .build()
        .unwrap();
    let query = prepared.query();

    assert_eq!(query.aggregations.len(), 4);
    assert_eq!(
        query.post_aggregations["aov_au"],
        PostAggregator::Arithmetic {
            op: strata::model::ArithmeticOp::Divide,
            fields: vec![
                PostAggregator::field_access("revenue_au"),
                PostAggregator::field_access("orders_au"),
            ],
        }
    );
}

#[test]
fn test_state_machine() {
    let settings = Settings::default();
    let mut prepared = QueryBuilder::new(&settings, "events")
        .calculation(orders())
        .build()
        .unwrap();
    assert_eq!(prepared.state(), QueryState::Optimized);

    let early = prepared.parse_response(&json!([]), None);
    assert!(matches!(
        early,
        Err(BuildError::InvalidState {
            expected: QueryState::Serialized,
            actual: QueryState::Optimized,
        })
    ));

    let first = prepared.serialize().unwrap();
    let second = prepared.serialize().unwrap();
    assert_eq!(first, second);
    assert_eq!(prepared.state(), QueryState::Serialized);

    prepared
        .parse_response(&json!([{"timestamp": "t", "result": {"orders": 1}}]), None)
        .unwrap();
    assert_eq!(prepared.state(), QueryState::ResponseParsed);
    assert!(prepared.serialize().is_err());
    assert!(prepared.parse_response(&json!([]), None).is_err());
}

#[test]
fn test_single_row_guard() {
    let settings = Settings::default();
    let response = json!([
        {"timestamp": "t1", "result": {"orders": 1}},
        {"timestamp": "t2", "result": {"orders": 2}}
    ]);

    let mut prepared = QueryBuilder::new(&settings, "events")
        .calculation(orders())
        .build()
        .unwrap();
    prepared.serialize().unwrap();
    assert!(matches!(
        prepared.parse_single_row(&response, None),
        Err(BuildError::MalformedResult(_))
    ));

    let mut prepared = QueryBuilder::new(&settings, "events")
        .calculation(orders())
        .build()
        .unwrap();
    prepared.serialize().unwrap();
    let row = prepared
        .parse_single_row(&json!([{"timestamp": "t1", "result": {"orders": 1}}]), None)
        .unwrap()
        .unwrap();
    assert_eq!(row.get("orders"), Some(&FieldValue::Int(1)));
}
