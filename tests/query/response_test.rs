use serde_json::json;
use strata::config::Settings;
use strata::model::{Aggregator, Calculation};
use strata::query::{BuildError, FieldValue, PreparedQuery, QueryBuilder};

fn prepared(array_rows: bool) -> PreparedQuery {
    let settings = Settings::default();
    let calc = Calculation::new()
        .with_aggregator("revenue", Aggregator::double_sum("amount"))
        .with_aggregator("orders", Aggregator::count())
        .with_formula("aov", "revenue / orders")
        .unwrap();

    let mut builder = QueryBuilder::new(&settings, "events")
        .interval("2024-01-01/2024-02-01")
        .calculation(calc);
    if array_rows {
        builder = builder.context("resultAsArray", true);
    }
    let mut prepared = builder.build().unwrap();
    prepared.serialize().unwrap();
    prepared
}

#[test]
fn test_default_header_order() {
    let prepared = prepared(true);
    assert_eq!(
        prepared.decode_plan().header,
        vec!["timestamp", "orders", "revenue", "aov"]
    );
}

#[test]
fn test_array_rows() {
    let mut prepared = prepared(true);
    let rows = prepared
        .parse_response(&json!([["2024-01-01T00:00:00.000Z", 4, 10.5, 2.625]]), None)
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timestamp.as_deref(), Some("2024-01-01T00:00:00.000Z"));
    assert_eq!(rows[0].get("orders"), Some(&FieldValue::Int(4)));
    assert_eq!(rows[0].get("revenue"), Some(&FieldValue::Float(10.5)));
    assert_eq!(rows[0].get("aov").and_then(FieldValue::as_f64), Some(2.625));
}

#[test]
fn test_array_rows_with_caller_header() {
    let mut prepared = prepared(true);
    let header: Vec<String> = ["timestamp", "aov", "orders", "revenue"]
        .into_iter()
        .map(String::from)
        .collect();
    let rows = prepared
        .parse_response(&json!([["t", 2.0, 5, 10.0]]), Some(header.as_slice()))
        .unwrap();

    assert_eq!(rows[0].get("orders"), Some(&FieldValue::Int(5)));
    assert_eq!(rows[0].get("aov"), Some(&FieldValue::Float(2.0)));
}

#[test]
fn test_non_finite_sentinels() {
    let mut prepared = prepared(false);
    let rows = prepared
        .parse_response(
            &json!([
                {"timestamp": "t1", "result": {"orders": 0, "revenue": 0.0, "aov": "NaN"}},
                {"timestamp": "t2", "result": {"orders": 0, "revenue": 1.0, "aov": "Infinity"}}
            ]),
            None,
        )
        .unwrap();

    assert!(rows[0]
        .get("aov")
        .and_then(FieldValue::as_f64)
        .is_some_and(f64::is_nan));
    assert_eq!(rows[1].get("aov"), Some(&FieldValue::Float(f64::INFINITY)));
}

#[test]
fn test_garbage_metric_becomes_null() {
    let mut prepared = prepared(false);
    let rows = prepared
        .parse_response(
            &json!([{"timestamp": "t", "result": {"orders": "lots", "revenue": 3.5}}]),
            None,
        )
        .unwrap();

    assert_eq!(rows[0].get("orders"), Some(&FieldValue::Null));
    assert_eq!(rows[0].get("revenue"), Some(&FieldValue::Float(3.5)));
}

#[test]
fn test_unrecognized_row_rejected() {
    let mut prepared = prepared(false);
    assert!(matches!(
        prepared.parse_response(&json!([42]), None),
        Err(BuildError::InvalidResponse(_))
    ));
}

#[test]
fn test_rows_serialize() {
    let mut prepared = prepared(false);
    let rows = prepared
        .parse_response(
            &json!([{"timestamp": "t", "result": {"orders": 2, "revenue": 5.0, "aov": null}}]),
            None,
        )
        .unwrap();

    assert_eq!(
        serde_json::to_value(&rows).unwrap(),
        json!([{
            "timestamp": "t",
            "values": {"aov": null, "orders": 2, "revenue": 5.0}
        }])
    );
}
