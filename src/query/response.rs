//! Decoding datastore responses into typed rows.
//!
//! Rows arrive in one of three shapes:
//!
//! - `{"timestamp": .., "result": {..}}` (timeseries)
//! - `{"version": .., "timestamp": .., "event": {..}}` (groupBy)
//! - positional arrays matching a header, when `resultAsArray` is set
//!
//! Decoding a single bad field never fails the response: the field is
//! logged and becomes null.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use super::native::{Query, SubtotalConfig, RESULT_AS_ARRAY};
use super::{BuildError, BuildResult};

const TIMESTAMP: &str = "timestamp";

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Int(i64),
    Float(f64),
    String(String),
    /// Structured values such as serialized sketches.
    Json(Value),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn from_number(value: &Value) -> Option<Self> {
        let n = value.as_number()?;
        Some(match n.as_i64() {
            Some(i) => FieldValue::Int(i),
            None => FieldValue::Float(n.as_f64()?),
        })
    }

    /// Decode a dimension value.
    fn dimension(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::String(s) => FieldValue::String(s.clone()),
            Value::Number(_) => FieldValue::from_number(value).unwrap_or(FieldValue::Null),
            other => FieldValue::Json(other.clone()),
        }
    }

    /// Decode a metric value, mapping the non-finite sentinels the
    /// datastore sends as strings.
    fn metric(field: &str, value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Number(_) => FieldValue::from_number(value).unwrap_or(FieldValue::Null),
            Value::String(s) => match s.as_str() {
                "NaN" => FieldValue::Float(f64::NAN),
                "Infinity" => FieldValue::Float(f64::INFINITY),
                "-Infinity" => FieldValue::Float(f64::NEG_INFINITY),
                other => {
                    warn!(field = %field, value = %other, "unexpected string in numeric field");
                    FieldValue::Null
                }
            },
            other => FieldValue::Json(other.clone()),
        }
    }
}

/// One decoded result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub timestamp: Option<String>,
    pub values: BTreeMap<String, FieldValue>,
    /// Index of the subtotal group the row belongs to; 0 is the fully
    /// grouped rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtotal_group: Option<usize>,
}

impl ResultRow {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn is_subtotal(&self) -> bool {
        matches!(self.subtotal_group, Some(g) if g > 0)
    }
}

/// What the decoder needs to know about the query that produced a response.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodePlan {
    pub dimensions: Vec<String>,
    pub metrics: BTreeSet<String>,
    /// Strict-null field to the tracker deciding whether it is null.
    pub strict_null: BTreeMap<String, String>,
    /// Fields computed for internal use and removed from rows.
    pub internal: BTreeSet<String>,
    pub subtotals: Option<SubtotalConfig>,
    pub header: Vec<String>,
    pub array_rows: bool,
}

impl DecodePlan {
    pub fn for_query(
        query: &Query,
        strict_null: BTreeMap<String, String>,
        internal: BTreeSet<String>,
    ) -> Self {
        Self {
            dimensions: query.dimension_names(),
            metrics: query
                .aggregations
                .keys()
                .chain(query.post_aggregations.keys())
                .cloned()
                .collect(),
            strict_null,
            internal,
            subtotals: query.subtotals.clone(),
            header: query.default_header(),
            array_rows: query.context_flag(RESULT_AS_ARRAY).unwrap_or(false),
        }
    }

    /// Decode a full response body.
    pub fn decode(&self, response: &Value, header: Option<&[String]>) -> BuildResult<Vec<ResultRow>> {
        let rows = response
            .as_array()
            .ok_or_else(|| BuildError::InvalidResponse("expected a JSON array of rows".into()))?;
        let header = header.unwrap_or(self.header.as_slice());
        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                let (timestamp, fields) = self.split_row(i, row, header)?;
                Ok(self.decode_fields(timestamp, &fields))
            })
            .collect()
    }

    /// Timestamp and raw field map of one row, whatever its shape.
    fn split_row(
        &self,
        index: usize,
        row: &Value,
        header: &[String],
    ) -> BuildResult<(Option<String>, Map<String, Value>)> {
        let invalid =
            |message: String| BuildError::InvalidResponse(format!("row {}: {}", index, message));

        match row {
            Value::Array(values) => {
                if values.len() != header.len() {
                    return Err(invalid(format!(
                        "{} values for a header of {} columns",
                        values.len(),
                        header.len()
                    )));
                }
                let mut fields: Map<String, Value> = header
                    .iter()
                    .cloned()
                    .zip(values.iter().cloned())
                    .collect();
                let timestamp = fields
                    .remove(TIMESTAMP)
                    .and_then(|t| t.as_str().map(str::to_string));
                Ok((timestamp, fields))
            }
            Value::Object(object) => {
                let timestamp = object
                    .get(TIMESTAMP)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let fields = object
                    .get("result")
                    .or_else(|| object.get("event"))
                    .and_then(Value::as_object)
                    .ok_or_else(|| invalid("missing `result` or `event` object".into()))?;
                Ok((timestamp, fields.clone()))
            }
            _ => Err(invalid("unrecognized row shape".into())),
        }
    }

    fn decode_fields(&self, timestamp: Option<String>, fields: &Map<String, Value>) -> ResultRow {
        let mut values = BTreeMap::new();
        for (name, raw) in fields {
            let value = if self.metrics.contains(name) {
                FieldValue::metric(name, raw)
            } else {
                FieldValue::dimension(raw)
            };
            values.insert(name.clone(), value);
        }

        for (field, tracker) in &self.strict_null {
            let seen = values
                .get(tracker)
                .and_then(FieldValue::as_f64)
                .is_some_and(|count| count != 0.0);
            if !seen {
                if let Some(value) = values.get_mut(field) {
                    *value = FieldValue::Null;
                }
            }
        }
        for internal in &self.internal {
            values.remove(internal);
        }

        let subtotal_group = self.subtotals.as_ref().and_then(|subtotals| {
            let present: BTreeSet<&str> = self
                .dimensions
                .iter()
                .map(String::as_str)
                .filter(|d| values.get(*d).is_some_and(|v| !v.is_null()))
                .collect();
            let group = subtotals.group_for(&present)?;
            for dimension in &self.dimensions {
                if !present.contains(dimension.as_str()) {
                    values.insert(
                        dimension.clone(),
                        FieldValue::String(subtotals.label.clone()),
                    );
                }
            }
            Some(group)
        });

        ResultRow {
            timestamp,
            values,
            subtotal_group,
        }
    }
}
