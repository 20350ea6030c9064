//! Row filters.
//!
//! `Filter::Empty` is the identity element for both `&` and `|`: combining
//! it with any filter yields the other filter unchanged. It stands for
//! "no restriction known", not for boolean true, so it is never emitted on
//! the wire.

use std::collections::BTreeSet;
use std::ops::{BitAnd, BitOr, Not};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::hash::hash_str;

/// Dimension holding the row timestamp.
pub const TIME_DIMENSION: &str = "__time";

/// A row filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Filter {
    #[default]
    Empty,

    Selector {
        dimension: String,
        value: Option<String>,
    },

    In {
        dimension: String,
        values: BTreeSet<String>,
    },

    /// Matches rows whose dimension falls in any of the ISO intervals.
    Interval {
        dimension: String,
        intervals: Vec<String>,
    },

    Regex {
        dimension: String,
        pattern: String,
    },

    ColumnComparison {
        dimensions: Vec<String>,
    },

    #[serde(rename_all = "camelCase")]
    Bound {
        dimension: String,
        lower: Option<String>,
        upper: Option<String>,
        #[serde(default)]
        lower_strict: bool,
        #[serde(default)]
        upper_strict: bool,
        ordering: String,
    },

    And {
        fields: Vec<Filter>,
    },

    Or {
        fields: Vec<Filter>,
    },

    Not {
        field: Box<Filter>,
    },
}

/// Coarse classification used by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Empty,
    Leaf,
    And,
    Or,
    Not,
}

impl Filter {
    pub fn selector(dimension: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Selector {
            dimension: dimension.into(),
            value: Some(value.into()),
        }
    }

    /// Selector matching rows where the dimension is null.
    pub fn is_null(dimension: impl Into<String>) -> Self {
        Filter::Selector {
            dimension: dimension.into(),
            value: None,
        }
    }

    pub fn in_values<I, S>(dimension: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::In {
            dimension: dimension.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Interval filter on the time column.
    pub fn time_intervals(intervals: Vec<String>) -> Self {
        Filter::Interval {
            dimension: TIME_DIMENSION.to_string(),
            intervals,
        }
    }

    pub fn regex(dimension: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::Regex {
            dimension: dimension.into(),
            pattern: pattern.into(),
        }
    }

    pub fn column_comparison(dimensions: Vec<String>) -> Self {
        Filter::ColumnComparison { dimensions }
    }

    /// Numeric lower bound, `dimension >= lower`.
    pub fn numeric_at_least(dimension: impl Into<String>, lower: impl Into<String>) -> Self {
        Filter::Bound {
            dimension: dimension.into(),
            lower: Some(lower.into()),
            upper: None,
            lower_strict: false,
            upper_strict: false,
            ordering: "numeric".to_string(),
        }
    }

    /// AND of all filters; empties are skipped.
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Self {
        filters.into_iter().fold(Filter::Empty, |acc, f| acc & f)
    }

    /// OR of all filters; empties are skipped.
    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Self {
        filters.into_iter().fold(Filter::Empty, |acc, f| acc | f)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Filter::Empty)
    }

    pub fn kind(&self) -> FilterKind {
        match self {
            Filter::Empty => FilterKind::Empty,
            Filter::And { .. } => FilterKind::And,
            Filter::Or { .. } => FilterKind::Or,
            Filter::Not { .. } => FilterKind::Not,
            _ => FilterKind::Leaf,
        }
    }

    /// Key used to deduplicate sibling filters.
    ///
    /// Only the dimension-selector family (`selector`, `in`, `interval`,
    /// and `not`/`and`/`or` built purely from those) has a key. Everything
    /// else returns `None` and is never deduplicated.
    pub fn dedup_key(&self) -> Option<String> {
        self.canonical().map(|c| hash_str(&c))
    }

    fn canonical(&self) -> Option<String> {
        match self {
            Filter::Selector { dimension, value } => Some(format!(
                "selector({:?},{:?})",
                dimension,
                value.as_deref()
            )),
            Filter::In { dimension, values } => {
                Some(format!("in({:?},{:?})", dimension, values))
            }
            Filter::Interval {
                dimension,
                intervals,
            } => {
                let sorted: BTreeSet<&String> = intervals.iter().collect();
                Some(format!("interval({:?},{:?})", dimension, sorted))
            }
            Filter::Not { field } => field.canonical().map(|c| format!("not({})", c)),
            Filter::And { fields } => Self::canonical_children("and", fields),
            Filter::Or { fields } => Self::canonical_children("or", fields),
            _ => None,
        }
    }

    fn canonical_children(op: &str, fields: &[Filter]) -> Option<String> {
        // Children are order-insensitive under AND/OR
        let children = fields
            .iter()
            .map(Filter::canonical)
            .collect::<Option<BTreeSet<String>>>()?;
        Some(format!(
            "{}({})",
            op,
            children.into_iter().collect::<Vec<_>>().join(",")
        ))
    }

    /// Druid wire form. `Empty` becomes JSON null.
    pub fn to_druid(&self) -> Value {
        match self {
            Filter::Empty => Value::Null,
            Filter::Selector { dimension, value } => json!({
                "type": "selector",
                "dimension": dimension,
                "value": value,
            }),
            Filter::In { dimension, values } => json!({
                "type": "in",
                "dimension": dimension,
                "values": values,
            }),
            Filter::Interval {
                dimension,
                intervals,
            } => json!({
                "type": "interval",
                "dimension": dimension,
                "intervals": intervals,
            }),
            Filter::Regex { dimension, pattern } => json!({
                "type": "regex",
                "dimension": dimension,
                "pattern": pattern,
            }),
            Filter::ColumnComparison { dimensions } => json!({
                "type": "columnComparison",
                "dimensions": dimensions,
            }),
            Filter::Bound {
                dimension,
                lower,
                upper,
                lower_strict,
                upper_strict,
                ordering,
            } => {
                let mut out = json!({
                    "type": "bound",
                    "dimension": dimension,
                    "lowerStrict": lower_strict,
                    "upperStrict": upper_strict,
                    "ordering": ordering,
                });
                if let Some(lower) = lower {
                    out["lower"] = json!(lower);
                }
                if let Some(upper) = upper {
                    out["upper"] = json!(upper);
                }
                out
            }
            Filter::And { fields } => json!({
                "type": "and",
                "fields": Self::druid_children(fields),
            }),
            Filter::Or { fields } => json!({
                "type": "or",
                "fields": Self::druid_children(fields),
            }),
            Filter::Not { field } => json!({
                "type": "not",
                "field": field.to_druid(),
            }),
        }
    }

    fn druid_children(fields: &[Filter]) -> Vec<Value> {
        fields
            .iter()
            .filter(|f| !f.is_empty())
            .map(Filter::to_druid)
            .collect()
    }
}

impl BitAnd for Filter {
    type Output = Filter;

    fn bitand(self, rhs: Filter) -> Filter {
        match (self, rhs) {
            (Filter::Empty, f) | (f, Filter::Empty) => f,
            (a, b) => Filter::And { fields: vec![a, b] },
        }
    }
}

impl BitOr for Filter {
    type Output = Filter;

    fn bitor(self, rhs: Filter) -> Filter {
        match (self, rhs) {
            (Filter::Empty, f) | (f, Filter::Empty) => f,
            (a, b) => Filter::Or { fields: vec![a, b] },
        }
    }
}

impl Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        match self {
            Filter::Empty => Filter::Empty,
            f => Filter::Not { field: Box::new(f) },
        }
    }
}
