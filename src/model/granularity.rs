//! Time bucketing of query results.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::dimension::DimensionSpec;

/// Named time bucket, ordered finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GranularityUnit {
    None,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
    All,
}

impl GranularityUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            GranularityUnit::None => "none",
            GranularityUnit::Minute => "minute",
            GranularityUnit::Hour => "hour",
            GranularityUnit::Day => "day",
            GranularityUnit::Week => "week",
            GranularityUnit::Month => "month",
            GranularityUnit::Quarter => "quarter",
            GranularityUnit::Year => "year",
            GranularityUnit::All => "all",
        }
    }

    /// Parse a granularity name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(GranularityUnit::None),
            "minute" => Some(GranularityUnit::Minute),
            "hour" => Some(GranularityUnit::Hour),
            "day" => Some(GranularityUnit::Day),
            "week" => Some(GranularityUnit::Week),
            "month" => Some(GranularityUnit::Month),
            "quarter" => Some(GranularityUnit::Quarter),
            "year" => Some(GranularityUnit::Year),
            "all" => Some(GranularityUnit::All),
            _ => None,
        }
    }
}

impl fmt::Display for GranularityUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Granularity {
    Simple(GranularityUnit),

    /// One bucket per listed interval.
    Arbitrary { intervals: Vec<String> },

    /// Buckets produced by a time-format extraction dimension; the query
    /// itself runs at `all` granularity and groups on the dimension.
    Dimension(DimensionSpec),
}

impl Default for Granularity {
    fn default() -> Self {
        Granularity::Simple(GranularityUnit::All)
    }
}

impl Granularity {
    pub fn all() -> Self {
        Granularity::Simple(GranularityUnit::All)
    }

    pub fn arbitrary(intervals: Vec<String>) -> Self {
        Granularity::Arbitrary { intervals }
    }

    /// The dimension spec this granularity groups on, if any.
    pub fn dimension(&self) -> Option<&DimensionSpec> {
        match self {
            Granularity::Dimension(spec) => Some(spec),
            _ => None,
        }
    }

    /// Unit used when comparing against other granularities. Arbitrary
    /// buckets are treated as coarsest.
    pub fn unit(&self) -> GranularityUnit {
        match self {
            Granularity::Simple(unit) => *unit,
            Granularity::Arbitrary { .. } => GranularityUnit::All,
            Granularity::Dimension(spec) => spec.time_unit().unwrap_or(GranularityUnit::All),
        }
    }

    pub fn to_druid(&self) -> Value {
        match self {
            Granularity::Simple(unit) => json!(unit.as_str()),
            Granularity::Arbitrary { intervals } => json!({
                "type": "arbitrary",
                "intervals": intervals,
            }),
            Granularity::Dimension(_) => json!(GranularityUnit::All.as_str()),
        }
    }
}
