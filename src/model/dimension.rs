//! Grouping dimensions.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::filter::TIME_DIMENSION;
use super::granularity::GranularityUnit;

/// Time-format extraction applied to a dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeFormat {
    pub format: String,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    /// Bucket width the format represents, when known.
    #[serde(default)]
    pub granularity: Option<GranularityUnit>,
}

/// Dimension computed through an extraction function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionSpec {
    #[serde(default = "default_time_dimension")]
    pub dimension: String,
    pub output_name: String,
    pub time_format: TimeFormat,
}

fn default_time_dimension() -> String {
    TIME_DIMENSION.to_string()
}

impl DimensionSpec {
    /// Time-format extraction on the time column.
    pub fn time(output_name: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            dimension: TIME_DIMENSION.to_string(),
            output_name: output_name.into(),
            time_format: TimeFormat {
                format: format.into(),
                time_zone: None,
                locale: None,
                granularity: None,
            },
        }
    }

    pub fn with_unit(mut self, unit: GranularityUnit) -> Self {
        self.time_format.granularity = Some(unit);
        self
    }

    pub fn time_unit(&self) -> Option<GranularityUnit> {
        self.time_format.granularity
    }

    pub fn to_druid(&self) -> Value {
        let mut extraction = json!({
            "type": "timeFormat",
            "format": self.time_format.format,
        });
        if let Some(tz) = &self.time_format.time_zone {
            extraction["timeZone"] = json!(tz);
        }
        if let Some(locale) = &self.time_format.locale {
            extraction["locale"] = json!(locale);
        }
        if let Some(unit) = &self.time_format.granularity {
            extraction["granularity"] = json!(unit.as_str());
        }
        json!({
            "type": "extraction",
            "dimension": self.dimension,
            "outputName": self.output_name,
            "extractionFn": extraction,
        })
    }
}

/// A grouping dimension: a plain column or an extraction spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dimension {
    Plain(String),
    Extraction(DimensionSpec),
}

impl Dimension {
    pub fn plain(name: impl Into<String>) -> Self {
        Dimension::Plain(name.into())
    }

    /// Name of the column this dimension produces in result rows.
    pub fn output_name(&self) -> &str {
        match self {
            Dimension::Plain(name) => name,
            Dimension::Extraction(spec) => &spec.output_name,
        }
    }

    pub fn is_plain(&self) -> bool {
        matches!(self, Dimension::Plain(_))
    }

    pub fn to_druid(&self) -> Value {
        match self {
            Dimension::Plain(name) => json!(name),
            Dimension::Extraction(spec) => spec.to_druid(),
        }
    }
}

impl From<&str> for Dimension {
    fn from(name: &str) -> Self {
        Dimension::plain(name)
    }
}
