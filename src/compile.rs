//! End-to-end compilation from a JSON request to a native query.
//!
//! ```text
//! Request JSON → Calculations → QueryBuilder → PreparedQuery → Druid JSON
//! ```
//!
//! # Example
//!
//! ```
//! use strata::compile::compile_request;
//! use strata::config::Settings;
//!
//! let request = r#"{
//!     "dataSource": "events",
//!     "intervals": ["2024-01-01/2024-02-01"],
//!     "dimensions": ["country"],
//!     "calculations": [{
//!         "aggregations": {
//!             "revenue": {"type": "doubleSum", "fieldName": "amount"},
//!             "orders": {"type": "count"}
//!         },
//!         "formulas": {"aov": "revenue / orders"}
//!     }]
//! }"#;
//!
//! let mut prepared = compile_request(request, &Settings::default()).unwrap();
//! let wire = prepared.serialize().unwrap();
//! assert_eq!(wire["queryType"], "groupBy");
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::aggregation::{Aggregation, QueryDependent, StockAggregation};
use crate::config::{Settings, SettingsError};
use crate::formula::{self, FormulaError};
use crate::model::{
    Aggregator, Calculation, Dimension, Filter, Granularity, GranularityUnit, PostAggregator,
};
use crate::query::{BuildError, Having, PreparedQuery, QueryBuilder};
use crate::unique::{ExactCount, ThetaSketchCount};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during compilation.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Invalid request: {0}")]
    RequestError(#[from] serde_json::Error),

    #[error("Formula error: {0}")]
    FormulaError(#[from] FormulaError),

    #[error("Build error: {0}")]
    BuildError(#[from] BuildError),

    #[error("Settings error: {0}")]
    SettingsError(#[from] SettingsError),
}

pub type CompileResult<T> = Result<T, CompileError>;

// ============================================================================
// Request Types
// ============================================================================

/// A query request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub data_source: String,

    #[serde(default)]
    pub intervals: Vec<String>,

    #[serde(default)]
    pub granularity: Granularity,

    #[serde(default)]
    pub dimensions: Vec<Dimension>,

    #[serde(default)]
    pub filter: Filter,

    /// Dimension-value combinations, any of which a row may match.
    #[serde(default)]
    pub combinations: Vec<BTreeMap<String, String>>,

    #[serde(default)]
    pub calculations: Vec<CalculationSpec>,

    /// Dimensions to subtotal before.
    #[serde(default)]
    pub subtotals: Vec<String>,

    #[serde(default)]
    pub having: Option<Having>,

    #[serde(default)]
    pub context: Map<String, Value>,
}

/// One calculation of a request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalculationSpec {
    pub aggregations: BTreeMap<String, Aggregator>,

    /// Formulas compiled into post-aggregator trees.
    pub formulas: BTreeMap<String, String>,

    /// Formulas validated and sent as native expressions.
    pub native_formulas: BTreeMap<String, String>,

    pub post_aggregations: BTreeMap<String, PostAggregator>,

    pub exact_unique_counts: BTreeMap<String, ExactCountSpec>,

    pub sketch_counts: BTreeMap<String, SketchCountSpec>,

    pub stocks: BTreeMap<String, StockSpec>,

    pub strict_null: Vec<String>,

    /// Appended to every field name of this calculation.
    pub suffix: Option<String>,

    /// ANDed into every aggregation of this calculation.
    pub filter: Filter,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactCountSpec {
    pub dimension: String,

    #[serde(default)]
    pub filter: Filter,

    /// Count the empty string; defaults from settings.
    #[serde(default)]
    pub include_empty: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SketchCountSpec {
    pub fields: Vec<String>,

    #[serde(default)]
    pub size: Option<u64>,

    #[serde(default)]
    pub filter: Filter,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockSpec {
    pub aggregator: Aggregator,

    /// Granularity the stock is recorded at.
    pub granularity: GranularityUnit,
}

// ============================================================================
// Compilation Functions
// ============================================================================

impl CalculationSpec {
    pub fn to_calculation(&self, settings: &Settings) -> CompileResult<Calculation> {
        let mut calc = Calculation::new();

        for (name, aggregator) in &self.aggregations {
            calc = calc.with_aggregator(name, aggregator.clone());
        }

        for (name, stock) in &self.stocks {
            let stock = StockAggregation::new(stock.aggregator.clone(), stock.granularity);
            calc = calc.with_aggregation(
                name,
                Aggregation::QueryDependent(QueryDependent::Stock(stock)),
            );
        }

        for (name, spec) in &self.exact_unique_counts {
            let include_empty = spec
                .include_empty
                .unwrap_or(!settings.query.exclude_empty_string);
            let strategy = ExactCount::new(&spec.dimension)
                .with_filter(spec.filter.clone())
                .including_empty(include_empty);
            calc = calc.with_unique_count(name, &strategy);
        }

        for (name, spec) in &self.sketch_counts {
            let mut strategy =
                ThetaSketchCount::over(spec.fields.iter().cloned()).with_filter(spec.filter.clone());
            if let Some(size) = spec.size {
                strategy = strategy.with_size(size);
            }
            calc = calc.with_unique_count(name, &strategy);
        }

        for (name, post) in &self.post_aggregations {
            calc = calc.with_post_aggregator(name, post.clone());
        }

        for (name, expression) in &self.formulas {
            calc = calc.with_formula(name, expression)?;
        }

        for (name, expression) in &self.native_formulas {
            calc = calc.with_post_aggregator(name, formula::compile_native(expression)?);
        }

        for name in &self.strict_null {
            calc = calc.strict_null(name);
        }

        if self.suffix.is_some() || !self.filter.is_empty() {
            let suffix = self.suffix.as_deref().unwrap_or_default();
            calc = calc.with_suffix(suffix, &self.filter);
        }

        Ok(calc)
    }
}

impl QueryRequest {
    /// Builder holding everything in the request.
    pub fn to_builder<'a>(&self, settings: &'a Settings) -> CompileResult<QueryBuilder<'a>> {
        let mut builder = QueryBuilder::new(settings, &self.data_source)
            .intervals(self.intervals.iter().cloned())
            .granularity(self.granularity.clone())
            .filter(self.filter.clone())
            .subtotals(self.subtotals.iter().cloned());

        for dimension in &self.dimensions {
            builder = builder.dimension(dimension.clone());
        }
        if !self.combinations.is_empty() {
            builder = builder.combinations(&self.combinations);
        }
        for spec in &self.calculations {
            builder = builder.calculation(spec.to_calculation(settings)?);
        }
        if let Some(having) = &self.having {
            builder = builder.having(having.clone());
        }
        for (key, value) in &self.context {
            builder = builder.context(key, value.clone());
        }
        Ok(builder)
    }
}

/// Compile a JSON request into a prepared query.
pub fn compile_request(request: &str, settings: &Settings) -> CompileResult<PreparedQuery> {
    let request: QueryRequest = serde_json::from_str(request)?;
    Ok(request.to_builder(settings)?.build()?)
}
