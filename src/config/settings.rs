//! TOML-based configuration for Strata.
//!
//! Supports a config file (strata.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [sketch]
//! default_size = 16384
//!
//! # Smallest accurate size for a sketch over `user_id` when the query also
//! # groups by `country`
//! [sketch.size_hints.user_id]
//! country = 4096
//! city = 1024
//!
//! [dimensions.id_columns]
//! country = "country_id"
//! store = "${STORE_ID_COLUMN}"
//!
//! [query]
//! subtotal_label = "Total"
//! filter_depth_limit = 25
//! skip_empty_buckets = true
//! exclude_empty_string = true
//! ```
//!
//! Settings are loaded once at startup and handed to the query builder by
//! shared reference. They must not be mutated afterwards; nothing guards
//! against it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::unique::{DEFAULT_SKETCH_SIZE, MAX_SKETCH_SIZE, MIN_SKETCH_SIZE};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Sketch sizing.
    pub sketch: SketchSettings,

    /// Dimension metadata.
    pub dimensions: DimensionSettings,

    /// Query construction defaults.
    pub query: QuerySettings,
}

/// Sketch sizing configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SketchSettings {
    /// Theta sketch size when none is given.
    pub default_size: u32,

    /// Sketch field to grouping dimension to the smallest size that stays
    /// accurate when grouped by that dimension.
    pub size_hints: BTreeMap<String, BTreeMap<String, u32>>,
}

impl Default for SketchSettings {
    fn default() -> Self {
        Self {
            default_size: DEFAULT_SKETCH_SIZE,
            size_hints: BTreeMap::new(),
        }
    }
}

impl SketchSettings {
    /// Size hint for a sketch over `field` when grouped by `dimension`.
    pub fn size_hint(&self, field: &str, dimension: &str) -> Option<u32> {
        self.size_hints.get(field)?.get(dimension).copied()
    }
}

/// Dimension metadata.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DimensionSettings {
    /// Dimension to the column holding its stable ID (supports ${ENV_VAR}
    /// expansion).
    pub id_columns: BTreeMap<String, String>,
}

impl DimensionSettings {
    /// Column to filter on for `dimension`: its ID column if one is
    /// configured, otherwise the dimension itself.
    pub fn filter_column<'a>(&'a self, dimension: &'a str) -> &'a str {
        self.id_columns
            .get(dimension)
            .map(String::as_str)
            .unwrap_or(dimension)
    }
}

/// Query construction defaults.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Value written into rolled-up dimensions of subtotal rows.
    pub subtotal_label: String,

    /// Nesting depth past which filters are left unnormalized.
    pub filter_depth_limit: usize,

    /// Default for the timeseries `skipEmptyBuckets` context flag.
    pub skip_empty_buckets: bool,

    /// Leave the empty string out of exact unique counts by default.
    pub exclude_empty_string: bool,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            subtotal_label: "Total".to_string(),
            filter_depth_limit: 25,
            skip_empty_buckets: true,
            exclude_empty_string: true,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse settings from TOML text, expanding environment variables and
    /// validating sizes.
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let mut settings: Settings = toml::from_str(content)?;
        for column in settings.dimensions.id_columns.values_mut() {
            *column = expand_env_vars(column)?;
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `STRATA_CONFIG`
    /// 2. `./strata.toml`
    /// 3. `~/.config/strata/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("STRATA_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("strata.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("strata").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let in_range = |size: u32| (MIN_SKETCH_SIZE..=MAX_SKETCH_SIZE).contains(&size);
        if !in_range(self.sketch.default_size) {
            return Err(SettingsError::InvalidConfig(format!(
                "sketch.default_size {} outside {}..={}",
                self.sketch.default_size, MIN_SKETCH_SIZE, MAX_SKETCH_SIZE
            )));
        }
        for (field, hints) in &self.sketch.size_hints {
            for (dimension, size) in hints {
                if !in_range(*size) {
                    return Err(SettingsError::InvalidConfig(format!(
                        "sketch.size_hints.{}.{} = {} outside {}..={}",
                        field, dimension, size, MIN_SKETCH_SIZE, MAX_SKETCH_SIZE
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
