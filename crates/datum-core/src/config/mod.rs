//! Stage configuration.
//!
//! Every stage reads a single flat map of `KEY: value` settings. The map is
//! assembled once per process from YAML files and directories (optionally
//! overlaid by recognised environment variables) and then handed to stage
//! constructors by reference. Nothing downstream reads the environment.

mod loader;
mod path;
mod vars;

pub use loader::{load_from_paths, overlay_env};
pub use path::{ConfigPath, is_yaml_file};
pub use vars::{InterpolationResult, interpolate, interpolate_with};

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde_yaml::Value;

use crate::error::ConfigError;
use crate::link::LinkMode;

/// Default number of in-flight tasks per stage.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Keys that may be taken from the process environment with `--env`.
pub const RECOGNIZED_KEYS: &[&str] = &[
    "IN_PATH",
    "DATA_PATH",
    "LOCATION_PATH",
    "EMPTY_FILE_PATH",
    "CALIBRATION_PATH",
    "SCHEMA_PATH",
    "THRESHOLD_PATH",
    "REPOSITORY_PATH",
    "OUT_PATH",
    "RELATIVE_PATH_INDEX",
    "SOURCE_TYPE_INDEX",
    "YEAR_INDEX",
    "MONTH_INDEX",
    "DAY_INDEX",
    "LOCATION_INDEX",
    "DATA_TYPE_INDEX",
    "SOURCE_ID_INDEX",
    "FILENAME_INDEX",
    "GROUP_INDEX",
    "LOCATION_SOURCE_TYPE_INDEX",
    "LOCATION_LOCATION_INDEX",
    "LOCATION_FILENAME_INDEX",
    "START_DATE",
    "END_DATE",
    "OUTPUT_DIRECTORIES",
    "WINDOW_SIZE",
    "PAD_DIRECTION",
    "WINDOW_POINT_THRESHOLDS",
    "WINDOW_SECOND_THRESHOLDS",
    "JOIN_CONFIG",
    "SOURCE_TYPE",
    "TERMS",
    "CONCURRENCY",
    "LOG_LEVEL",
    "SYMLINK",
];

/// Log verbosity selected by the `LOG_LEVEL` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// The flat settings map read by every stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: IndexMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build settings from key/value pairs. Later pairs replace earlier ones.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut settings = Self::new();
        for (key, value) in pairs {
            settings.insert(key, value);
        }
        settings
    }

    /// Parse a YAML mapping of settings.
    ///
    /// Scalars are kept as their textual form, sequences of scalars become a
    /// comma-separated list and anything nested is kept as YAML text for the
    /// stage to decode itself.
    pub fn parse_yaml(contents: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_yaml::from_str(contents).map_err(|source| ConfigError::YamlParse { source })?;

        let mapping = match value {
            Value::Null => return Ok(Self::new()),
            Value::Mapping(mapping) => mapping,
            other => {
                return Err(ConfigError::invalid(
                    "<document>",
                    format!("{other:?}"),
                    "settings must be a mapping",
                ));
            }
        };

        let mut settings = Self::new();
        for (key, value) in mapping {
            let key = match key {
                Value::String(s) => s,
                other => scalar_text(&other).ok_or_else(|| {
                    ConfigError::invalid("<key>", format!("{other:?}"), "keys must be scalars")
                })?,
            };
            let text = value_text(&value)
                .map_err(|source| ConfigError::YamlParse { source })?;
            settings.insert(key, text);
        }
        Ok(settings)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Merge another file's settings, rejecting keys set twice.
    pub fn merge(&mut self, other: Settings) -> Result<(), ConfigError> {
        let duplicates: Vec<String> = other
            .values
            .keys()
            .filter(|key| self.values.contains_key(*key))
            .cloned()
            .collect();

        if !duplicates.is_empty() {
            return Err(ConfigError::DuplicateKeys { keys: duplicates });
        }

        self.values.extend(other.values);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Value of `key`, treating blank values as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingKey {
            key: key.to_string(),
        })
    }

    pub fn path(&self, key: &str) -> Result<PathBuf, ConfigError> {
        self.require(key).map(PathBuf::from)
    }

    pub fn optional_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    /// Parse `key` with `FromStr`, returning `None` when absent.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| ConfigError::invalid(key, raw, e.to_string()))
            })
            .transpose()
    }

    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.parse(key)?.unwrap_or(default))
    }

    pub fn index(&self, key: &str) -> Result<Option<usize>, ConfigError> {
        self.parse::<usize>(key)
    }

    pub fn index_or(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        self.parse_or(key, default)
    }

    pub fn f64(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        self.parse::<f64>(key)
    }

    pub fn date(&self, key: &str) -> Result<NaiveDate, ConfigError> {
        let raw = self.require(key)?;
        crate::dates::parse_day(raw).ok_or_else(|| {
            ConfigError::invalid(key, raw, "expected an ISO-8601 day (YYYY-MM-DD)")
        })
    }

    /// Comma-separated list, with blanks dropped.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(true),
            "false" | "no" | "0" | "off" => Ok(false),
            _ => Err(ConfigError::invalid(key, raw, "expected a boolean")),
        }
    }

    pub fn log_level(&self) -> Result<LogLevel, ConfigError> {
        self.parse_or("LOG_LEVEL", LogLevel::default())
    }

    /// `SYMLINK=false` switches every link to a byte copy.
    pub fn link_mode(&self) -> Result<LinkMode, ConfigError> {
        Ok(if self.bool_or("SYMLINK", true)? {
            LinkMode::Symlink
        } else {
            LinkMode::Copy
        })
    }

    pub fn concurrency(&self) -> Result<usize, ConfigError> {
        let n = self.parse_or("CONCURRENCY", DEFAULT_CONCURRENCY)?;
        if n == 0 {
            return Err(ConfigError::invalid("CONCURRENCY", "0", "must be at least 1"));
        }
        Ok(n)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn value_text(value: &Value) -> Result<String, serde_yaml::Error> {
    if let Some(text) = scalar_text(value) {
        return Ok(text);
    }
    if let Value::Sequence(items) = value {
        let scalars: Option<Vec<String>> = items.iter().map(scalar_text).collect();
        if let Some(scalars) = scalars {
            return Ok(scalars.join(","));
        }
    }
    serde_yaml::to_string(value)
}
