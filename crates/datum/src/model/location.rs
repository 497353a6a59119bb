//! Named locations and their location files.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use datum_core::DayWindow;
use datum_core::dates::midnight;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RecordError;
use crate::model::geojson::{Feature, FeatureCollection, Geometry};

/// A half-open UTC interval `[start, end)` during which a location exists.
/// An open end means "until now".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePeriod {
    #[serde(with = "crate::model::timestamp")]
    pub start_date: DateTime<Utc>,
    #[serde(default, with = "crate::model::timestamp::option")]
    pub end_date: Option<DateTime<Utc>>,
}

impl ActivePeriod {
    pub fn new(start_date: DateTime<Utc>, end_date: Option<DateTime<Utc>>) -> Result<Self, String> {
        if end_date.is_some_and(|end| end < start_date) {
            return Err(format!("active period ends before it starts ({start_date})"));
        }
        Ok(Self {
            start_date,
            end_date,
        })
    }

    /// True when UTC midnight of `day` falls inside the period.
    pub fn contains_day(&self, day: NaiveDate, now: DateTime<Utc>) -> bool {
        let at = midnight(day);
        let end = self.end_date.unwrap_or(now);
        self.start_date <= at && at < end
    }
}

/// Days in `window` on which any of `periods` is active. Overlapping
/// periods are merged.
pub fn active_days(
    periods: &[ActivePeriod],
    window: &DayWindow,
    now: DateTime<Utc>,
) -> BTreeSet<NaiveDate> {
    window
        .days()
        .filter(|day| periods.iter().any(|p| p.contains_day(*day, now)))
        .collect()
}

/// Raw sensor-frame offsets of a location relative to its reference point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Offsets {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default)]
    pub alpha: f64,
    #[serde(default)]
    pub beta: f64,
    #[serde(default)]
    pub gamma: f64,
    #[serde(default)]
    pub x_azimuth: Option<f64>,
    #[serde(default)]
    pub y_azimuth: Option<f64>,
}

/// Offsets after azimuth correction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedOffsets {
    pub east: f64,
    pub north: f64,
    pub z: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

/// A named location as returned by the database boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedLocation {
    pub name: String,
    #[serde(rename = "type", default)]
    pub location_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub site: String,
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub active_periods: Vec<ActivePeriod>,
    #[serde(default)]
    pub properties: IndexMap<String, Value>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub offsets: Offsets,
    /// Name of the location these offsets are measured from.
    #[serde(default)]
    pub reference_location: Option<String>,
}

impl NamedLocation {
    /// Sampling rate in Hz, from the `data_rate` property.
    pub fn data_rate(&self) -> Option<f64> {
        numeric(self.properties.get("data_rate")?)
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Properties of the single feature in a location file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationProperties {
    pub name: String,
    #[serde(rename = "type", default)]
    pub location_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub site: String,
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub active_periods: Vec<ActivePeriod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_rate: Option<f64>,
    #[serde(default)]
    pub properties: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offsets: Option<ResolvedOffsets>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_location: Option<Box<Feature<LocationProperties>>>,
}

impl LocationProperties {
    /// Sampling rate in Hz.
    pub fn data_rate(&self) -> Option<f64> {
        self.data_rate
            .or_else(|| self.properties.get("data_rate").and_then(numeric))
    }

    pub fn has_context(&self, tag: &str) -> bool {
        self.context.iter().any(|c| c == tag)
    }
}

/// A location file read from a location root.
#[derive(Debug, Clone)]
pub struct LocationFile {
    pub path: PathBuf,
    pub location: LocationProperties,
    pub geometry: Option<Geometry>,
}

impl LocationFile {
    pub async fn read(path: &Path) -> Result<Self, RecordError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RecordError::bad_location(path, e.to_string()))?;
        Self::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<Self, RecordError> {
        let collection: FeatureCollection<LocationProperties> = serde_json::from_str(text)
            .map_err(|e| RecordError::bad_location(path, e.to_string()))?;

        let feature = collection
            .features
            .into_iter()
            .next()
            .ok_or_else(|| RecordError::bad_location(path, "location file has no features"))?;

        for period in &feature.properties.active_periods {
            if period.end_date.is_some_and(|end| end < period.start_date) {
                return Err(RecordError::bad_location(
                    path,
                    format!("active period ends before it starts ({})", period.start_date),
                ));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            location: feature.properties,
            geometry: feature.geometry,
        })
    }

    pub fn name(&self) -> &str {
        &self.location.name
    }
}
