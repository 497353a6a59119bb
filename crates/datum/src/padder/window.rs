//! Padding windows derived from window-size thresholds.

use std::str::FromStr;

use chrono::NaiveDate;
use datum_core::dates::shift;
use datum_core::{ConfigError, Settings};

use crate::error::StageError;
use crate::model::Threshold;

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Threshold names whose values are window sizes in points.
pub const DEFAULT_POINT_THRESHOLDS: &[&str] = &[
    "Despiking window size - points",
    "Despiking window step - points",
];

/// Threshold names whose values are window sizes in seconds.
pub const DEFAULT_SECOND_THRESHOLDS: &[&str] = &["Persistence (time - seconds)"];

/// The recognised window-size threshold names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowNames {
    pub points: Vec<String>,
    pub seconds: Vec<String>,
}

impl Default for WindowNames {
    fn default() -> Self {
        Self {
            points: DEFAULT_POINT_THRESHOLDS.iter().map(|s| s.to_string()).collect(),
            seconds: DEFAULT_SECOND_THRESHOLDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl WindowNames {
    pub fn from_settings(settings: &Settings) -> Self {
        let defaults = Self::default();
        let points = settings.list("WINDOW_POINT_THRESHOLDS");
        let seconds = settings.list("WINDOW_SECOND_THRESHOLDS");
        Self {
            points: if points.is_empty() { defaults.points } else { points },
            seconds: if seconds.is_empty() { defaults.seconds } else { seconds },
        }
    }
}

/// The largest window, in seconds, named by `thresholds`.
///
/// Point windows are converted with the location's data rate in Hz, which
/// must then be positive. No matching threshold means a zero window.
pub fn max_window_seconds(
    thresholds: &[Threshold],
    names: &WindowNames,
    data_rate: Option<f64>,
    location: &str,
) -> Result<f64, StageError> {
    let mut max_window: f64 = 0.0;
    for threshold in thresholds {
        let Some(value) = threshold.number_value else {
            continue;
        };
        let seconds = if names.points.contains(&threshold.threshold_name) {
            match data_rate {
                Some(rate) if rate > 0.0 => value / rate,
                rate => {
                    return Err(StageError::BadRate {
                        location: location.to_string(),
                        rate,
                    });
                }
            }
        } else if names.seconds.contains(&threshold.threshold_name) {
            value
        } else {
            continue;
        };
        max_window = max_window.max(seconds);
    }
    Ok(max_window)
}

/// Whole days needed to cover `max_window` seconds.
pub fn pad_days(max_window: f64) -> u32 {
    if max_window.is_nan() || max_window <= 0.0 {
        return 0;
    }
    (max_window / SECONDS_PER_DAY).ceil() as u32
}

/// Which neighbours a datum is padded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PadDirection {
    /// `[d - p, d + p]`
    #[default]
    Symmetric,
    /// `[d - p, d]`
    Backward,
}

impl FromStr for PadDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "symmetric" => Ok(PadDirection::Symmetric),
            "-1" | "backward" => Ok(PadDirection::Backward),
            other => Err(format!("unknown pad direction '{other}'")),
        }
    }
}

impl PadDirection {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        settings.parse_or("PAD_DIRECTION", Self::default())
    }
}

/// The padded days around `day`, oldest first.
pub fn padded_days(day: NaiveDate, pad_days: u32, direction: PadDirection) -> Vec<NaiveDate> {
    let before = -i64::from(pad_days);
    let after = match direction {
        PadDirection::Symmetric => i64::from(pad_days),
        PadDirection::Backward => 0,
    };
    (before..=after).map(|offset| shift(day, offset)).collect()
}
