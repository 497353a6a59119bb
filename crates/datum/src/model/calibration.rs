//! Calibration certificates.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Days, NaiveDate, Utc};
use datum_core::dates::{midnight, parse_timestamp};
use regex::Regex;

use crate::error::RecordError;

static VALIDITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)<ValidTimeRange>.*?<StartTime>\s*([^<]*?)\s*</StartTime>.*?<EndTime>\s*([^<]*?)\s*</EndTime>",
    )
    .expect("static validity pattern is valid")
});

/// The interval `[valid_from, valid_to)` a certificate applies to. An open
/// end means the certificate is still valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityRange {
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl ValidityRange {
    /// Read the `<ValidTimeRange>` block of a certificate document.
    pub fn parse(document: &str) -> Result<Self, String> {
        let caps = VALIDITY_PATTERN
            .captures(document)
            .ok_or_else(|| "no <ValidTimeRange> with start and end times".to_string())?;

        let valid_from = parse_timestamp(&caps[1])
            .ok_or_else(|| format!("invalid start time '{}'", &caps[1]))?;
        let valid_to = match caps[2].trim() {
            "" => None,
            raw => Some(parse_timestamp(raw).ok_or_else(|| format!("invalid end time '{raw}'"))?),
        };

        if valid_to.is_some_and(|to| to < valid_from) {
            return Err("validity range ends before it starts".to_string());
        }
        Ok(Self {
            valid_from,
            valid_to,
        })
    }

    /// True when the range intersects the UTC day `[day, day + 1)`.
    pub fn covers_day(&self, day: NaiveDate) -> bool {
        let start = midnight(day);
        let end = day
            .checked_add_days(Days::new(1))
            .map(midnight)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.valid_from < end && self.valid_to.is_none_or(|to| to > start)
    }
}

/// A certificate file for one stream of one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationCertificate {
    pub asset_uid: String,
    pub stream_id: String,
    /// Term the stream maps to, when a schema is known.
    pub term_name: Option<String>,
    pub validity: ValidityRange,
    /// The certificate file itself, treated as opaque.
    pub path: PathBuf,
}

impl CalibrationCertificate {
    pub async fn read(
        asset_uid: &str,
        stream_id: &str,
        path: &Path,
    ) -> Result<Self, RecordError> {
        let document = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RecordError::BadCalibration {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let validity = ValidityRange::parse(&document).map_err(|reason| {
            RecordError::BadCalibration {
                path: path.to_path_buf(),
                reason,
            }
        })?;

        Ok(Self {
            asset_uid: asset_uid.to_string(),
            stream_id: stream_id.to_string(),
            term_name: None,
            validity,
            path: path.to_path_buf(),
        })
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}
