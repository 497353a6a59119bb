//! Threshold records.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::RecordError;

/// Realm-wide threshold scope.
pub const REALM: &str = "REALM";

/// One threshold as returned by the database boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    #[serde(alias = "name")]
    pub threshold_name: String,
    pub term_name: String,
    pub location_name: String,
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub start_day_of_year: Option<u32>,
    #[serde(default)]
    pub end_day_of_year: Option<u32>,
    #[serde(default)]
    pub is_date_constrained: bool,
    #[serde(default)]
    pub number_value: Option<f64>,
    #[serde(default)]
    pub string_value: Option<String>,
}

/// The `thresholds.json` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdFile {
    pub thresholds: Vec<Threshold>,
}

impl ThresholdFile {
    /// Parse a threshold document, either `{"thresholds": [...]}` or a bare
    /// array. Malformed entries are returned separately so the caller can
    /// skip and report them.
    pub fn parse_lenient(path: &Path, text: &str) -> Result<(Self, Vec<RecordError>), RecordError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RecordError::bad_threshold(path, e.to_string()))?;

        let entries = match value {
            Value::Array(entries) => entries,
            Value::Object(mut object) => match object.remove("thresholds") {
                Some(Value::Array(entries)) => entries,
                _ => {
                    return Err(RecordError::bad_threshold(
                        path,
                        "expected a 'thresholds' array",
                    ));
                }
            },
            _ => return Err(RecordError::bad_threshold(path, "expected an array or object")),
        };

        let mut thresholds = Vec::with_capacity(entries.len());
        let mut rejected = Vec::new();
        for (i, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<Threshold>(entry) {
                Ok(t) => thresholds.push(t),
                Err(e) => rejected.push(RecordError::bad_threshold(
                    path,
                    format!("entry {i}: {e}"),
                )),
            }
        }
        debug!(path = %path.display(), kept = thresholds.len(), rejected = rejected.len(), "Parsed thresholds");
        Ok((Self { thresholds }, rejected))
    }

    /// Parse a threshold document, failing on any malformed entry.
    pub fn parse(path: &Path, text: &str) -> Result<Self, RecordError> {
        let (file, mut rejected) = Self::parse_lenient(path, text)?;
        match rejected.pop() {
            Some(err) => Err(err),
            None => Ok(file),
        }
    }

    pub async fn read(path: &Path) -> Result<Self, RecordError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RecordError::bad_threshold(path, e.to_string()))?;
        Self::parse(path, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_and_alias() {
        let text = r#"{"thresholds": [
            {"name": "Persistence (time - seconds)", "term_name": "temp",
             "location_name": "REALM", "number_value": 3600}
        ]}"#;
        let file = ThresholdFile::parse(Path::new("t.json"), text).unwrap();
        assert_eq!(file.thresholds.len(), 1);
        assert_eq!(file.thresholds[0].threshold_name, "Persistence (time - seconds)");
        assert_eq!(file.thresholds[0].number_value, Some(3600.0));
        assert!(file.thresholds[0].context.is_empty());
    }

    #[test]
    fn test_parse_lenient_skips_bad_entries() {
        let text = r#"[
            {"threshold_name": "a", "term_name": "temp", "location_name": "CPER"},
            {"threshold_name": "b"}
        ]"#;
        let (file, rejected) = ThresholdFile::parse_lenient(Path::new("t.json"), text).unwrap();
        assert_eq!(file.thresholds.len(), 1);
        assert_eq!(rejected.len(), 1);
        assert!(ThresholdFile::parse(Path::new("t.json"), text).is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        assert!(ThresholdFile::parse(Path::new("t.json"), r#"{"other": 1}"#).is_err());
        assert!(ThresholdFile::parse(Path::new("t.json"), "42").is_err());
    }
}
