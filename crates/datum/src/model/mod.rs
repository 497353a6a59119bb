//! Typed records read from the database boundary and from input trees.

pub mod asset;
pub mod calibration;
pub mod filename;
pub mod geojson;
pub mod location;
pub mod threshold;

pub use asset::{Asset, AssetBinding};
pub use calibration::{CalibrationCertificate, ValidityRange};
pub use filename::DataFileName;
pub use geojson::{Feature, FeatureCollection, Geometry};
pub use location::{
    ActivePeriod, LocationFile, LocationProperties, NamedLocation, Offsets, ResolvedOffsets,
};
pub use threshold::{Threshold, ThresholdFile};

/// Serde adapters for UTC timestamps.
///
/// Timestamps are written as RFC 3339 and read leniently: RFC 3339, naive
/// date-times (taken as UTC) and bare days are all accepted.
pub(crate) mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    use datum_core::dates::parse_timestamp;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp '{raw}'")))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => super::serialize(ts, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            match raw.as_deref().map(str::trim) {
                None | Some("") => Ok(None),
                Some(raw) => parse_timestamp(raw)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{raw}'"))),
            }
        }
    }
}
