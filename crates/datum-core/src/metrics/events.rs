//! Internal events for datum metrics emission.
//!
//! Every event carries a `stage` label naming the stage that produced it.

use metrics::counter;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    fn emit(self);
}

/// Links (or copies) created under an output root.
pub struct LinksCreated {
    pub count: u64,
    pub stage: &'static str,
}

impl InternalEvent for LinksCreated {
    fn emit(self) {
        trace!(count = self.count, stage = self.stage, "Links created");
        counter!("datum_links_created_total", "stage" => self.stage).increment(self.count);
    }
}

/// Zero-byte empty markers written.
pub struct EmptyMarkersWritten {
    pub count: u64,
    pub stage: &'static str,
}

impl InternalEvent for EmptyMarkersWritten {
    fn emit(self) {
        trace!(count = self.count, stage = self.stage, "Empty markers written");
        counter!("datum_empty_markers_total", "stage" => self.stage).increment(self.count);
    }
}

/// Datum directories completed.
pub struct DatumsWritten {
    pub count: u64,
    pub stage: &'static str,
}

impl InternalEvent for DatumsWritten {
    fn emit(self) {
        trace!(count = self.count, stage = self.stage, "Datums written");
        counter!("datum_datums_written_total", "stage" => self.stage).increment(self.count);
    }
}

/// Pad manifests written.
pub struct ManifestsWritten {
    pub count: u64,
    pub stage: &'static str,
}

impl InternalEvent for ManifestsWritten {
    fn emit(self) {
        trace!(count = self.count, stage = self.stage, "Manifests written");
        counter!("datum_manifests_written_total", "stage" => self.stage).increment(self.count);
    }
}

/// Why a record was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    BadPath,
    BadLocation,
    BadThreshold,
    BadCalibration,
    Incomplete,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::BadPath => "bad_path",
            SkipReason::BadLocation => "bad_location",
            SkipReason::BadThreshold => "bad_threshold",
            SkipReason::BadCalibration => "bad_calibration",
            SkipReason::Incomplete => "incomplete",
        }
    }
}

/// A per-record problem that was logged and skipped.
pub struct RecordsSkipped {
    pub count: u64,
    pub reason: SkipReason,
    pub stage: &'static str,
}

impl InternalEvent for RecordsSkipped {
    fn emit(self) {
        trace!(count = self.count, reason = self.reason.as_str(), stage = self.stage, "Records skipped");
        counter!(
            "datum_records_skipped_total",
            "reason" => self.reason.as_str(),
            "stage" => self.stage
        )
        .increment(self.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_recorder_is_noop() {
        crate::emit!(LinksCreated {
            count: 3,
            stage: "test",
        });
        crate::emit!(RecordsSkipped {
            count: 1,
            reason: SkipReason::BadPath,
            stage: "test",
        });
    }

    #[test]
    fn test_skip_reason_labels() {
        assert_eq!(SkipReason::BadLocation.as_str(), "bad_location");
        assert_eq!(SkipReason::Incomplete.as_str(), "incomplete");
    }
}
