//! Error types for the datum stages.
//!
//! [`RecordError`]s are per-record problems: they are logged, counted and
//! skipped. Everything else is a [`StageError`] and fails the stage.

use std::path::PathBuf;

use datum_core::TaskError;
use datum_core::metrics::events::SkipReason;
use snafu::prelude::*;

// Re-export common errors
pub use datum_core::error::{ConfigError, LinkError, ListingError, PathError};

/// A single record that could not be used.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RecordError {
    /// A path did not conform to the configured layout.
    #[snafu(display("{source}"))]
    BadPath { source: PathError },

    /// A location file or location record failed to parse or resolve.
    #[snafu(display("Bad location {}: {reason}", path.display()))]
    BadLocation { path: PathBuf, reason: String },

    /// A threshold record failed to parse.
    #[snafu(display("Bad threshold in {}: {reason}", path.display()))]
    BadThreshold { path: PathBuf, reason: String },

    /// A calibration certificate carries no readable validity range.
    #[snafu(display("Bad calibration {}: {reason}", path.display()))]
    BadCalibration { path: PathBuf, reason: String },
}

impl RecordError {
    pub fn bad_location(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::BadLocation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn bad_threshold(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::BadThreshold {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn skip_reason(&self) -> SkipReason {
        match self {
            Self::BadPath { .. } => SkipReason::BadPath,
            Self::BadLocation { .. } => SkipReason::BadLocation,
            Self::BadThreshold { .. } => SkipReason::BadThreshold,
            Self::BadCalibration { .. } => SkipReason::BadCalibration,
        }
    }
}

impl From<PathError> for RecordError {
    fn from(source: PathError) -> Self {
        Self::BadPath { source }
    }
}

/// Errors from the database boundary.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RepositoryError {
    /// Failed to read a repository table.
    #[snafu(display("Failed to read {}: {source}", path.display()))]
    ReadTable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to decode a repository table.
    #[snafu(display("Failed to parse {}: {source}", path.display()))]
    ParseTable {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Errors that fail a whole stage.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StageError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// The stage configuration is inconsistent.
    #[snafu(display("Invalid stage configuration: {message}"))]
    BadConfig { message: String },

    /// An input root does not exist.
    #[snafu(display("Missing input {}", path.display()))]
    MissingInput { path: PathBuf },

    /// No empty-marker template exists for a requested output directory.
    #[snafu(display(
        "Missing empty file template for {source_type}/{data_type} under {}",
        path.display()
    ))]
    MissingEmpty {
        source_type: String,
        data_type: String,
        path: PathBuf,
    },

    /// A join pattern could not be compiled.
    #[snafu(display("Bad glob pattern '{pattern}': {source}"))]
    BadGlob {
        pattern: String,
        source: glob::PatternError,
    },

    /// A location needed for point-based windows has no usable data rate.
    #[snafu(display("Bad data rate {rate:?} for location {location}"))]
    BadRate { location: String, rate: Option<f64> },

    /// Two different sources want the same output path.
    #[snafu(display(
        "Link conflict at {}: {} vs {}",
        link.display(),
        existing.display(),
        requested.display()
    ))]
    LinkConflict {
        link: PathBuf,
        existing: PathBuf,
        requested: PathBuf,
    },

    /// Two different data files want the same padded output path.
    #[snafu(display(
        "Pad collision at {}: {} vs {}",
        link.display(),
        existing.display(),
        requested.display()
    ))]
    PadCollision {
        link: PathBuf,
        existing: PathBuf,
        requested: PathBuf,
    },

    /// A link target is missing or not a regular file.
    #[snafu(display("Link target {} is not a regular file", target.display()))]
    NotAFile { target: PathBuf },

    /// Filesystem error after the retry was spent.
    #[snafu(display("IO error at {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input listing failed.
    #[snafu(display("Listing failed: {source}"))]
    Listing { source: ListingError },

    /// The database boundary failed.
    #[snafu(display("Repository error: {source}"))]
    Repository { source: RepositoryError },

    /// A schema could not be read.
    #[snafu(display("Bad schema {}: {reason}", path.display()))]
    BadSchema { path: PathBuf, reason: String },

    /// An output document could not be serialized.
    #[snafu(display("Failed to serialize {}: {source}", path.display()))]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The stage was cancelled by a shutdown signal.
    #[snafu(display("Stage cancelled"))]
    Cancelled,

    /// A stage task panicked.
    #[snafu(display("Stage task panicked: {message}"))]
    TaskPanicked { message: String },
}

impl StageError {
    /// Re-label a link conflict raised while padding.
    pub fn into_pad_collision(self) -> Self {
        match self {
            Self::LinkConflict {
                link,
                existing,
                requested,
            } => Self::PadCollision {
                link,
                existing,
                requested,
            },
            other => other,
        }
    }
}

impl From<ConfigError> for StageError {
    fn from(source: ConfigError) -> Self {
        Self::Config { source }
    }
}

impl From<RepositoryError> for StageError {
    fn from(source: RepositoryError) -> Self {
        Self::Repository { source }
    }
}

impl From<ListingError> for StageError {
    fn from(source: ListingError) -> Self {
        match source {
            ListingError::MissingRoot { path } => Self::MissingInput { path },
            source => Self::Listing { source },
        }
    }
}

impl From<LinkError> for StageError {
    fn from(source: LinkError) -> Self {
        match source {
            LinkError::Conflict {
                link,
                existing,
                requested,
            } => Self::LinkConflict {
                link,
                existing,
                requested,
            },
            LinkError::NotAFile { target } => Self::NotAFile { target },
            LinkError::Io { path, source } => Self::Io { path, source },
        }
    }
}

impl From<TaskError<StageError>> for StageError {
    fn from(source: TaskError<StageError>) -> Self {
        match source {
            TaskError::Cancelled => Self::Cancelled,
            TaskError::Panicked(message) => Self::TaskPanicked { message },
            TaskError::Failed(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_conflict_maps_to_pad_collision() {
        let err: StageError = LinkError::Conflict {
            link: "/out/a".into(),
            existing: "/in/x".into(),
            requested: "/in/y".into(),
        }
        .into();
        assert!(matches!(err, StageError::LinkConflict { .. }));
        assert!(matches!(
            err.into_pad_collision(),
            StageError::PadCollision { .. }
        ));
    }

    #[test]
    fn test_missing_root_maps_to_missing_input() {
        let err: StageError = ListingError::MissingRoot {
            path: "/nope".into(),
        }
        .into();
        assert!(matches!(err, StageError::MissingInput { .. }));
    }

    #[test]
    fn test_task_errors_unwrap() {
        let failed: StageError = TaskError::Failed(StageError::Cancelled).into();
        assert!(matches!(failed, StageError::Cancelled));

        let panicked: StageError = TaskError::<StageError>::Panicked("boom".into()).into();
        assert!(panicked.to_string().contains("boom"));
    }

    #[test]
    fn test_record_error_skip_reason() {
        let err = RecordError::bad_location("/loc.json", "no features");
        assert_eq!(err.skip_reason(), SkipReason::BadLocation);
        assert!(err.to_string().contains("no features"));
    }
}
