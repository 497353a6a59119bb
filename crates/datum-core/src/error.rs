//! Common error types shared by every stage.
//!
//! This module defines error types for configuration, path decoding, link
//! materialisation and tree listing. Stage-level errors in the `datum` crate
//! wrap these.

use std::path::PathBuf;

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur while loading or reading stage settings.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A required setting is absent or empty.
    #[snafu(display("Missing required setting {key}"))]
    MissingKey { key: String },

    /// A setting could not be converted to the type the stage expects.
    #[snafu(display("Invalid value '{value}' for {key}: {reason}"))]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to read configuration directory.
    #[snafu(display("Failed to read directory {}", path.display()))]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Unsupported config file format.
    #[snafu(display("Unsupported config format for {}: only .yaml/.yml supported", path.display()))]
    UnsupportedFormat { path: PathBuf },

    /// The same key was set by more than one config file.
    #[snafu(display("Duplicate setting keys: {}", keys.join(", ")))]
    DuplicateKeys { keys: Vec<String> },

    /// Neither a config file, a config directory nor the environment was given.
    #[snafu(display("No config files or directories specified"))]
    NoSources,

    /// Multiple configuration errors occurred.
    #[snafu(display("Multiple config errors:\n{}", errors.join("\n")))]
    MultipleErrors { errors: Vec<String> },
}

impl ConfigError {
    /// Shorthand for an [`ConfigError::InvalidValue`].
    pub fn invalid(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

// ============ Path Errors ============

/// A path did not conform to the configured layout.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PathError {
    #[snafu(display("Bad path {}: {reason}", path.display()))]
    BadPath { path: PathBuf, reason: String },
}

impl PathError {
    pub fn bad(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::BadPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

// ============ Link Errors ============

/// Errors that can occur while materialising an output file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LinkError {
    /// The output path already exists and refers to something else.
    #[snafu(display(
        "Link conflict at {}: existing {} differs from requested {}",
        link.display(),
        existing.display(),
        requested.display()
    ))]
    Conflict {
        link: PathBuf,
        existing: PathBuf,
        requested: PathBuf,
    },

    /// The link target is missing or is not a regular file.
    #[snafu(display("Link target {} is not a regular file", target.display()))]
    NotAFile { target: PathBuf },

    /// Filesystem error, reported after the retry was spent.
    #[snafu(display("IO error at {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ============ Listing Errors ============

/// Errors that can occur while listing an input tree.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ListingError {
    /// The input root does not exist or is not a directory.
    #[snafu(display("Input root {} does not exist", path.display()))]
    MissingRoot { path: PathBuf },

    /// Directory traversal failed.
    #[snafu(display("Failed to walk {}: {source}", path.display()))]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },

    /// The blocking listing task did not complete.
    #[snafu(display("Listing task failed: {source}"))]
    ListingJoin { source: tokio::task::JoinError },
}
