//! datum: Daily, per-location datum assembly.
//!
//! Each stage reads one or more input trees and materialises an output tree
//! of links (or copies):
//!
//! - `joiner` - Merge several input roots, optionally as an outer join
//! - `binder` - Per-asset location histories and named-location files
//! - `calibration` - Attach covering calibration certificates to data files
//! - `thresholds` - Per-location threshold selection
//! - `gap_filler` - One datum per active location-day, with empty markers
//! - `padder` - Pad datums with neighbouring days and write manifests
//! - `analyzer` - Forward padded datums whose manifests are satisfied
//! - `repository` - The database boundary
//! - `model` - Typed records

pub mod analyzer;
pub mod binder;
pub mod calibration;
pub mod cli;
pub mod error;
pub mod gap_filler;
pub mod joiner;
pub mod model;
pub mod padder;
pub mod repository;
pub mod stage;
pub mod thresholds;

// Re-export commonly used items
pub use analyzer::AnalyzePad;
pub use binder::{BindAssets, WriteLocations};
pub use calibration::AttachCalibrations;
pub use cli::{CliArgs, StageCommand};
pub use error::{RecordError, RepositoryError, StageError};
pub use gap_filler::FillGaps;
pub use joiner::{JoinRoot, Joiner};
pub use padder::{Pad, PadDirection, PadWindow};
pub use repository::{JsonRepository, Repository, RepositoryRef};
pub use stage::{Stage, StageContext, StageReport, run_stage};
pub use thresholds::SelectThresholds;

pub use datum_core::{LinkMode, Settings, init_tracing};
