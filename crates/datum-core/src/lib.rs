//! datum-core: Shared plumbing for the daily datum assembly stages.
//!
//! This crate contains the stage-agnostic pieces every stage in the `datum`
//! crate is built from:
//!
//! - `config/` - Flat settings map, YAML loading and environment variable interpolation
//! - `path` - Path codec translating between on-disk paths and typed keys
//! - `dates` - Calendar helpers and inclusive day windows
//! - `link` - Link-or-copy materialisation with conflict detection
//! - `listing` - Input tree listing
//! - `topology` - Bounded fan-out of independent units of work
//! - `metrics` - Internal events emitted as metrics
//! - `signal` - Signal handling for cancellation
//! - `tracing` - Subscriber initialisation
//! - `error` - Common error types

pub mod config;
pub mod dates;
pub mod error;
pub mod link;
pub mod listing;
pub mod metrics;
pub mod path;
pub mod signal;
pub mod topology;
pub mod tracing;

// Re-export commonly used items
pub use config::{ConfigPath, LogLevel, Settings};
pub use dates::DayWindow;
pub use error::{ConfigError, LinkError, ListingError, PathError};
pub use link::{LinkMode, LinkOutcome, Linker};
pub use listing::list_files;
pub use path::{DataType, DatumKey, DayParts, OutputLayout, PathKey, PathLayout};
pub use signal::{cancel_on_signal, shutdown_signal};
pub use topology::{FanOut, TaskError};
pub use crate::tracing::init_tracing;
