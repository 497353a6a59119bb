//! Command-line surface: one subcommand per stage.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use datum_core::config::{load_from_paths, overlay_env};
use datum_core::{ConfigError, ConfigPath, Settings};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::analyzer::AnalyzePad;
use crate::binder::{BindAssets, WriteLocations};
use crate::calibration::AttachCalibrations;
use crate::error::StageError;
use crate::gap_filler::FillGaps;
use crate::joiner::Joiner;
use crate::padder::Pad;
use crate::stage::{StageReport, run_stage};
use crate::thresholds::SelectThresholds;

#[derive(Parser, Debug)]
#[command(name = "datum", version, about = "Daily, per-location datum assembly")]
pub struct CliArgs {
    #[command(subcommand)]
    pub stage: StageCommand,

    /// Path to configuration file (can be specified multiple times)
    #[arg(short, long, global = true)]
    pub config: Vec<PathBuf>,

    /// Path to configuration directory (can be specified multiple times)
    #[arg(short = 'C', long = "config-dir", global = true)]
    pub config_dirs: Vec<PathBuf>,

    /// Overlay recognised settings from the process environment
    #[arg(long, global = true)]
    pub env: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageCommand {
    /// Merge several input roots into one tree
    Join,
    /// Write per-asset location histories
    BindAssets,
    /// Write named-location files for a source type
    WriteLocations,
    /// Attach calibration certificates to data files
    AttachCalibrations,
    /// Write per-location threshold documents
    SelectThresholds,
    /// Create a datum for every active location-day
    FillGaps,
    /// Pad datums with their neighbouring days
    Pad,
    /// Forward complete padded datums
    AnalyzePad,
}

impl StageCommand {
    pub async fn run(
        self,
        settings: &Settings,
        shutdown: CancellationToken,
    ) -> Result<StageReport, StageError> {
        match self {
            Self::Join => run_stage::<Joiner>(settings, shutdown).await,
            Self::BindAssets => run_stage::<BindAssets>(settings, shutdown).await,
            Self::WriteLocations => run_stage::<WriteLocations>(settings, shutdown).await,
            Self::AttachCalibrations => run_stage::<AttachCalibrations>(settings, shutdown).await,
            Self::SelectThresholds => run_stage::<SelectThresholds>(settings, shutdown).await,
            Self::FillGaps => run_stage::<FillGaps>(settings, shutdown).await,
            Self::Pad => run_stage::<Pad>(settings, shutdown).await,
            Self::AnalyzePad => run_stage::<AnalyzePad>(settings, shutdown).await,
        }
    }
}

impl CliArgs {
    /// Convert CLI arguments to configuration paths.
    pub fn config_paths(&self) -> Vec<ConfigPath> {
        ConfigPath::from_cli_args(&self.config, &self.config_dirs)
    }

    /// Build the settings map from the configured files, then the environment.
    pub fn load_settings(&self) -> Result<Settings, ConfigError> {
        self.load_settings_with(std::env::vars())
    }

    pub fn load_settings_with<I>(&self, vars: I) -> Result<Settings, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let paths = self.config_paths();
        if paths.is_empty() && !self.env {
            return Err(ConfigError::NoSources);
        }
        info!("Loading config from {} source(s)", paths.len());

        let mut settings = load_from_paths(&paths)?;
        if self.env {
            let applied = overlay_env(&mut settings, vars);
            info!(applied, "Applied environment settings");
        }
        Ok(settings)
    }
}
