//! The stage abstraction shared by every component.
//!
//! A stage is built from the flat [`Settings`] once, then run to completion
//! against a [`StageContext`] carrying the shutdown token, the concurrency
//! limit and the output linker.

use std::fmt;
use std::future::Future;
use std::path::Path;

use datum_core::metrics::events::{DatumsWritten, ManifestsWritten, RecordsSkipped, SkipReason};
use datum_core::{DatumKey, FanOut, LinkOutcome, Linker, Settings, emit};
use serde::Serialize;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{RecordError, SerializeSnafu, StageError};

/// Shared resources for one stage run.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Cancellation token for graceful shutdown.
    pub shutdown: CancellationToken,
    /// Maximum number of in-flight tasks.
    pub concurrency: usize,
    /// Output materialisation for this stage.
    pub linker: Linker,
}

impl StageContext {
    pub fn new(linker: Linker, concurrency: usize, shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            concurrency,
            linker,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        stage: &'static str,
        shutdown: CancellationToken,
    ) -> Result<Self, StageError> {
        let linker = Linker::new(settings.link_mode()?, stage);
        Ok(Self::new(linker, settings.concurrency()?, shutdown))
    }

    pub fn stage(&self) -> &'static str {
        self.linker.stage()
    }

    /// A fan-out bounded by this context's concurrency and shutdown token.
    pub fn fan_out<T: Send + 'static>(&self, typetag: &'static str) -> FanOut<T, StageError> {
        FanOut::new(self.concurrency, self.shutdown.clone(), typetag)
    }

    /// Fail fast if shutdown was requested.
    pub fn check_cancelled(&self) -> Result<(), StageError> {
        if self.shutdown.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        Ok(())
    }
}

/// Counters describing what a stage run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    /// Datum directories written (or, for the analyzer, accepted).
    pub datums: u64,
    /// Links newly created.
    pub links: u64,
    /// Links that already existed with the same target.
    pub unchanged: u64,
    /// Empty markers written.
    pub empties: u64,
    /// Manifests written.
    pub manifests: u64,
    /// Documents written (location files, threshold files).
    pub files_written: u64,
    /// Records skipped after a per-record error.
    pub skipped: u64,
}

impl StageReport {
    pub fn merge(&mut self, other: StageReport) {
        self.datums += other.datums;
        self.links += other.links;
        self.unchanged += other.unchanged;
        self.empties += other.empties;
        self.manifests += other.manifests;
        self.files_written += other.files_written;
        self.skipped += other.skipped;
    }

    pub fn record_link(&mut self, outcome: LinkOutcome) {
        match outcome {
            LinkOutcome::Created => self.links += 1,
            LinkOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn record_empty(&mut self, outcome: LinkOutcome) {
        if outcome.is_created() {
            self.empties += 1;
        }
    }

    /// Log and count a per-record error.
    pub fn skip(&mut self, stage: &'static str, error: &RecordError) {
        warn!(stage, error = %error, "Skipping record");
        emit!(RecordsSkipped {
            count: 1,
            reason: error.skip_reason(),
            stage,
        });
        self.skipped += 1;
    }

    /// Log and count a datum whose padded set is incomplete.
    pub fn skip_incomplete(&mut self, stage: &'static str, datum: &DatumKey, missing: usize) {
        warn!(stage, %datum, missing, "Skipping incomplete datum");
        emit!(RecordsSkipped {
            count: 1,
            reason: SkipReason::Incomplete,
            stage,
        });
        self.skipped += 1;
    }

    /// Count a written manifest.
    pub fn record_manifest(&mut self, stage: &'static str) {
        emit!(ManifestsWritten { count: 1, stage });
        self.manifests += 1;
    }

    /// Count a finished datum.
    pub fn finish_datum(&mut self, stage: &'static str) {
        emit!(DatumsWritten { count: 1, stage });
        self.datums += 1;
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "datums={} links={} unchanged={} empties={} manifests={} files={} skipped={}",
            self.datums,
            self.links,
            self.unchanged,
            self.empties,
            self.manifests,
            self.files_written,
            self.skipped
        )
    }
}

/// A self-contained transformation from input roots to one output root.
pub trait Stage: Sized + Send + 'static {
    /// Stage name, used for logging, metrics and the command line.
    const NAME: &'static str;

    /// Build the stage from its settings.
    fn from_settings(settings: &Settings) -> Result<Self, StageError>;

    /// Run the stage to completion.
    fn run(self, ctx: StageContext) -> impl Future<Output = Result<StageReport, StageError>> + Send;
}

/// Write `value` as pretty-printed JSON, replacing any previous file.
pub async fn write_json<T: Serialize>(
    linker: &Linker,
    path: &Path,
    value: &T,
) -> Result<(), StageError> {
    let text = serde_json::to_string_pretty(value).context(SerializeSnafu { path })?;
    linker.write_text(path, &text).await?;
    Ok(())
}

/// Build and run a stage.
pub async fn run_stage<S: Stage>(
    settings: &Settings,
    shutdown: CancellationToken,
) -> Result<StageReport, StageError> {
    let stage = S::from_settings(settings)?;
    let ctx = StageContext::from_settings(settings, S::NAME, shutdown)?;

    info!(stage = S::NAME, concurrency = ctx.concurrency, "Starting stage");
    let report = stage.run(ctx).await?;
    info!(stage = S::NAME, %report, "Stage complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use datum_core::LinkMode;

    #[test]
    fn test_report_merge_and_display() {
        let mut a = StageReport {
            datums: 1,
            links: 2,
            ..Default::default()
        };
        a.record_link(LinkOutcome::Created);
        a.record_link(LinkOutcome::Unchanged);
        a.record_empty(LinkOutcome::Created);
        a.record_empty(LinkOutcome::Unchanged);

        let b = StageReport {
            manifests: 4,
            skipped: 1,
            ..Default::default()
        };
        a.merge(b);

        assert_eq!(a.links, 3);
        assert_eq!(a.unchanged, 1);
        assert_eq!(a.empties, 1);
        assert_eq!(a.manifests, 4);
        assert!(a.to_string().contains("skipped=1"));
    }

    #[test]
    fn test_context_from_settings() {
        let settings = Settings::from_pairs([("SYMLINK", "false"), ("CONCURRENCY", "3")]);
        let ctx = StageContext::from_settings(&settings, "pad", CancellationToken::new()).unwrap();
        assert_eq!(ctx.concurrency, 3);
        assert_eq!(ctx.linker.mode(), LinkMode::Copy);
        assert_eq!(ctx.stage(), "pad");
        assert!(ctx.check_cancelled().is_ok());

        ctx.shutdown.cancel();
        assert!(matches!(ctx.check_cancelled(), Err(StageError::Cancelled)));
    }
}
