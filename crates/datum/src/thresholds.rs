//! Threshold selection.
//!
//! Reads the full threshold table once and writes, per location file under
//! the location root, the thresholds that apply to that location as
//! `<OUT>/<source-type>/<location>/thresholds.json`.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use datum_core::path::{self, PathLayout};
use datum_core::{Settings, list_files};
use tracing::{debug, info};

use crate::error::{RecordError, StageError};
use crate::model::threshold::REALM;
use crate::model::{LocationFile, LocationProperties, Threshold, ThresholdFile};
use crate::stage::{Stage, StageContext, StageReport, write_json};

/// Name of the per-location threshold document.
pub const THRESHOLD_FILE: &str = "thresholds.json";

/// How specifically a threshold names a location. Higher wins.
fn scope_level(threshold: &Threshold, location: &LocationProperties) -> u8 {
    if threshold.location_name == location.name {
        3
    } else if !location.site.is_empty() && threshold.location_name == location.site {
        2
    } else if threshold.location_name == REALM {
        1
    } else {
        0
    }
}

/// The thresholds applying to `location`, in input order.
///
/// A threshold applies when it names the location, its site or the realm
/// and every one of its context tags is on the location. For each
/// `(term, threshold name)` only the most specific scope is kept. An empty
/// `terms` keeps every term.
pub fn select(
    thresholds: &[Threshold],
    location: &LocationProperties,
    terms: &[String],
) -> Vec<Threshold> {
    let applicable: Vec<(u8, &Threshold)> = thresholds
        .iter()
        .filter(|t| terms.is_empty() || terms.contains(&t.term_name))
        .filter(|t| t.context.iter().all(|c| location.has_context(c)))
        .map(|t| (scope_level(t, location), t))
        .filter(|(level, _)| *level > 0)
        .collect();

    let mut best: HashMap<(&str, &str), u8> = HashMap::new();
    for &(level, t) in &applicable {
        let entry = best
            .entry((t.term_name.as_str(), t.threshold_name.as_str()))
            .or_default();
        *entry = (*entry).max(level);
    }

    applicable
        .into_iter()
        .filter(|(level, t)| {
            best.get(&(t.term_name.as_str(), t.threshold_name.as_str())) == Some(level)
        })
        .map(|(_, t)| t.clone())
        .collect()
}

/// Writes a threshold document per location.
#[derive(Debug, Clone)]
pub struct SelectThresholds {
    threshold_path: PathBuf,
    location_path: PathBuf,
    location_layout: PathLayout,
    terms: Vec<String>,
    out_path: PathBuf,
}

impl SelectThresholds {
    pub fn new(threshold_path: PathBuf, location_path: PathBuf, out_path: PathBuf) -> Self {
        Self {
            threshold_path,
            location_path,
            location_layout: PathLayout::undated(),
            terms: Vec::new(),
            out_path,
        }
    }

    pub fn with_terms(mut self, terms: Vec<String>) -> Self {
        self.terms = terms;
        self
    }

    async fn load_thresholds(
        &self,
        report: &mut StageReport,
        stage: &'static str,
    ) -> Result<Vec<Threshold>, StageError> {
        let text = match tokio::fs::read_to_string(&self.threshold_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StageError::MissingInput {
                    path: self.threshold_path.clone(),
                });
            }
            Err(source) => {
                return Err(StageError::Io {
                    path: self.threshold_path.clone(),
                    source,
                });
            }
        };
        let (file, rejected) = ThresholdFile::parse_lenient(&self.threshold_path, &text)
            .map_err(|e| StageError::BadConfig {
                message: e.to_string(),
            })?;
        for err in &rejected {
            report.skip(stage, err);
        }
        Ok(file.thresholds)
    }
}

impl Stage for SelectThresholds {
    const NAME: &'static str = "select-thresholds";

    fn from_settings(settings: &Settings) -> Result<Self, StageError> {
        Ok(Self {
            threshold_path: settings.path("THRESHOLD_PATH")?,
            location_path: settings.path("LOCATION_PATH")?,
            location_layout: PathLayout::from_settings(
                settings,
                "LOCATION_",
                PathLayout::undated(),
            )?,
            terms: settings.list("TERMS"),
            out_path: settings.path("OUT_PATH")?,
        })
    }

    async fn run(self, ctx: StageContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::default();
        let thresholds = Arc::new(self.load_thresholds(&mut report, ctx.stage()).await?);

        let mut locations = BTreeMap::new();
        for relative in list_files(&self.location_path).await? {
            match path::parse(&relative, &self.location_layout) {
                Ok(key) => {
                    locations
                        .entry((key.source_type, key.location))
                        .or_insert_with(|| self.location_path.join(&relative));
                }
                Err(e) => report.skip(ctx.stage(), &RecordError::from(e)),
            }
        }
        info!(
            thresholds = thresholds.len(),
            locations = locations.len(),
            "Selecting thresholds"
        );

        let mut tasks = ctx.fan_out::<StageReport>("location");
        for ((source_type, location), file) in locations {
            let thresholds = Arc::clone(&thresholds);
            let terms = self.terms.clone();
            let out = self
                .out_path
                .join(&source_type)
                .join(&location)
                .join(THRESHOLD_FILE);
            let linker = ctx.linker;
            tasks.spawn(async move {
                let mut report = StageReport::default();
                let location_file = match LocationFile::read(&file).await {
                    Ok(f) => f,
                    Err(e) => {
                        report.skip(linker.stage(), &e);
                        return Ok(report);
                    }
                };
                let selected = select(&thresholds, &location_file.location, &terms);
                debug!(location = %location, selected = selected.len(), "Selected thresholds");
                write_json(&linker, &out, &ThresholdFile { thresholds: selected }).await?;
                report.files_written += 1;
                Ok(report)
            });
        }
        for partial in tasks.join().await? {
            report.merge(partial);
        }
        Ok(report)
    }
}
