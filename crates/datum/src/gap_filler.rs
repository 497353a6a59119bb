//! Date-gap filling.
//!
//! For every location active on a day of the window, and every day a real
//! data file exists for, the gap filler materialises one datum:
//!
//! ```text
//! <OUT>/<source-type>/<yyyy>/<mm>/<dd>/<location>/
//!     location/<location file>
//!     threshold/thresholds.json        (when a threshold root is given)
//!     data/<real file or rendered empty marker>
//!     flags/...                        (per OUTPUT_DIRECTORIES)
//!     calibration/                     (directory only)
//! ```
//!
//! Real files always win over empty markers: a data-type directory holding
//! a real file gets no markers, and markers left there by an earlier run
//! are removed.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use datum_core::path::{self, PathLayout};
use datum_core::{
    DataType, DatumKey, DayParts, DayWindow, Linker, OutputLayout, Settings, list_files,
};
use regex::{Captures, Regex};
use tracing::{debug, info};

use crate::error::{ConfigError, RecordError, StageError};
use crate::model::LocationFile;
use crate::model::location::active_days;
use crate::stage::{Stage, StageContext, StageReport};
use crate::thresholds::THRESHOLD_FILE;

/// Suffix distinguishing empty markers from real files.
pub const EMPTY_SUFFIX: &str = ".empty";

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"location|year|month|day").expect("static token pattern is valid"));

/// Render an empty-marker name from a template for one datum.
///
/// The `location`, `year`, `month` and `day` tokens are substituted in a
/// single pass, so substituted values are never rescanned.
pub fn render_marker(template: &str, datum: &DatumKey) -> String {
    let parts = DayParts::from_date(datum.date);
    let rendered = TOKEN_PATTERN.replace_all(template, |caps: &Captures| match &caps[0] {
        "location" => datum.location.clone(),
        "year" => parts.year.clone(),
        "month" => parts.month.clone(),
        _ => parts.day.clone(),
    });
    if rendered.ends_with(EMPTY_SUFFIX) {
        rendered.into_owned()
    } else {
        format!("{rendered}{EMPTY_SUFFIX}")
    }
}

/// Parse `OUTPUT_DIRECTORIES`, defaulting to `data`.
pub fn parse_output_dirs(values: &[String]) -> Result<Vec<DataType>, ConfigError> {
    let mut dirs = Vec::new();
    for value in values {
        let dt: DataType = value
            .parse()
            .map_err(|reason: String| ConfigError::invalid("OUTPUT_DIRECTORIES", value, reason))?;
        if !dirs.contains(&dt) {
            dirs.push(dt);
        }
    }
    if dirs.is_empty() {
        dirs.push(DataType::Data);
    }
    Ok(dirs)
}

/// A real data file routed to a datum.
#[derive(Debug, Clone)]
struct RealFile {
    source: PathBuf,
    data_type: String,
    /// Output path of the link.
    link: PathBuf,
}

/// Everything one datum task needs.
#[derive(Debug, Clone, Default)]
struct DatumPlan {
    location: Option<PathBuf>,
    threshold: Option<PathBuf>,
    reals: Vec<RealFile>,
}

/// Empty-marker template names per `(source type, data type)`.
type Templates = HashMap<(String, DataType), Vec<String>>;

/// Fills every active day of every location with a datum.
#[derive(Debug, Clone)]
pub struct FillGaps {
    data_path: PathBuf,
    data_layout: PathLayout,
    location_path: PathBuf,
    location_layout: PathLayout,
    empty_path: Option<PathBuf>,
    output_dirs: Vec<DataType>,
    window: DayWindow,
    threshold_path: Option<PathBuf>,
    out_path: PathBuf,
    now: DateTime<Utc>,
}

impl FillGaps {
    pub fn new(
        data_path: PathBuf,
        location_path: PathBuf,
        empty_path: Option<PathBuf>,
        window: DayWindow,
        out_path: PathBuf,
    ) -> Self {
        Self {
            data_path,
            data_layout: PathLayout::canonical(),
            location_path,
            location_layout: PathLayout::undated(),
            empty_path,
            output_dirs: vec![DataType::Data],
            window,
            threshold_path: None,
            out_path,
            now: Utc::now(),
        }
    }

    pub fn with_output_dirs(mut self, output_dirs: Vec<DataType>) -> Self {
        self.output_dirs = output_dirs;
        self
    }

    pub fn with_threshold_path(mut self, threshold_path: PathBuf) -> Self {
        self.threshold_path = Some(threshold_path);
        self
    }

    /// Fix the instant open-ended active periods end at.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Read every location file, skipping the malformed ones.
    async fn load_locations(
        &self,
        stage: &'static str,
        report: &mut StageReport,
    ) -> Result<Vec<((String, String), LocationFile)>, StageError> {
        let mut paths = BTreeMap::new();
        for relative in list_files(&self.location_path).await? {
            match path::parse(&relative, &self.location_layout) {
                Ok(key) => {
                    paths
                        .entry((key.source_type, key.location))
                        .or_insert_with(|| self.location_path.join(&relative));
                }
                Err(e) => report.skip(stage, &RecordError::from(e)),
            }
        }

        let mut locations = Vec::with_capacity(paths.len());
        for (key, path) in paths {
            match LocationFile::read(&path).await {
                Ok(file) => locations.push((key, file)),
                Err(e) => report.skip(stage, &e),
            }
        }
        Ok(locations)
    }

    /// Real data files inside the window, per datum.
    async fn load_reals(
        &self,
        stage: &'static str,
        report: &mut StageReport,
    ) -> Result<BTreeMap<DatumKey, Vec<RealFile>>, StageError> {
        let mut reals: BTreeMap<DatumKey, Vec<RealFile>> = BTreeMap::new();
        for relative in list_files(&self.data_path).await? {
            let parsed = path::parse_nested(&relative, &self.data_layout).and_then(|mut key| {
                let datum = key.to_datum(&relative)?;
                if key.data_type.is_none() {
                    key.data_type = Some(DataType::Data.as_str().to_string());
                }
                let link = path::encode(&self.out_path, &key, OutputLayout::Canonical)?;
                Ok((key, datum, link))
            });
            let (key, datum, link) = match parsed {
                Ok(parsed) => parsed,
                Err(e) => {
                    report.skip(stage, &RecordError::from(e));
                    continue;
                }
            };
            if !self.window.contains(datum.date) || key.filename.is_none() {
                continue;
            }
            reals.entry(datum).or_default().push(RealFile {
                source: self.data_path.join(&relative),
                data_type: key.data_type.unwrap_or_default(),
                link,
            });
        }
        Ok(reals)
    }

    /// Find the empty-marker templates of every data-like output directory.
    async fn load_templates<'a>(
        &self,
        source_types: impl Iterator<Item = &'a str>,
    ) -> Result<Templates, StageError> {
        let mut templates = Templates::new();
        for source_type in source_types {
            for dt in self.output_dirs.iter().filter(|dt| dt.is_data_like()) {
                let missing = || StageError::MissingEmpty {
                    source_type: source_type.to_string(),
                    data_type: dt.as_str().to_string(),
                    path: self.empty_path.clone().unwrap_or_default(),
                };
                let root = self.empty_path.as_ref().ok_or_else(missing)?;
                let specific = template_names(&root.join(source_type).join(dt.as_str())).await?;
                let names = match specific {
                    Some(names) => names,
                    None => template_names(&root.join(dt.as_str()))
                        .await?
                        .ok_or_else(missing)?,
                };
                templates.insert((source_type.to_string(), *dt), names);
            }
        }
        Ok(templates)
    }
}

/// File names directly inside `dir`, or `None` when it holds none.
async fn template_names(dir: &Path) -> Result<Option<Vec<String>>, StageError> {
    if !tokio::fs::metadata(dir).await.is_ok_and(|m| m.is_dir()) {
        return Ok(None);
    }
    let names: Vec<String> = list_files(dir)
        .await?
        .into_iter()
        .filter(|p| p.components().count() == 1)
        .filter_map(|p| p.to_str().map(str::to_string))
        .collect();
    Ok((!names.is_empty()).then_some(names))
}

impl Stage for FillGaps {
    const NAME: &'static str = "fill-gaps";

    fn from_settings(settings: &Settings) -> Result<Self, StageError> {
        let output_dirs = parse_output_dirs(&settings.list("OUTPUT_DIRECTORIES"))?;
        let empty_path = if output_dirs.iter().any(DataType::is_data_like) {
            Some(settings.path("EMPTY_FILE_PATH")?)
        } else {
            settings.optional_path("EMPTY_FILE_PATH")
        };
        let data_path = match settings.optional_path("DATA_PATH") {
            Some(path) => path,
            None => settings.path("IN_PATH")?,
        };

        Ok(Self {
            data_path,
            data_layout: PathLayout::from_settings(settings, "", PathLayout::canonical())?,
            location_path: settings.path("LOCATION_PATH")?,
            location_layout: PathLayout::from_settings(
                settings,
                "LOCATION_",
                PathLayout::undated(),
            )?,
            empty_path,
            output_dirs,
            window: DayWindow::new(settings.date("START_DATE")?, settings.date("END_DATE")?)?,
            threshold_path: settings.optional_path("THRESHOLD_PATH"),
            out_path: settings.path("OUT_PATH")?,
            now: Utc::now(),
        })
    }

    async fn run(self, ctx: StageContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::default();
        let stage = ctx.stage();

        let locations = self.load_locations(stage, &mut report).await?;
        let reals = self.load_reals(stage, &mut report).await?;

        let mut location_files: HashMap<(String, String), PathBuf> = HashMap::new();
        let mut plans: BTreeMap<DatumKey, DatumPlan> = BTreeMap::new();
        for ((source_type, location), file) in locations {
            for day in active_days(&file.location.active_periods, &self.window, self.now) {
                plans
                    .entry(DatumKey::new(&source_type, day, &location))
                    .or_default();
            }
            location_files.insert((source_type, location), file.path);
        }
        for (datum, files) in reals {
            plans.entry(datum).or_default().reals = files;
        }

        let mut thresholds: HashMap<(String, String), Option<PathBuf>> = HashMap::new();
        for (datum, plan) in plans.iter_mut() {
            let key = (datum.source_type.clone(), datum.location.clone());
            plan.location = location_files.get(&key).cloned();
            if let Some(root) = &self.threshold_path {
                if !thresholds.contains_key(&key) {
                    let candidate = root.join(&key.0).join(&key.1).join(THRESHOLD_FILE);
                    let exists = tokio::fs::metadata(&candidate).await.is_ok_and(|m| m.is_file());
                    thresholds.insert(key.clone(), exists.then_some(candidate));
                }
                plan.threshold = thresholds.get(&key).cloned().flatten();
            }
        }

        let mut source_types: Vec<&str> = plans.keys().map(|d| d.source_type.as_str()).collect();
        source_types.dedup();
        let templates = Arc::new(self.load_templates(source_types.into_iter()).await?);
        let output_dirs = Arc::new(self.output_dirs.clone());

        info!(
            datums = plans.len(),
            window_start = %self.window.start(),
            window_end = %self.window.end(),
            "Filling date gaps"
        );

        let mut tasks = ctx.fan_out::<StageReport>("datum");
        for (datum, plan) in plans {
            let linker = ctx.linker;
            let out_path = self.out_path.clone();
            let templates = Arc::clone(&templates);
            let output_dirs = Arc::clone(&output_dirs);
            tasks.spawn(async move {
                fill_datum(linker, &out_path, &datum, plan, &templates, &output_dirs).await
            });
        }
        for partial in tasks.join().await? {
            report.merge(partial);
        }
        Ok(report)
    }
}

async fn fill_datum(
    linker: Linker,
    out_path: &Path,
    datum: &DatumKey,
    plan: DatumPlan,
    templates: &Templates,
    output_dirs: &[DataType],
) -> Result<StageReport, StageError> {
    let mut report = StageReport::default();
    let dir = datum.dir(out_path);
    linker.ensure_dir(&dir).await?;

    for real in &plan.reals {
        report.record_link(linker.link(&real.source, &real.link).await?);
    }

    if let Some(location) = &plan.location {
        if let Some(name) = location.file_name() {
            let link = datum.data_type_dir(out_path, DataType::Location).join(name);
            report.record_link(linker.link(location, &link).await?);
        }
    }

    if let Some(threshold) = &plan.threshold {
        let link = datum
            .data_type_dir(out_path, DataType::Threshold)
            .join(THRESHOLD_FILE);
        report.record_link(linker.link(threshold, &link).await?);
    }

    for dt in output_dirs {
        let dt_dir = datum.data_type_dir(out_path, *dt);
        if !dt.is_data_like() {
            linker.ensure_dir(&dt_dir).await?;
            continue;
        }

        let names = templates
            .get(&(datum.source_type.clone(), *dt))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let has_real = plan.reals.iter().any(|r| r.data_type == dt.as_str());
        for template in names {
            let marker = dt_dir.join(render_marker(template, datum));
            if has_real {
                remove_stale(&marker).await?;
            } else {
                report.record_empty(linker.touch_empty(&marker).await?);
            }
        }
    }

    debug!(datum = %datum, reals = plan.reals.len(), "Filled datum");
    report.finish_datum(linker.stage());
    Ok(report)
}

async fn remove_stale(marker: &Path) -> Result<(), StageError> {
    match tokio::fs::remove_file(marker).await {
        Ok(()) => {
            debug!(marker = %marker.display(), "Removed stale empty marker");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StageError::Io {
            path: marker.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn datum() -> DatumKey {
        DatumKey::new("prt", NaiveDate::from_ymd_opt(2020, 1, 5).unwrap(), "CFGLOC100")
    }

    #[test]
    fn test_render_marker() {
        assert_eq!(
            render_marker("prt_location_year-month-day.parquet", &datum()),
            "prt_CFGLOC100_2020-01-05.parquet.empty"
        );
    }

    #[test]
    fn test_render_marker_single_pass() {
        let key = DatumKey::new("prt", NaiveDate::from_ymd_opt(2020, 1, 5).unwrap(), "dayyear");
        assert_eq!(render_marker("location.csv", &key), "dayyear.csv.empty");
    }

    #[test]
    fn test_render_marker_keeps_existing_suffix() {
        assert_eq!(
            render_marker("flags_location.empty", &datum()),
            "flags_CFGLOC100.empty"
        );
    }

    #[test]
    fn test_parse_output_dirs() {
        let dirs = parse_output_dirs(&["data".into(), "flags".into(), "data".into()]).unwrap();
        assert_eq!(dirs, vec![DataType::Data, DataType::Flags]);
        assert_eq!(parse_output_dirs(&[]).unwrap(), vec![DataType::Data]);
        assert!(parse_output_dirs(&["bogus".into()]).is_err());
    }

    #[tokio::test]
    async fn test_template_names_only_direct_files() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(template_names(dir.path()).await.unwrap().is_none());

        std::fs::write(dir.path().join("prt_location_year-month-day.parquet"), b"").unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/other"), b"").unwrap();
        let names = template_names(dir.path()).await.unwrap().unwrap();
        assert_eq!(names, vec!["prt_location_year-month-day.parquet"]);
    }
}
