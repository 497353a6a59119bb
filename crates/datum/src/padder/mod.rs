//! Threshold-aware padding.
//!
//! Each datum holding at least one real data file is padded: its data files
//! are linked into the `data/` directory of every neighbouring day in its
//! padded set, its `thresholds.json` into each neighbour's `threshold/`, and
//! the set itself is written to the datum's own `data/manifest.txt`. The
//! padding width comes from the datum's window-size thresholds and the data
//! rate in its location file, or from a constant `WINDOW_SIZE`.

pub mod manifest;
pub mod window;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use datum_core::path::{self, PathLayout};
use datum_core::{DataType, DatumKey, Linker, OutputLayout, Settings, list_files};
use tracing::{debug, info};

use crate::error::{RecordError, StageError};
use crate::gap_filler::EMPTY_SUFFIX;
use crate::model::{LocationFile, ThresholdFile};
use crate::stage::{Stage, StageContext, StageReport};
use crate::thresholds::THRESHOLD_FILE;

pub use manifest::MANIFEST_NAME;
pub use window::{PadDirection, WindowNames, pad_days, padded_days};

/// One file inside a datum directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatumFile {
    /// Path relative to the stage's input root.
    pub relative: PathBuf,
    /// Absolute input path.
    pub source: PathBuf,
    pub data_type: String,
    /// Path below the data-type directory, usually a bare file name.
    pub filename: String,
}

impl DatumFile {
    fn is(&self, data_type: DataType) -> bool {
        self.data_type == data_type.as_str()
    }

    /// A real data file: under `data/`, neither a manifest nor an empty marker.
    pub fn is_real_data(&self) -> bool {
        self.is(DataType::Data)
            && self.filename != MANIFEST_NAME
            && !self.filename.ends_with(EMPTY_SUFFIX)
    }
}

/// Every file of one datum.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatumFiles {
    pub files: Vec<DatumFile>,
}

impl DatumFiles {
    pub fn data_files(&self) -> impl Iterator<Item = &DatumFile> {
        self.files.iter().filter(|f| f.is_real_data())
    }

    pub fn threshold(&self) -> Option<&DatumFile> {
        self.files
            .iter()
            .find(|f| f.is(DataType::Threshold) && f.filename == THRESHOLD_FILE)
    }

    pub fn location(&self) -> Option<&DatumFile> {
        self.files.iter().find(|f| f.is(DataType::Location))
    }

    pub fn manifest(&self) -> Option<&DatumFile> {
        self.files
            .iter()
            .find(|f| f.is(DataType::Data) && f.filename == MANIFEST_NAME)
    }
}

/// Group the files under `root` by datum.
pub async fn scan_datums(
    root: &Path,
    layout: &PathLayout,
    stage: &'static str,
    report: &mut StageReport,
) -> Result<BTreeMap<DatumKey, DatumFiles>, StageError> {
    let mut datums: BTreeMap<DatumKey, DatumFiles> = BTreeMap::new();
    for relative in list_files(root).await? {
        let parsed = path::parse_nested(&relative, layout)
            .and_then(|key| key.to_datum(&relative).map(|datum| (key, datum)));
        let (key, datum) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                report.skip(stage, &RecordError::from(e));
                continue;
            }
        };
        let (Some(filename), Some(data_type)) = (key.file_path(), key.data_type) else {
            continue;
        };
        datums.entry(datum).or_default().files.push(DatumFile {
            source: root.join(&relative),
            relative,
            data_type,
            filename: filename.to_string_lossy().into_owned(),
        });
    }
    Ok(datums)
}

/// How the padding width is chosen.
#[derive(Debug, Clone)]
pub enum PadWindow {
    /// A constant number of days for every datum.
    Constant(u32),
    /// Derived from each datum's thresholds and data rate.
    Thresholds(WindowNames),
}

/// Pads every datum that holds real data.
#[derive(Debug, Clone)]
pub struct Pad {
    in_path: PathBuf,
    layout: PathLayout,
    out_path: PathBuf,
    window: PadWindow,
    direction: PadDirection,
}

impl Pad {
    pub fn new(
        in_path: PathBuf,
        out_path: PathBuf,
        window: PadWindow,
        direction: PadDirection,
    ) -> Self {
        Self {
            in_path,
            layout: PathLayout::canonical(),
            out_path,
            window,
            direction,
        }
    }
}

impl Stage for Pad {
    const NAME: &'static str = "pad";

    fn from_settings(settings: &Settings) -> Result<Self, StageError> {
        let window = match settings.parse::<u32>("WINDOW_SIZE")? {
            Some(days) => PadWindow::Constant(days),
            None => PadWindow::Thresholds(WindowNames::from_settings(settings)),
        };
        let in_path = match settings.optional_path("IN_PATH") {
            Some(path) => path,
            None => settings.path("DATA_PATH")?,
        };
        Ok(Self {
            in_path,
            layout: PathLayout::from_settings(settings, "", PathLayout::canonical())?,
            out_path: settings.path("OUT_PATH")?,
            window,
            direction: PadDirection::from_settings(settings)?,
        })
    }

    async fn run(self, ctx: StageContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::default();
        let datums = scan_datums(&self.in_path, &self.layout, ctx.stage(), &mut report).await?;

        let with_data: Vec<(DatumKey, DatumFiles)> = datums
            .into_iter()
            .filter(|(_, files)| files.data_files().next().is_some())
            .collect();
        info!(datums = with_data.len(), direction = ?self.direction, "Padding datums");

        let window = Arc::new(self.window);
        let mut tasks = ctx.fan_out::<StageReport>("datum");
        for (datum, files) in with_data {
            let window = Arc::clone(&window);
            let out_path = self.out_path.clone();
            let direction = self.direction;
            let linker = ctx.linker;
            tasks.spawn(async move {
                pad_datum(linker, &out_path, &datum, &files, &window, direction).await
            });
        }
        for partial in tasks.join().await? {
            report.merge(partial);
        }
        Ok(report)
    }
}

/// The padding width of one datum, or the record that prevents padding it.
async fn datum_pad_days(
    datum: &DatumKey,
    files: &DatumFiles,
    window: &PadWindow,
) -> Result<Result<u32, RecordError>, StageError> {
    let names = match window {
        PadWindow::Constant(days) => return Ok(Ok(*days)),
        PadWindow::Thresholds(names) => names,
    };

    let thresholds = match files.threshold() {
        Some(file) => match ThresholdFile::read(&file.source).await {
            Ok(parsed) => parsed.thresholds,
            Err(e) => return Ok(Err(e)),
        },
        None => Vec::new(),
    };
    let data_rate = match files.location() {
        Some(file) => match LocationFile::read(&file.source).await {
            Ok(location) => location.location.data_rate(),
            Err(e) => return Ok(Err(e)),
        },
        None => None,
    };

    let max_window = window::max_window_seconds(&thresholds, names, data_rate, &datum.location)?;
    Ok(Ok(pad_days(max_window)))
}

async fn pad_datum(
    linker: Linker,
    out_path: &Path,
    datum: &DatumKey,
    files: &DatumFiles,
    window: &PadWindow,
    direction: PadDirection,
) -> Result<StageReport, StageError> {
    let mut report = StageReport::default();
    let pad = match datum_pad_days(datum, files, window).await? {
        Ok(pad) => pad,
        Err(e) => {
            report.skip(linker.stage(), &e);
            return Ok(report);
        }
    };

    let days = padded_days(datum.date, pad, direction);
    let threshold = files.threshold();
    for day in &days {
        let target = datum.with_date(*day);
        for file in files.data_files() {
            let link = target
                .path_key(DataType::Data.as_str(), Path::new(&file.filename))
                .and_then(|key| path::encode(out_path, &key, OutputLayout::Canonical));
            let link = match link {
                Ok(link) => link,
                Err(e) => {
                    report.skip(linker.stage(), &RecordError::from(e));
                    continue;
                }
            };
            let outcome = linker
                .link(&file.source, &link)
                .await
                .map_err(|e| StageError::from(e).into_pad_collision())?;
            report.record_link(outcome);
        }
        if let Some(threshold) = threshold {
            let link = target
                .data_type_dir(out_path, DataType::Threshold)
                .join(THRESHOLD_FILE);
            report.record_link(linker.link_equivalent(&threshold.source, &link).await?);
        }
    }

    let set: BTreeSet<_> = days.into_iter().collect();
    let manifest_path = datum
        .data_type_dir(out_path, DataType::Data)
        .join(MANIFEST_NAME);
    linker
        .write_text(&manifest_path, &manifest::render(&set))
        .await?;
    report.record_manifest(linker.stage());

    debug!(datum = %datum, pad, days = set.len(), "Padded datum");
    report.finish_datum(linker.stage());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(data_type: &str, filename: &str) -> DatumFile {
        DatumFile {
            relative: PathBuf::from(filename),
            source: PathBuf::from(filename),
            data_type: data_type.into(),
            filename: filename.into(),
        }
    }

    #[test]
    fn test_datum_file_classification() {
        let files = DatumFiles {
            files: vec![
                file("data", "prt_L_2020-01-06.parquet"),
                file("data", "prt_L_2020-01-07.parquet.empty"),
                file("data", MANIFEST_NAME),
                file("flags", "prt_L_2020-01-06_flags.parquet"),
                file("threshold", THRESHOLD_FILE),
                file("location", "L.json"),
            ],
        };
        let data: Vec<_> = files.data_files().map(|f| f.filename.as_str()).collect();
        assert_eq!(data, vec!["prt_L_2020-01-06.parquet"]);
        assert!(files.threshold().is_some());
        assert_eq!(files.location().unwrap().filename, "L.json");
        assert!(files.manifest().is_some());
    }

    #[tokio::test]
    async fn test_constant_window_skips_threshold_reads() {
        let datum = DatumKey::new(
            "prt",
            chrono::NaiveDate::from_ymd_opt(2020, 1, 6).unwrap(),
            "L",
        );
        let files = DatumFiles {
            files: vec![file("threshold", THRESHOLD_FILE)],
        };
        let pad = datum_pad_days(&datum, &files, &PadWindow::Constant(3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pad, 3);
    }
}
