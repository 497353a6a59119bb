//! Padded-timeseries analysis.
//!
//! A padded datum is complete when every day listed in its manifest has at
//! least one data file dated that day in its own `data/` directory. Complete
//! datums are linked in full to the output root; incomplete ones are logged
//! and skipped.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::NaiveDate;
use datum_core::path::PathLayout;
use datum_core::{DatumKey, Linker, Settings};
use tracing::{debug, info};

use crate::error::StageError;
use crate::model::DataFileName;
use crate::padder::{DatumFiles, manifest, scan_datums};
use crate::stage::{Stage, StageContext, StageReport};

/// Manifest days with no data file in the datum.
pub fn missing_days(files: &DatumFiles, expected: &BTreeSet<NaiveDate>) -> Vec<NaiveDate> {
    let present: BTreeSet<NaiveDate> = files
        .data_files()
        .filter_map(|f| DataFileName::parse(&f.filename))
        .map(|name| name.date)
        .collect();
    expected.difference(&present).copied().collect()
}

/// Forwards complete padded datums.
#[derive(Debug, Clone)]
pub struct AnalyzePad {
    in_path: PathBuf,
    layout: PathLayout,
    out_path: PathBuf,
}

impl AnalyzePad {
    pub fn new(in_path: PathBuf, out_path: PathBuf) -> Self {
        Self {
            in_path,
            layout: PathLayout::canonical(),
            out_path,
        }
    }
}

impl Stage for AnalyzePad {
    const NAME: &'static str = "analyze-pad";

    fn from_settings(settings: &Settings) -> Result<Self, StageError> {
        Ok(Self {
            in_path: settings.path("IN_PATH")?,
            layout: PathLayout::from_settings(settings, "", PathLayout::canonical())?,
            out_path: settings.path("OUT_PATH")?,
        })
    }

    async fn run(self, ctx: StageContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::default();
        let datums = scan_datums(&self.in_path, &self.layout, ctx.stage(), &mut report).await?;

        let manifested: Vec<(DatumKey, DatumFiles)> = datums
            .into_iter()
            .filter(|(_, files)| files.manifest().is_some())
            .collect();
        info!(datums = manifested.len(), "Analyzing padded datums");

        let mut tasks = ctx.fan_out::<StageReport>("datum");
        for (datum, files) in manifested {
            let out_path = self.out_path.clone();
            let linker = ctx.linker;
            tasks.spawn(async move { analyze_datum(linker, out_path, datum, files).await });
        }
        for partial in tasks.join().await? {
            report.merge(partial);
        }

        info!(
            complete = report.datums,
            incomplete = report.skipped,
            "Padded datums analyzed"
        );
        Ok(report)
    }
}

async fn analyze_datum(
    linker: Linker,
    out_path: PathBuf,
    datum: DatumKey,
    files: DatumFiles,
) -> Result<StageReport, StageError> {
    let mut report = StageReport::default();
    let Some(manifest_file) = files.manifest() else {
        return Ok(report);
    };

    let expected = match manifest::read(&manifest_file.source).await {
        Ok(Some(Ok(days))) => days,
        Ok(Some(Err(reason))) => {
            debug!(datum = %datum, reason = %reason, "Unreadable manifest");
            report.skip_incomplete(linker.stage(), &datum, 0);
            return Ok(report);
        }
        Ok(None) => return Ok(report),
        Err(source) => {
            return Err(StageError::Io {
                path: manifest_file.source.clone(),
                source,
            });
        }
    };

    let missing = missing_days(&files, &expected);
    if !missing.is_empty() {
        debug!(datum = %datum, missing = ?missing, "Manifest days without data");
        report.skip_incomplete(linker.stage(), &datum, missing.len());
        return Ok(report);
    }

    for file in &files.files {
        let outcome = linker
            .link(&file.source, &out_path.join(&file.relative))
            .await?;
        report.record_link(outcome);
    }
    report.finish_datum(linker.stage());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::padder::DatumFile;

    fn data(filename: &str) -> DatumFile {
        DatumFile {
            relative: PathBuf::from(filename),
            source: PathBuf::from(filename),
            data_type: "data".into(),
            filename: filename.into(),
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, d).unwrap()
    }

    #[test]
    fn test_missing_days() {
        let files = DatumFiles {
            files: vec![
                data("prt_L_2020-01-05.parquet"),
                data("prt_L_2020-01-06.parquet"),
                data("prt_L_2020-01-07.parquet.empty"),
                data("manifest.txt"),
            ],
        };
        let expected: BTreeSet<_> = [5, 6, 7].into_iter().map(day).collect();
        assert_eq!(missing_days(&files, &expected), vec![day(7)]);

        let covered: BTreeSet<_> = [5, 6].into_iter().map(day).collect();
        assert!(missing_days(&files, &covered).is_empty());
    }
}
