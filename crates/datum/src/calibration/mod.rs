//! Calibration attachment.
//!
//! For every data file in a tree keyed by source id, the certificates of
//! that source id whose validity range intersects the file's day are linked
//! into `<datum>/calibration/<term>/<certificate>`. Each datum gets a
//! `calibration/` directory even when no certificate applies.

pub mod schema;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use datum_core::listing::list_dirs;
use datum_core::path::{self, PathLayout};
use datum_core::{DataType, DatumKey, Linker, OutputLayout, Settings, list_files};
use tracing::{debug, info};

use crate::error::{RecordError, StageError};
use crate::model::{CalibrationCertificate, DataFileName};
use crate::stage::{Stage, StageContext, StageReport};

pub use schema::StreamTerms;

/// A data file with the datum it belongs to.
#[derive(Debug, Clone)]
struct DataFile {
    source: PathBuf,
    datum: DatumKey,
    /// Output path of the data file's own link.
    link: PathBuf,
}

/// Links valid calibration certificates into each datum.
#[derive(Debug, Clone)]
pub struct AttachCalibrations {
    data_path: PathBuf,
    layout: PathLayout,
    calibration_path: PathBuf,
    schema_path: Option<PathBuf>,
    out_path: PathBuf,
}

impl AttachCalibrations {
    pub fn new(
        data_path: PathBuf,
        calibration_path: PathBuf,
        schema_path: Option<PathBuf>,
        out_path: PathBuf,
    ) -> Self {
        Self {
            data_path,
            layout: PathLayout::canonical(),
            calibration_path,
            schema_path,
            out_path,
        }
    }

    async fn load_schemas<'a>(
        &self,
        source_types: impl Iterator<Item = &'a str>,
    ) -> Result<HashMap<String, Arc<StreamTerms>>, StageError> {
        let mut schemas = HashMap::new();
        let Some(root) = &self.schema_path else {
            return Ok(schemas);
        };
        for source_type in source_types {
            let terms = StreamTerms::read(root, source_type).await?;
            debug!(source_type, streams = terms.len(), "Loaded stream terms");
            schemas.insert(source_type.to_string(), Arc::new(terms));
        }
        Ok(schemas)
    }
}

impl Stage for AttachCalibrations {
    const NAME: &'static str = "attach-calibrations";

    fn from_settings(settings: &Settings) -> Result<Self, StageError> {
        let data_path = match settings.optional_path("DATA_PATH") {
            Some(path) => path,
            None => settings.path("IN_PATH")?,
        };
        Ok(Self {
            data_path,
            layout: PathLayout::from_settings(settings, "", PathLayout::canonical())?,
            calibration_path: settings.path("CALIBRATION_PATH")?,
            schema_path: settings.optional_path("SCHEMA_PATH"),
            out_path: settings.path("OUT_PATH")?,
        })
    }

    async fn run(self, ctx: StageContext) -> Result<StageReport, StageError> {
        if !tokio::fs::metadata(&self.calibration_path)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            return Err(StageError::MissingInput {
                path: self.calibration_path.clone(),
            });
        }

        let mut report = StageReport::default();
        let mut groups: BTreeMap<(String, String), Vec<DataFile>> = BTreeMap::new();
        for relative in list_files(&self.data_path).await? {
            let parsed = path::parse_nested(&relative, &self.layout).and_then(|mut key| {
                let datum = key.to_datum(&relative)?;
                if key.data_type.is_none() {
                    key.data_type = Some(DataType::Data.as_str().to_string());
                }
                if key.filename.is_none() {
                    key.filename = relative
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned());
                }
                let link = path::encode(&self.out_path, &key, OutputLayout::Canonical)?;
                Ok((key, datum, link))
            });
            let (key, datum, link) = match parsed {
                Ok(parsed) => parsed,
                Err(e) => {
                    report.skip(ctx.stage(), &RecordError::from(e));
                    continue;
                }
            };
            let source = match key.filename.as_deref().and_then(DataFileName::parse) {
                Some(name) => (name.source_type, name.source_id),
                None => (key.source_type.clone(), key.location.clone()),
            };
            groups.entry(source).or_default().push(DataFile {
                source: self.data_path.join(&relative),
                datum,
                link,
            });
        }

        let source_types: BTreeSet<&str> = groups.keys().map(|(st, _)| st.as_str()).collect();
        let schemas = self.load_schemas(source_types.into_iter()).await?;
        info!(source_ids = groups.len(), "Attaching calibrations");

        let mut tasks = ctx.fan_out::<StageReport>("source_id");
        for ((source_type, source_id), files) in groups {
            let terms = schemas.get(&source_type).cloned();
            let cert_dir = self.calibration_path.join(&source_type).join(&source_id);
            let out_path = self.out_path.clone();
            let linker = ctx.linker;
            tasks.spawn(async move {
                attach_source(linker, &cert_dir, &out_path, &source_id, terms, files).await
            });
        }
        for partial in tasks.join().await? {
            report.merge(partial);
        }
        Ok(report)
    }
}

/// Read every certificate under `<dir>/<stream-id>/`.
///
/// With a schema, streams it does not map to a term are left out.
pub async fn load_certificates(
    dir: &Path,
    source_id: &str,
    terms: Option<&StreamTerms>,
    stage: &'static str,
    report: &mut StageReport,
) -> Result<Vec<CalibrationCertificate>, StageError> {
    let mut certificates = Vec::new();
    for stream_id in list_dirs(dir).await? {
        let term_name = terms.and_then(|t| t.term(&stream_id)).map(str::to_string);
        if terms.is_some() && term_name.is_none() {
            debug!(source_id, stream_id = %stream_id, "Stream has no term in the schema");
            continue;
        }
        let stream_dir = dir.join(&stream_id);
        for file in list_files(&stream_dir).await? {
            let path = stream_dir.join(file);
            match CalibrationCertificate::read(source_id, &stream_id, &path).await {
                Ok(mut cert) => {
                    cert.term_name = term_name.clone();
                    certificates.push(cert);
                }
                Err(e) => report.skip(stage, &e),
            }
        }
    }
    Ok(certificates)
}

async fn attach_source(
    linker: Linker,
    cert_dir: &Path,
    out_path: &Path,
    source_id: &str,
    terms: Option<Arc<StreamTerms>>,
    files: Vec<DataFile>,
) -> Result<StageReport, StageError> {
    let mut report = StageReport::default();
    let certificates =
        load_certificates(cert_dir, source_id, terms.as_deref(), linker.stage(), &mut report)
            .await?;
    debug!(source_id, certificates = certificates.len(), files = files.len(), "Attaching");

    let mut datums = BTreeSet::new();
    for file in files {
        report.record_link(linker.link(&file.source, &file.link).await?);

        let calibration_dir = file.datum.data_type_dir(out_path, DataType::Calibration);
        linker.ensure_dir(&calibration_dir).await?;

        for cert in &certificates {
            if !cert.validity.covers_day(file.datum.date) {
                continue;
            }
            let Some(name) = cert.file_name() else {
                continue;
            };
            let term = cert.term_name.as_deref().unwrap_or(&cert.stream_id);
            let link = calibration_dir.join(term).join(name);
            report.record_link(linker.link(&cert.path, &link).await?);
        }

        if datums.insert(file.datum) {
            report.finish_datum(linker.stage());
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use datum_core::LinkMode;
    use tempfile::TempDir;

    fn cert(start: &str, end: &str) -> String {
        format!(
            "<inst_calib><ValidTimeRange><StartTime>{start}</StartTime><EndTime>{end}</EndTime></ValidTimeRange></inst_calib>"
        )
    }

    #[tokio::test]
    async fn test_load_certificates_skips_unreadable() {
        let dir = TempDir::new().unwrap();
        let stream = dir.path().join("0");
        std::fs::create_dir_all(&stream).unwrap();
        std::fs::write(stream.join("good.xml"), cert("2020-01-01T00:00:00Z", "")).unwrap();
        std::fs::write(stream.join("bad.xml"), "<inst_calib/>").unwrap();

        let terms = StreamTerms::from_pairs([("0", "resistance")]);
        let mut report = StageReport::default();
        let certs = load_certificates(dir.path(), "123", Some(&terms), "test", &mut report)
            .await
            .unwrap();

        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0].term_name.as_deref(), Some("resistance"));
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_load_certificates_drops_unmapped_streams() {
        let dir = TempDir::new().unwrap();
        for stream in ["0", "9"] {
            let stream_dir = dir.path().join(stream);
            std::fs::create_dir_all(&stream_dir).unwrap();
            std::fs::write(stream_dir.join("C.xml"), cert("2020-01-01T00:00:00Z", "")).unwrap();
        }

        let terms = StreamTerms::from_pairs([("0", "resistance")]);
        let mut report = StageReport::default();
        let certs = load_certificates(dir.path(), "123", Some(&terms), "test", &mut report)
            .await
            .unwrap();
        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0].stream_id, "0");
        assert_eq!(report.skipped, 0);

        let mut report = StageReport::default();
        let unmapped = load_certificates(dir.path(), "123", None, "test", &mut report)
            .await
            .unwrap();
        assert_eq!(unmapped.len(), 2);
        assert!(unmapped.iter().all(|c| c.term_name.is_none()));
    }

    #[tokio::test]
    async fn test_calibration_dir_created_without_certificates() {
        let data = TempDir::new().unwrap();
        let cal = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();

        let file = data.path().join("prt/2020/01/05/123/data/prt_123_2020-01-05.parquet");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"x").unwrap();

        let stage = AttachCalibrations::new(
            data.path().to_path_buf(),
            cal.path().to_path_buf(),
            None,
            out.path().to_path_buf(),
        );
        let ctx = StageContext::new(
            Linker::new(LinkMode::Symlink, AttachCalibrations::NAME),
            4,
            tokio_util::sync::CancellationToken::new(),
        );
        let report = stage.run(ctx).await.unwrap();

        let datum = out.path().join("prt/2020/01/05/123");
        assert!(datum.join("calibration").is_dir());
        assert!(datum.join("data/prt_123_2020-01-05.parquet").exists());
        assert_eq!(report.datums, 1);
    }
}
