//! Path codec.
//!
//! Every stage agrees on one family of tree shapes:
//!
//! ```text
//! <source-type>/<yyyy>/<mm>/<dd>/<location-or-source-id>/<data-type>/<file>
//! <yyyy>/<mm>/<dd>/<group>/<source-type>/<location>/<data-type>/<file>
//! <source-type>/<location>/<file>
//! ```
//!
//! A [`PathLayout`] names which element of a split relative path holds which
//! field. [`parse`] turns a path into a typed [`PathKey`] and [`encode`]
//! turns a key back into a path under a new root. Stages never slice paths
//! by index themselves.
//!
//! [`parse`] is strict: a path with more components than the layout names
//! is a bad path. Datum trees may nest files below their data-type
//! directory (`calibration/<term>/<certificate>`); [`parse_nested`] keeps
//! those intermediate directories on the key so [`encode`] re-roots them
//! intact.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};

use crate::config::Settings;
use crate::error::{ConfigError, PathError};

/// The data-type tag of a datum subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Data,
    Location,
    Flags,
    Calibration,
    UncertaintyCoef,
    UncertaintyData,
    Threshold,
}

impl DataType {
    pub const ALL: [DataType; 7] = [
        DataType::Data,
        DataType::Location,
        DataType::Flags,
        DataType::Calibration,
        DataType::UncertaintyCoef,
        DataType::UncertaintyData,
        DataType::Threshold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Data => "data",
            DataType::Location => "location",
            DataType::Flags => "flags",
            DataType::Calibration => "calibration",
            DataType::UncertaintyCoef => "uncertainty_coef",
            DataType::UncertaintyData => "uncertainty_data",
            DataType::Threshold => "threshold",
        }
    }

    /// Directories whose absence of data is signalled with empty markers.
    pub fn is_data_like(&self) -> bool {
        matches!(
            self,
            DataType::Data | DataType::Flags | DataType::UncertaintyData
        )
    }

    /// Directories that are materialised empty when there is nothing to put in them.
    pub fn is_directory_only(&self) -> bool {
        matches!(self, DataType::UncertaintyCoef | DataType::Calibration)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .into_iter()
            .find(|dt| dt.as_str() == s.trim())
            .ok_or_else(|| format!("unknown data type '{s}'"))
    }
}

/// Zero-based positions of each field within a relative path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathLayout {
    pub source_type: usize,
    pub year: Option<usize>,
    pub month: Option<usize>,
    pub day: Option<usize>,
    pub group: Option<usize>,
    pub location: usize,
    pub data_type: Option<usize>,
    pub filename: Option<usize>,
}

impl PathLayout {
    /// `<source-type>/<yyyy>/<mm>/<dd>/<location>/<data-type>/<file>`
    pub const fn canonical() -> Self {
        Self {
            source_type: 0,
            year: Some(1),
            month: Some(2),
            day: Some(3),
            group: None,
            location: 4,
            data_type: Some(5),
            filename: Some(6),
        }
    }

    /// `<source-type>/<location>/<file>`, the location and threshold roots.
    pub const fn undated() -> Self {
        Self {
            source_type: 0,
            year: None,
            month: None,
            day: None,
            group: None,
            location: 1,
            data_type: None,
            filename: Some(2),
        }
    }

    /// `<yyyy>/<mm>/<dd>/<group>/<source-type>/<location>/<data-type>/<file>`
    pub const fn grouped() -> Self {
        Self {
            source_type: 4,
            year: Some(0),
            month: Some(1),
            day: Some(2),
            group: Some(3),
            location: 5,
            data_type: Some(6),
            filename: Some(7),
        }
    }

    /// Read index overrides from settings.
    ///
    /// Keys are `<prefix>SOURCE_TYPE_INDEX`, `<prefix>YEAR_INDEX`, and so on.
    /// `<prefix>LOCATION_INDEX` falls back to `<prefix>SOURCE_ID_INDEX` for
    /// trees keyed by source id.
    pub fn from_settings(
        settings: &Settings,
        prefix: &str,
        defaults: PathLayout,
    ) -> Result<Self, ConfigError> {
        let index = |name: &str| settings.index(&format!("{prefix}{name}"));

        let location = match index("LOCATION_INDEX")? {
            Some(i) => i,
            None => index("SOURCE_ID_INDEX")?.unwrap_or(defaults.location),
        };

        Ok(Self {
            source_type: index("SOURCE_TYPE_INDEX")?.unwrap_or(defaults.source_type),
            year: index("YEAR_INDEX")?.or(defaults.year),
            month: index("MONTH_INDEX")?.or(defaults.month),
            day: index("DAY_INDEX")?.or(defaults.day),
            group: index("GROUP_INDEX")?.or(defaults.group),
            location,
            data_type: index("DATA_TYPE_INDEX")?.or(defaults.data_type),
            filename: index("FILENAME_INDEX")?.or(defaults.filename),
        })
    }

    /// True when the layout can produce a [`DatumKey`].
    pub fn has_date(&self) -> bool {
        self.year.is_some() && self.month.is_some() && self.day.is_some()
    }

    /// The largest index the layout reads.
    pub fn max_index(&self) -> usize {
        [
            Some(self.source_type),
            self.year,
            self.month,
            self.day,
            self.group,
            Some(self.location),
            self.data_type,
            self.filename,
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or_default()
    }
}

impl Default for PathLayout {
    fn default() -> Self {
        Self::canonical()
    }
}

/// The zero-padded year, month and day directory names of a datum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DayParts {
    pub year: String,
    pub month: String,
    pub day: String,
}

impl DayParts {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: format!("{:04}", date.year()),
            month: format!("{:02}", date.month()),
            day: format!("{:02}", date.day()),
        }
    }

    /// The calendar day, if the parts name one.
    pub fn date(&self) -> Option<NaiveDate> {
        let year = self.year.parse().ok()?;
        let month = self.month.parse().ok()?;
        let day = self.day.parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

/// A decoded path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey {
    pub source_type: String,
    pub day: Option<DayParts>,
    pub group: Option<String>,
    pub location: String,
    pub data_type: Option<String>,
    /// Directories between the data type and the filename.
    pub nested: Vec<String>,
    pub filename: Option<String>,
}

impl PathKey {
    /// The file's path below its data-type directory.
    pub fn file_path(&self) -> Option<PathBuf> {
        let filename = self.filename.as_ref()?;
        let mut path: PathBuf = self.nested.iter().collect();
        path.push(filename);
        Some(path)
    }

    /// The data-type tag, when it is one of the known kinds.
    pub fn kind(&self) -> Option<DataType> {
        self.data_type.as_deref().and_then(|dt| dt.parse().ok())
    }

    /// The datum this key belongs to. `path` is only used for the error.
    pub fn to_datum(&self, path: &Path) -> Result<DatumKey, PathError> {
        let parts = self
            .day
            .as_ref()
            .ok_or_else(|| PathError::bad(path, "layout has no date"))?;
        let date = parts.date().ok_or_else(|| {
            PathError::bad(
                path,
                format!(
                    "'{}/{}/{}' is not a calendar day",
                    parts.year, parts.month, parts.day
                ),
            )
        })?;
        Ok(DatumKey {
            source_type: self.source_type.clone(),
            date,
            location: self.location.clone(),
        })
    }
}

/// One `(source-type, day, location)` output directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatumKey {
    pub source_type: String,
    pub date: NaiveDate,
    pub location: String,
}

impl DatumKey {
    pub fn new(source_type: impl Into<String>, date: NaiveDate, location: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            date,
            location: location.into(),
        }
    }

    /// `<base>/<source-type>/<yyyy>/<mm>/<dd>/<location>`
    pub fn dir(&self, base: &Path) -> PathBuf {
        let parts = DayParts::from_date(self.date);
        encode_prefix(
            base,
            OutputLayout::Canonical,
            &self.source_type,
            Some(&parts),
            None,
            &self.location,
        )
    }

    /// The key of `<data-type>/<file_path>` inside this datum.
    pub fn path_key(&self, data_type: &str, file_path: &Path) -> Result<PathKey, PathError> {
        let mut parts = components(file_path)?;
        let filename = parts
            .pop()
            .ok_or_else(|| PathError::bad(file_path, "no filename"))?;
        Ok(PathKey {
            source_type: self.source_type.clone(),
            day: Some(DayParts::from_date(self.date)),
            group: None,
            location: self.location.clone(),
            data_type: Some(data_type.to_string()),
            nested: parts,
            filename: Some(filename),
        })
    }

    /// `<datum dir>/<data-type>`
    pub fn data_type_dir(&self, base: &Path, data_type: DataType) -> PathBuf {
        self.dir(base).join(data_type.as_str())
    }

    /// The same source type and location on another day.
    pub fn with_date(&self, date: NaiveDate) -> Self {
        Self {
            date,
            ..self.clone()
        }
    }
}

impl fmt::Display for DatumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.source_type, self.date, self.location)
    }
}

/// Target shape for [`encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    Canonical,
    Grouped,
    Undated,
}

/// Split a relative path into its normal components.
pub fn components(path: &Path) -> Result<Vec<String>, PathError> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(
                part.to_str()
                    .map(str::to_string)
                    .ok_or_else(|| PathError::bad(path, "path is not valid UTF-8")),
            ),
            _ => None,
        })
        .collect()
}

/// Decode a path relative to a stage's input root.
///
/// When the layout names a filename the path must have exactly as many
/// components as the layout reads.
pub fn parse(path: &Path, layout: &PathLayout) -> Result<PathKey, PathError> {
    decode(path, layout, false)
}

/// Like [`parse`], but extra components after the data type are kept as
/// [`PathKey::nested`] directories, the last one being the filename.
///
/// Only layouts whose filename is their last field accept nesting.
pub fn parse_nested(path: &Path, layout: &PathLayout) -> Result<PathKey, PathError> {
    decode(path, layout, true)
}

fn decode(path: &Path, layout: &PathLayout, allow_nested: bool) -> Result<PathKey, PathError> {
    let parts = components(path)?;
    let expected = layout.max_index() + 1;
    let trailing_filename = layout.filename == Some(layout.max_index());
    let nestable = allow_nested && trailing_filename;

    if parts.len() < expected {
        return Err(PathError::bad(
            path,
            format!("expected {expected} components, found {}", parts.len()),
        ));
    }
    if parts.len() > expected && layout.filename.is_some() && !nestable {
        return Err(PathError::bad(
            path,
            format!("expected {expected} components, found {}", parts.len()),
        ));
    }

    let field = |index: usize, name: &str| -> Result<String, PathError> {
        let value = parts[index].trim();
        if value.is_empty() {
            return Err(PathError::bad(path, format!("empty {name}")));
        }
        Ok(value.to_string())
    };
    let optional = |index: Option<usize>, name: &str| index.map(|i| field(i, name)).transpose();

    let day = match (layout.year, layout.month, layout.day) {
        (Some(y), Some(m), Some(d)) => Some(DayParts {
            year: field(y, "year")?,
            month: field(m, "month")?,
            day: field(d, "day")?,
        }),
        _ => None,
    };

    let (nested, filename) = match layout.filename {
        Some(index) if nestable => {
            let last = parts.len() - 1;
            let nested = (index..last)
                .map(|i| field(i, "directory"))
                .collect::<Result<Vec<_>, _>>()?;
            (nested, Some(field(last, "filename")?))
        }
        index => (Vec::new(), optional(index, "filename")?),
    };

    Ok(PathKey {
        source_type: field(layout.source_type, "source type")?,
        day,
        group: optional(layout.group, "group")?,
        location: field(layout.location, "location")?,
        data_type: optional(layout.data_type, "data type")?,
        nested,
        filename,
    })
}

/// Encode `key` under `base` in the requested shape.
///
/// Data type, nested directories and filename are appended when the key
/// carries them.
pub fn encode(base: &Path, key: &PathKey, layout: OutputLayout) -> Result<PathBuf, PathError> {
    let day = match layout {
        OutputLayout::Undated => None,
        OutputLayout::Canonical | OutputLayout::Grouped => Some(
            key.day
                .as_ref()
                .ok_or_else(|| PathError::bad(base, "dated layout requires a day"))?,
        ),
    };
    let group = match layout {
        OutputLayout::Grouped => Some(
            key.group
                .as_deref()
                .ok_or_else(|| PathError::bad(base, "grouped layout requires a group"))?,
        ),
        OutputLayout::Canonical | OutputLayout::Undated => None,
    };

    let mut out = encode_prefix(base, layout, &key.source_type, day, group, &key.location);
    if let Some(data_type) = &key.data_type {
        out.push(data_type);
    }
    for dir in &key.nested {
        out.push(dir);
    }
    if let Some(filename) = &key.filename {
        out.push(filename);
    }
    Ok(out)
}

/// The directory of one location (and day) in `layout`.
fn encode_prefix(
    base: &Path,
    layout: OutputLayout,
    source_type: &str,
    day: Option<&DayParts>,
    group: Option<&str>,
    location: &str,
) -> PathBuf {
    let mut out = base.to_path_buf();
    let push_day = |out: &mut PathBuf| {
        if let Some(parts) = day {
            out.push(&parts.year);
            out.push(&parts.month);
            out.push(&parts.day);
        }
    };
    match layout {
        OutputLayout::Canonical => {
            out.push(source_type);
            push_day(&mut out);
        }
        OutputLayout::Grouped => {
            push_day(&mut out);
            if let Some(group) = group {
                out.push(group);
            }
            out.push(source_type);
        }
        OutputLayout::Undated => out.push(source_type),
    }
    out.push(location);
    out
}

/// The tail of `path` starting at component `from_index`.
pub fn subpath(path: &Path, from_index: usize) -> Result<PathBuf, PathError> {
    let parts = components(path)?;
    if from_index >= parts.len() {
        return Err(PathError::bad(
            path,
            format!("cannot take components from index {from_index}"),
        ));
    }
    Ok(parts[from_index..].iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str, layout: &PathLayout) -> PathKey {
        parse(Path::new(path), layout).unwrap()
    }

    #[test]
    fn test_parse_canonical() {
        let k = key(
            "prt/2020/01/06/CFGLOC100/data/prt_CFGLOC100_2020-01-06.parquet",
            &PathLayout::canonical(),
        );
        assert_eq!(k.source_type, "prt");
        assert_eq!(k.location, "CFGLOC100");
        assert_eq!(k.kind(), Some(DataType::Data));
        assert_eq!(k.filename.as_deref(), Some("prt_CFGLOC100_2020-01-06.parquet"));
        let datum = k.to_datum(Path::new("x")).unwrap();
        assert_eq!(datum.date, NaiveDate::from_ymd_opt(2020, 1, 6).unwrap());
    }

    #[test]
    fn test_parse_grouped_and_undated() {
        let grouped = key(
            "2020/01/06/aspirated-triple-224/prt/CFGLOC100/data/f.parquet",
            &PathLayout::grouped(),
        );
        assert_eq!(grouped.group.as_deref(), Some("aspirated-triple-224"));
        assert_eq!(grouped.source_type, "prt");

        let undated = key("prt/CFGLOC100/CFGLOC100.json", &PathLayout::undated());
        assert!(undated.day.is_none());
        assert_eq!(undated.location, "CFGLOC100");
        assert!(undated.to_datum(Path::new("x")).is_err());
    }

    #[test]
    fn test_parse_rejects_short_paths() {
        let err = parse(Path::new("prt/2020/01"), &PathLayout::canonical()).unwrap_err();
        assert!(err.to_string().contains("expected 7 components, found 3"));
    }

    #[test]
    fn test_parse_rejects_long_paths() {
        let path = Path::new("prt/2020/01/06/L/calibration/resistance/C2.xml");
        let err = parse(path, &PathLayout::canonical()).unwrap_err();
        assert!(err.to_string().contains("expected 7 components, found 8"));

        let err = parse(Path::new("prt/L/extra/L.json"), &PathLayout::undated()).unwrap_err();
        assert!(err.to_string().contains("expected 3 components, found 4"));
    }

    #[test]
    fn test_parse_nested_keeps_directories() {
        let path = Path::new("prt/2020/01/06/L/calibration/resistance/C2.xml");
        let k = parse_nested(path, &PathLayout::canonical()).unwrap();
        assert_eq!(k.kind(), Some(DataType::Calibration));
        assert_eq!(k.nested, vec!["resistance"]);
        assert_eq!(k.filename.as_deref(), Some("C2.xml"));
        assert_eq!(k.file_path(), Some(PathBuf::from("resistance/C2.xml")));
        assert_eq!(
            encode(Path::new("/out"), &k, OutputLayout::Canonical).unwrap(),
            PathBuf::from("/out/prt/2020/01/06/L/calibration/resistance/C2.xml")
        );

        let flat = parse_nested(Path::new("prt/2020/01/06/L/data/f"), &PathLayout::canonical()).unwrap();
        assert!(flat.nested.is_empty());
        assert!(parse_nested(Path::new("prt/2020/01"), &PathLayout::canonical()).is_err());
    }

    #[test]
    fn test_to_datum_rejects_impossible_day() {
        let k = key("prt/2020/02/30/LOC/data/f", &PathLayout::canonical());
        assert!(k.to_datum(Path::new("prt/2020/02/30/LOC/data/f")).is_err());
    }

    #[test]
    fn test_encode_round_trip_each_layout() {
        let base = Path::new("/out");
        let k = key(
            "2020/01/06/grp/prt/CFGLOC100/flags/f.parquet",
            &PathLayout::grouped(),
        );

        let canonical = encode(base, &k, OutputLayout::Canonical).unwrap();
        assert_eq!(
            canonical,
            PathBuf::from("/out/prt/2020/01/06/CFGLOC100/flags/f.parquet")
        );

        let grouped = encode(base, &k, OutputLayout::Grouped).unwrap();
        assert_eq!(
            grouped,
            PathBuf::from("/out/2020/01/06/grp/prt/CFGLOC100/flags/f.parquet")
        );

        let undated = encode(base, &k, OutputLayout::Undated).unwrap();
        assert_eq!(undated, PathBuf::from("/out/prt/CFGLOC100/flags/f.parquet"));
    }

    #[test]
    fn test_encode_requires_day_for_dated_layouts() {
        let k = key("prt/LOC/LOC.json", &PathLayout::undated());
        assert!(encode(Path::new("/out"), &k, OutputLayout::Canonical).is_err());
        assert!(encode(Path::new("/out"), &k, OutputLayout::Grouped).is_err());
    }

    #[test]
    fn test_subpath() {
        let path = Path::new("prt/2020/01/06/LOC/data/f");
        assert_eq!(subpath(path, 4).unwrap(), PathBuf::from("LOC/data/f"));
        assert_eq!(subpath(path, 0).unwrap(), PathBuf::from(path));
        assert!(subpath(path, 7).is_err());
    }

    #[test]
    fn test_layout_from_settings() {
        let settings = Settings::from_pairs([
            ("SOURCE_ID_INDEX", "5"),
            ("LOCATION_LOCATION_INDEX", "2"),
        ]);

        let data = PathLayout::from_settings(&settings, "", PathLayout::canonical()).unwrap();
        assert_eq!(data.location, 5);
        assert_eq!(data.year, Some(1));

        let locations =
            PathLayout::from_settings(&settings, "LOCATION_", PathLayout::undated()).unwrap();
        assert_eq!(locations.location, 2);
        assert!(!locations.has_date());
    }

    #[test]
    fn test_datum_dir_and_display() {
        let datum = DatumKey::new("prt", NaiveDate::from_ymd_opt(2020, 1, 6).unwrap(), "LOC");
        assert_eq!(
            datum.data_type_dir(Path::new("/out"), DataType::Data),
            PathBuf::from("/out/prt/2020/01/06/LOC/data")
        );
        assert_eq!(datum.to_string(), "prt/2020-01-06/LOC");
    }

    #[test]
    fn test_datum_path_key_encodes_under_datum_dir() {
        let datum = DatumKey::new("prt", NaiveDate::from_ymd_opt(2020, 1, 6).unwrap(), "LOC");
        let key = datum
            .path_key("calibration", Path::new("resistance/C2.xml"))
            .unwrap();
        let encoded = encode(Path::new("/out"), &key, OutputLayout::Canonical).unwrap();
        assert!(encoded.starts_with(datum.dir(Path::new("/out"))));
        assert_eq!(
            encoded,
            PathBuf::from("/out/prt/2020/01/06/LOC/calibration/resistance/C2.xml")
        );
        assert!(datum.path_key("data", Path::new("")).is_err());
    }

    #[test]
    fn test_data_type_tags() {
        for dt in DataType::ALL {
            assert_eq!(dt.as_str().parse::<DataType>().unwrap(), dt);
        }
        assert!(DataType::Flags.is_data_like());
        assert!(DataType::Calibration.is_directory_only());
        assert!(!DataType::Location.is_data_like());
    }
}
