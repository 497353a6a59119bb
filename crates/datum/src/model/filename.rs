//! The `<source-type>_<source-id>_<yyyy-mm-dd>[_<suffix>].<ext>` data file
//! naming convention.

use chrono::NaiveDate;
use datum_core::dates::parse_day;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFileName {
    pub source_type: String,
    pub source_id: String,
    pub date: NaiveDate,
    pub suffix: Option<String>,
}

impl DataFileName {
    /// Parse a file name. The date is the last `_`-separated field that reads
    /// as a day, so source ids may themselves contain underscores.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.split('.').next()?;
        let parts: Vec<&str> = stem.split('_').collect();

        let date_at = (2..parts.len())
            .rev()
            .find(|&i| parse_day(parts[i]).is_some())?;

        let source_type = parts[0];
        if source_type.is_empty() {
            return None;
        }
        let source_id = parts[1..date_at].join("_");
        if source_id.is_empty() {
            return None;
        }
        let suffix = (date_at + 1 < parts.len()).then(|| parts[date_at + 1..].join("_"));

        Some(Self {
            source_type: source_type.to_string(),
            source_id,
            date: parse_day(parts[date_at])?,
            suffix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let name = DataFileName::parse("prt_CFGLOC100_2020-01-06.parquet").unwrap();
        assert_eq!(name.source_type, "prt");
        assert_eq!(name.source_id, "CFGLOC100");
        assert_eq!(name.date, NaiveDate::from_ymd_opt(2020, 1, 6).unwrap());
        assert_eq!(name.suffix, None);
    }

    #[test]
    fn test_parse_underscored_id_and_suffix() {
        let name = DataFileName::parse("li840a_ABC_12_2020-01-06_flagsCal.avro.gz").unwrap();
        assert_eq!(name.source_type, "li840a");
        assert_eq!(name.source_id, "ABC_12");
        assert_eq!(name.suffix.as_deref(), Some("flagsCal"));
    }

    #[test]
    fn test_parse_rejects_other_names() {
        assert!(DataFileName::parse("manifest.txt").is_none());
        assert!(DataFileName::parse("prt_2020-01-06.parquet").is_none());
        assert!(DataFileName::parse("thresholds.json").is_none());
    }
}
