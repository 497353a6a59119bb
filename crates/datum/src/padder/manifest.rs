//! Pad manifests: one ISO-8601 day per line, ascending, LF-terminated.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use chrono::NaiveDate;
use datum_core::dates::parse_day;

pub const MANIFEST_NAME: &str = "manifest.txt";

pub fn render(days: &BTreeSet<NaiveDate>) -> String {
    days.iter().map(|day| format!("{day}\n")).collect()
}

/// Parse a manifest. Blank lines are ignored.
pub fn parse(text: &str) -> Result<BTreeSet<NaiveDate>, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| parse_day(line).ok_or_else(|| format!("invalid manifest line '{line}'")))
        .collect()
}

/// Read a manifest, `None` when there is none.
pub async fn read(path: &Path) -> io::Result<Option<Result<BTreeSet<NaiveDate>, String>>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(parse(&text))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
