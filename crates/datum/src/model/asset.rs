//! Physical assets and their install history.

use chrono::{DateTime, Days, Utc};
use datum_core::DayWindow;
use datum_core::dates::midnight;
use serde::{Deserialize, Serialize};

/// A physical sensor, identified by asset uid, MAC address or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(default)]
    pub asset_uid: String,
    pub source_type: String,
    #[serde(default)]
    pub mac_address: Option<String>,
}

impl Asset {
    /// The name outputs are keyed by: the asset uid, or the MAC address of
    /// assets known only by it.
    pub fn key(&self) -> Option<&str> {
        if !self.asset_uid.is_empty() {
            return Some(&self.asset_uid);
        }
        self.mac_address.as_deref().filter(|mac| !mac.is_empty())
    }
}

/// An asset installed at a named location for `[install_date, remove_date)`.
///
/// Bindings recorded against a network interface carry the MAC address and
/// may leave the asset uid empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBinding {
    #[serde(default)]
    pub asset_uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(with = "crate::model::timestamp")]
    pub install_date: DateTime<Utc>,
    #[serde(default, with = "crate::model::timestamp::option")]
    pub remove_date: Option<DateTime<Utc>>,
    pub named_location: String,
}

impl AssetBinding {
    /// True when the binding overlaps any part of `window`.
    pub fn overlaps(&self, window: &DayWindow) -> bool {
        let start = midnight(window.start());
        let end = window
            .end()
            .checked_add_days(Days::new(1))
            .map(midnight)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.install_date < end && self.remove_date.is_none_or(|removed| removed > start)
    }
}

/// Check that no two bindings of the same asset overlap in time.
///
/// Returns a description of the first overlap found.
pub fn check_disjoint(bindings: &[AssetBinding]) -> Result<(), String> {
    let mut sorted: Vec<&AssetBinding> = bindings.iter().collect();
    sorted.sort_by_key(|b| (b.asset_uid.clone(), b.install_date));

    for pair in sorted.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a.asset_uid != b.asset_uid {
            continue;
        }
        let overlapping = a.remove_date.is_none_or(|removed| removed > b.install_date);
        if overlapping {
            return Err(format!(
                "asset {} is bound to {} and {} at the same time ({})",
                a.asset_uid, a.named_location, b.named_location, b.install_date
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn binding(loc: &str, from: DateTime<Utc>, to: Option<DateTime<Utc>>) -> AssetBinding {
        AssetBinding {
            asset_uid: "12345".into(),
            mac_address: None,
            install_date: from,
            remove_date: to,
            named_location: loc.into(),
        }
    }

    #[test]
    fn test_disjoint_bindings() {
        let bindings = vec![
            binding("CFGLOC2", ts(2020, 2, 1), None),
            binding("CFGLOC1", ts(2020, 1, 1), Some(ts(2020, 2, 1))),
        ];
        assert!(check_disjoint(&bindings).is_ok());
    }

    #[test]
    fn test_overlapping_bindings() {
        let bindings = vec![
            binding("CFGLOC1", ts(2020, 1, 1), None),
            binding("CFGLOC2", ts(2020, 2, 1), None),
        ];
        let err = check_disjoint(&bindings).unwrap_err();
        assert!(err.contains("CFGLOC1"));
    }

    #[test]
    fn test_asset_key_falls_back_to_mac() {
        let mut asset = Asset {
            asset_uid: "12345".into(),
            source_type: "li191r".into(),
            mac_address: Some("00:1a:2b:3c:4d:5e".into()),
        };
        assert_eq!(asset.key(), Some("12345"));
        asset.asset_uid.clear();
        assert_eq!(asset.key(), Some("00:1a:2b:3c:4d:5e"));
        asset.mac_address = None;
        assert_eq!(asset.key(), None);
    }

    #[test]
    fn test_overlaps_window() {
        let window = DayWindow::new(
            NaiveDate::from_ymd_opt(2020, 1, 5).unwrap(),
            NaiveDate::from_ymd_opt(2020, 1, 7).unwrap(),
        )
        .unwrap();

        assert!(binding("A", ts(2020, 1, 7), None).overlaps(&window));
        assert!(!binding("A", ts(2020, 1, 8), None).overlaps(&window));
        assert!(!binding("A", ts(2019, 1, 1), Some(ts(2020, 1, 5))).overlaps(&window));
        assert!(binding("A", ts(2019, 1, 1), Some(ts(2020, 1, 6))).overlaps(&window));
    }
}
