//! Property tests for day coverage, pad widths and manifests

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{Days, NaiveDate, TimeZone, Utc};
use datum::model::Threshold;
use datum::padder::window::{WindowNames, max_window_seconds};
use datum::padder::{MANIFEST_NAME, manifest, pad_days, padded_days};
use datum::{FillGaps, Pad, PadDirection, PadWindow, Stage, StageContext};
use datum_core::{DataType, DayWindow, LinkMode, Linker};
use proptest::prelude::*;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
}

fn offset(days: u32) -> NaiveDate {
    base().checked_add_days(Days::new(u64::from(days))).unwrap()
}

fn write(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn ctx(stage: &'static str) -> StageContext {
    StageContext::new(
        Linker::new(LinkMode::Symlink, stage),
        4,
        CancellationToken::new(),
    )
}

fn location_json(name: &str, periods: &[(u32, u32)]) -> String {
    let periods: Vec<serde_json::Value> = periods
        .iter()
        .map(|&(start, len)| {
            serde_json::json!({
                "start_date": format!("{}T00:00:00Z", offset(start)),
                "end_date": format!("{}T00:00:00Z", offset(start + len)),
            })
        })
        .collect();
    serde_json::json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "geometry": null,
            "properties": {"name": name, "active_periods": periods},
        }],
    })
    .to_string()
}

fn threshold(name: &str, seconds: f64) -> Threshold {
    Threshold {
        threshold_name: name.into(),
        term_name: "temp".into(),
        location_name: "REALM".into(),
        context: vec![],
        start_day_of_year: None,
        end_day_of_year: None,
        is_date_constrained: false,
        number_value: Some(seconds),
        string_value: None,
    }
}

/// Up to three locations, each with one or two `(start, length)` periods.
fn arb_locations() -> impl Strategy<Value = Vec<Vec<(u32, u32)>>> {
    prop::collection::vec(prop::collection::vec((0u32..40, 1u32..15), 1..=2), 1..=3)
}

fn arb_direction() -> impl Strategy<Value = PadDirection> {
    prop_oneof![Just(PadDirection::Symmetric), Just(PadDirection::Backward)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: one datum per active location-day inside the window.
    #[test]
    fn prop_datum_count_matches_active_days(
        locations in arb_locations(),
        window_start in 0u32..30,
        window_len in 0u32..20,
    ) {
        let loc_root = TempDir::new().unwrap();
        let data_root = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        for (i, periods) in locations.iter().enumerate() {
            let name = format!("L{i}");
            write(
                &loc_root.path().join("prt").join(&name).join(format!("{name}.json")),
                &location_json(&name, periods),
            );
        }

        let window_end = window_start + window_len;
        let expected: usize = locations
            .iter()
            .map(|periods| {
                (window_start..=window_end)
                    .filter(|&d| periods.iter().any(|&(s, len)| s <= d && d < s + len))
                    .count()
            })
            .sum();

        let stage = FillGaps::new(
            data_root.path().to_path_buf(),
            loc_root.path().to_path_buf(),
            None,
            DayWindow::new(offset(window_start), offset(window_end)).unwrap(),
            out.path().to_path_buf(),
        )
        .with_output_dirs(vec![DataType::Location])
        .with_now(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let report = runtime().block_on(stage.run(ctx(FillGaps::NAME))).unwrap();

        prop_assert_eq!(report.datums as usize, expected);
    }

    /// Property: a wider maximum window never pads fewer days.
    #[test]
    fn prop_pad_days_monotone(
        seconds in prop::collection::vec(0.0f64..1_000_000.0, 0..6),
        extra in 0.0f64..1_000_000.0,
    ) {
        let names = WindowNames::default();
        let thresholds: Vec<_> = seconds
            .iter()
            .map(|&s| threshold("Persistence (time - seconds)", s))
            .collect();
        let before = max_window_seconds(&thresholds, &names, None, "L").unwrap();

        let mut widened = thresholds.clone();
        widened.push(threshold("Persistence (time - seconds)", extra));
        let after = max_window_seconds(&widened, &names, None, "L").unwrap();

        prop_assert!(after >= before);
        prop_assert!(pad_days(after) >= pad_days(before));
    }

    /// Property: each padded set holds `2p + 1` (or `p + 1`) consecutive days
    /// around its datum, oldest first.
    #[test]
    fn prop_padded_days_shape(
        start in 0u32..400,
        pad in 0u32..10,
        direction in arb_direction(),
    ) {
        let day = offset(start);
        let days = padded_days(day, pad, direction);
        let expected_len = match direction {
            PadDirection::Symmetric => 2 * pad + 1,
            PadDirection::Backward => pad + 1,
        };
        prop_assert_eq!(days.len() as u32, expected_len);
        prop_assert_eq!(days[pad as usize], day);
        prop_assert!(days.windows(2).all(|w| w[1].signed_duration_since(w[0]).num_days() == 1));
    }

    /// Property: the manifest of every padded datum enumerates exactly the
    /// padded set of its data, and every listed day received the data.
    #[test]
    fn prop_manifests_match_padded_sets(
        file_days in prop::collection::btree_set(3u32..25, 1..4),
        pad in 0u32..3,
        direction in arb_direction(),
    ) {
        let input = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        for &d in &file_days {
            let date = offset(d);
            let dir = input
                .path()
                .join(format!("prt/{}/L/data", date.format("%Y/%m/%d")));
            write(&dir.join(format!("prt_L_{date}.parquet")), "x");
        }

        let stage = Pad::new(
            input.path().to_path_buf(),
            out.path().to_path_buf(),
            PadWindow::Constant(pad),
            direction,
        );
        let report = runtime().block_on(stage.run(ctx(Pad::NAME))).unwrap();
        prop_assert_eq!(report.manifests as usize, file_days.len());

        for &d in &file_days {
            let date = offset(d);
            let text = std::fs::read_to_string(
                out.path()
                    .join(format!("prt/{}/L/data", date.format("%Y/%m/%d")))
                    .join(MANIFEST_NAME),
            )
            .unwrap();
            let listed = manifest::parse(&text).unwrap();
            let expected: BTreeSet<_> = padded_days(date, pad, direction).into_iter().collect();
            prop_assert_eq!(&listed, &expected);

            for padded in &listed {
                let copy = out
                    .path()
                    .join(format!("prt/{}/L/data", padded.format("%Y/%m/%d")))
                    .join(format!("prt_L_{date}.parquet"));
                prop_assert!(copy.exists());
            }
        }
    }
}
