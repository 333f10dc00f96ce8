use chrono::{NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use stocklab_domain::services::ohlcv::DataQualityReport;
use stocklab_domain::value_objects::bar::Bar;
use stocklab_domain::value_objects::timeframe::parse_timestamp_like;

/// One CSV row. Accepts the `timestamp_utc,open,...` layout as well as the
/// `Date,Open,High,Low,Close,Adj Close,Volume` layout of common vendor exports.
#[derive(Debug, Deserialize)]
pub struct OhlcvRecord {
    #[serde(alias = "timestamp", alias = "date", alias = "Date", alias = "Datetime")]
    pub timestamp_utc: String,
    #[serde(alias = "Open")]
    pub open: f64,
    #[serde(alias = "High")]
    pub high: f64,
    #[serde(alias = "Low")]
    pub low: f64,
    #[serde(alias = "Close")]
    pub close: f64,
    #[serde(alias = "Volume")]
    pub volume: f64,
}

pub fn load_csv(path: &Path) -> Result<(Vec<Bar>, DataQualityReport), String> {
    load_csv_with_step(path, None)
}

/// Reads and canonicalizes a CSV: malformed bars are dropped, a repeated timestamp keeps
/// the later row, and the output is sorted. Every repair is counted in the report.
pub fn load_csv_with_step(
    path: &Path,
    expected_step_seconds: Option<i64>,
) -> Result<(Vec<Bar>, DataQualityReport), String> {
    let file = File::open(path)
        .map_err(|err| format!("failed to open OHLCV CSV {}: {}", path.display(), err))?;
    let mut reader = csv::Reader::from_reader(file);

    let mut bars_by_ts: BTreeMap<i64, Bar> = BTreeMap::new();
    let mut report = DataQualityReport::default();
    let mut last_seen_ts: Option<i64> = None;
    let mut max_gap: Option<i64> = None;
    let step = expected_step_seconds.unwrap_or(1).max(1);

    for (row_idx, result) in reader.deserialize::<OhlcvRecord>().enumerate() {
        let record = result.map_err(|err| {
            format!(
                "failed to parse CSV row {} of {}: {}",
                row_idx + 1,
                path.display(),
                err
            )
        })?;
        report.bars += 1;
        let timestamp = parse_timestamp(&record.timestamp_utc)?;
        let bar = Bar {
            timestamp,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
        };

        if !bar.is_well_formed() {
            report.invalid_bars += 1;
            if report.first_invalid_bar.is_none() {
                report.first_invalid_bar = Some(timestamp);
            }
            continue;
        }

        if let Some(prev) = last_seen_ts {
            if timestamp < prev {
                report.out_of_order += 1;
                if report.first_out_of_order.is_none() {
                    report.first_out_of_order = Some(timestamp);
                }
            }
        }
        last_seen_ts = Some(timestamp);

        if bars_by_ts.insert(timestamp, bar).is_some() {
            report.duplicates += 1;
            if report.first_duplicate.is_none() {
                report.first_duplicate = Some(timestamp);
            }
        }
    }

    if bars_by_ts.is_empty() {
        return Ok((Vec::new(), report));
    }

    let mut bars = Vec::with_capacity(bars_by_ts.len());
    let mut last_unique_ts: Option<i64> = None;
    for (timestamp, bar) in bars_by_ts {
        if report.first_timestamp.is_none() {
            report.first_timestamp = Some(timestamp);
        }
        report.last_timestamp = Some(timestamp);

        if let Some(prev) = last_unique_ts {
            let diff = timestamp - prev;
            if diff > step {
                report.gaps += 1;
                if report.first_gap.is_none() {
                    report.first_gap = Some(timestamp);
                }
                max_gap = Some(max_gap.map_or(diff, |current| current.max(diff)));
            }
        }
        last_unique_ts = Some(timestamp);

        bars.push(bar);
    }

    report.max_gap_seconds = max_gap;
    Ok((bars, report))
}

fn parse_timestamp(value: &str) -> Result<i64, String> {
    let trimmed = value.trim();
    if let Ok(timestamp) = parse_timestamp_like(trimmed) {
        return Ok(timestamp);
    }
    // Spreadsheet exports.
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%m/%d/%Y") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive).timestamp());
        }
    }

    Err(format!("unsupported timestamp format: {}", value))
}
