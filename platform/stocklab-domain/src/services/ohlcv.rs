use crate::value_objects::bar::Bar;
use crate::value_objects::timeframe::{MONTH, WEEK};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DataQualityReport {
    pub bars: usize,
    pub duplicates: usize,
    pub gaps: usize,
    pub out_of_order: usize,
    pub invalid_bars: usize,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
    pub first_gap: Option<i64>,
    pub first_duplicate: Option<i64>,
    pub first_out_of_order: Option<i64>,
    pub first_invalid_bar: Option<i64>,
    pub max_gap_seconds: Option<i64>,
}

impl DataQualityReport {
    /// True when nothing would make `PriceSeries::new` reject these bars. Gaps are not an issue.
    pub fn is_clean(&self) -> bool {
        self.duplicates == 0 && self.out_of_order == 0 && self.invalid_bars == 0
    }
}

pub fn data_quality_from_bars(
    bars: &[Bar],
    expected_step_seconds: Option<i64>,
) -> DataQualityReport {
    let mut report = DataQualityReport {
        bars: bars.len(),
        ..DataQualityReport::default()
    };
    if bars.is_empty() {
        return report;
    }

    let step = expected_step_seconds.unwrap_or(1).max(1);
    report.first_timestamp = Some(bars[0].timestamp);

    let mut last_ts: Option<i64> = None;
    let mut max_gap: Option<i64> = None;

    for bar in bars {
        let ts = bar.timestamp;

        if !bar.is_well_formed() {
            report.invalid_bars += 1;
            if report.first_invalid_bar.is_none() {
                report.first_invalid_bar = Some(ts);
            }
        }

        if let Some(prev) = last_ts {
            if ts == prev {
                report.duplicates += 1;
                if report.first_duplicate.is_none() {
                    report.first_duplicate = Some(ts);
                }
            } else if ts < prev {
                report.out_of_order += 1;
                if report.first_out_of_order.is_none() {
                    report.first_out_of_order = Some(ts);
                }
            } else {
                let diff = ts - prev;
                if diff > step {
                    report.gaps += 1;
                    if report.first_gap.is_none() {
                        report.first_gap = Some(ts);
                    }
                    max_gap = Some(max_gap.map_or(diff, |current| current.max(diff)));
                }
            }
        }

        last_ts = Some(ts);
        report.last_timestamp = Some(ts);
    }

    report.max_gap_seconds = max_gap;
    report
}

/// Start of the bucket holding `timestamp`: weeks start Monday 00:00 UTC, months on the 1st,
/// every other step is aligned to the epoch.
fn bucket_start(timestamp: i64, step_seconds: i64) -> Result<i64, String> {
    if step_seconds != WEEK && step_seconds != MONTH {
        return Ok(timestamp.saturating_sub(timestamp.rem_euclid(step_seconds)));
    }
    let date = DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| format!("timestamp out of range: {timestamp}"))?
        .date_naive();
    let start = if step_seconds == WEEK {
        date - chrono::Days::new(u64::from(date.weekday().num_days_from_monday()))
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
            .ok_or_else(|| format!("invalid month start for {date}"))?
    };
    Ok(Utc.from_utc_datetime(&start.and_time(NaiveTime::MIN)).timestamp())
}

/// Aggregates bars into `target_step_seconds` buckets; weeks and months follow the calendar.
pub fn resample_bars(bars: &[Bar], target_step_seconds: i64) -> Result<Vec<Bar>, String> {
    if target_step_seconds <= 0 {
        return Err("target_step_seconds must be > 0".to_string());
    }

    let mut output: Vec<Bar> = Vec::new();
    let mut bucket: Option<Bar> = None;

    for bar in bars {
        let bucket_start = bucket_start(bar.timestamp, target_step_seconds)?;

        match bucket.as_mut() {
            Some(agg) if agg.timestamp == bucket_start => {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.volume += bar.volume;
            }
            _ => {
                if let Some(agg) = bucket.take() {
                    output.push(agg);
                }
                bucket = Some(Bar {
                    timestamp: bucket_start,
                    ..*bar
                });
            }
        }
    }

    if let Some(agg) = bucket {
        output.push(agg);
    }

    Ok(output)
}
