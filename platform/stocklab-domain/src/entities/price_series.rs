use crate::errors::BacktestError;
use crate::services::ohlcv::{data_quality_from_bars, DataQualityReport};
use crate::value_objects::bar::Bar;
use crate::value_objects::timeframe::Timeframe;
use serde::Serialize;

/// Ordered, validated bar history for a single instrument.
///
/// Construction is the only place bars are checked: timestamps must be strictly increasing and
/// every price finite and positive. Gaps (weekends, halts) are allowed. Once built the series is
/// never mutated, so it can be shared across concurrent runs behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSeries {
    instrument: String,
    bars: Vec<Bar>,
}

impl PriceSeries {
    pub fn new(instrument: impl Into<String>, bars: Vec<Bar>) -> Result<Self, BacktestError> {
        let instrument = instrument.into();
        if instrument.trim().is_empty() {
            return Err(BacktestError::InvalidSeries(
                "instrument id must not be empty".to_string(),
            ));
        }

        let mut prev: Option<i64> = None;
        for (idx, bar) in bars.iter().enumerate() {
            if !bar.is_well_formed() {
                return Err(BacktestError::InvalidSeries(format!(
                    "{instrument}: malformed bar at index {idx} (timestamp {})",
                    bar.timestamp
                )));
            }
            if let Some(prev_ts) = prev {
                if bar.timestamp == prev_ts {
                    return Err(BacktestError::InvalidSeries(format!(
                        "{instrument}: duplicate timestamp {} at index {idx}",
                        bar.timestamp
                    )));
                }
                if bar.timestamp < prev_ts {
                    return Err(BacktestError::InvalidSeries(format!(
                        "{instrument}: timestamp {} at index {idx} is before {prev_ts}",
                        bar.timestamp
                    )));
                }
            }
            prev = Some(bar.timestamp);
        }

        Ok(Self { instrument, bars })
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Bars `0..=t`. Indexes past the end return the full history.
    pub fn history(&self, t: usize) -> &[Bar] {
        let end = t.saturating_add(1).min(self.bars.len());
        &self.bars[..end]
    }

    pub fn start(&self) -> Option<i64> {
        self.bars.first().map(|bar| bar.timestamp)
    }

    pub fn end(&self) -> Option<i64> {
        self.bars.last().map(|bar| bar.timestamp)
    }

    /// Sub-series with `start <= timestamp <= end`; open bounds keep that side unrestricted.
    pub fn slice_range(&self, start: Option<i64>, end: Option<i64>) -> Self {
        let bars = self
            .bars
            .iter()
            .filter(|bar| start.map_or(true, |s| bar.timestamp >= s))
            .filter(|bar| end.map_or(true, |e| bar.timestamp <= e))
            .copied()
            .collect();
        Self {
            instrument: self.instrument.clone(),
            bars,
        }
    }

    pub fn median_spacing(&self) -> Option<i64> {
        if self.bars.len() < 2 {
            return None;
        }
        let mut diffs: Vec<i64> = self
            .bars
            .windows(2)
            .map(|pair| pair[1].timestamp - pair[0].timestamp)
            .collect();
        diffs.sort_unstable();
        Some(diffs[diffs.len() / 2])
    }

    pub fn infer_timeframe(&self) -> Option<Timeframe> {
        self.median_spacing().and_then(Timeframe::from_spacing)
    }

    pub fn quality(&self, expected_step_seconds: Option<i64>) -> DataQualityReport {
        data_quality_from_bars(&self.bars, expected_step_seconds)
    }
}
