use crate::entities::price_series::PriceSeries;
use crate::services::ohlcv::DataQualityReport;
use std::sync::Arc;

/// Identifies one slice of price history. Doubles as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesQuery {
    pub instrument: String,
    /// Target bar size; `None` keeps the source spacing.
    pub timeframe: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl SeriesQuery {
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            timeframe: None,
            start: None,
            end: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedSeries {
    pub series: Arc<PriceSeries>,
    pub report: DataQualityReport,
}

pub trait MarketDataRepository {
    fn load_series(&self, query: &SeriesQuery) -> Result<LoadedSeries, String>;
}
