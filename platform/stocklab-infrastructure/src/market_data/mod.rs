pub mod ohlcv;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use stocklab_domain::entities::price_series::PriceSeries;
use stocklab_domain::repositories::market_data::{LoadedSeries, MarketDataRepository, SeriesQuery};
use stocklab_domain::services::ohlcv::resample_bars;
use stocklab_domain::value_objects::timeframe::Timeframe;

/// Reads `<dir>/<SYMBOL>.csv`, or an explicitly registered file per symbol.
#[derive(Debug, Clone, Default)]
pub struct CsvMarketDataRepository {
    dir: Option<PathBuf>,
    files: HashMap<String, PathBuf>,
}

impl CsvMarketDataRepository {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            files: HashMap::new(),
        }
    }

    pub fn with_file(mut self, symbol: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.files.insert(symbol.into(), path.into());
        self
    }

    pub fn path_for(&self, symbol: &str) -> Result<PathBuf, String> {
        if let Some(path) = self.files.get(symbol) {
            return Ok(path.clone());
        }
        match &self.dir {
            Some(dir) => Ok(dir.join(format!("{symbol}.csv"))),
            None => Err(format!(
                "no OHLCV source for {symbol}: set data.ohlcv_dir or data.ohlcv_csv"
            )),
        }
    }
}

impl MarketDataRepository for CsvMarketDataRepository {
    fn load_series(&self, query: &SeriesQuery) -> Result<LoadedSeries, String> {
        let start = Instant::now();
        let path = self.path_for(&query.instrument)?;
        let target = query
            .timeframe
            .as_deref()
            .map(Timeframe::parse_or_seconds)
            .transpose()?;

        let (bars, source_report) =
            ohlcv::load_csv_with_step(&path, target.as_ref().map(|tf| tf.step_seconds))?;
        let series = PriceSeries::new(query.instrument.clone(), bars)
            .map_err(|err| err.to_string())?
            .slice_range(query.start, query.end);

        let (series, resampled) = match &target {
            Some(target) => conform_to_timeframe(series, target)?,
            None => (series, false),
        };

        // Repairs are counted on the raw file; gaps on what the engine will see.
        let step = target
            .as_ref()
            .map(|tf| tf.step_seconds)
            .or_else(|| series.median_spacing());
        let mut report = series.quality(step);
        report.bars = source_report.bars;
        report.duplicates = source_report.duplicates;
        report.first_duplicate = source_report.first_duplicate;
        report.out_of_order = source_report.out_of_order;
        report.first_out_of_order = source_report.first_out_of_order;
        report.invalid_bars = source_report.invalid_bars;
        report.first_invalid_bar = source_report.first_invalid_bar;

        metrics::histogram!("stocklab.infra.market_data.load_ms")
            .record(start.elapsed().as_millis() as f64);
        tracing::info!(
            symbol = %query.instrument,
            path = %path.display(),
            bars = series.len(),
            duplicates = report.duplicates,
            invalid_bars = report.invalid_bars,
            gaps = report.gaps,
            resampled,
            "loaded OHLCV"
        );

        Ok(LoadedSeries {
            series: Arc::new(series),
            report,
        })
    }
}

/// Keeps a series already at `target`, aggregates finer bars up to it, and refuses to
/// invent bars for a finer target than the source.
fn conform_to_timeframe(
    series: PriceSeries,
    target: &Timeframe,
) -> Result<(PriceSeries, bool), String> {
    let Some(spacing) = series.median_spacing() else {
        return Ok((series, false));
    };
    let source = Timeframe::from_spacing(spacing);
    if source.as_ref().map(|tf| tf.label.as_str()) == Some(target.label.as_str()) {
        return Ok((series, false));
    }
    if target.step_seconds > spacing {
        let bars = resample_bars(series.bars(), target.step_seconds)?;
        let resampled =
            PriceSeries::new(series.instrument(), bars).map_err(|err| err.to_string())?;
        return Ok((resampled, true));
    }
    Err(format!(
        "cannot resample OHLCV: source spacing ({spacing}s) is larger than run timeframe ({})",
        target.label
    ))
}
