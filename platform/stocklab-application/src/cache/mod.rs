use parking_lot::Mutex;
use std::collections::HashMap;
use stocklab_domain::repositories::market_data::{LoadedSeries, MarketDataRepository, SeriesQuery};

/// Memoizes loaded series per query. Hits hand out the same `Arc<PriceSeries>`,
/// so concurrent runs over one instrument share a single copy of the bars.
pub struct PriceSeriesCache<'a> {
    inner: &'a (dyn MarketDataRepository + Sync),
    entries: Mutex<HashMap<SeriesQuery, LoadedSeries>>,
}

impl<'a> PriceSeriesCache<'a> {
    pub fn new(inner: &'a (dyn MarketDataRepository + Sync)) -> Self {
        Self {
            inner,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_fetch(&self, query: &SeriesQuery) -> Result<LoadedSeries, String> {
        if let Some(hit) = self.entries.lock().get(query) {
            metrics::counter!("stocklab.cache.hits").increment(1);
            return Ok(hit.clone());
        }

        // Loaded outside the lock; a racing loader for the same key keeps the first insert.
        metrics::counter!("stocklab.cache.misses").increment(1);
        let loaded = self.inner.load_series(query)?;
        tracing::debug!(
            instrument = %query.instrument,
            bars = loaded.series.len(),
            "series cached"
        );
        let mut entries = self.entries.lock();
        let entry = entries.entry(query.clone()).or_insert(loaded);
        Ok(entry.clone())
    }

    pub fn invalidate(&self, query: &SeriesQuery) -> bool {
        self.entries.lock().remove(query).is_some()
    }

    /// Drops every cached slice of `instrument`, whatever its range or timeframe.
    pub fn invalidate_instrument(&self, instrument: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| key.instrument != instrument);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MarketDataRepository for PriceSeriesCache<'_> {
    fn load_series(&self, query: &SeriesQuery) -> Result<LoadedSeries, String> {
        self.get_or_fetch(query)
    }
}

#[cfg(test)]
mod tests {
    use super::PriceSeriesCache;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use stocklab_domain::entities::price_series::PriceSeries;
    use stocklab_domain::repositories::market_data::{
        LoadedSeries, MarketDataRepository, SeriesQuery,
    };
    use stocklab_domain::services::ohlcv::DataQualityReport;
    use stocklab_domain::value_objects::bar::Bar;

    struct CountingRepo {
        calls: AtomicUsize,
    }

    impl MarketDataRepository for CountingRepo {
        fn load_series(&self, query: &SeriesQuery) -> Result<LoadedSeries, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if query.instrument == "MISSING" {
                return Err("no data for MISSING".to_string());
            }
            let bars = vec![Bar {
                timestamp: 0,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 0.0,
            }];
            let series =
                PriceSeries::new(query.instrument.clone(), bars).map_err(|e| e.to_string())?;
            Ok(LoadedSeries {
                series: Arc::new(series),
                report: DataQualityReport::default(),
            })
        }
    }

    #[test]
    fn hits_share_the_loaded_series() {
        let repo = CountingRepo {
            calls: AtomicUsize::new(0),
        };
        let cache = PriceSeriesCache::new(&repo);
        let query = SeriesQuery::new("AAPL");

        let first = cache.get_or_fetch(&query).expect("first");
        let second = cache.get_or_fetch(&query).expect("second");
        assert!(Arc::ptr_eq(&first.series, &second.series));
        assert_eq!(repo.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn ranges_are_separate_keys() {
        let repo = CountingRepo {
            calls: AtomicUsize::new(0),
        };
        let cache = PriceSeriesCache::new(&repo);
        let mut ranged = SeriesQuery::new("AAPL");
        ranged.start = Some(100);

        cache.get_or_fetch(&SeriesQuery::new("AAPL")).expect("full");
        cache.get_or_fetch(&ranged).expect("ranged");
        cache.get_or_fetch(&SeriesQuery::new("MSFT")).expect("other");
        assert_eq!(repo.calls.load(Ordering::SeqCst), 3);

        assert_eq!(cache.invalidate_instrument("AAPL"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate(&SeriesQuery::new("MSFT")));
        assert!(cache.is_empty());
    }

    #[test]
    fn errors_are_not_cached() {
        let repo = CountingRepo {
            calls: AtomicUsize::new(0),
        };
        let cache = PriceSeriesCache::new(&repo);
        let query = SeriesQuery::new("MISSING");
        assert!(cache.get_or_fetch(&query).is_err());
        assert!(cache.get_or_fetch(&query).is_err());
        assert_eq!(repo.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_readers_load_once_after_warmup() {
        let repo = CountingRepo {
            calls: AtomicUsize::new(0),
        };
        let cache = PriceSeriesCache::new(&repo);
        let query = SeriesQuery::new("AAPL");
        let warm = cache.get_or_fetch(&query).expect("warm");

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let loaded = cache.get_or_fetch(&query).expect("hit");
                    assert!(Arc::ptr_eq(&loaded.series, &warm.series));
                });
            }
        });
        assert_eq!(repo.calls.load(Ordering::SeqCst), 1);

        cache.clear();
        cache.get_or_fetch(&query).expect("reload");
        assert_eq!(repo.calls.load(Ordering::SeqCst), 2);
    }
}
