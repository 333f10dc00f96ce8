use crate::backtesting::{simulate, write_outputs};
use crate::cache::PriceSeriesCache;
use crate::config::{to_toml_pretty, Config, StrategySection};
use crate::shared::{resolve_engine_settings, resolve_strategy, series_query, timing_event};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Instant;
use stocklab_domain::entities::metrics::MetricsSummary;
use stocklab_domain::repositories::artifacts::ArtifactWriter;
use stocklab_domain::repositories::market_data::MarketDataRepository;
use tracing::info_span;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BatchFile {
    pub batch: BatchMeta,
    pub runs: Vec<BatchRun>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BatchMeta {
    pub id: String,
    /// Resolved relative to the batch file.
    pub base_config: String,
    pub parallelism: Option<usize>,
}

/// One backtest of the batch: the base config with these fields overridden.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BatchRun {
    pub id: String,
    pub symbol: Option<String>,
    pub strategy: Option<StrategySection>,
    pub initial_capital: Option<f64>,
    pub commission_rate: Option<f64>,
    pub allow_short: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRunEntry {
    pub run_id: String,
    pub symbol: String,
    pub strategy: String,
    pub status: String,
    pub error: Option<String>,
    pub metrics: Option<RunMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunMetrics {
    pub bars_processed: usize,
    pub trades: usize,
    pub win_rate: f64,
    pub net_profit: f64,
    pub final_equity: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
}

impl From<&MetricsSummary> for RunMetrics {
    fn from(summary: &MetricsSummary) -> Self {
        Self {
            bars_processed: summary.bars_processed,
            trades: summary.trades,
            win_rate: summary.win_rate,
            net_profit: summary.net_profit,
            final_equity: summary.final_equity,
            annualized_return: summary.performance.annualized_return,
            sharpe_ratio: summary.performance.sharpe_ratio,
            max_drawdown: summary.performance.max_drawdown,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub batch_dir: PathBuf,
    pub base_config: String,
    pub runs: Vec<BatchRunEntry>,
}

impl BatchResult {
    pub fn failed_runs(&self) -> usize {
        self.runs.iter().filter(|run| run.status != "ok").count()
    }
}

pub fn run_batch(
    batch_path: &Path,
    market_data: &(dyn MarketDataRepository + Sync),
    artifacts: &(dyn ArtifactWriter + Sync),
) -> Result<BatchResult, String> {
    run_batch_with_cancel(batch_path, market_data, artifacts, None)
}

pub fn run_batch_with_cancel(
    batch_path: &Path,
    market_data: &(dyn MarketDataRepository + Sync),
    artifacts: &(dyn ArtifactWriter + Sync),
    should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
) -> Result<BatchResult, String> {
    let raw = std::fs::read_to_string(batch_path).map_err(|err| {
        format!(
            "failed to read batch config {}: {err}",
            batch_path.display()
        )
    })?;
    let batch = parse_batch(&raw)
        .map_err(|err| format!("failed to parse batch TOML {}: {err}", batch_path.display()))?;

    let _span = info_span!(
        "run_batch",
        batch_id = %batch.batch.id,
        runs = batch.runs.len()
    )
    .entered();

    let base_config_path = resolve_base_config_path(batch_path, &batch.batch.base_config);
    let base_config = crate::config::load_config(base_config_path.as_path())?;

    let out_dir = PathBuf::from(&base_config.paths.out_dir);
    let batch_dir = out_dir.join("batches").join(&batch.batch.id);
    std::fs::create_dir_all(&batch_dir)
        .map_err(|err| format!("failed to create batch dir {}: {err}", batch_dir.display()))?;

    let plans = batch
        .runs
        .iter()
        .enumerate()
        .map(|(order_idx, run)| build_plan(order_idx, &batch.batch.id, &base_config, run))
        .collect::<Result<Vec<_>, String>>()?;

    let cache = PriceSeriesCache::new(market_data);
    let parallelism = normalize_parallelism(batch.batch.parallelism);
    let mut executed = if parallelism <= 1 || plans.len() <= 1 {
        execute_plans_serial(&plans, &out_dir, &cache, artifacts, should_cancel)?
    } else {
        execute_plans_parallel(
            &plans,
            parallelism,
            &out_dir,
            &cache,
            artifacts,
            should_cancel,
        )?
    };
    executed.sort_by_key(|(order_idx, _)| *order_idx);

    let result = BatchResult {
        batch_id: batch.batch.id.clone(),
        batch_dir: batch_dir.clone(),
        base_config: base_config_path.display().to_string(),
        runs: executed.into_iter().map(|(_, entry)| entry).collect(),
    };

    metrics::gauge!("stocklab.batch.runs").set(result.runs.len() as f64);
    metrics::gauge!("stocklab.batch.failed_runs").set(result.failed_runs() as f64);
    tracing::info!(
        batch_id = %result.batch_id,
        runs = result.runs.len(),
        failed = result.failed_runs(),
        cached_series = cache.len(),
        "batch complete"
    );

    write_manifest(&batch_dir, &result)?;
    write_results_csv(&batch_dir, &result)?;

    Ok(result)
}

/// Loads the base config a batch file points at, so callers can wire adapters before running it.
pub fn load_base_config(batch_path: &Path) -> Result<Config, String> {
    let raw = std::fs::read_to_string(batch_path).map_err(|err| {
        format!(
            "failed to read batch config {}: {err}",
            batch_path.display()
        )
    })?;
    let batch = parse_batch(&raw)
        .map_err(|err| format!("failed to parse batch TOML {}: {err}", batch_path.display()))?;
    crate::config::load_config(&resolve_base_config_path(batch_path, &batch.batch.base_config))
}

pub fn parse_batch(contents: &str) -> Result<BatchFile, String> {
    let batch: BatchFile = toml::from_str(contents).map_err(|err| err.to_string())?;
    if batch.batch.id.trim().is_empty() {
        return Err("batch.id cannot be empty".to_string());
    }
    if batch.runs.is_empty() {
        return Err("batch has no [[runs]]".to_string());
    }
    let mut seen = HashSet::new();
    for run in &batch.runs {
        if run.id.trim().is_empty() {
            return Err("runs.id cannot be empty".to_string());
        }
        if !seen.insert(run.id.as_str()) {
            return Err(format!("duplicate run id: {}", run.id));
        }
    }
    Ok(batch)
}

fn resolve_base_config_path(batch_path: &Path, base: &str) -> PathBuf {
    let p = PathBuf::from(base);
    if p.is_absolute() {
        p
    } else {
        batch_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(p)
    }
}

#[derive(Debug, Clone)]
struct BatchRunPlan {
    order_idx: usize,
    config: Config,
    config_toml: String,
}

fn build_plan(
    order_idx: usize,
    batch_id: &str,
    base: &Config,
    run: &BatchRun,
) -> Result<BatchRunPlan, String> {
    let mut config = base.clone();
    config.run.run_id = format!("{batch_id}__{}", run.id);
    if let Some(symbol) = &run.symbol {
        config.run.symbol = symbol.clone();
    }
    if let Some(strategy) = &run.strategy {
        config.strategy = strategy.clone();
    }
    if let Some(initial_capital) = run.initial_capital {
        config.run.initial_capital = initial_capital;
    }
    if let Some(commission_rate) = run.commission_rate {
        config.costs.commission_rate = commission_rate;
    }
    if let Some(allow_short) = run.allow_short {
        let mut execution = config.execution.take().unwrap_or_default();
        execution.allow_short = Some(allow_short);
        config.execution = Some(execution);
    }
    let config_toml = to_toml_pretty(&config)?;
    Ok(BatchRunPlan {
        order_idx,
        config,
        config_toml,
    })
}

enum WorkerMessage {
    Entry {
        order_idx: usize,
        entry: BatchRunEntry,
    },
    Fatal(String),
}

fn normalize_parallelism(value: Option<usize>) -> usize {
    value.unwrap_or(1).max(1)
}

fn execute_plans_serial(
    plans: &[BatchRunPlan],
    out_dir: &Path,
    cache: &PriceSeriesCache<'_>,
    artifacts: &(dyn ArtifactWriter + Sync),
    should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
) -> Result<Vec<(usize, BatchRunEntry)>, String> {
    let mut out = Vec::with_capacity(plans.len());
    for plan in plans {
        if should_cancelled(should_cancel) {
            return Err("cancelled".to_string());
        }
        let entry = execute_run_plan(plan, out_dir, cache, artifacts, should_cancel)?;
        out.push((plan.order_idx, entry));
    }
    Ok(out)
}

fn execute_plans_parallel(
    plans: &[BatchRunPlan],
    parallelism: usize,
    out_dir: &Path,
    cache: &PriceSeriesCache<'_>,
    artifacts: &(dyn ArtifactWriter + Sync),
    should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
) -> Result<Vec<(usize, BatchRunEntry)>, String> {
    let worker_count = parallelism.max(1).min(plans.len());
    let next_index = AtomicUsize::new(0);
    let cancelled = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel::<WorkerMessage>();

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let tx = tx.clone();
            let next_index_ref = &next_index;
            let cancelled_ref = &cancelled;
            scope.spawn(move || loop {
                if cancelled_ref.load(Ordering::Relaxed) || should_cancelled(should_cancel) {
                    cancelled_ref.store(true, Ordering::Relaxed);
                    let _ = tx.send(WorkerMessage::Fatal("cancelled".to_string()));
                    break;
                }

                let plan_idx = next_index_ref.fetch_add(1, Ordering::Relaxed);
                if plan_idx >= plans.len() {
                    break;
                }

                match execute_run_plan(&plans[plan_idx], out_dir, cache, artifacts, should_cancel)
                {
                    Ok(entry) => {
                        if tx
                            .send(WorkerMessage::Entry {
                                order_idx: plans[plan_idx].order_idx,
                                entry,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(err) => {
                        cancelled_ref.store(true, Ordering::Relaxed);
                        let _ = tx.send(WorkerMessage::Fatal(err));
                        break;
                    }
                }
            });
        }

        drop(tx);

        let mut entries: Vec<(usize, BatchRunEntry)> = Vec::with_capacity(plans.len());
        let mut fatal_error: Option<String> = None;
        while let Ok(message) = rx.recv() {
            match message {
                WorkerMessage::Entry { order_idx, entry } => {
                    if fatal_error.is_none() {
                        entries.push((order_idx, entry));
                    }
                }
                WorkerMessage::Fatal(err) => {
                    if fatal_error.is_none() {
                        fatal_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = fatal_error {
            return Err(err);
        }
        if entries.len() != plans.len() {
            return Err(format!(
                "internal batch error: expected {} results, got {}",
                plans.len(),
                entries.len()
            ));
        }

        Ok(entries)
    })
}

/// A failing run becomes an `error` entry; only cancellation aborts the batch.
fn execute_run_plan(
    plan: &BatchRunPlan,
    out_dir: &Path,
    cache: &PriceSeriesCache<'_>,
    artifacts: &(dyn ArtifactWriter + Sync),
    should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
) -> Result<BatchRunEntry, String> {
    let config = &plan.config;
    let result = run_one(plan, out_dir, cache, artifacts, should_cancel);
    if result.is_err() && should_cancelled(should_cancel) {
        return Err("cancelled".to_string());
    }

    let entry = match result {
        Ok(summary) => BatchRunEntry {
            run_id: config.run.run_id.clone(),
            symbol: config.run.symbol.clone(),
            strategy: config.strategy.kind.clone(),
            status: "ok".to_string(),
            error: None,
            metrics: Some(RunMetrics::from(&summary)),
        },
        Err(err) => {
            tracing::warn!(run_id = %config.run.run_id, error = %err, "batch run failed");
            BatchRunEntry {
                run_id: config.run.run_id.clone(),
                symbol: config.run.symbol.clone(),
                strategy: config.strategy.kind.clone(),
                status: "error".to_string(),
                error: Some(err),
                metrics: None,
            }
        }
    };
    Ok(entry)
}

fn run_one(
    plan: &BatchRunPlan,
    out_dir: &Path,
    cache: &PriceSeriesCache<'_>,
    artifacts: &(dyn ArtifactWriter + Sync),
    should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
) -> Result<MetricsSummary, String> {
    let config = &plan.config;
    let strategy = resolve_strategy(&config.strategy)?;
    let settings = resolve_engine_settings(config)?;
    let query = series_query(config, &config.run.symbol)?;

    let stage_start = Instant::now();
    let loaded = cache.get_or_fetch(&query)?;
    let load_timing = timing_event(
        &config.run.run_id,
        0,
        Some(&config.run.symbol),
        "load_series",
        stage_start.elapsed().as_millis() as u64,
        serde_json::json!({ "bars": loaded.series.len(), "cached": true }),
    );

    let (result, engine_timing) = simulate(&settings, &strategy, &loaded.series, should_cancel)?;
    let run_dir = out_dir.join(&config.run.run_id);
    write_outputs(
        &run_dir,
        &plan.config_toml,
        &result,
        artifacts,
        vec![load_timing, engine_timing],
    )?;
    Ok(result.summary)
}

fn should_cancelled(should_cancel: Option<&(dyn Fn() -> bool + Sync)>) -> bool {
    should_cancel.map(|f| f()).unwrap_or(false)
}

fn write_manifest(dir: &Path, result: &BatchResult) -> Result<(), String> {
    let path = dir.join("manifest.json");
    let json = serde_json::to_string_pretty(result)
        .map_err(|err| format!("failed to serialize manifest: {err}"))?;
    std::fs::write(&path, json)
        .map_err(|err| format!("failed to write {}: {err}", path.display()))?;
    Ok(())
}

fn write_results_csv(dir: &Path, result: &BatchResult) -> Result<(), String> {
    let path = dir.join("results.csv");
    let mut wtr = csv::Writer::from_path(&path)
        .map_err(|err| format!("failed to create {}: {err}", path.display()))?;
    wtr.write_record([
        "run_id",
        "symbol",
        "strategy",
        "status",
        "bars_processed",
        "trades",
        "win_rate",
        "net_profit",
        "final_equity",
        "annualized_return",
        "sharpe_ratio",
        "max_drawdown",
        "error",
    ])
    .map_err(|err| format!("failed to write results header: {err}"))?;

    for r in &result.runs {
        let m = r.metrics;
        let record = vec![
            r.run_id.clone(),
            r.symbol.clone(),
            r.strategy.clone(),
            r.status.clone(),
            m.map(|m| m.bars_processed.to_string()).unwrap_or_default(),
            m.map(|m| m.trades.to_string()).unwrap_or_default(),
            m.map(|m| format!("{}", m.win_rate)).unwrap_or_default(),
            m.map(|m| format!("{}", m.net_profit)).unwrap_or_default(),
            m.map(|m| format!("{}", m.final_equity)).unwrap_or_default(),
            m.map(|m| format!("{}", m.annualized_return))
                .unwrap_or_default(),
            m.map(|m| format!("{}", m.sharpe_ratio)).unwrap_or_default(),
            m.map(|m| format!("{}", m.max_drawdown)).unwrap_or_default(),
            r.error.clone().unwrap_or_default(),
        ];
        wtr.write_record(record)
            .map_err(|err| format!("failed to write results row: {err}"))?;
    }
    wtr.flush()
        .map_err(|err| format!("failed to flush {}: {err}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stocklab_domain::entities::price_series::PriceSeries;
    use stocklab_domain::repositories::market_data::{LoadedSeries, SeriesQuery};
    use stocklab_domain::services::ohlcv::data_quality_from_bars;
    use stocklab_domain::value_objects::bar::Bar;
    use stocklab_infrastructure::artifacts::FilesystemArtifactWriter;

    const DAY: i64 = 86_400;

    struct RampRepo {
        loads: AtomicUsize,
    }

    impl MarketDataRepository for RampRepo {
        fn load_series(&self, query: &SeriesQuery) -> Result<LoadedSeries, String> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if query.instrument == "NOPE" {
                return Err(format!("no OHLCV file for {}", query.instrument));
            }
            let bars: Vec<Bar> = (0..80)
                .map(|i| {
                    let close = 100.0 + i as f64;
                    Bar {
                        timestamp: i as i64 * DAY,
                        open: close,
                        high: close * 1.01,
                        low: close * 0.99,
                        close,
                        volume: 1_000.0,
                    }
                })
                .collect();
            let report = data_quality_from_bars(&bars, Some(DAY));
            let series =
                PriceSeries::new(query.instrument.clone(), bars).map_err(|e| e.to_string())?;
            Ok(LoadedSeries {
                series: Arc::new(series),
                report,
            })
        }
    }

    fn test_temp_dir(prefix: &str) -> PathBuf {
        let unique = format!(
            "{}_{}_{}",
            prefix,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock before UNIX_EPOCH")
                .as_nanos()
        );
        std::env::temp_dir().join(unique)
    }

    fn write_batch(temp_dir: &Path, batch_body: &str) -> PathBuf {
        std::fs::create_dir_all(temp_dir).expect("temp dir");
        let out_dir = temp_dir.join("runs_out");
        let base_config = format!(
            r#"
[run]
run_id = "base_run"
symbol = "AAPL"
timeframe = "1d"
initial_capital = 10000.0

[data]
ohlcv_dir = "unused"

[paths]
out_dir = "{}"

[strategy]
kind = "golden_cross"
fast_period = 5
slow_period = 20

[costs]
commission_rate = 0.001
"#,
            out_dir.display()
        );
        std::fs::write(temp_dir.join("base.toml"), base_config).expect("write base config");
        let batch_path = temp_dir.join("batch.toml");
        std::fs::write(&batch_path, batch_body).expect("write batch config");
        batch_path
    }

    #[test]
    fn normalize_parallelism_guards_invalid_values() {
        assert_eq!(normalize_parallelism(None), 1);
        assert_eq!(normalize_parallelism(Some(0)), 1);
        assert_eq!(normalize_parallelism(Some(4)), 4);
    }

    #[test]
    fn parse_batch_rejects_duplicates_and_unknown_fields() {
        let dup = r#"
[batch]
id = "b"
base_config = "base.toml"

[[runs]]
id = "a"

[[runs]]
id = "a"
"#;
        assert!(parse_batch(dup).unwrap_err().contains("duplicate run id"));

        let unknown = r#"
[batch]
id = "b"
base_config = "base.toml"
resume = true

[[runs]]
id = "a"
"#;
        assert!(parse_batch(unknown).is_err());

        let empty = "[batch]\nid = \"b\"\nbase_config = \"base.toml\"\nruns = []\n";
        assert!(parse_batch(empty).is_err());
    }

    #[test]
    fn parallel_batch_keeps_order_shares_series_and_isolates_failures() {
        let temp_dir = test_temp_dir("stocklab_batch_parallel");
        let batch_path = write_batch(
            &temp_dir,
            r#"
[batch]
id = "demo"
base_config = "base.toml"
parallelism = 4

[[runs]]
id = "gc"

[[runs]]
id = "breakout"
strategy = { kind = "breakout", period = 10 }

[[runs]]
id = "broken"
strategy = { kind = "golden_cross", fast_period = 30, slow_period = 10 }

[[runs]]
id = "missing"
symbol = "NOPE"

[[runs]]
id = "rsi"
strategy = { kind = "multi_factor", rsi_buy_threshold = 30.0, rsi_sell_threshold = 70.0 }
allow_short = true
"#,
        );

        let repo = RampRepo {
            loads: AtomicUsize::new(0),
        };
        let artifacts = FilesystemArtifactWriter::new();
        let result = run_batch(&batch_path, &repo, &artifacts).expect("run batch");

        let ids: Vec<&str> = result.runs.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "demo__gc",
                "demo__breakout",
                "demo__broken",
                "demo__missing",
                "demo__rsi"
            ]
        );
        let statuses: Vec<&str> = result.runs.iter().map(|r| r.status.as_str()).collect();
        assert_eq!(statuses, vec!["ok", "ok", "error", "error", "ok"]);
        assert!(result.runs[2]
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("fast_period"));
        assert_eq!(result.failed_runs(), 2);

        // AAPL loads at most once per racing worker; NOPE is never cached.
        let loads = repo.loads.load(Ordering::SeqCst);
        assert!((2..=5).contains(&loads), "unexpected load count {loads}");

        let out_dir = temp_dir.join("runs_out");
        assert!(out_dir.join("demo__gc").join("summary.json").exists());
        assert!(!out_dir.join("demo__broken").exists());
        let batch_dir = out_dir.join("batches").join("demo");
        assert!(batch_dir.join("manifest.json").exists());
        let results = std::fs::read_to_string(batch_dir.join("results.csv")).expect("results");
        assert_eq!(results.lines().count(), 6);

        let _ = std::fs::remove_dir_all(&temp_dir);
    }

    #[test]
    fn serial_batch_loads_each_symbol_once() {
        let temp_dir = test_temp_dir("stocklab_batch_serial");
        let batch_path = write_batch(
            &temp_dir,
            r#"
[batch]
id = "serial"
base_config = "base.toml"

[[runs]]
id = "a"

[[runs]]
id = "b"
commission_rate = 0.0

[[runs]]
id = "c"
symbol = "MSFT"
"#,
        );
        let repo = RampRepo {
            loads: AtomicUsize::new(0),
        };
        let artifacts = FilesystemArtifactWriter::new();
        let result = run_batch(&batch_path, &repo, &artifacts).expect("run batch");
        assert_eq!(result.failed_runs(), 0);
        assert_eq!(repo.loads.load(Ordering::SeqCst), 2);

        let with_costs = result.runs[0].metrics.expect("metrics");
        let free = result.runs[1].metrics.expect("metrics");
        assert!(free.final_equity > with_costs.final_equity);

        let _ = std::fs::remove_dir_all(&temp_dir);
    }

    #[test]
    fn cancelled_batch_aborts() {
        let temp_dir = test_temp_dir("stocklab_batch_cancel");
        let batch_path = write_batch(
            &temp_dir,
            r#"
[batch]
id = "cancel"
base_config = "base.toml"
parallelism = 2

[[runs]]
id = "a"

[[runs]]
id = "b"
"#,
        );
        let repo = RampRepo {
            loads: AtomicUsize::new(0),
        };
        let artifacts = FilesystemArtifactWriter::new();
        let cancel = || true;
        let err = run_batch_with_cancel(&batch_path, &repo, &artifacts, Some(&cancel))
            .expect_err("cancelled");
        assert_eq!(err, "cancelled");

        let _ = std::fs::remove_dir_all(&temp_dir);
    }

    #[test]
    fn shipped_sample_batch_parses() {
        let batch = parse_batch(include_str!("../../../ops/configs/batch.toml")).expect("batch");
        assert_eq!(batch.batch.parallelism, Some(4));
        assert_eq!(batch.runs.len(), 5);
        let rsi = batch.runs[2].strategy.as_ref().expect("strategy override");
        assert!(crate::shared::resolve_strategy(rsi).is_ok());
    }
}
