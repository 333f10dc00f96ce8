use crate::config::Config;
use crate::shared::{
    resolve_engine_settings, resolve_strategy, series_query, summary_log_details,
    summary_meta_json, timing_event,
};
use stocklab_domain::entities::metrics::MetricsSummary;
use stocklab_domain::entities::price_series::PriceSeries;
use stocklab_domain::repositories::artifacts::ArtifactWriter;
use stocklab_domain::repositories::market_data::MarketDataRepository;
use stocklab_domain::services::audit::AuditEvent;
use stocklab_domain::services::engine::backtest::{
    BacktestResult, EngineSettings, SimulationEngine,
};
use stocklab_domain::services::strategy::StrategyConfig;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info_span;

#[derive(Debug, Clone)]
pub struct BacktestOutput {
    pub run_dir: PathBuf,
    pub summary: MetricsSummary,
}

pub fn run_backtest(
    config: &Config,
    config_toml: &str,
    out: Option<PathBuf>,
    market_data: &dyn MarketDataRepository,
    artifacts: &dyn ArtifactWriter,
) -> Result<BacktestOutput, String> {
    run_backtest_with_cancel(config, config_toml, out, market_data, artifacts, None)
}

pub fn run_backtest_with_cancel(
    config: &Config,
    config_toml: &str,
    out: Option<PathBuf>,
    market_data: &dyn MarketDataRepository,
    artifacts: &dyn ArtifactWriter,
    should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
) -> Result<BacktestOutput, String> {
    let _span = info_span!(
        "run_backtest",
        run_id = %config.run.run_id,
        symbol = %config.run.symbol,
        timeframe = %config.run.timeframe
    )
    .entered();

    let strategy = resolve_strategy(&config.strategy)?;
    let settings = resolve_engine_settings(config)?;
    let query = series_query(config, &config.run.symbol)?;

    let mut audit_extras: Vec<AuditEvent> = Vec::new();

    let stage_start = Instant::now();
    let loaded = market_data.load_series(&query)?;
    metrics::histogram!("stocklab.backtest.load_series_ms")
        .record(stage_start.elapsed().as_millis() as f64);
    audit_extras.push(timing_event(
        &config.run.run_id,
        0,
        Some(&config.run.symbol),
        "load_series",
        stage_start.elapsed().as_millis() as u64,
        serde_json::json!({
            "bars": loaded.series.len(),
            "duplicates": loaded.report.duplicates,
            "gaps": loaded.report.gaps,
            "out_of_order": loaded.report.out_of_order,
            "invalid_bars": loaded.report.invalid_bars,
            "timeframe": query.timeframe,
        }),
    ));

    let (result, timing) = simulate(&settings, &strategy, &loaded.series, should_cancel)?;
    audit_extras.push(timing);

    let base_dir = out.unwrap_or_else(|| PathBuf::from(&config.paths.out_dir));
    let run_dir = base_dir.join(&config.run.run_id);
    write_outputs(&run_dir, config_toml, &result, artifacts, audit_extras)?;

    tracing::info!(
        run_dir = %run_dir.display(),
        trades = result.summary.trades,
        final_equity = result.summary.final_equity,
        "backtest complete"
    );

    Ok(BacktestOutput {
        run_dir,
        summary: result.summary,
    })
}

/// Runs the engine and records its timing. Shared by single runs and batches.
pub(crate) fn simulate(
    settings: &EngineSettings,
    strategy: &StrategyConfig,
    series: &PriceSeries,
    should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
) -> Result<(BacktestResult, AuditEvent), String> {
    let stage_start = Instant::now();
    let engine = SimulationEngine::new(settings.clone());
    let result = engine
        .run_with_cancel(series, strategy, should_cancel)
        .map_err(|err| err.to_string())?;

    let engine_ms = stage_start.elapsed().as_millis() as f64;
    metrics::histogram!("stocklab.backtest.engine_ms").record(engine_ms);
    metrics::gauge!("stocklab.backtest.bars_processed").set(result.summary.bars_processed as f64);
    metrics::gauge!("stocklab.backtest.trades").set(result.summary.trades as f64);
    metrics::gauge!("stocklab.backtest.engine_bars_per_sec").set(if engine_ms > 0.0 {
        (result.summary.bars_processed as f64) / (engine_ms / 1000.0)
    } else {
        0.0
    });

    let timing = timing_event(
        &settings.run_id,
        0,
        Some(series.instrument()),
        "run_engine",
        stage_start.elapsed().as_millis() as u64,
        summary_log_details(&result.summary),
    );
    Ok((result, timing))
}

pub(crate) fn write_outputs(
    run_dir: &Path,
    config_toml: &str,
    result: &BacktestResult,
    artifacts: &dyn ArtifactWriter,
    mut audit_extras: Vec<AuditEvent>,
) -> Result<(), String> {
    artifacts.ensure_dir(run_dir)?;

    artifacts.write_trades_csv(run_dir.join("trades.csv").as_path(), &result.trade_log)?;
    artifacts.write_equity_csv(run_dir.join("equity.csv").as_path(), &result.equity_curve)?;
    let meta = summary_meta_json(
        &result.run_id,
        &result.instrument,
        &result.strategy,
        &result.equity_curve,
    );
    artifacts.write_summary_json(
        run_dir.join("summary.json").as_path(),
        &result.summary,
        Some(&meta),
    )?;

    let mut audit_events = result.audit_events.clone();
    audit_events.append(&mut audit_extras);
    audit_events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.stage.cmp(&b.stage))
            .then_with(|| a.action.cmp(&b.action))
    });
    artifacts.write_audit_jsonl(run_dir.join("logs.jsonl").as_path(), &audit_events)?;

    artifacts
        .write_config_snapshot_toml(run_dir.join("config_snapshot.toml").as_path(), config_toml)?;

    Ok(())
}
