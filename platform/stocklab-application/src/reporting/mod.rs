use crate::config::{parse_config, Config};
use crate::shared::{resolve_strategy, summary_log_details, summary_meta_json};
use std::path::{Path, PathBuf};
use std::time::Instant;
use stocklab_domain::entities::metrics::{
    MetricsSummary, PerformanceAnalyzer, DEFAULT_PERIODS_PER_YEAR,
};
use stocklab_domain::repositories::artifacts::{ArtifactReader, ArtifactWriter};
use stocklab_domain::services::audit::AuditEvent;
use stocklab_domain::value_objects::equity_point::EquityPoint;
use stocklab_domain::value_objects::timeframe::Timeframe;
use stocklab_domain::value_objects::trade::Trade;
use tracing::info_span;

pub struct GenerateReportResult {
    pub input_dir: PathBuf,
    pub run_id: String,
    pub summary: MetricsSummary,
}

/// Rebuilds `summary.json` and `logs.jsonl` of a finished run from its trade log and equity curve.
pub fn generate_report(
    input_dir: &Path,
    reader: &dyn ArtifactReader,
    writer: &dyn ArtifactWriter,
) -> Result<GenerateReportResult, String> {
    let _span = info_span!("generate_report", input_dir = %input_dir.display()).entered();

    let stage_start = Instant::now();
    let trades_path = input_dir.join("trades.csv");
    let equity_path = input_dir.join("equity.csv");
    let config_path = input_dir.join("config_snapshot.toml");

    if !reader.exists(&trades_path) || !reader.exists(&equity_path) {
        return Err(format!(
            "missing trades.csv or equity.csv in {}",
            input_dir.display()
        ));
    }

    let trades = reader.read_trades_csv(&trades_path)?;
    let equity = reader.read_equity_csv(&equity_path)?;

    let config = reader
        .read_config_snapshot_toml(&config_path)?
        .and_then(|raw| parse_config(&raw).ok());

    let summary = recompute_summary(config.as_ref(), &trades, &equity)?;
    metrics::histogram!("stocklab.report.generate_ms")
        .record(stage_start.elapsed().as_millis() as f64);
    metrics::gauge!("stocklab.report.trades").set(trades.len() as f64);
    metrics::gauge!("stocklab.report.bars_processed").set(summary.bars_processed as f64);

    let (run_id, meta) = match config.as_ref() {
        Some(config) => {
            let meta = resolve_strategy(&config.strategy).ok().map(|strategy| {
                summary_meta_json(&config.run.run_id, &config.run.symbol, &strategy, &equity)
            });
            (config.run.run_id.clone(), meta)
        }
        None => ("unknown".to_string(), None),
    };

    writer.write_summary_json(
        input_dir.join("summary.json").as_path(),
        &summary,
        meta.as_ref(),
    )?;

    let symbol = config.as_ref().map(|c| c.run.symbol.as_str());
    let events = build_report_events(&run_id, symbol, &trades, &summary, &equity, input_dir);
    writer.write_audit_jsonl(input_dir.join("logs.jsonl").as_path(), &events)?;

    Ok(GenerateReportResult {
        input_dir: input_dir.to_path_buf(),
        run_id,
        summary,
    })
}

fn recompute_summary(
    config: Option<&Config>,
    trades: &[Trade],
    equity: &[EquityPoint],
) -> Result<MetricsSummary, String> {
    let metrics_config = config.and_then(|c| c.metrics.as_ref());
    let periods_per_year = metrics_config
        .and_then(|m| m.periods_per_year)
        .or_else(|| infer_periods_per_year(equity))
        .unwrap_or(DEFAULT_PERIODS_PER_YEAR);
    let risk_free_rate = metrics_config
        .and_then(|m| m.risk_free_rate)
        .unwrap_or(0.0);

    let performance = PerformanceAnalyzer::new(periods_per_year)
        .with_risk_free_rate(risk_free_rate)
        .analyze(equity)
        .map_err(|err| err.to_string())?;

    // Without a snapshot the first equity point is the starting cash: fills never land on bar 0.
    let initial_cash = config
        .map(|c| c.run.initial_capital)
        .or_else(|| equity.first().map(|p| p.equity))
        .unwrap_or(0.0);
    Ok(MetricsSummary::from_run(
        initial_cash,
        equity,
        trades,
        performance,
    ))
}

fn infer_periods_per_year(equity: &[EquityPoint]) -> Option<f64> {
    let mut diffs: Vec<i64> = equity
        .windows(2)
        .map(|pair| pair[1].timestamp - pair[0].timestamp)
        .collect();
    if diffs.is_empty() {
        return None;
    }
    diffs.sort_unstable();
    Timeframe::from_spacing(diffs[diffs.len() / 2]).map(|tf| tf.periods_per_year())
}

fn build_report_events(
    run_id: &str,
    symbol: Option<&str>,
    trades: &[Trade],
    summary: &MetricsSummary,
    equity: &[EquityPoint],
    input_dir: &Path,
) -> Vec<AuditEvent> {
    let end_ts = equity.last().map(|p| p.timestamp).unwrap_or(0);
    let mut events = Vec::with_capacity(trades.len() + 2);

    for trade in trades {
        events.push(AuditEvent {
            run_id: run_id.to_string(),
            timestamp: trade.exit_time,
            stage: "trade".to_string(),
            symbol: symbol.map(str::to_string),
            action: "close".to_string(),
            error: None,
            details: serde_json::json!({
                "direction": trade.direction,
                "entry_time": trade.entry_time,
                "entry_price": trade.entry_price,
                "exit_price": trade.exit_price,
                "qty": trade.quantity,
                "commission": trade.commission,
                "pnl": trade.pnl,
            }),
        });
    }

    events.push(AuditEvent {
        run_id: run_id.to_string(),
        timestamp: end_ts,
        stage: "report".to_string(),
        symbol: None,
        action: "recompute".to_string(),
        error: None,
        details: serde_json::json!({
            "input_dir": input_dir.display().to_string(),
            "trades": trades.len(),
            "bars_processed": summary.bars_processed,
        }),
    });

    events.push(AuditEvent {
        run_id: run_id.to_string(),
        timestamp: end_ts,
        stage: "summary".to_string(),
        symbol: symbol.map(str::to_string),
        action: "complete".to_string(),
        error: None,
        details: summary_log_details(summary),
    });

    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.stage.cmp(&b.stage))
            .then_with(|| a.action.cmp(&b.action))
    });
    events
}
