use crate::config::Config;
use crate::shared::{resolve_engine_settings, resolve_strategy, series_query};
use std::time::Instant;
use stocklab_domain::repositories::market_data::MarketDataRepository;
use stocklab_domain::services::ohlcv::DataQualityReport;
use tracing::info_span;

/// Checks a config and its data without running the engine.
///
/// Non-strict mode reports every issue found. Strict mode fails on the first report with
/// issues, and the error starts with `strict validation failed` so the CLI can map it to
/// its own exit code.
pub fn validate(
    config: &Config,
    strict: bool,
    market_data: &dyn MarketDataRepository,
) -> Result<serde_json::Value, String> {
    let _span = info_span!(
        "validate",
        strict = strict,
        run_id = %config.run.run_id,
        symbol = %config.run.symbol,
        timeframe = %config.run.timeframe
    )
    .entered();

    let strategy = resolve_strategy(&config.strategy)?;
    let settings = resolve_engine_settings(config)?;
    let query = series_query(config, &config.run.symbol)?;

    let stage_start = Instant::now();
    let loaded = market_data.load_series(&query)?;
    metrics::histogram!("stocklab.validate.load_series_ms")
        .record(stage_start.elapsed().as_millis() as f64);

    let report = &loaded.report;
    let limits = config.data_quality.as_ref();
    let max_gaps = limits.and_then(|l| l.max_gaps);
    let max_duplicates = limits.and_then(|l| l.max_duplicates).unwrap_or(0);
    let max_out_of_order = limits.and_then(|l| l.max_out_of_order).unwrap_or(0);
    let max_invalid_bars = limits.and_then(|l| l.max_invalid_bars).unwrap_or(0);

    let mut issues: Vec<String> = Vec::new();
    let required = strategy.warmup_bars();
    let available = loaded.series.len();
    if available < required {
        issues.push(format!(
            "insufficient data: {} needs at least {required} bar(s), got {available}",
            strategy.name()
        ));
    }
    if let Some(max_gaps) = max_gaps {
        if report.gaps > max_gaps {
            issues.push(format!("gaps {} > max_gaps {max_gaps}", report.gaps));
        }
    }
    if report.duplicates > max_duplicates {
        issues.push(format!(
            "duplicates {} > max_duplicates {max_duplicates}",
            report.duplicates
        ));
    }
    if report.out_of_order > max_out_of_order {
        issues.push(format!(
            "out_of_order {} > max_out_of_order {max_out_of_order}",
            report.out_of_order
        ));
    }
    if report.invalid_bars > max_invalid_bars {
        issues.push(format!(
            "invalid_bars {} > max_invalid_bars {max_invalid_bars}",
            report.invalid_bars
        ));
    }

    metrics::gauge!("stocklab.validate.ohlcv.gaps").set(report.gaps as f64);
    metrics::gauge!("stocklab.validate.ohlcv.duplicates").set(report.duplicates as f64);
    metrics::gauge!("stocklab.validate.ohlcv.out_of_order").set(report.out_of_order as f64);
    metrics::gauge!("stocklab.validate.ohlcv.invalid_bars").set(report.invalid_bars as f64);

    if strict && !issues.is_empty() {
        return Err(format!("strict validation failed: {}", issues.join("; ")));
    }
    for issue in &issues {
        tracing::warn!(issue = %issue, "validation issue");
    }

    Ok(serde_json::json!({
        "run_id": config.run.run_id,
        "symbol": config.run.symbol,
        "timeframe": query.timeframe,
        "strategy": strategy,
        "warmup_bars": required,
        "initial_capital": settings.initial_cash,
        "execution": {
            "latency_bars": settings.execution.latency_bars,
            "fill_price": settings.execution.fill_price,
            "slippage_bps": settings.execution.slippage_bps,
            "allow_short": settings.execution.allow_short,
        },
        "ohlcv": data_quality_json(report, available),
        "limits": {
            "max_gaps": max_gaps,
            "max_duplicates": max_duplicates,
            "max_out_of_order": max_out_of_order,
            "max_invalid_bars": max_invalid_bars,
        },
        "issues": issues,
        "strict": strict,
    }))
}

fn data_quality_json(report: &DataQualityReport, rows: usize) -> serde_json::Value {
    serde_json::json!({
        "rows": rows,
        "source_bars": report.bars,
        "duplicates": report.duplicates,
        "gaps": report.gaps,
        "out_of_order": report.out_of_order,
        "invalid_bars": report.invalid_bars,
        "first_timestamp": report.first_timestamp,
        "last_timestamp": report.last_timestamp,
        "first_gap": report.first_gap,
        "first_duplicate": report.first_duplicate,
        "first_out_of_order": report.first_out_of_order,
        "first_invalid_bar": report.first_invalid_bar,
        "max_gap_seconds": report.max_gap_seconds,
    })
}
