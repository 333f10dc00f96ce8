use crate::config::{Config, StrategySection};
use stocklab_domain::entities::metrics::MetricsSummary;
use stocklab_domain::repositories::market_data::SeriesQuery;
use stocklab_domain::services::audit::AuditEvent;
use stocklab_domain::services::engine::backtest::EngineSettings;
use stocklab_domain::services::engine::execution::{ExecutionConfig, PriceReference};
use stocklab_domain::services::strategy::{StrategyConfig, DEFAULT_RSI_PERIOD};
use stocklab_domain::value_objects::equity_point::EquityPoint;
use stocklab_domain::value_objects::timeframe::{parse_timestamp_like, Timeframe};

pub fn normalize_timeframe_label(value: &str) -> Result<String, String> {
    Timeframe::parse_or_seconds(value).map(|tf| tf.label)
}

pub fn resolve_strategy(section: &StrategySection) -> Result<StrategyConfig, String> {
    let kind = section.kind.trim().to_lowercase().replace('-', "_");
    let strategy = match kind.as_str() {
        "golden_cross" | "goldencross" => StrategyConfig::GoldenCross {
            fast_period: require(section.fast_period, "strategy.fast_period")?,
            slow_period: require(section.slow_period, "strategy.slow_period")?,
        },
        "breakout" => StrategyConfig::Breakout {
            period: require(section.period, "strategy.period")?,
        },
        "multi_factor" | "multifactor" => StrategyConfig::MultiFactor {
            rsi_buy_threshold: require(section.rsi_buy_threshold, "strategy.rsi_buy_threshold")?,
            rsi_sell_threshold: require(
                section.rsi_sell_threshold,
                "strategy.rsi_sell_threshold",
            )?,
            rsi_period: section.rsi_period.unwrap_or(DEFAULT_RSI_PERIOD),
        },
        _ => {
            return Err(format!(
                "strategy.kind must be: golden_cross | breakout | multi_factor (got '{}')",
                section.kind
            ))
        }
    };

    let unused = unused_strategy_fields(section, &strategy);
    if !unused.is_empty() {
        return Err(format!(
            "strategy.kind = '{}' does not take: {}",
            strategy.name(),
            unused.join(", ")
        ));
    }

    strategy.validate().map_err(|err| err.to_string())?;
    Ok(strategy)
}

fn require<T>(value: Option<T>, name: &str) -> Result<T, String> {
    value.ok_or_else(|| format!("{name} is required"))
}

fn unused_strategy_fields(
    section: &StrategySection,
    strategy: &StrategyConfig,
) -> Vec<&'static str> {
    let mut unused = Vec::new();
    let golden = matches!(strategy, StrategyConfig::GoldenCross { .. });
    let breakout = matches!(strategy, StrategyConfig::Breakout { .. });
    let multi = matches!(strategy, StrategyConfig::MultiFactor { .. });
    if !golden && section.fast_period.is_some() {
        unused.push("fast_period");
    }
    if !golden && section.slow_period.is_some() {
        unused.push("slow_period");
    }
    if !breakout && section.period.is_some() {
        unused.push("period");
    }
    if !multi && section.rsi_buy_threshold.is_some() {
        unused.push("rsi_buy_threshold");
    }
    if !multi && section.rsi_sell_threshold.is_some() {
        unused.push("rsi_sell_threshold");
    }
    if !multi && section.rsi_period.is_some() {
        unused.push("rsi_period");
    }
    unused
}

pub fn resolve_execution_config(config: &Config) -> Result<ExecutionConfig, String> {
    let slippage_bps = config.costs.slippage_bps.unwrap_or(0.0);
    if !slippage_bps.is_finite() || slippage_bps < 0.0 {
        return Err("costs.slippage_bps must be finite and >= 0".to_string());
    }

    let mut cfg = ExecutionConfig {
        slippage_bps,
        ..ExecutionConfig::default()
    };

    let Some(exec) = config.execution.as_ref() else {
        return Ok(cfg);
    };

    if let Some(latency_bars) = exec.latency_bars {
        if latency_bars == 0 {
            return Err("execution.latency_bars must be >= 1".to_string());
        }
        cfg.latency_bars = latency_bars;
    }

    if let Some(value) = exec.fill_price.as_deref() {
        cfg.fill_price = match value.trim().to_lowercase().as_str() {
            "open" | "next_open" => PriceReference::Open,
            "close" => PriceReference::Close,
            _ => return Err("execution.fill_price must be: open | close".to_string()),
        };
    }

    if let Some(value) = exec.allow_short {
        cfg.allow_short = value;
    }

    if let Some(value) = exec.allocation {
        cfg.allocation = value;
    }

    if let Some(value) = exec.whole_shares {
        cfg.whole_shares = value;
    }

    cfg.validate().map_err(|err| err.to_string())?;
    Ok(cfg)
}

pub fn resolve_engine_settings(config: &Config) -> Result<EngineSettings, String> {
    let execution = resolve_execution_config(config)?;
    let metrics = config.metrics.as_ref();
    let settings = EngineSettings {
        run_id: config.run.run_id.clone(),
        initial_cash: config.run.initial_capital,
        commission_rate: config.costs.commission_rate,
        execution,
        periods_per_year: metrics.and_then(|m| m.periods_per_year),
        risk_free_rate: metrics.and_then(|m| m.risk_free_rate).unwrap_or(0.0),
    };
    settings.validate().map_err(|err| err.to_string())?;
    Ok(settings)
}

pub fn series_query(config: &Config, symbol: &str) -> Result<SeriesQuery, String> {
    let timeframe = normalize_timeframe_label(&config.run.timeframe)?;
    let start = parse_bound(config.run.start.as_deref(), "run.start")?;
    let end = parse_bound(config.run.end.as_deref(), "run.end")?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(format!(
                "run.start ({start}) must not be after run.end ({end})"
            ));
        }
    }

    Ok(SeriesQuery {
        instrument: symbol.to_string(),
        timeframe: Some(timeframe),
        start,
        end,
    })
}

fn parse_bound(value: Option<&str>, name: &str) -> Result<Option<i64>, String> {
    value
        .map(|raw| parse_timestamp_like(raw).map_err(|err| format!("{name}: {err}")))
        .transpose()
}

pub fn summary_meta_json(
    run_id: &str,
    symbol: &str,
    strategy: &StrategyConfig,
    equity: &[EquityPoint],
) -> serde_json::Value {
    serde_json::json!({
        "run_id": run_id,
        "symbol": symbol,
        "strategy": strategy,
        "start": equity.first().map(|p| p.timestamp),
        "end": equity.last().map(|p| p.timestamp),
        "engine": crate::meta::engine_name(),
    })
}

pub fn summary_log_details(summary: &MetricsSummary) -> serde_json::Value {
    serde_json::json!({
        "bars_processed": summary.bars_processed,
        "trades": summary.trades,
        "win_rate": summary.win_rate,
        "net_profit": summary.net_profit,
        "final_equity": summary.final_equity,
        "annualized_return": summary.performance.annualized_return,
        "max_drawdown": summary.performance.max_drawdown,
        "sharpe_ratio": summary.performance.sharpe_ratio,
    })
}

pub fn timing_event(
    run_id: &str,
    timestamp: i64,
    symbol: Option<&str>,
    action: &str,
    duration_ms: u64,
    details: serde_json::Value,
) -> AuditEvent {
    AuditEvent {
        run_id: run_id.to_string(),
        timestamp,
        stage: "timing".to_string(),
        symbol: symbol.map(|s| s.to_string()),
        action: action.to_string(),
        error: None,
        details: serde_json::json!({
            "duration_ms": duration_ms,
            "details": details,
        }),
    }
}
