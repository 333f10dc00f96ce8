use stocklab_domain::entities::price_series::PriceSeries;
use stocklab_domain::errors::BacktestError;
use stocklab_domain::services::engine::backtest::{run, EngineSettings, SimulationEngine};
use stocklab_domain::services::engine::execution::{ExecutionConfig, PriceReference};
use stocklab_domain::services::strategy::{decide, StrategyConfig};
use stocklab_domain::value_objects::bar::Bar;
use stocklab_domain::value_objects::side::Direction;
use stocklab_domain::value_objects::signal::Signal;

const DAY: i64 = 86_400;

fn make_bar(ts: i64, close: f64) -> Bar {
    Bar {
        timestamp: ts,
        open: close,
        high: close,
        low: close,
        close,
        volume: 1000.0,
    }
}

fn series_from_closes(closes: &[f64]) -> PriceSeries {
    let bars = closes
        .iter()
        .enumerate()
        .map(|(idx, close)| make_bar(idx as i64 * DAY, *close))
        .collect();
    PriceSeries::new("AAPL", bars).expect("series")
}

fn ramp(len: usize) -> PriceSeries {
    let closes: Vec<f64> = (0..len).map(|i| 100.0 + i as f64).collect();
    series_from_closes(&closes)
}

#[test]
fn golden_cross_on_rising_ramp_is_profitable() {
    let series = ramp(100);
    let result = run(&series, &StrategyConfig::golden_cross(5, 20), 100_000.0, 0.0).expect("run");

    assert_eq!(result.signals.len(), 100);
    assert!(result.signals[..20].iter().all(|s| *s == Signal::Flat));
    assert!(result.signals[20..].iter().all(|s| *s == Signal::Long));
    assert!(result.summary.final_equity > 100_000.0);
    assert_eq!(result.trade_log.len(), 1);

    let trade = &result.trade_log[0];
    assert_eq!(trade.entry_price, 121.0);
    assert_eq!(trade.exit_price, 199.0);
    assert!(trade.pnl > 0.0);
    assert!(result.metrics.annualized_return > 0.0);
    assert_eq!(result.metrics.periods_per_year, 252.0);
}

#[test]
fn warmup_longer_than_series_is_rejected() {
    let series = ramp(10);
    let err = run(&series, &StrategyConfig::golden_cross(5, 60), 100_000.0, 0.0).unwrap_err();
    assert_eq!(
        err,
        BacktestError::InsufficientData {
            required: 61,
            available: 10
        }
    );
}

#[test]
fn empty_series_is_insufficient_data() {
    let series = PriceSeries::new("AAPL", Vec::new()).expect("series");
    let err = run(&series, &StrategyConfig::breakout(5), 100_000.0, 0.0).unwrap_err();
    assert!(matches!(err, BacktestError::InsufficientData { available: 0, .. }));
}

#[test]
fn flat_prices_give_zero_sharpe() {
    let series = series_from_closes(&[100.0; 50]);
    let result = run(&series, &StrategyConfig::golden_cross(5, 20), 100_000.0, 0.001).expect("run");
    assert!(result.trade_log.is_empty());
    assert_eq!(result.metrics.sharpe_ratio, 0.0);
    assert_eq!(result.metrics.max_drawdown, 0.0);
    assert_eq!(result.summary.final_equity, 100_000.0);
}

#[test]
fn commission_reduces_final_equity() {
    let series = ramp(100);
    let free = run(&series, &StrategyConfig::golden_cross(5, 20), 100_000.0, 0.0).expect("run");
    let costly = run(&series, &StrategyConfig::golden_cross(5, 20), 100_000.0, 0.01).expect("run");
    assert!(costly.summary.final_equity < free.summary.final_equity);
    let trade = &costly.trade_log[0];
    assert!(trade.commission > 0.0);
}

#[test]
fn breakout_enters_on_new_high() {
    let mut closes = vec![50.0; 15];
    closes.extend((1..=15).map(|i| 50.0 + i as f64));
    let series = series_from_closes(&closes);
    let result = run(&series, &StrategyConfig::breakout(10), 10_000.0, 0.0).expect("run");

    assert_eq!(result.signals[14], Signal::Flat);
    assert_eq!(result.signals[15], Signal::Long);
    let trade = result.trade_log.first().expect("trade");
    assert_eq!(trade.entry_time, 16 * DAY);
    assert!(trade.pnl > 0.0);
}

#[test]
fn multi_factor_reverses_with_shorting_enabled() {
    let mut closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
    closes.extend((1..=20).map(|i| 81.0 + 2.0 * i as f64));
    let series = series_from_closes(&closes);
    let config = StrategyConfig::MultiFactor {
        rsi_buy_threshold: 30.0,
        rsi_sell_threshold: 70.0,
        rsi_period: 5,
    };
    let engine = SimulationEngine::new(EngineSettings {
        initial_cash: 10_000.0,
        execution: ExecutionConfig {
            allow_short: true,
            ..ExecutionConfig::default()
        },
        ..EngineSettings::default()
    });
    let result = engine.run(&series, &config).expect("run");

    assert!(result.signals.contains(&Signal::Long));
    assert!(result.signals.contains(&Signal::Short));
    let directions: Vec<Direction> = result.trade_log.iter().map(|t| t.direction).collect();
    assert_eq!(directions.first(), Some(&Direction::Long));
    assert_eq!(directions.last(), Some(&Direction::Short));
    assert_eq!(result.equity_curve.last().map(|p| p.position_qty), Some(0.0));
}

#[test]
fn close_fills_and_longer_latency_shift_entry() {
    let series = ramp(60);
    let engine = SimulationEngine::new(EngineSettings {
        execution: ExecutionConfig {
            latency_bars: 3,
            fill_price: PriceReference::Close,
            slippage_bps: 50.0,
            ..ExecutionConfig::default()
        },
        ..EngineSettings::default()
    });
    let result = engine
        .run(&series, &StrategyConfig::golden_cross(5, 20))
        .expect("run");
    let trade = result.trade_log.first().expect("trade");
    assert_eq!(trade.entry_time, 23 * DAY);
    assert!((trade.entry_price - 123.0 * 1.005).abs() < 1e-9);
}

#[test]
fn cancellation_stops_between_bars() {
    let series = ramp(100);
    let engine = SimulationEngine::new(EngineSettings::default());
    let cancel = || true;
    let err = engine
        .run_with_cancel(&series, &StrategyConfig::golden_cross(5, 20), Some(&cancel))
        .unwrap_err();
    assert_eq!(err, BacktestError::Cancelled { bars_processed: 0 });
}

#[test]
fn decide_matches_engine_signals() {
    let series = ramp(40);
    let config = StrategyConfig::golden_cross(3, 8);
    let result = run(&series, &config, 100_000.0, 0.0).expect("run");
    for t in 0..series.len() {
        let signal = decide(series.history(t), &config).expect("decide");
        assert_eq!(signal, result.signals[t]);
    }
}

#[test]
fn unaffordable_whole_share_is_rejected_and_run_continues() {
    let series = ramp(40);
    let engine = SimulationEngine::new(EngineSettings {
        initial_cash: 50.0,
        execution: ExecutionConfig {
            whole_shares: true,
            ..ExecutionConfig::default()
        },
        ..EngineSettings::default()
    });
    let result = engine
        .run(&series, &StrategyConfig::golden_cross(5, 20))
        .expect("run");

    assert!(result.trade_log.is_empty());
    assert_eq!(result.equity_curve.len(), 40);
    assert_eq!(result.summary.final_equity, 50.0);
    let rejects: Vec<_> = result
        .audit_events
        .iter()
        .filter(|e| e.action == "reject")
        .collect();
    assert!(!rejects.is_empty());
    assert!(rejects
        .iter()
        .all(|e| e.error.as_deref() == Some("non_positive_quantity")));
}
