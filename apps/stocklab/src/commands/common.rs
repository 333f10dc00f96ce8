use std::path::PathBuf;
use stocklab_application::config::Config;
use stocklab_application::meta::engine_name;

pub(super) fn print_config_summary(command: &str, config: &Config, out: Option<&PathBuf>) {
    println!(
        "{} cli: {} (run_id={}, symbol={}, timeframe={}, initial_capital={})",
        engine_name(),
        command,
        config.run.run_id,
        config.run.symbol,
        config.run.timeframe,
        config.run.initial_capital
    );
    println!(
        "data: ohlcv_dir={}, ohlcv_csv={}, range={}..{}, out_dir={}",
        config.data.ohlcv_dir.as_deref().unwrap_or("none"),
        config.data.ohlcv_csv.as_deref().unwrap_or("none"),
        config.run.start.as_deref().unwrap_or("-"),
        config.run.end.as_deref().unwrap_or("-"),
        config.paths.out_dir
    );
    println!(
        "strategy: kind={} fast_period={:?} slow_period={:?} period={:?} rsi_buy={:?} rsi_sell={:?} rsi_period={:?}",
        config.strategy.kind,
        config.strategy.fast_period,
        config.strategy.slow_period,
        config.strategy.period,
        config.strategy.rsi_buy_threshold,
        config.strategy.rsi_sell_threshold,
        config.strategy.rsi_period
    );
    println!(
        "costs: commission_rate={}, slippage_bps={}",
        config.costs.commission_rate,
        config.costs.slippage_bps.unwrap_or(0.0)
    );
    if let Some(exec) = &config.execution {
        println!(
            "execution: latency_bars={} fill_price={} allow_short={} allocation={} whole_shares={}",
            exec.latency_bars.unwrap_or(1),
            exec.fill_price.as_deref().unwrap_or("open"),
            exec.allow_short.unwrap_or(false),
            exec.allocation.unwrap_or(1.0),
            exec.whole_shares.unwrap_or(false)
        );
    }
    if let Some(out_dir) = out {
        println!("output dir: {}", out_dir.display());
    }
}
