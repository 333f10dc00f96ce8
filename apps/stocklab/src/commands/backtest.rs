use std::path::PathBuf;
use stocklab_application::meta::engine_name;

pub(super) fn run_backtest(config_path: PathBuf, out: Option<PathBuf>) -> Result<(), String> {
    let (config, config_toml) =
        stocklab_application::config::load_config_with_source(&config_path)?;
    super::common::print_config_summary("backtest", &config, out.as_ref());

    let overall_start = std::time::Instant::now();
    let deps = crate::infra::build_engine_deps(&config);

    let output = stocklab_application::backtesting::run_backtest(
        &config,
        &config_toml,
        out,
        &deps.market_data,
        &deps.artifacts,
    )?;

    let perf = &output.summary.performance;
    println!(
        "summary: bars={} trades={} win_rate={:.4} net_profit={:.2} final_equity={:.2} total_return={:.4} annualized_return={:.4} sharpe={:.4} max_drawdown={:.4}",
        output.summary.bars_processed,
        output.summary.trades,
        output.summary.win_rate,
        output.summary.net_profit,
        output.summary.final_equity,
        perf.total_return,
        perf.annualized_return,
        perf.sharpe_ratio,
        perf.max_drawdown
    );
    println!("run output: {}", output.run_dir.display());
    println!(
        "{} cli: backtest total_ms={}",
        engine_name(),
        overall_start.elapsed().as_millis()
    );
    Ok(())
}
