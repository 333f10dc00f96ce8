use std::path::PathBuf;
use stocklab_application::meta::engine_name;

pub(super) fn run_batch(batch_path: PathBuf) -> Result<(), String> {
    let base_config = stocklab_application::batch::load_base_config(&batch_path)?;
    let deps = crate::infra::build_engine_deps(&base_config);

    let overall_start = std::time::Instant::now();
    let result =
        stocklab_application::batch::run_batch(&batch_path, &deps.market_data, &deps.artifacts)?;

    for entry in &result.runs {
        match (&entry.metrics, &entry.error) {
            (Some(m), _) => println!(
                "{} [{} {}] ok: trades={} net_profit={:.2} sharpe={:.4} max_drawdown={:.4}",
                entry.run_id,
                entry.symbol,
                entry.strategy,
                m.trades,
                m.net_profit,
                m.sharpe_ratio,
                m.max_drawdown
            ),
            (None, err) => println!(
                "{} [{} {}] {}: {}",
                entry.run_id,
                entry.symbol,
                entry.strategy,
                entry.status,
                err.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    println!("batch output: {}", result.batch_dir.display());
    println!(
        "{} cli: batch runs={} failed={} total_ms={}",
        engine_name(),
        result.runs.len(),
        result.failed_runs(),
        overall_start.elapsed().as_millis()
    );
    Ok(())
}
