use std::path::PathBuf;

pub(super) fn run_validate(
    config_path: PathBuf,
    strict: bool,
    out: Option<PathBuf>,
) -> Result<(), String> {
    let config = stocklab_application::config::load_config(&config_path)?;
    super::common::print_config_summary("validate", &config, None);

    let market_data = crate::infra::build_market_data_repo(&config);
    let report = stocklab_application::validation::validate(&config, strict, &market_data)?;

    let pretty = serde_json::to_string_pretty(&report)
        .map_err(|err| format!("failed to serialize validation report: {err}"))?;
    println!("{pretty}");

    if let Some(out_path) = out {
        std::fs::write(&out_path, report.to_string())
            .map_err(|err| format!("failed to write report {}: {}", out_path.display(), err))?;
    }

    Ok(())
}
