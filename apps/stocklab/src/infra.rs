use std::path::PathBuf;
use stocklab_application::config::Config;
use stocklab_domain::repositories::artifacts::{ArtifactReader, ArtifactWriter};
use stocklab_infrastructure::artifacts::{FilesystemArtifactReader, FilesystemArtifactWriter};
use stocklab_infrastructure::market_data::CsvMarketDataRepository;

pub struct EngineDeps {
    pub market_data: CsvMarketDataRepository,
    pub artifacts: FilesystemArtifactWriter,
}

pub struct ReportingDeps {
    pub reader: Box<dyn ArtifactReader>,
    pub writer: Box<dyn ArtifactWriter>,
}

pub fn build_engine_deps(config: &Config) -> EngineDeps {
    EngineDeps {
        market_data: build_market_data_repo(config),
        artifacts: FilesystemArtifactWriter::new(),
    }
}

pub fn build_reporting_deps() -> ReportingDeps {
    ReportingDeps {
        reader: Box::new(FilesystemArtifactReader::new()),
        writer: Box::new(FilesystemArtifactWriter::new()),
    }
}

/// `data.ohlcv_csv` serves `run.symbol`; every other symbol comes from `data.ohlcv_dir`.
pub fn build_market_data_repo(config: &Config) -> CsvMarketDataRepository {
    let repo = CsvMarketDataRepository::new(config.data.ohlcv_dir.as_deref().map(PathBuf::from));
    match config.data.ohlcv_csv.as_deref() {
        Some(csv) => repo.with_file(config.run.symbol.clone(), csv),
        None => repo,
    }
}

#[cfg(test)]
mod tests {
    use super::build_market_data_repo;
    use std::path::PathBuf;
    use stocklab_application::config::parse_config;

    #[test]
    fn explicit_csv_wins_for_run_symbol_only() {
        let config = parse_config(
            r#"
[run]
run_id = "r"
symbol = "AAPL"
timeframe = "1d"
initial_capital = 1000.0

[data]
ohlcv_dir = "data"
ohlcv_csv = "/abs/aapl.csv"

[paths]
out_dir = "runs"

[strategy]
kind = "breakout"
period = 5

[costs]
commission_rate = 0.0
"#,
        )
        .expect("config");
        let repo = build_market_data_repo(&config);
        assert_eq!(repo.path_for("AAPL").expect("aapl"), PathBuf::from("/abs/aapl.csv"));
        assert_eq!(
            repo.path_for("MSFT").expect("msft"),
            PathBuf::from("data/MSFT.csv")
        );
    }
}
