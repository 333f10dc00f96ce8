use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub run: RunConfig,
    pub data: DataConfig,
    pub paths: PathsConfig,
    pub strategy: StrategySection,
    pub costs: CostsConfig,
    pub execution: Option<ExecutionSection>,
    pub metrics: Option<MetricsConfig>,
    pub data_quality: Option<DataQualityConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub run_id: String,
    pub symbol: String,
    pub timeframe: String,
    pub initial_capital: f64,
    /// Inclusive lower bound: RFC3339, `YYYY-MM-DD` or epoch seconds.
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    /// Directory holding one `<SYMBOL>.csv` per instrument.
    pub ohlcv_dir: Option<String>,
    /// Explicit file for `run.symbol`; takes precedence over `ohlcv_dir`.
    pub ohlcv_csv: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    pub out_dir: String,
}

/// Flat TOML view of a strategy selection, e.g.
/// `kind = "golden_cross"`, `fast_period = 50`, `slow_period = 200`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct StrategySection {
    pub kind: String,
    pub fast_period: Option<usize>,
    pub slow_period: Option<usize>,
    pub period: Option<usize>,
    pub rsi_buy_threshold: Option<f64>,
    pub rsi_sell_threshold: Option<f64>,
    pub rsi_period: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CostsConfig {
    pub commission_rate: f64,
    pub slippage_bps: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ExecutionSection {
    pub latency_bars: Option<usize>,
    pub fill_price: Option<String>,
    pub allow_short: Option<bool>,
    pub allocation: Option<f64>,
    pub whole_shares: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    pub risk_free_rate: Option<f64>,
    pub periods_per_year: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DataQualityConfig {
    pub max_gaps: Option<usize>,
    pub max_duplicates: Option<usize>,
    pub max_out_of_order: Option<usize>,
    pub max_invalid_bars: Option<usize>,
}

pub fn load_config(path: &Path) -> Result<Config, String> {
    let (config, _source) = load_config_with_source(path)?;
    Ok(config)
}

pub fn load_config_with_source(path: &Path) -> Result<(Config, String), String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read config {}: {}", path.display(), err))?;
    let config = parse_config(&contents)
        .map_err(|err| format!("failed to parse TOML {}: {}", path.display(), err))?;
    Ok((config, contents))
}

pub fn parse_config(contents: &str) -> Result<Config, String> {
    toml::from_str(contents).map_err(|err| err.to_string())
}

pub fn to_toml_pretty(config: &Config) -> Result<String, String> {
    toml::to_string_pretty(config)
        .map_err(|err| format!("failed to serialize config as TOML: {err}"))
}
