mod commands;
mod infra;
mod obs;

use clap::{Parser, Subcommand, ValueEnum};
use commands::Command;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stocklab")]
#[command(about = "StockLab backtesting CLI", version, arg_required_else_help = true)]
#[command(
    after_help = "Examples:\n  stocklab backtest --config platform/ops/configs/sample.toml --out runs/\n  stocklab validate --config platform/ops/configs/sample.toml --strict\n  stocklab batch --batch platform/ops/configs/batch.toml\n  stocklab report --input runs/<run_id>/\n"
)]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Default log filter; env STOCKLAB_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Prometheus listener (host:port). Falls back to env STOCKLAB_METRICS_ADDR.
    #[arg(long, global = true)]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run one strategy over one instrument and write the run artifacts.
    Backtest {
        /// Config file path (TOML). If omitted, uses env STOCKLAB_CONFIG.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output base dir; the run lands in `<out>/<run_id>/`.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Check config and data quality without running the engine.
    Validate {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Fail (exit code 2) when any data-quality limit is exceeded.
        #[arg(long, default_value_t = false)]
        strict: bool,
        /// Also write the validation report JSON here.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run every entry of a batch file, sharing loaded price series.
    Batch {
        #[arg(long)]
        batch: PathBuf,
    },
    /// Recompute summary.json and logs.jsonl from a run directory.
    Report {
        #[arg(long)]
        input: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_format = match cli.log_format {
        LogFormat::Pretty => "pretty",
        LogFormat::Json => "json",
    };
    if let Err(err) = obs::init_tracing(&cli.log_level, log_format) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
    let metrics_addr = cli.metrics_addr.or_else(|| env_non_empty("STOCKLAB_METRICS_ADDR"));
    if let Err(err) = obs::init_metrics(metrics_addr.as_deref()) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    let command = match cli.command {
        CliCommand::Backtest { config, out } => Command::Backtest {
            config: config_path_or_exit(config),
            out,
        },
        CliCommand::Validate {
            config,
            strict,
            out,
        } => Command::Validate {
            config: config_path_or_exit(config),
            strict,
            out,
        },
        CliCommand::Batch { batch } => Command::Batch { batch },
        CliCommand::Report { input } => Command::Report { input },
    };

    if let Err(err) = commands::run(command) {
        let code = if err.contains("strict validation failed") {
            2
        } else {
            1
        };
        eprintln!("error: {err}");
        std::process::exit(code);
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn config_path_or_exit(config: Option<PathBuf>) -> PathBuf {
    match config.or_else(|| env_non_empty("STOCKLAB_CONFIG").map(PathBuf::from)) {
        Some(path) => path,
        None => {
            eprintln!("error: missing --config and env STOCKLAB_CONFIG is not set");
            std::process::exit(1);
        }
    }
}
