mod backtest;
mod batch;
mod common;
mod report;
mod validate;

use std::path::PathBuf;

pub enum Command {
    Backtest {
        config: PathBuf,
        out: Option<PathBuf>,
    },
    Validate {
        config: PathBuf,
        strict: bool,
        out: Option<PathBuf>,
    },
    Batch {
        batch: PathBuf,
    },
    Report {
        input: PathBuf,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Backtest { .. } => "backtest",
            Command::Validate { .. } => "validate",
            Command::Batch { .. } => "batch",
            Command::Report { .. } => "report",
        }
    }
}

pub fn run(command: Command) -> Result<(), String> {
    let name = command.name();
    let result = match command {
        Command::Backtest { config, out } => backtest::run_backtest(config, out),
        Command::Validate {
            config,
            strict,
            out,
        } => validate::run_validate(config, strict, out),
        Command::Batch { batch } => batch::run_batch(batch),
        Command::Report { input } => report::run_report(input),
    };
    let result_label = if result.is_ok() { "ok" } else { "err" };
    metrics::counter!("stocklab.cli.commands_total", "command" => name, "result" => result_label)
        .increment(1);
    result
}
