use crate::reporting;
use std::fs;
use std::path::Path;
use std::time::Instant;
use stocklab_domain::entities::metrics::MetricsSummary;
use stocklab_domain::repositories::artifacts::{ArtifactReader, ArtifactWriter};
use stocklab_domain::services::audit::AuditEvent;
use stocklab_domain::value_objects::equity_point::EquityPoint;
use stocklab_domain::value_objects::trade::Trade;

#[derive(Debug, Clone, Copy)]
enum Io {
    Read,
    Write,
}

/// Runs one artifact operation and records `stocklab.infra.artifacts.{read,write}.*`.
fn instrumented<T>(
    io: Io,
    kind: &'static str,
    op: impl FnOnce() -> Result<T, String>,
) -> Result<T, String> {
    let started = Instant::now();
    let result = op();
    let outcome = if result.is_ok() { "ok" } else { "err" };
    let elapsed_ms = started.elapsed().as_millis() as f64;
    match io {
        Io::Read => {
            metrics::counter!("stocklab.infra.artifacts.read.calls_total", "kind" => kind, "result" => outcome)
                .increment(1);
            metrics::histogram!("stocklab.infra.artifacts.read_ms", "kind" => kind, "result" => outcome)
                .record(elapsed_ms);
        }
        Io::Write => {
            metrics::counter!("stocklab.infra.artifacts.write.calls_total", "kind" => kind, "result" => outcome)
                .increment(1);
            metrics::histogram!("stocklab.infra.artifacts.write_ms", "kind" => kind, "result" => outcome)
                .record(elapsed_ms);
        }
    }
    if let Err(err) = &result {
        tracing::warn!(kind, error = %err, "artifact {:?} failed", io);
    }
    result
}

/// Writes run artifacts as plain files under the run directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilesystemArtifactWriter;

impl FilesystemArtifactWriter {
    pub fn new() -> Self {
        Self
    }
}

impl ArtifactWriter for FilesystemArtifactWriter {
    fn ensure_dir(&self, path: &Path) -> Result<(), String> {
        instrumented(Io::Write, "dir", || {
            fs::create_dir_all(path)
                .map_err(|err| format!("failed to create dir {}: {err}", path.display()))
        })
    }

    fn write_trades_csv(&self, path: &Path, trades: &[Trade]) -> Result<(), String> {
        instrumented(Io::Write, "trades", || reporting::write_trades_csv(path, trades))
    }

    fn write_equity_csv(&self, path: &Path, points: &[EquityPoint]) -> Result<(), String> {
        instrumented(Io::Write, "equity", || reporting::write_equity_csv(path, points))
    }

    fn write_summary_json(
        &self,
        path: &Path,
        summary: &MetricsSummary,
        meta: Option<&serde_json::Value>,
    ) -> Result<(), String> {
        instrumented(Io::Write, "summary", || {
            reporting::write_summary_json(path, summary, meta)
        })
    }

    fn write_audit_jsonl(&self, path: &Path, events: &[AuditEvent]) -> Result<(), String> {
        instrumented(Io::Write, "audit", || reporting::write_audit_jsonl(path, events))
    }

    fn write_config_snapshot_toml(&self, path: &Path, contents: &str) -> Result<(), String> {
        instrumented(Io::Write, "snapshot", || {
            fs::write(path, contents)
                .map_err(|err| format!("failed to write snapshot {}: {err}", path.display()))
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FilesystemArtifactReader;

impl FilesystemArtifactReader {
    pub fn new() -> Self {
        Self
    }
}

impl ArtifactReader for FilesystemArtifactReader {
    fn read_trades_csv(&self, path: &Path) -> Result<Vec<Trade>, String> {
        instrumented(Io::Read, "trades", || reporting::read_trades_csv(path))
    }

    fn read_equity_csv(&self, path: &Path) -> Result<Vec<EquityPoint>, String> {
        instrumented(Io::Read, "equity", || reporting::read_equity_csv(path))
    }

    /// A run produced outside the CLI may have no snapshot; that is `Ok(None)`.
    fn read_config_snapshot_toml(&self, path: &Path) -> Result<Option<String>, String> {
        instrumented(Io::Read, "snapshot", || match fs::read_to_string(path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(format!("failed to read snapshot {}: {err}", path.display())),
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}
