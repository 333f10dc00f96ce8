use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use stocklab_domain::entities::metrics::MetricsSummary;
use stocklab_domain::services::audit::AuditEvent;
use stocklab_domain::value_objects::equity_point::EquityPoint;
use stocklab_domain::value_objects::side::Direction;
use stocklab_domain::value_objects::timeframe::format_timestamp;
use stocklab_domain::value_objects::trade::Trade;

pub fn write_audit_jsonl(path: &Path, events: &[AuditEvent]) -> Result<(), String> {
    let mut file =
        fs::File::create(path).map_err(|err| format!("failed to create logs: {}", err))?;
    for event in events {
        let line = serde_json::to_string(event)
            .map_err(|err| format!("failed to serialize audit event: {}", err))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|err| format!("failed to write audit event: {}", err))?;
    }
    Ok(())
}

pub fn write_trades_csv(path: &Path, trades: &[Trade]) -> Result<(), String> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|err| format!("failed to create trades csv {}: {}", path.display(), err))?;
    wtr.write_record([
        "entry_time",
        "exit_time",
        "direction",
        "entry_price",
        "exit_price",
        "qty",
        "commission",
        "pnl",
        "return_pct",
    ])
    .map_err(|err| format!("failed to write trades csv header: {}", err))?;

    for trade in trades {
        wtr.write_record([
            trade.entry_time.to_string(),
            trade.exit_time.to_string(),
            trade.direction.as_str().to_string(),
            trade.entry_price.to_string(),
            trade.exit_price.to_string(),
            trade.quantity.to_string(),
            trade.commission.to_string(),
            trade.pnl.to_string(),
            trade.return_pct().to_string(),
        ])
        .map_err(|err| format!("failed to write trades row: {}", err))?;
    }

    wtr.flush()
        .map_err(|err| format!("failed to flush trades csv: {}", err))
}

pub fn write_equity_csv(path: &Path, points: &[EquityPoint]) -> Result<(), String> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|err| format!("failed to create equity csv {}: {}", path.display(), err))?;
    wtr.write_record([
        "timestamp_utc",
        "datetime",
        "equity",
        "cash",
        "position_qty",
        "close",
        "unrealized_pnl",
        "realized_pnl",
    ])
    .map_err(|err| format!("failed to write equity csv header: {}", err))?;

    for point in points {
        wtr.write_record([
            point.timestamp.to_string(),
            format_timestamp(point.timestamp),
            point.equity.to_string(),
            point.cash.to_string(),
            point.position_qty.to_string(),
            point.close.to_string(),
            point.unrealized_pnl.to_string(),
            point.realized_pnl.to_string(),
        ])
        .map_err(|err| format!("failed to write equity row: {}", err))?;
    }

    wtr.flush()
        .map_err(|err| format!("failed to flush equity csv: {}", err))
}

/// Summary fields at the top level, run metadata under `meta`.
pub fn write_summary_json(
    path: &Path,
    summary: &MetricsSummary,
    meta: Option<&serde_json::Value>,
) -> Result<(), String> {
    let mut json = serde_json::to_value(summary)
        .map_err(|err| format!("failed to serialize summary: {}", err))?;
    if let Some(object) = json.as_object_mut() {
        object.insert(
            "meta".to_string(),
            meta.cloned().unwrap_or(serde_json::Value::Null),
        );
    }
    let json = serde_json::to_string_pretty(&json)
        .map_err(|err| format!("failed to serialize summary: {}", err))?;
    let mut file =
        fs::File::create(path).map_err(|err| format!("failed to create summary: {}", err))?;
    file.write_all(json.as_bytes())
        .map_err(|err| format!("failed to write summary: {}", err))
}

#[derive(Debug, Clone, Deserialize)]
struct TradeRecord {
    entry_time: i64,
    exit_time: i64,
    direction: String,
    entry_price: f64,
    exit_price: f64,
    qty: f64,
    commission: f64,
    pnl: f64,
}

pub fn read_trades_csv(path: &Path) -> Result<Vec<Trade>, String> {
    let mut rdr = csv::Reader::from_path(path)
        .map_err(|err| format!("failed to open trades csv {}: {}", path.display(), err))?;
    let mut trades = Vec::new();
    for result in rdr.deserialize::<TradeRecord>() {
        let record = result.map_err(|err| format!("failed to parse trade record: {}", err))?;
        let direction = match record.direction.to_lowercase().as_str() {
            "long" => Direction::Long,
            "short" => Direction::Short,
            other => return Err(format!("invalid direction '{}'", other)),
        };
        trades.push(Trade {
            entry_time: record.entry_time,
            exit_time: record.exit_time,
            direction,
            entry_price: record.entry_price,
            exit_price: record.exit_price,
            quantity: record.qty,
            commission: record.commission,
            pnl: record.pnl,
        });
    }
    Ok(trades)
}

#[derive(Debug, Clone, Deserialize)]
struct EquityRecord {
    timestamp_utc: i64,
    equity: f64,
    cash: f64,
    position_qty: f64,
    close: f64,
    unrealized_pnl: f64,
    realized_pnl: f64,
}

pub fn read_equity_csv(path: &Path) -> Result<Vec<EquityPoint>, String> {
    let mut rdr = csv::Reader::from_path(path)
        .map_err(|err| format!("failed to open equity csv {}: {}", path.display(), err))?;
    let mut points = Vec::new();
    for result in rdr.deserialize::<EquityRecord>() {
        let record = result.map_err(|err| format!("failed to parse equity record: {}", err))?;
        points.push(EquityPoint {
            timestamp: record.timestamp_utc,
            equity: record.equity,
            cash: record.cash,
            position_qty: record.position_qty,
            close: record.close,
            unrealized_pnl: record.unrealized_pnl,
            realized_pnl: record.realized_pnl,
        });
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::{
        read_equity_csv, read_trades_csv, write_audit_jsonl, write_equity_csv,
        write_summary_json, write_trades_csv,
    };
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};
    use stocklab_domain::entities::metrics::{MetricsSummary, PerformanceMetrics};
    use stocklab_domain::services::audit::AuditEvent;
    use stocklab_domain::value_objects::equity_point::EquityPoint;
    use stocklab_domain::value_objects::side::Direction;
    use stocklab_domain::value_objects::trade::Trade;

    fn unique_tmp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("stocklab_{prefix}_{}_{}", std::process::id(), now))
    }

    fn summary() -> MetricsSummary {
        MetricsSummary {
            bars_processed: 2,
            trades: 1,
            win_rate: 1.0,
            net_profit: 9.8,
            final_equity: 1_009.8,
            performance: PerformanceMetrics {
                annualized_return: 0.5,
                max_drawdown: -0.01,
                sharpe_ratio: 1.2,
                total_return: 0.0098,
                volatility: 0.1,
                periods_per_year: 252.0,
            },
        }
    }

    #[test]
    fn trade_log_and_equity_curve_read_back() {
        let dir = unique_tmp_dir("report_roundtrip");
        fs::create_dir_all(&dir).expect("dir");

        let trades = vec![Trade {
            entry_time: 86_400,
            exit_time: 172_800,
            direction: Direction::Short,
            entry_price: 100.0,
            exit_price: 90.0,
            quantity: 1.5,
            commission: 0.2,
            pnl: 14.8,
        }];
        let equity = vec![EquityPoint {
            timestamp: 86_400,
            equity: 1_000.0,
            cash: 1_150.0,
            position_qty: -1.5,
            close: 100.0,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
        }];

        write_trades_csv(dir.join("trades.csv").as_path(), &trades).expect("trades");
        write_equity_csv(dir.join("equity.csv").as_path(), &equity).expect("equity");
        assert_eq!(
            read_trades_csv(dir.join("trades.csv").as_path()).expect("read trades"),
            trades
        );
        assert_eq!(
            read_equity_csv(dir.join("equity.csv").as_path()).expect("read equity"),
            equity
        );

        let header = fs::read_to_string(dir.join("equity.csv")).expect("equity");
        assert!(header.contains("1970-01-02T00:00:00+00:00"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn summary_json_is_flat_with_meta() {
        let dir = unique_tmp_dir("report_summary");
        fs::create_dir_all(&dir).expect("dir");
        let path = dir.join("summary.json");
        let meta = serde_json::json!({ "run_id": "r1", "symbol": "AAPL" });

        write_summary_json(&path, &summary(), Some(&meta)).expect("summary");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["trades"], 1);
        assert_eq!(value["sharpe_ratio"], 1.2);
        assert_eq!(value["meta"]["symbol"], "AAPL");

        let parsed: MetricsSummary = serde_json::from_value(value).expect("summary parses");
        assert_eq!(parsed, summary());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn audit_log_is_one_event_per_line() {
        let dir = unique_tmp_dir("report_logs");
        fs::create_dir_all(&dir).expect("dir");
        let path = dir.join("logs.jsonl");
        let events: Vec<AuditEvent> = (0..3)
            .map(|i| AuditEvent {
                run_id: "r1".to_string(),
                timestamp: i,
                stage: "order".to_string(),
                symbol: None,
                action: "schedule".to_string(),
                error: None,
                details: serde_json::json!({ "i": i }),
            })
            .collect();
        write_audit_jsonl(&path, &events).expect("logs");
        let raw = fs::read_to_string(&path).expect("read");
        let parsed: Vec<AuditEvent> = raw
            .lines()
            .map(|line| serde_json::from_str(line).expect("event"))
            .collect();
        assert_eq!(parsed, events);
        let _ = fs::remove_dir_all(&dir);
    }
}
