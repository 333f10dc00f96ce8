use thiserror::Error;

/// Typed failures surfaced by the backtesting core.
///
/// Validation failures (`Config`, `InsufficientData`, `InvalidSeries`) are raised before any
/// portfolio exists. `InsufficientFunds` is produced by single fills and absorbed by the engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BacktestError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("insufficient data: need at least {required} bar(s), got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("insufficient funds: fill requires {required:.4}, available {available:.4}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("equity series too short for metrics: {points} point(s), need at least 2")]
    EmptySeries { points: usize },

    #[error("backtest cancelled after {bars_processed} bar(s)")]
    Cancelled { bars_processed: usize },

    #[error("invalid price series: {0}")]
    InvalidSeries(String),
}

impl BacktestError {
    /// Stable machine-readable tag, used by callers that surface the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            BacktestError::Config(_) => "config",
            BacktestError::InsufficientData { .. } => "insufficient_data",
            BacktestError::InsufficientFunds { .. } => "insufficient_funds",
            BacktestError::EmptySeries { .. } => "empty_series",
            BacktestError::Cancelled { .. } => "cancelled",
            BacktestError::InvalidSeries(_) => "invalid_series",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BacktestError;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(BacktestError::Config("x".into()).kind(), "config");
        assert_eq!(
            BacktestError::InsufficientData {
                required: 61,
                available: 10
            }
            .kind(),
            "insufficient_data"
        );
        assert_eq!(
            BacktestError::Cancelled { bars_processed: 3 }.kind(),
            "cancelled"
        );
    }

    #[test]
    fn display_includes_counts() {
        let err = BacktestError::InsufficientData {
            required: 61,
            available: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("61"));
        assert!(msg.contains("10"));
    }
}
