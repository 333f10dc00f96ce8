use crate::errors::BacktestError;
use crate::value_objects::equity_point::EquityPoint;
use crate::value_objects::trade::Trade;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PERIODS_PER_YEAR: f64 = 252.0;
const ZERO_STDEV: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub annualized_return: f64,
    /// Fraction of the running peak, in `[-1, 0]`.
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub total_return: f64,
    pub volatility: f64,
    pub periods_per_year: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceAnalyzer {
    periods_per_year: f64,
    risk_free_rate: f64,
}

impl Default for PerformanceAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_PERIODS_PER_YEAR)
    }
}

impl PerformanceAnalyzer {
    pub fn new(periods_per_year: f64) -> Self {
        let periods_per_year = if periods_per_year.is_finite() && periods_per_year > 0.0 {
            periods_per_year
        } else {
            DEFAULT_PERIODS_PER_YEAR
        };
        Self {
            periods_per_year,
            risk_free_rate: 0.0,
        }
    }

    /// Annual risk-free rate, de-annualized per period before it is subtracted from returns.
    pub fn with_risk_free_rate(mut self, risk_free_rate: f64) -> Self {
        self.risk_free_rate = if risk_free_rate.is_finite() {
            risk_free_rate
        } else {
            0.0
        };
        self
    }

    pub fn periods_per_year(&self) -> f64 {
        self.periods_per_year
    }

    pub fn analyze(&self, curve: &[EquityPoint]) -> Result<PerformanceMetrics, BacktestError> {
        let values: Vec<f64> = curve.iter().map(|point| point.equity).collect();
        self.analyze_values(&values)
    }

    pub fn analyze_values(&self, equity: &[f64]) -> Result<PerformanceMetrics, BacktestError> {
        if equity.len() < 2 {
            return Err(BacktestError::EmptySeries {
                points: equity.len(),
            });
        }

        let initial = equity[0];
        let last = equity[equity.len() - 1];
        let total_periods = (equity.len() - 1) as f64;

        let total_return = if initial > 0.0 {
            last / initial - 1.0
        } else {
            0.0
        };
        let annualized_return = if initial <= 0.0 {
            0.0
        } else if last <= 0.0 {
            -1.0
        } else {
            (last / initial).powf(self.periods_per_year / total_periods) - 1.0
        };

        let returns = period_returns(equity);
        let (sharpe_ratio, volatility) = self.sharpe_and_volatility(&returns);

        Ok(PerformanceMetrics {
            annualized_return,
            max_drawdown: max_drawdown(equity),
            sharpe_ratio,
            total_return,
            volatility,
            periods_per_year: self.periods_per_year,
        })
    }

    fn sharpe_and_volatility(&self, returns: &[f64]) -> (f64, f64) {
        if returns.len() < 2 {
            return (0.0, 0.0);
        }
        let n = returns.len() as f64;
        let rf = self.risk_free_rate / self.periods_per_year;
        let mean = returns.iter().map(|r| r - rf).sum::<f64>() / n;
        let raw_mean = returns.iter().sum::<f64>() / n;
        let var = returns
            .iter()
            .map(|r| {
                let diff = r - raw_mean;
                diff * diff
            })
            .sum::<f64>()
            / (n - 1.0);
        let std = var.sqrt();
        let scale = self.periods_per_year.sqrt();

        if !std.is_finite() || std <= ZERO_STDEV {
            return (0.0, 0.0);
        }
        let sharpe = mean / std * scale;
        if sharpe.is_finite() {
            (sharpe, std * scale)
        } else {
            (0.0, std * scale)
        }
    }
}

fn period_returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .filter(|pair| pair[0] > 0.0)
        .map(|pair| pair[1] / pair[0] - 1.0)
        .collect()
}

pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &value in equity {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            worst = worst.min((value - peak) / peak);
        }
    }
    worst.clamp(-1.0, 0.0)
}

/// Run-level summary written next to the trade log and equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub bars_processed: usize,
    pub trades: usize,
    pub win_rate: f64,
    pub net_profit: f64,
    pub final_equity: f64,
    #[serde(flatten)]
    pub performance: PerformanceMetrics,
}

impl MetricsSummary {
    pub fn from_run(
        initial_cash: f64,
        curve: &[EquityPoint],
        trades: &[Trade],
        performance: PerformanceMetrics,
    ) -> Self {
        let final_equity = curve.last().map_or(initial_cash, |point| point.equity);
        let wins = trades.iter().filter(|trade| trade.is_win()).count();
        let win_rate = if trades.is_empty() {
            0.0
        } else {
            wins as f64 / trades.len() as f64
        };

        Self {
            bars_processed: curve.len(),
            trades: trades.len(),
            win_rate,
            net_profit: final_equity - initial_cash,
            final_equity,
            performance,
        }
    }
}
