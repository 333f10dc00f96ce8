use crate::errors::BacktestError;
use crate::value_objects::side::Side;
use serde::{Deserialize, Serialize};

/// Exclusive bound: at 10_000 bps a sell would fill at zero.
pub const MAX_SLIPPAGE_BPS: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceReference {
    #[default]
    Open,
    Close,
}

/// How decided targets turn into fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Bars between decision and fill; at least one, so a signal never trades on its own bar.
    pub latency_bars: usize,
    pub fill_price: PriceReference,
    pub slippage_bps: f64,
    pub allow_short: bool,
    /// Fraction of equity committed when opening a position.
    pub allocation: f64,
    pub whole_shares: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            latency_bars: 1,
            fill_price: PriceReference::Open,
            slippage_bps: 0.0,
            allow_short: false,
            allocation: 1.0,
            whole_shares: false,
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.latency_bars == 0 {
            return Err(BacktestError::Config(
                "execution.latency_bars must be >= 1".to_string(),
            ));
        }
        if !(0.0..MAX_SLIPPAGE_BPS).contains(&self.slippage_bps) {
            return Err(BacktestError::Config(format!(
                "execution.slippage_bps must be in [0, 10000), got {}",
                self.slippage_bps
            )));
        }
        if !(self.allocation > 0.0 && self.allocation <= 1.0) {
            return Err(BacktestError::Config(format!(
                "execution.allocation must be in (0, 1], got {}",
                self.allocation
            )));
        }
        Ok(())
    }

    /// Reference price moved against the trader by `slippage_bps`.
    pub fn fill_price_for(&self, reference: f64, side: Side) -> f64 {
        let adj = self.slippage_bps / 10_000.0;
        match side {
            Side::Buy => reference * (1.0 + adj),
            Side::Sell => reference * (1.0 - adj),
        }
    }
}
