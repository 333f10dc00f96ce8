use crate::errors::BacktestError;
use crate::services::features::{PriceChannel, RollingSma, WilderRsi};
use crate::value_objects::bar::Bar;
use crate::value_objects::signal::Signal;
use serde::{Deserialize, Serialize};

pub const DEFAULT_RSI_PERIOD: usize = 14;

fn default_rsi_period() -> usize {
    DEFAULT_RSI_PERIOD
}

/// Strategy selection plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    GoldenCross {
        fast_period: usize,
        slow_period: usize,
    },
    Breakout {
        period: usize,
    },
    MultiFactor {
        rsi_buy_threshold: f64,
        rsi_sell_threshold: f64,
        #[serde(default = "default_rsi_period")]
        rsi_period: usize,
    },
}

impl StrategyConfig {
    pub fn golden_cross(fast_period: usize, slow_period: usize) -> Self {
        StrategyConfig::GoldenCross {
            fast_period,
            slow_period,
        }
    }

    pub fn breakout(period: usize) -> Self {
        StrategyConfig::Breakout { period }
    }

    pub fn multi_factor(rsi_buy_threshold: f64, rsi_sell_threshold: f64) -> Self {
        StrategyConfig::MultiFactor {
            rsi_buy_threshold,
            rsi_sell_threshold,
            rsi_period: DEFAULT_RSI_PERIOD,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyConfig::GoldenCross { .. } => "golden_cross",
            StrategyConfig::Breakout { .. } => "breakout",
            StrategyConfig::MultiFactor { .. } => "multi_factor",
        }
    }

    pub fn validate(&self) -> Result<(), BacktestError> {
        match *self {
            StrategyConfig::GoldenCross {
                fast_period,
                slow_period,
            } => {
                if fast_period == 0 {
                    return Err(BacktestError::Config(
                        "golden_cross.fast_period must be > 0".to_string(),
                    ));
                }
                if fast_period >= slow_period {
                    return Err(BacktestError::Config(format!(
                        "golden_cross.fast_period ({fast_period}) must be < slow_period ({slow_period})"
                    )));
                }
            }
            StrategyConfig::Breakout { period } => {
                if period == 0 {
                    return Err(BacktestError::Config(
                        "breakout.period must be > 0".to_string(),
                    ));
                }
            }
            StrategyConfig::MultiFactor {
                rsi_buy_threshold,
                rsi_sell_threshold,
                rsi_period,
            } => {
                if rsi_period == 0 {
                    return Err(BacktestError::Config(
                        "multi_factor.rsi_period must be > 0".to_string(),
                    ));
                }
                if !rsi_buy_threshold.is_finite() || !rsi_sell_threshold.is_finite() {
                    return Err(BacktestError::Config(
                        "multi_factor thresholds must be finite".to_string(),
                    ));
                }
                if rsi_buy_threshold < 0.0 || rsi_sell_threshold > 100.0 {
                    return Err(BacktestError::Config(format!(
                        "multi_factor thresholds must be within [0, 100], got {rsi_buy_threshold} / {rsi_sell_threshold}"
                    )));
                }
                if rsi_buy_threshold >= rsi_sell_threshold {
                    return Err(BacktestError::Config(format!(
                        "multi_factor.rsi_buy_threshold ({rsi_buy_threshold}) must be < rsi_sell_threshold ({rsi_sell_threshold})"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Minimum number of bars before the strategy can emit anything other than `Flat`.
    pub fn warmup_bars(&self) -> usize {
        match *self {
            StrategyConfig::GoldenCross { slow_period, .. } => slow_period + 1,
            StrategyConfig::Breakout { period } => period + 1,
            StrategyConfig::MultiFactor { rsi_period, .. } => rsi_period + 1,
        }
    }
}

pub trait Strategy {
    /// Folds in bar `t` and returns the target exposure decided with bars `0..=t`.
    fn on_bar(&mut self, bar: &Bar) -> Signal;
}

#[derive(Debug, Clone)]
pub struct GoldenCross {
    slow_period: usize,
    fast: RollingSma,
    slow: RollingSma,
    index: usize,
    last: Signal,
}

impl GoldenCross {
    pub fn new(fast_period: usize, slow_period: usize) -> Self {
        Self {
            slow_period,
            fast: RollingSma::new(fast_period),
            slow: RollingSma::new(slow_period),
            index: 0,
            last: Signal::Flat,
        }
    }
}

impl Strategy for GoldenCross {
    fn on_bar(&mut self, bar: &Bar) -> Signal {
        let index = self.index;
        self.index += 1;
        let fast = self.fast.update(bar.close);
        let slow = self.slow.update(bar.close);
        if index < self.slow_period {
            return Signal::Flat;
        }

        if let (Some(fast), Some(slow)) = (fast, slow) {
            if fast > slow {
                self.last = Signal::Long;
            } else if fast < slow {
                self.last = Signal::Short;
            }
        }
        self.last
    }
}

#[derive(Debug, Clone)]
pub struct Breakout {
    period: usize,
    channel: PriceChannel,
    index: usize,
    last: Signal,
}

impl Breakout {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            channel: PriceChannel::new(period),
            index: 0,
            last: Signal::Flat,
        }
    }
}

impl Strategy for Breakout {
    fn on_bar(&mut self, bar: &Bar) -> Signal {
        let index = self.index;
        self.index += 1;
        let channel = self.channel.update(bar.high, bar.low);
        if index < self.period {
            return Signal::Flat;
        }

        if let Some((upper, lower)) = channel {
            if bar.close > upper {
                self.last = Signal::Long;
            } else if bar.close < lower {
                self.last = Signal::Short;
            }
        }
        self.last
    }
}

/// RSI mean-reversion: oversold goes long, overbought goes short.
#[derive(Debug, Clone)]
pub struct MultiFactor {
    rsi_period: usize,
    buy_threshold: f64,
    sell_threshold: f64,
    rsi: WilderRsi,
    index: usize,
    last: Signal,
}

impl MultiFactor {
    pub fn new(rsi_buy_threshold: f64, rsi_sell_threshold: f64, rsi_period: usize) -> Self {
        Self {
            rsi_period,
            buy_threshold: rsi_buy_threshold,
            sell_threshold: rsi_sell_threshold,
            rsi: WilderRsi::new(rsi_period),
            index: 0,
            last: Signal::Flat,
        }
    }
}

impl Strategy for MultiFactor {
    fn on_bar(&mut self, bar: &Bar) -> Signal {
        let index = self.index;
        self.index += 1;
        let rsi = self.rsi.update(bar.close);
        if index < self.rsi_period {
            return Signal::Flat;
        }

        if let Some(rsi) = rsi {
            if rsi < self.buy_threshold {
                self.last = Signal::Long;
            } else if rsi > self.sell_threshold {
                self.last = Signal::Short;
            }
        }
        self.last
    }
}

/// Incremental signal source for a validated [`StrategyConfig`].
#[derive(Debug, Clone)]
pub enum SignalGenerator {
    GoldenCross(GoldenCross),
    Breakout(Breakout),
    MultiFactor(MultiFactor),
}

impl SignalGenerator {
    pub fn new(config: &StrategyConfig) -> Result<Self, BacktestError> {
        config.validate()?;
        Ok(match *config {
            StrategyConfig::GoldenCross {
                fast_period,
                slow_period,
            } => SignalGenerator::GoldenCross(GoldenCross::new(fast_period, slow_period)),
            StrategyConfig::Breakout { period } => SignalGenerator::Breakout(Breakout::new(period)),
            StrategyConfig::MultiFactor {
                rsi_buy_threshold,
                rsi_sell_threshold,
                rsi_period,
            } => SignalGenerator::MultiFactor(MultiFactor::new(
                rsi_buy_threshold,
                rsi_sell_threshold,
                rsi_period,
            )),
        })
    }
}

impl Strategy for SignalGenerator {
    fn on_bar(&mut self, bar: &Bar) -> Signal {
        match self {
            SignalGenerator::GoldenCross(inner) => inner.on_bar(bar),
            SignalGenerator::Breakout(inner) => inner.on_bar(bar),
            SignalGenerator::MultiFactor(inner) => inner.on_bar(bar),
        }
    }
}

/// Signal for the last bar of `history`, computed only from `history`.
pub fn decide(history: &[Bar], config: &StrategyConfig) -> Result<Signal, BacktestError> {
    let signals = signals(history, config)?;
    signals
        .last()
        .copied()
        .ok_or(BacktestError::InsufficientData {
            required: 1,
            available: 0,
        })
}

/// One signal per bar of `history`.
pub fn signals(history: &[Bar], config: &StrategyConfig) -> Result<Vec<Signal>, BacktestError> {
    let mut generator = SignalGenerator::new(config)?;
    if history.is_empty() {
        return Err(BacktestError::InsufficientData {
            required: 1,
            available: 0,
        });
    }
    Ok(history.iter().map(|bar| generator.on_bar(bar)).collect())
}
