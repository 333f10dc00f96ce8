use crate::entities::metrics::{
    MetricsSummary, PerformanceAnalyzer, PerformanceMetrics, DEFAULT_PERIODS_PER_YEAR,
};
use crate::entities::portfolio::Portfolio;
use crate::entities::price_series::PriceSeries;
use crate::errors::BacktestError;
use crate::services::audit::AuditEvent;
use crate::services::engine::execution::{ExecutionConfig, PriceReference};
use crate::services::strategy::{SignalGenerator, Strategy, StrategyConfig};
use crate::value_objects::bar::Bar;
use crate::value_objects::equity_point::EquityPoint;
use crate::value_objects::side::Side;
use crate::value_objects::signal::Signal;
use crate::value_objects::trade::Trade;
use serde::Serialize;
use serde_json::json;
use std::collections::VecDeque;

pub const DEFAULT_INITIAL_CASH: f64 = 100_000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub run_id: String,
    pub initial_cash: f64,
    pub commission_rate: f64,
    pub execution: ExecutionConfig,
    /// Overrides the annualization inferred from bar spacing.
    pub periods_per_year: Option<f64>,
    pub risk_free_rate: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            run_id: "backtest".to_string(),
            initial_cash: DEFAULT_INITIAL_CASH,
            commission_rate: 0.0,
            execution: ExecutionConfig::default(),
            periods_per_year: None,
            risk_free_rate: 0.0,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), BacktestError> {
        if !self.initial_cash.is_finite() || self.initial_cash <= 0.0 {
            return Err(BacktestError::Config(format!(
                "initial_cash must be > 0, got {}",
                self.initial_cash
            )));
        }
        if !(self.commission_rate >= 0.0 && self.commission_rate < 1.0) {
            return Err(BacktestError::Config(format!(
                "commission_rate must be in [0, 1), got {}",
                self.commission_rate
            )));
        }
        if let Some(ppy) = self.periods_per_year {
            if !ppy.is_finite() || ppy <= 0.0 {
                return Err(BacktestError::Config(format!(
                    "periods_per_year must be > 0, got {ppy}"
                )));
            }
        }
        if !self.risk_free_rate.is_finite() {
            return Err(BacktestError::Config(
                "risk_free_rate must be finite".to_string(),
            ));
        }
        self.execution.validate()
    }
}

/// Everything a single run produced. Two runs over the same inputs compare equal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub run_id: String,
    pub instrument: String,
    pub strategy: StrategyConfig,
    pub equity_curve: Vec<EquityPoint>,
    pub trade_log: Vec<Trade>,
    pub signals: Vec<Signal>,
    pub metrics: PerformanceMetrics,
    pub summary: MetricsSummary,
    pub audit_events: Vec<AuditEvent>,
}

#[derive(Debug, Clone)]
pub struct SimulationEngine {
    settings: EngineSettings,
}

impl SimulationEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn run(
        &self,
        series: &PriceSeries,
        config: &StrategyConfig,
    ) -> Result<BacktestResult, BacktestError> {
        self.run_with_cancel(series, config, None)
    }

    /// Replays `series` bar by bar. `should_cancel` is polled before every bar.
    pub fn run_with_cancel(
        &self,
        series: &PriceSeries,
        config: &StrategyConfig,
        should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
    ) -> Result<BacktestResult, BacktestError> {
        self.settings.validate()?;
        let mut generator = SignalGenerator::new(config)?;
        let required = config.warmup_bars();
        if series.len() < required {
            return Err(BacktestError::InsufficientData {
                required,
                available: series.len(),
            });
        }

        let periods_per_year = self
            .settings
            .periods_per_year
            .or_else(|| series.infer_timeframe().map(|tf| tf.periods_per_year()))
            .unwrap_or(DEFAULT_PERIODS_PER_YEAR);

        let mut state = RunState::new(&self.settings, series.instrument());
        let bars = series.bars();
        let last_index = bars.len() - 1;

        state.audit(
            bars[0].timestamp,
            "engine",
            "start",
            None,
            json!({
                "strategy": config,
                "bars": bars.len(),
                "initial_cash": self.settings.initial_cash,
                "commission_rate": self.settings.commission_rate,
                "latency_bars": self.settings.execution.latency_bars,
                "allow_short": self.settings.execution.allow_short,
            }),
        );

        let mut signals = Vec::with_capacity(bars.len());
        for (index, bar) in bars.iter().enumerate() {
            if should_cancelled(should_cancel) {
                return Err(BacktestError::Cancelled {
                    bars_processed: index,
                });
            }

            state.execute_due(index, bar);

            let signal = generator.on_bar(bar);
            signals.push(signal);

            if index == last_index {
                state.force_close(bar);
            } else {
                state.schedule(index, bar, signal, last_index);
            }

            state.record_equity(bar);
        }

        let metrics = PerformanceAnalyzer::new(periods_per_year)
            .with_risk_free_rate(self.settings.risk_free_rate)
            .analyze(&state.equity)?;
        let summary = MetricsSummary::from_run(
            self.settings.initial_cash,
            &state.equity,
            &state.trades,
            metrics,
        );

        state.audit(
            bars[last_index].timestamp,
            "engine",
            "complete",
            None,
            json!({
                "bars_processed": summary.bars_processed,
                "trades": summary.trades,
                "net_profit": summary.net_profit,
                "sharpe_ratio": metrics.sharpe_ratio,
                "max_drawdown": metrics.max_drawdown,
            }),
        );

        Ok(BacktestResult {
            run_id: self.settings.run_id.clone(),
            instrument: series.instrument().to_string(),
            strategy: config.clone(),
            equity_curve: state.equity,
            trade_log: state.trades,
            signals,
            metrics,
            summary,
            audit_events: state.audit_events,
        })
    }
}

/// Runs with default execution: next-open fills, no slippage, long-only, fractional shares.
pub fn run(
    price_series: &PriceSeries,
    strategy_config: &StrategyConfig,
    initial_cash: f64,
    commission_rate: f64,
) -> Result<BacktestResult, BacktestError> {
    SimulationEngine::new(EngineSettings {
        initial_cash,
        commission_rate,
        ..EngineSettings::default()
    })
    .run(price_series, strategy_config)
}

#[derive(Debug, Clone, Copy)]
struct PendingOrder {
    due_index: usize,
    target: Signal,
    decided_at: i64,
}

struct RunState<'a> {
    settings: &'a EngineSettings,
    symbol: &'a str,
    portfolio: Portfolio,
    pending: VecDeque<PendingOrder>,
    equity: Vec<EquityPoint>,
    trades: Vec<Trade>,
    audit_events: Vec<AuditEvent>,
}

impl<'a> RunState<'a> {
    fn new(settings: &'a EngineSettings, symbol: &'a str) -> Self {
        Self {
            settings,
            symbol,
            portfolio: Portfolio::new(settings.initial_cash, settings.execution.allow_short),
            pending: VecDeque::new(),
            equity: Vec::new(),
            trades: Vec::new(),
            audit_events: Vec::new(),
        }
    }

    fn execution(&self) -> &ExecutionConfig {
        &self.settings.execution
    }

    fn current_exposure(&self) -> Signal {
        Signal::from_exposure(self.portfolio.position().exposure())
    }

    fn execute_due(&mut self, index: usize, bar: &Bar) {
        while let Some(order) = self.pending.front().copied() {
            if order.due_index > index {
                break;
            }
            self.pending.pop_front();
            let reference = match self.execution().fill_price {
                PriceReference::Open => bar.open,
                PriceReference::Close => bar.close,
            };
            self.move_to_target(bar.timestamp, order, reference);
        }
    }

    fn move_to_target(&mut self, timestamp: i64, order: PendingOrder, reference: f64) {
        let current = self.portfolio.position_qty();
        if self.current_exposure() == order.target {
            return;
        }

        if current != 0.0 {
            let side = if current > 0.0 { Side::Sell } else { Side::Buy };
            let price = self.execution().fill_price_for(reference, side);
            if !self.fill(timestamp, side, price, current.abs(), "close", Some(order)) {
                return;
            }
        }

        let side = match order.target {
            Signal::Long => Side::Buy,
            Signal::Short => Side::Sell,
            Signal::Flat => return,
        };
        let price = self.execution().fill_price_for(reference, side);
        let equity = self.portfolio.mark_to_market(price);
        let mut quantity =
            self.execution().allocation * equity / (price * (1.0 + self.settings.commission_rate));
        if self.execution().whole_shares {
            quantity = quantity.floor();
        }
        if quantity <= 0.0 || !quantity.is_finite() {
            self.reject(
                timestamp,
                "non_positive_quantity",
                json!({
                    "target": order.target,
                    "equity": equity,
                    "price": price,
                    "decided_at": order.decided_at,
                }),
            );
            return;
        }
        self.fill(timestamp, side, price, quantity, "open", Some(order));
    }

    /// Returns false when the portfolio refused the fill.
    fn fill(
        &mut self,
        timestamp: i64,
        side: Side,
        price: f64,
        quantity: f64,
        reason: &str,
        order: Option<PendingOrder>,
    ) -> bool {
        let commission = self.settings.commission_rate * quantity * price;
        match self
            .portfolio
            .apply_fill(timestamp, side, price, quantity, commission)
        {
            Ok(trade) => {
                self.audit(
                    timestamp,
                    "trade",
                    "fill",
                    None,
                    json!({
                        "side": side,
                        "qty": quantity,
                        "price": price,
                        "commission": commission,
                        "reason": reason,
                        "decided_at": order.map(|o| o.decided_at),
                    }),
                );
                if let Some(trade) = trade {
                    self.trades.push(trade);
                }
                true
            }
            Err(err) => {
                self.reject(
                    timestamp,
                    err.kind(),
                    json!({
                        "side": side,
                        "qty": quantity,
                        "price": price,
                        "commission": commission,
                        "reason": reason,
                        "message": err.to_string(),
                    }),
                );
                false
            }
        }
    }

    fn schedule(&mut self, index: usize, bar: &Bar, signal: Signal, last_index: usize) {
        let target = if signal == Signal::Short && !self.execution().allow_short {
            Signal::Flat
        } else {
            signal
        };
        let projected = match self.pending.back() {
            Some(order) => order.target,
            None => self.current_exposure(),
        };
        if target == projected {
            return;
        }

        let due_index = index + self.execution().latency_bars;
        if due_index > last_index {
            return;
        }
        self.pending.push_back(PendingOrder {
            due_index,
            target,
            decided_at: bar.timestamp,
        });
        self.audit(
            bar.timestamp,
            "order",
            "schedule",
            None,
            json!({
                "signal": signal,
                "target": target,
                "due_index": due_index,
            }),
        );
    }

    fn force_close(&mut self, bar: &Bar) {
        self.pending.clear();
        let current = self.portfolio.position_qty();
        if current == 0.0 {
            return;
        }
        let side = if current > 0.0 { Side::Sell } else { Side::Buy };
        self.fill(bar.timestamp, side, bar.close, current.abs(), "force_close", None);
    }

    fn record_equity(&mut self, bar: &Bar) {
        let cash = self.portfolio.cash();
        let position_qty = self.portfolio.position_qty();
        self.equity.push(EquityPoint {
            timestamp: bar.timestamp,
            equity: cash + position_qty * bar.close,
            cash,
            position_qty,
            close: bar.close,
            unrealized_pnl: self.portfolio.unrealized_pnl(bar.close),
            realized_pnl: self.portfolio.realized_pnl(),
        });
    }

    fn reject(&mut self, timestamp: i64, reason: &str, details: serde_json::Value) {
        self.audit(timestamp, "order", "reject", Some(reason), details);
    }

    fn audit(
        &mut self,
        timestamp: i64,
        stage: &str,
        action: &str,
        error: Option<&str>,
        details: serde_json::Value,
    ) {
        self.audit_events.push(AuditEvent {
            run_id: self.settings.run_id.clone(),
            timestamp,
            stage: stage.to_string(),
            symbol: Some(self.symbol.to_string()),
            action: action.to_string(),
            error: error.map(str::to_string),
            details,
        });
    }
}

fn should_cancelled(should_cancel: Option<&(dyn Fn() -> bool + Sync)>) -> bool {
    should_cancel.map(|f| f()).unwrap_or(false)
}
