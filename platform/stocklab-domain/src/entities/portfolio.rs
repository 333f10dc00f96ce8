use crate::errors::BacktestError;
use crate::value_objects::position::Position;
use crate::value_objects::side::{Direction, Side};
use crate::value_objects::trade::Trade;

const CASH_TOLERANCE: f64 = 1e-9;
const QTY_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    cash: f64,
    position: Position,
    realized_pnl: f64,
    allow_short: bool,
}

impl Portfolio {
    pub fn new(initial_cash: f64, allow_short: bool) -> Self {
        Self {
            cash: initial_cash,
            position: Position::flat(),
            realized_pnl: 0.0,
            allow_short,
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn position_qty(&self) -> f64 {
        self.position.quantity
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn allow_short(&self) -> bool {
        self.allow_short
    }

    pub fn mark_to_market(&self, price: f64) -> f64 {
        self.cash + self.position.quantity * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        if self.position.is_flat() {
            return 0.0;
        }
        (price - self.position.avg_price) * self.position.quantity
    }

    /// Applies one fill. The part of the fill that reduces the current position is booked first
    /// and returned as a [`Trade`]; any remainder opens (or extends) a position on the fill side.
    ///
    /// Fills that open or increase exposure are checked against cash (long) or equity (short)
    /// before anything is mutated, so a rejected fill leaves the portfolio untouched.
    pub fn apply_fill(
        &mut self,
        timestamp: i64,
        side: Side,
        price: f64,
        quantity: f64,
        commission: f64,
    ) -> Result<Option<Trade>, BacktestError> {
        if quantity <= 0.0 || !quantity.is_finite() {
            return Err(BacktestError::Config(format!(
                "fill quantity must be finite and > 0, got {quantity}"
            )));
        }
        if price <= 0.0 || !price.is_finite() {
            return Err(BacktestError::Config(format!(
                "fill price must be finite and > 0, got {price}"
            )));
        }
        let commission = if commission.is_finite() {
            commission.max(0.0)
        } else {
            0.0
        };

        let current = self.position.quantity;
        let reduces = current != 0.0 && current.signum() != side.sign();
        let closing_qty = if reduces {
            quantity.min(current.abs())
        } else {
            0.0
        };
        let opening_qty = quantity - closing_qty;
        let closing_commission = commission * closing_qty / quantity;
        let opening_commission = commission - closing_commission;

        if opening_qty > QTY_EPSILON {
            self.check_funds(side, price, quantity, opening_qty, commission)?;
        }

        match side {
            Side::Buy => self.cash -= quantity * price + commission,
            Side::Sell => self.cash += quantity * price - commission,
        }
        let tolerance = CASH_TOLERANCE * self.cash.abs().max(1.0);
        if self.cash < 0.0 && self.cash > -tolerance {
            self.cash = 0.0;
        }

        let trade = if closing_qty > 0.0 {
            Some(self.close_part(timestamp, price, closing_qty, closing_commission))
        } else {
            None
        };

        if opening_qty > QTY_EPSILON {
            self.open_part(timestamp, side, price, opening_qty, opening_commission);
        }

        Ok(trade)
    }

    fn check_funds(
        &self,
        side: Side,
        price: f64,
        quantity: f64,
        opening_qty: f64,
        commission: f64,
    ) -> Result<(), BacktestError> {
        let tolerance = CASH_TOLERANCE * self.cash.abs().max(1.0);
        match side {
            Side::Buy => {
                let required = quantity * price + commission;
                if self.cash - required < -tolerance {
                    return Err(BacktestError::InsufficientFunds {
                        required,
                        available: self.cash,
                    });
                }
            }
            Side::Sell => {
                let short_after = if self.position.quantity > 0.0 {
                    opening_qty
                } else {
                    self.position.quantity.abs() + opening_qty
                };
                let required = short_after * price + commission;
                if !self.allow_short {
                    return Err(BacktestError::InsufficientFunds {
                        required,
                        available: 0.0,
                    });
                }
                let equity = self.mark_to_market(price);
                if required > equity + tolerance {
                    return Err(BacktestError::InsufficientFunds {
                        required,
                        available: equity,
                    });
                }
            }
        }
        Ok(())
    }

    fn close_part(&mut self, timestamp: i64, price: f64, qty: f64, commission: f64) -> Trade {
        let held = self.position.quantity.abs();
        let direction = if self.position.quantity > 0.0 {
            Direction::Long
        } else {
            Direction::Short
        };
        let entry_share = self.position.entry_commission * qty / held;
        let gross = (price - self.position.avg_price) * qty * direction.sign();
        let pnl = gross - entry_share - commission;
        self.realized_pnl += pnl;

        let trade = Trade {
            entry_time: self.position.entry_time.unwrap_or(timestamp),
            exit_time: timestamp,
            direction,
            entry_price: self.position.avg_price,
            exit_price: price,
            quantity: qty,
            commission: entry_share + commission,
            pnl,
        };

        self.position.quantity -= direction.sign() * qty;
        self.position.entry_commission -= entry_share;
        if self.position.quantity.abs() <= QTY_EPSILON {
            self.position = Position::flat();
        }
        trade
    }

    fn open_part(&mut self, timestamp: i64, side: Side, price: f64, qty: f64, commission: f64) {
        if self.position.is_flat() {
            self.position = Position {
                quantity: side.sign() * qty,
                avg_price: price,
                entry_time: Some(timestamp),
                entry_commission: commission,
            };
            return;
        }
        let held = self.position.quantity.abs();
        let total = held + qty;
        self.position.avg_price = (self.position.avg_price * held + price * qty) / total;
        self.position.quantity += side.sign() * qty;
        self.position.entry_commission += commission;
    }
}

#[cfg(test)]
mod tests {
    use super::Portfolio;
    use crate::errors::BacktestError;
    use crate::value_objects::side::{Direction, Side};

    #[test]
    fn buy_and_sell_books_net_pnl() {
        let mut portfolio = Portfolio::new(1000.0, false);
        let opened = portfolio
            .apply_fill(1, Side::Buy, 100.0, 1.0, 1.0)
            .expect("buy");
        assert!(opened.is_none());
        assert_eq!(portfolio.position_qty(), 1.0);
        assert!((portfolio.cash() - 899.0).abs() < 1e-9);
        assert_eq!(portfolio.realized_pnl(), 0.0);

        let trade = portfolio
            .apply_fill(2, Side::Sell, 110.0, 1.0, 1.0)
            .expect("sell")
            .expect("trade");
        assert_eq!(trade.direction, Direction::Long);
        assert_eq!(trade.entry_time, 1);
        assert_eq!(trade.exit_time, 2);
        assert!((trade.pnl - 8.0).abs() < 1e-9);
        assert!((trade.commission - 2.0).abs() < 1e-9);
        assert_eq!(portfolio.position_qty(), 0.0);
        assert!((portfolio.cash() - 1008.0).abs() < 1e-9);
        assert!((portfolio.realized_pnl() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn rejected_buy_leaves_state_untouched() {
        let mut portfolio = Portfolio::new(100.0, false);
        let before = portfolio.clone();
        let err = portfolio
            .apply_fill(1, Side::Buy, 50.0, 3.0, 0.0)
            .unwrap_err();
        assert!(matches!(err, BacktestError::InsufficientFunds { .. }));
        assert_eq!(portfolio, before);
    }

    #[test]
    fn short_requires_permission_and_equity() {
        let mut portfolio = Portfolio::new(1000.0, false);
        assert!(portfolio.apply_fill(1, Side::Sell, 10.0, 5.0, 0.0).is_err());
        assert_eq!(portfolio.position_qty(), 0.0);

        let mut portfolio = Portfolio::new(1000.0, true);
        assert!(portfolio.apply_fill(1, Side::Sell, 10.0, 200.0, 0.0).is_err());
        portfolio
            .apply_fill(1, Side::Sell, 10.0, 50.0, 0.0)
            .expect("short");
        assert_eq!(portfolio.position_qty(), -50.0);
        assert!((portfolio.cash() - 1500.0).abs() < 1e-9);
        assert!((portfolio.mark_to_market(10.0) - 1000.0).abs() < 1e-9);

        let trade = portfolio
            .apply_fill(2, Side::Buy, 8.0, 50.0, 0.0)
            .expect("cover")
            .expect("trade");
        assert_eq!(trade.direction, Direction::Short);
        assert!((trade.pnl - 100.0).abs() < 1e-9);
        assert!((portfolio.cash() - 1100.0).abs() < 1e-9);
    }

    #[test]
    fn reducing_fill_always_succeeds_and_is_partial() {
        let mut portfolio = Portfolio::new(1000.0, false);
        portfolio
            .apply_fill(1, Side::Buy, 10.0, 10.0, 2.0)
            .expect("buy");
        let trade = portfolio
            .apply_fill(2, Side::Sell, 12.0, 4.0, 0.0)
            .expect("sell")
            .expect("trade");
        assert_eq!(trade.quantity, 4.0);
        // 40% of the entry commission travels with the closed quantity.
        assert!((trade.pnl - (8.0 - 0.8)).abs() < 1e-9);
        assert!((portfolio.position().entry_commission - 1.2).abs() < 1e-9);
        assert_eq!(portfolio.position_qty(), 6.0);
    }

    #[test]
    fn mark_to_market_never_realizes() {
        let mut portfolio = Portfolio::new(1000.0, false);
        portfolio
            .apply_fill(1, Side::Buy, 10.0, 10.0, 0.0)
            .expect("buy");
        assert!((portfolio.unrealized_pnl(15.0) - 50.0).abs() < 1e-9);
        assert!((portfolio.mark_to_market(15.0) - 1050.0).abs() < 1e-9);
        assert_eq!(portfolio.realized_pnl(), 0.0);
    }

    #[test]
    fn degenerate_fills_are_rejected_without_mutation() {
        let mut portfolio = Portfolio::new(1000.0, false);
        portfolio
            .apply_fill(1, Side::Buy, 10.0, 5.0, 0.0)
            .expect("open");

        let err = portfolio
            .apply_fill(2, Side::Buy, 10.0, 0.0, 0.0)
            .expect_err("zero quantity");
        assert_eq!(err.kind(), "config");
        let err = portfolio
            .apply_fill(2, Side::Sell, 0.0, 5.0, 0.0)
            .expect_err("zero price");
        assert_eq!(err.kind(), "config");
        assert!(portfolio.apply_fill(2, Side::Sell, -1.0, 5.0, 0.0).is_err());
        assert!(portfolio.apply_fill(2, Side::Sell, f64::NAN, 5.0, 0.0).is_err());

        assert_eq!(portfolio.cash(), 950.0);
        assert_eq!(portfolio.position_qty(), 5.0);
    }
}
