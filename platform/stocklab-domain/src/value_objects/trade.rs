use crate::value_objects::side::Direction;
use serde::{Deserialize, Serialize};

/// Closed (or partially closed) round trip. `pnl` is net of entry and exit commission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_time: i64,
    pub exit_time: i64,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub commission: f64,
    pub pnl: f64,
}

impl Trade {
    pub fn return_pct(&self) -> f64 {
        let basis = self.entry_price * self.quantity;
        if basis <= 0.0 {
            return 0.0;
        }
        self.pnl / basis
    }

    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}
