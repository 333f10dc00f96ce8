use crate::value_objects::side::Direction;
use serde::{Deserialize, Serialize};

/// Signed holding of the single instrument under test.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub quantity: f64,
    pub avg_price: f64,
    pub entry_time: Option<i64>,
    /// Commission paid to open the quantity still held; released pro rata as it is closed.
    pub entry_commission: f64,
}

impl Position {
    pub fn flat() -> Self {
        Self::default()
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0.0
    }

    pub fn direction(&self) -> Option<Direction> {
        if self.quantity > 0.0 {
            Some(Direction::Long)
        } else if self.quantity < 0.0 {
            Some(Direction::Short)
        } else {
            None
        }
    }

    pub fn exposure(&self) -> i8 {
        match self.direction() {
            Some(Direction::Long) => 1,
            Some(Direction::Short) => -1,
            None => 0,
        }
    }
}
