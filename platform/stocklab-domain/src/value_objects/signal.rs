use serde::{Deserialize, Serialize};

/// Target exposure emitted by a strategy for the next bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Long,
    #[default]
    Flat,
    Short,
}

impl Signal {
    /// +1 for long, 0 for flat, -1 for short.
    pub fn exposure(self) -> i8 {
        match self {
            Signal::Long => 1,
            Signal::Flat => 0,
            Signal::Short => -1,
        }
    }

    pub fn from_exposure(exposure: i8) -> Self {
        match exposure.signum() {
            1 => Signal::Long,
            -1 => Signal::Short,
            _ => Signal::Flat,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Signal::Long => "long",
            Signal::Flat => "flat",
            Signal::Short => "short",
        }
    }
}
