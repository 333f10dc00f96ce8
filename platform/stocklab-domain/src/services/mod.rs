pub mod audit;
pub mod engine;
pub mod features;
pub mod ohlcv;
pub mod strategy;
