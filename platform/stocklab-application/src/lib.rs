pub mod backtesting;
pub mod batch;
pub mod cache;
pub mod config;
pub mod meta;
pub mod reporting;
mod shared;
pub mod validation;
