pub mod metrics;
pub mod portfolio;
pub mod price_series;
