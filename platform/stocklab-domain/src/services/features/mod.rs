mod rolling;

pub use rolling::{PriceChannel, RollingSma, WilderRsi};
