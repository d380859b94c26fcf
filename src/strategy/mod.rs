pub mod base;
pub mod ema_cross;
pub mod indicators;
pub mod sma_cross;

pub use base::{BarStrategy, Command, Signal, Strategy};
pub use ema_cross::{EmaCross, EmaCrossConfig};
pub use sma_cross::{SmaCross, SmaCrossNode, SmaCrossNodeConfig, SmaCrossParams};
