//! Backtesting engines: bar-series replay and the event-driven node

pub mod engine;
pub mod node;
pub mod series;
pub mod stats;

pub use engine::{Backtest, BacktestSettings, Trade};
pub use node::{Bar, BarType, BacktestNode, Instrument, NodeResult, VenueConfig};
pub use series::BarSeries;
pub use stats::{EquityPoint, Stats};
