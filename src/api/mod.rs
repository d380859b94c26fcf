pub mod exchange;
pub mod models;
pub mod rest;

pub use exchange::{Market, UnifiedExchange};
pub use models::OhlcvRow;
pub use rest::{BinanceRestClient, MAX_KLINES_LIMIT};
