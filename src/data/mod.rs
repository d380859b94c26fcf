pub mod candles;
pub mod downloader;
pub mod pipeline;
pub mod timeframe;

pub use candles::{Candle, CandleLayout, CandleTable, KlineExtras};
pub use downloader::{fetch_historical, KlineSource, PageRequest};
pub use pipeline::{get_historical_data, get_historical_data_at, FetchWindow};
pub use timeframe::Timeframe;
