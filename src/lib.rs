pub mod api;
pub mod backtest;
pub mod config;
pub mod convert;
pub mod data;
pub mod optimize;
pub mod runner;
pub mod storage;
pub mod strategy;
pub mod trading;

pub use config::Config;
