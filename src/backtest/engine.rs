//! Bar-series backtest engine
//!
//! Replays a `BarSeries` through a `Strategy`. Orders placed while processing
//! bar `i` fill at the open of bar `i + 1`.

use super::series::BarSeries;
use super::stats::{compute_stats, Stats};
use crate::config::BacktestConfigFile;
use crate::strategy::{Signal, Strategy};
use anyhow::{anyhow, Result};
use serde::Serialize;
use tracing::{debug, info};

/// Share of available cash a default-sized buy may spend
pub const DEFAULT_SIZE_FRACTION: f64 = 0.9999;

/// Configuration for a backtest run
#[derive(Debug, Clone, Copy)]
pub struct BacktestSettings {
    pub cash: f64,
    pub commission: f64,
    /// Each new order closes whatever trade is still open
    pub exclusive_orders: bool,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            cash: 1_000_000.0,
            commission: 0.002,
            exclusive_orders: true,
        }
    }
}

impl From<&BacktestConfigFile> for BacktestSettings {
    fn from(config: &BacktestConfigFile) -> Self {
        Self {
            cash: config.cash,
            commission: config.commission,
            exclusive_orders: config.exclusive_orders,
        }
    }
}

/// Closed long trade, in whole units
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub size: f64,
    pub entry_bar: usize,
    pub exit_bar: usize,
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub commission: f64,
    pub pnl: f64,
    /// Fractional return net of commission on both legs
    pub return_pct: f64,
}

#[derive(Debug, Clone, Copy)]
struct OpenTrade {
    size: f64,
    entry_bar: usize,
    entry_price: f64,
    entry_fee: f64,
}

/// In-memory cash broker; trades are long-only
struct Broker {
    cash: f64,
    commission: f64,
    exclusive_orders: bool,
    orders: Vec<Signal>,
    open: Vec<OpenTrade>,
    closed: Vec<Trade>,
}

impl Broker {
    fn new(settings: &BacktestSettings) -> Self {
        Self {
            cash: settings.cash,
            commission: settings.commission,
            exclusive_orders: settings.exclusive_orders,
            orders: Vec::new(),
            open: Vec::new(),
            closed: Vec::new(),
        }
    }

    fn equity(&self, price: f64) -> f64 {
        self.cash + self.open.iter().map(|t| t.size * price).sum::<f64>()
    }

    fn close_all(&mut self, series: &BarSeries, bar: usize, price: f64) {
        for trade in std::mem::take(&mut self.open) {
            let value = trade.size * price;
            let exit_fee = value * self.commission;
            self.cash += value - exit_fee;

            let pnl = value - exit_fee - trade.size * trade.entry_price - trade.entry_fee;
            let return_pct =
                (price * (1.0 - self.commission)) / (trade.entry_price * (1.0 + self.commission)) - 1.0;

            debug!(
                "CLOSE {} units @ {:.2} (pnl: {:.2}, {:+.2}%)",
                trade.size,
                price,
                pnl,
                return_pct * 100.0
            );

            self.closed.push(Trade {
                size: trade.size,
                entry_bar: trade.entry_bar,
                exit_bar: bar,
                entry_time: series.index[trade.entry_bar],
                exit_time: series.index[bar],
                entry_price: trade.entry_price,
                exit_price: price,
                commission: trade.entry_fee + exit_fee,
                pnl,
                return_pct,
            });
        }
    }

    fn buy(&mut self, bar: usize, price: f64) {
        let adjusted_price = price * (1.0 + self.commission);
        let size = (self.cash.max(0.0) * DEFAULT_SIZE_FRACTION / adjusted_price).floor();
        if size < 1.0 {
            debug!("Insufficient cash for one unit: have {:.2}, need {:.2}", self.cash, adjusted_price);
            return;
        }

        let value = size * price;
        let fee = value * self.commission;
        self.cash -= value + fee;

        debug!("BUY {} units @ {:.2} (cost: {:.2}, commission: {:.2})", size, price, value, fee);

        self.open.push(OpenTrade {
            size,
            entry_bar: bar,
            entry_price: price,
            entry_fee: fee,
        });
    }

    /// Fill queued orders at the open of `bar`
    fn process_orders(&mut self, series: &BarSeries, bar: usize) {
        let price = series.open[bar];
        for order in std::mem::take(&mut self.orders) {
            match order {
                Signal::Buy => {
                    if self.exclusive_orders {
                        self.close_all(series, bar, price);
                    }
                    self.buy(bar, price);
                }
                Signal::Close => self.close_all(series, bar, price),
                Signal::Hold => {}
            }
        }
    }
}

/// Main backtest engine
pub struct Backtest<'a> {
    series: &'a BarSeries,
    settings: BacktestSettings,
}

impl<'a> Backtest<'a> {
    pub fn new(series: &'a BarSeries, settings: BacktestSettings) -> Result<Self> {
        if !(settings.cash > 0.0) {
            return Err(anyhow!("cash should be positive, got {}", settings.cash));
        }
        if !(0.0..1.0).contains(&settings.commission) {
            return Err(anyhow!("commission should be within [0, 1), got {}", settings.commission));
        }
        Ok(Self { series, settings })
    }

    /// Run the backtest
    pub fn run<S: Strategy>(&self, strategy: &mut S, label: &str) -> Stats {
        let series = self.series;
        let n = series.len();

        strategy.init(&series.close);
        let start = strategy.warmup() + 1;

        let mut broker = Broker::new(&self.settings);
        let mut equity = vec![self.settings.cash; n];

        for i in start..n {
            broker.process_orders(series, i);
            equity[i] = broker.equity(series.close[i]);

            match strategy.next(i) {
                Signal::Hold => {}
                order => broker.orders.push(order),
            }
        }

        // Close any remaining trade so it shows in the statistics
        if start < n && !broker.open.is_empty() {
            let last = n - 1;
            broker.close_all(series, last, series.close[last]);
            equity[last] = broker.equity(series.close[last]);
        }

        info!(
            "Backtest complete: {} bars, {} trades, final equity {:.2}",
            n,
            broker.closed.len(),
            equity.last().copied().unwrap_or(self.settings.cash)
        );

        compute_stats(&series.index, &series.close, &equity, broker.closed, label.to_string())
    }
}
