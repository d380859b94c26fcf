//! SMA crossover
//!
//! Long when the short average crosses above the long one, flat when it
//! crosses back below. `SmaCross` runs on the bar-series engine,
//! `SmaCrossNode` on the event-driven node.

use crate::backtest::node::Bar;
use crate::strategy::base::{BarStrategy, Command, Signal, Strategy};
use crate::strategy::indicators::{
    crossed_above, crossed_below, crossover, first_valid, sma, Indicator, SimpleMovingAverage,
};
use crate::trading::order::OrderSide;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmaCrossParams {
    pub n_short: usize,
    pub n_long: usize,
}

impl Default for SmaCrossParams {
    fn default() -> Self {
        Self {
            n_short: 30,
            n_long: 100,
        }
    }
}

pub struct SmaCross {
    params: SmaCrossParams,
    sma_short: Vec<f64>,
    sma_long: Vec<f64>,
}

impl SmaCross {
    pub fn new(params: SmaCrossParams) -> Self {
        Self {
            params,
            sma_short: Vec::new(),
            sma_long: Vec::new(),
        }
    }
}

impl Strategy for SmaCross {
    fn name(&self) -> &str {
        "SmaCross"
    }

    fn init(&mut self, closes: &[f64]) {
        self.sma_short = sma(closes, self.params.n_short);
        self.sma_long = sma(closes, self.params.n_long);
        debug!(
            "Initialized SMA indicators: n_short={} n_long={}",
            self.params.n_short, self.params.n_long
        );
    }

    fn warmup(&self) -> usize {
        let short = first_valid(&self.sma_short).unwrap_or(self.sma_short.len());
        let long = first_valid(&self.sma_long).unwrap_or(self.sma_long.len());
        short.max(long)
    }

    fn next(&mut self, i: usize) -> Signal {
        if crossover(&self.sma_short, &self.sma_long, i) {
            debug!("Crossover detected: short->long at index {}", i);
            Signal::Buy
        } else if crossover(&self.sma_long, &self.sma_short, i) {
            debug!("Crossover detected: long->short at index {}", i);
            Signal::Close
        } else {
            Signal::Hold
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmaCrossNodeConfig {
    pub order_id_tag: String,
    pub fast_period: usize,
    pub slow_period: usize,
    pub trade_size: Decimal,
}

/// Node variant: buys on a golden cross and sells on a death cross without
/// looking at the current position
pub struct SmaCrossNode {
    id: String,
    trade_size: Decimal,
    fast: SimpleMovingAverage,
    slow: SimpleMovingAverage,
    prev: Option<(f64, f64)>,
}

impl SmaCrossNode {
    pub fn new(config: SmaCrossNodeConfig) -> Self {
        let strategy = Self {
            id: format!("SmaCross-{}", config.order_id_tag),
            trade_size: config.trade_size,
            fast: SimpleMovingAverage::new(config.fast_period),
            slow: SimpleMovingAverage::new(config.slow_period),
            prev: None,
        };
        debug!(
            "{}: {} / {}, trade size {}",
            strategy.id,
            strategy.fast.name(),
            strategy.slow.name(),
            strategy.trade_size
        );
        strategy
    }
}

impl BarStrategy for SmaCrossNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn on_bar(&mut self, bar: &Bar, _position: Decimal) -> Vec<Command> {
        let close = bar.close.to_f64().unwrap_or(f64::NAN);
        self.fast.update(close);
        self.slow.update(close);

        if !(self.fast.initialized() && self.slow.initialized()) {
            return Vec::new();
        }

        let (fast, slow) = (self.fast.value(), self.slow.value());
        let mut commands = Vec::new();
        if let Some((prev_fast, prev_slow)) = self.prev {
            if crossed_above(prev_fast, fast, prev_slow, slow) {
                debug!("{}: fast SMA {:.2} crossed above slow SMA {:.2}", self.id, fast, slow);
                commands.push(Command::Market {
                    side: OrderSide::Buy,
                    quantity: self.trade_size,
                });
            } else if crossed_below(prev_fast, fast, prev_slow, slow) {
                debug!("{}: fast SMA {:.2} crossed below slow SMA {:.2}", self.id, fast, slow);
                commands.push(Command::Market {
                    side: OrderSide::Sell,
                    quantity: self.trade_size,
                });
            }
        }
        self.prev = Some((fast, slow));
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    /// Drift down, rally, slide: one golden and one death cross
    fn one_cycle_prices() -> Vec<f64> {
        let mut prices: Vec<f64> = (0..10).map(|i| 110.0 - i as f64).collect();
        prices.extend((1..=10).map(|i| 101.0 + i as f64 * 2.0));
        prices.extend((1..=15).map(|i| 121.0 - i as f64 * 3.0));
        prices
    }

    fn bar(close: Decimal, ts: i64) -> Bar {
        Bar {
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            ts_event: ts,
        }
    }

    #[test]
    fn test_single_crossing_gives_one_entry_one_exit() {
        let prices = one_cycle_prices();
        let mut strategy = SmaCross::new(SmaCrossParams { n_short: 2, n_long: 5 });
        strategy.init(&prices);
        assert_eq!(strategy.warmup(), 4);

        let signals: Vec<(usize, Signal)> = (strategy.warmup()..prices.len())
            .map(|i| (i, strategy.next(i)))
            .filter(|(_, s)| *s != Signal::Hold)
            .collect();

        assert_eq!(signals, vec![(11, Signal::Buy), (21, Signal::Close)]);
    }

    #[test]
    fn test_no_signal_on_flat_series() {
        let prices = vec![100.0; 50];
        let mut strategy = SmaCross::new(SmaCrossParams::default());
        strategy.init(&prices);
        assert!((0..prices.len()).all(|i| strategy.next(i) == Signal::Hold));
    }

    #[test]
    fn test_warmup_past_end_on_short_series() {
        let mut strategy = SmaCross::new(SmaCrossParams::default());
        strategy.init(&[1.0; 10]);
        assert_eq!(strategy.warmup(), 10);
    }

    #[test]
    fn test_node_variant_trades_both_crossings() {
        let mut strategy = SmaCrossNode::new(SmaCrossNodeConfig {
            order_id_tag: "001".into(),
            fast_period: 2,
            slow_period: 5,
            trade_size: dec!(1),
        });
        assert_eq!(strategy.id(), "SmaCross-001");

        let mut commands = Vec::new();
        for (i, p) in one_cycle_prices().into_iter().enumerate() {
            let price = Decimal::try_from(p).unwrap();
            for cmd in strategy.on_bar(&bar(price, i as i64), Decimal::ZERO) {
                commands.push((i, cmd));
            }
        }

        let sides: Vec<(usize, OrderSide)> = commands
            .into_iter()
            .map(|(i, cmd)| match cmd {
                Command::Market { side, .. } => (i, side),
                Command::ClosePosition => panic!("unexpected close"),
            })
            .collect();
        assert_eq!(sides, vec![(11, OrderSide::Buy), (21, OrderSide::Sell)]);
    }
}
