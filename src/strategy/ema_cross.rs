//! EMA crossover for the event-driven node
//!
//! Always in the market once warmed up: long while the fast EMA is at or above
//! the slow one, short otherwise. Reversals flatten first.

use crate::backtest::node::Bar;
use crate::strategy::base::{BarStrategy, Command};
use crate::strategy::indicators::{ExponentialMovingAverage, Indicator};
use crate::trading::order::OrderSide;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EmaCrossConfig {
    pub order_id_tag: String,
    pub fast_period: usize,
    pub slow_period: usize,
    pub trade_size: Decimal,
}

pub struct EmaCross {
    id: String,
    trade_size: Decimal,
    fast: ExponentialMovingAverage,
    slow: ExponentialMovingAverage,
}

impl EmaCross {
    pub fn new(config: EmaCrossConfig) -> Self {
        let strategy = Self {
            id: format!("EMACross-{}", config.order_id_tag),
            trade_size: config.trade_size,
            fast: ExponentialMovingAverage::new(config.fast_period),
            slow: ExponentialMovingAverage::new(config.slow_period),
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

    fn market(&self, side: OrderSide) -> Command {
        Command::Market {
            side,
            quantity: self.trade_size,
        }
    }
}

impl BarStrategy for EmaCross {
    fn id(&self) -> &str {
        &self.id
    }

    fn on_bar(&mut self, bar: &Bar, position: Decimal) -> Vec<Command> {
        let close = bar.close.to_f64().unwrap_or(f64::NAN);
        self.fast.update(close);
        self.slow.update(close);

        if !(self.fast.initialized() && self.slow.initialized()) {
            return Vec::new();
        }
        // No information in a bar that never moved
        if bar.is_single_price() {
            return Vec::new();
        }

        let (fast, slow) = (self.fast.value(), self.slow.value());
        if fast >= slow {
            if position.is_zero() {
                return vec![self.market(OrderSide::Buy)];
            }
            if position < Decimal::ZERO {
                debug!("{}: fast EMA {:.2} >= slow EMA {:.2}, reversing short", self.id, fast, slow);
                return vec![Command::ClosePosition, self.market(OrderSide::Buy)];
            }
        } else {
            if position.is_zero() {
                return vec![self.market(OrderSide::Sell)];
            }
            if position > Decimal::ZERO {
                debug!("{}: fast EMA {:.2} < slow EMA {:.2}, reversing long", self.id, fast, slow);
                return vec![Command::ClosePosition, self.market(OrderSide::Sell)];
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(close: Decimal) -> Bar {
        Bar {
            open: close - dec!(1),
            high: close + dec!(1),
            low: close - dec!(2),
            close,
            volume: dec!(1),
            ts_event: 0,
        }
    }

    fn strategy() -> EmaCross {
        EmaCross::new(EmaCrossConfig {
            order_id_tag: "000".into(),
            fast_period: 2,
            slow_period: 3,
            trade_size: dec!(0.5),
        })
    }

    #[test]
    fn test_waits_for_warmup() {
        let mut s = strategy();
        assert!(s.on_bar(&bar(dec!(100)), Decimal::ZERO).is_empty());
        assert!(s.on_bar(&bar(dec!(101)), Decimal::ZERO).is_empty());
        assert_eq!(
            s.on_bar(&bar(dec!(102)), Decimal::ZERO),
            vec![Command::Market {
                side: OrderSide::Buy,
                quantity: dec!(0.5)
            }]
        );
        assert_eq!(s.id(), "EMACross-000");
    }

    #[test]
    fn test_holds_when_aligned() {
        let mut s = strategy();
        for p in [100, 101, 102, 103] {
            s.on_bar(&bar(Decimal::from(p)), dec!(0.5));
        }
        assert!(s.on_bar(&bar(dec!(104)), dec!(0.5)).is_empty());
    }

    #[test]
    fn test_reverses_long_on_downturn() {
        let mut s = strategy();
        for p in [100, 101, 102] {
            s.on_bar(&bar(Decimal::from(p)), Decimal::ZERO);
        }
        let commands = s.on_bar(&bar(dec!(80)), dec!(0.5));
        assert_eq!(
            commands,
            vec![
                Command::ClosePosition,
                Command::Market {
                    side: OrderSide::Sell,
                    quantity: dec!(0.5)
                }
            ]
        );
    }

    #[test]
    fn test_skips_single_price_bar() {
        let mut s = strategy();
        for p in [100, 101] {
            s.on_bar(&bar(Decimal::from(p)), Decimal::ZERO);
        }
        let flat = Bar {
            open: dec!(102),
            high: dec!(102),
            low: dec!(102),
            close: dec!(102),
            volume: dec!(1),
            ts_event: 0,
        };
        assert!(s.on_bar(&flat, Decimal::ZERO).is_empty());
    }
}
