use crate::backtest::node::Bar;
use crate::trading::order::OrderSide;
use rust_decimal::Decimal;

/// Decision of a bar-series strategy on one bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Go long with the engine's default sizing
    Buy,
    /// Close the open trade, if any
    Close,
    Hold,
}

/// Strategy run by the bar-series engine. Indicators are computed once over
/// the full close series, then `next` is called for every tradable bar.
pub trait Strategy {
    fn name(&self) -> &str;

    fn init(&mut self, closes: &[f64]);

    /// Index of the first bar where every indicator is defined
    fn warmup(&self) -> usize;

    fn next(&mut self, i: usize) -> Signal;
}

/// Instruction from a node strategy for the current bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Market { side: OrderSide, quantity: Decimal },
    /// Flatten the strategy's net position at market
    ClosePosition,
}

/// Strategy run by the event-driven node, fed one bar at a time
pub trait BarStrategy {
    fn id(&self) -> &str;

    /// `position` is the strategy's signed net quantity before this bar
    fn on_bar(&mut self, bar: &Bar, position: Decimal) -> Vec<Command>;
}
