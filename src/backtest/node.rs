//! Event-driven backtest node
//!
//! Bars are pushed one at a time through every strategy. Orders are market
//! orders filled at the bar close against a single spot cash account shared
//! by all strategies; each strategy keeps its own netting position.

use crate::data::Timeframe;
use crate::strategy::base::{BarStrategy, Command};
use crate::trading::order::{ClosedPosition, Order, OrderSide, Position};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentId {
    pub symbol: String,
    pub venue: String,
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.symbol, self.venue)
    }
}

/// Spot currency pair
#[derive(Debug, Clone)]
pub struct Instrument {
    pub id: InstrumentId,
    pub base_currency: String,
    pub quote_currency: String,
    pub price_precision: u32,
    pub size_precision: u32,
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    pub min_notional: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
}

impl Instrument {
    pub fn btcusdt_binance() -> Self {
        Self {
            id: InstrumentId {
                symbol: "BTCUSDT".to_string(),
                venue: "BINANCE".to_string(),
            },
            base_currency: "BTC".to_string(),
            quote_currency: "USDT".to_string(),
            price_precision: 2,
            size_precision: 6,
            min_quantity: dec!(0.000001),
            max_quantity: dec!(9000),
            min_notional: dec!(10),
            maker_fee: dec!(0.001),
            taker_fee: dec!(0.001),
        }
    }

    pub fn make_price(&self, value: f64) -> Result<Decimal> {
        let price = Decimal::try_from(value)
            .with_context(|| format!("Cannot represent price {} for {}", value, self.id))?;
        Ok(price.round_dp_with_strategy(self.price_precision, RoundingStrategy::MidpointNearestEven))
    }

    pub fn make_qty(&self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(self.size_precision, RoundingStrategy::MidpointNearestEven)
    }

    pub fn make_qty_f64(&self, value: f64) -> Result<Decimal> {
        let qty = Decimal::try_from(value)
            .with_context(|| format!("Cannot represent quantity {} for {}", value, self.id))?;
        Ok(self.make_qty(qty))
    }
}

/// Bar specification string, e.g. `BTCUSDT.BINANCE-1-HOUR-LAST-EXTERNAL`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarType {
    pub instrument_id: InstrumentId,
    pub step: u32,
    pub aggregation: &'static str,
}

impl BarType {
    pub fn last_external(instrument_id: InstrumentId, timeframe: Timeframe) -> Self {
        let (step, aggregation) = timeframe.bar_spec();
        Self {
            instrument_id,
            step,
            aggregation,
        }
    }
}

impl fmt::Display for BarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-LAST-EXTERNAL",
            self.instrument_id, self.step, self.aggregation
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Bar close, unix millis
    pub ts_event: i64,
}

impl Bar {
    pub fn is_single_price(&self) -> bool {
        self.open == self.high && self.high == self.low && self.low == self.close
    }
}

/// Cash account: one balance per currency, no borrowing
#[derive(Debug, Clone)]
pub struct CashAccount {
    pub base: Decimal,
    pub quote: Decimal,
}

impl CashAccount {
    /// Check funds and settle a fill; returns the commission in quote currency
    fn settle(
        &mut self,
        instrument: &Instrument,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> std::result::Result<Decimal, String> {
        let notional = quantity * price;
        let commission = (notional * instrument.taker_fee)
            .round_dp_with_strategy(8, RoundingStrategy::MidpointNearestEven);

        match side {
            OrderSide::Buy => {
                let cost = notional + commission;
                if cost > self.quote {
                    return Err(format!(
                        "insufficient {}: need {}, have {}",
                        instrument.quote_currency, cost, self.quote
                    ));
                }
                self.quote -= cost;
                self.base += quantity;
            }
            OrderSide::Sell => {
                if quantity > self.base {
                    return Err(format!(
                        "insufficient {}: need {}, have {}",
                        instrument.base_currency, quantity, self.base
                    ));
                }
                self.base -= quantity;
                self.quote += notional - commission;
            }
        }
        Ok(commission)
    }

    pub fn total_in_quote(&self, price: Decimal) -> Decimal {
        self.quote + self.base * price
    }
}

#[derive(Debug, Clone)]
pub struct VenueConfig {
    pub name: String,
    pub starting_base: Decimal,
    pub starting_quote: Decimal,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            name: "BINANCE".to_string(),
            starting_base: Decimal::ONE,
            starting_quote: dec!(1000000),
        }
    }
}

/// Per-strategy outcome
#[derive(Debug, Clone)]
pub struct StrategyReport {
    pub strategy_id: String,
    pub orders: Vec<Order>,
    pub positions_closed: Vec<ClosedPosition>,
    /// Net quantity still open at the end of the run
    pub open_quantity: Decimal,
    /// Open quantity marked at the last close
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub commissions: Decimal,
}

impl StrategyReport {
    pub fn orders_filled(&self) -> usize {
        self.orders.iter().filter(|o| o.is_filled()).count()
    }

    pub fn orders_denied(&self) -> usize {
        self.orders.len() - self.orders_filled()
    }
}

#[derive(Debug, Clone)]
pub struct NodeResult {
    pub bar_type: String,
    pub iterations: usize,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub elapsed_secs: f64,
    pub strategies: Vec<StrategyReport>,
    pub starting_value: Decimal,
    pub account: CashAccount,
    pub last_price: Decimal,
    pub quote_currency: String,
    pub base_currency: String,
}

impl NodeResult {
    pub fn total_value(&self) -> Decimal {
        self.account.total_in_quote(self.last_price)
    }

    pub fn total_orders(&self) -> usize {
        self.strategies.iter().map(|s| s.orders.len()).sum()
    }

    pub fn total_positions(&self) -> usize {
        self.strategies.iter().map(|s| s.positions_closed.len()).sum()
    }
}

fn fmt_ts(ts: Option<i64>) -> String {
    ts.and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

impl fmt::Display for NodeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bar type:          {}", self.bar_type)?;
        writeln!(f, "Backtest start:    {}", fmt_ts(self.start))?;
        writeln!(f, "Backtest end:      {}", fmt_ts(self.end))?;
        writeln!(f, "Iterations:        {}", self.iterations)?;
        writeln!(f, "Elapsed:           {:.3}s", self.elapsed_secs)?;
        writeln!(f, "Total orders:      {}", self.total_orders())?;
        writeln!(f, "Total positions:   {}", self.total_positions())?;
        for report in &self.strategies {
            writeln!(f)?;
            writeln!(f, "[{}]", report.strategy_id)?;
            writeln!(
                f,
                "  Orders:          {} filled / {} denied",
                report.orders_filled(),
                report.orders_denied()
            )?;
            writeln!(f, "  Closed positions:{:>6}", report.positions_closed.len())?;
            writeln!(f, "  Open quantity:   {}", report.open_quantity)?;
            writeln!(
                f,
                "  Unrealized PnL:  {:.2} {}",
                report.unrealized_pnl.to_f64().unwrap_or(0.0),
                self.quote_currency
            )?;
            writeln!(
                f,
                "  Realized PnL:    {:.2} {}",
                report.realized_pnl.to_f64().unwrap_or(0.0),
                self.quote_currency
            )?;
            writeln!(
                f,
                "  Commissions:     {:.2} {}",
                report.commissions.to_f64().unwrap_or(0.0),
                self.quote_currency
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "Balances:          {} {} / {} {}",
            self.account.quote, self.quote_currency, self.account.base, self.base_currency
        )?;
        writeln!(
            f,
            "Starting value:    {:.2} {}",
            self.starting_value.to_f64().unwrap_or(0.0),
            self.quote_currency
        )?;
        write!(
            f,
            "Final value:       {:.2} {} (last price {})",
            self.total_value().to_f64().unwrap_or(0.0),
            self.quote_currency,
            self.last_price
        )
    }
}

struct StrategySlot {
    strategy: Box<dyn BarStrategy>,
    position: Position,
    report: StrategyReport,
}

pub struct BacktestNode {
    instrument: Instrument,
    bar_type: BarType,
    venue: VenueConfig,
    slots: Vec<StrategySlot>,
    next_order_id: u64,
}

impl BacktestNode {
    pub fn new(instrument: Instrument, bar_type: BarType, venue: VenueConfig) -> Self {
        Self {
            instrument,
            bar_type,
            venue,
            slots: Vec::new(),
            next_order_id: 1,
        }
    }

    pub fn add_strategy(&mut self, strategy: Box<dyn BarStrategy>) {
        let id = strategy.id().to_string();
        self.slots.push(StrategySlot {
            position: Position::flat(&id),
            report: StrategyReport {
                strategy_id: id,
                orders: Vec::new(),
                positions_closed: Vec::new(),
                open_quantity: Decimal::ZERO,
                unrealized_pnl: Decimal::ZERO,
                realized_pnl: Decimal::ZERO,
                commissions: Decimal::ZERO,
            },
            strategy,
        });
    }

    pub fn run(mut self, bars: &[Bar]) -> Result<NodeResult> {
        if self.slots.is_empty() {
            return Err(anyhow!("No strategies selected."));
        }

        let started = Instant::now();
        let mut account = CashAccount {
            base: self.venue.starting_base,
            quote: self.venue.starting_quote,
        };
        let first_price = bars.first().map(|b| b.open).unwrap_or(Decimal::ZERO);
        let starting_value = account.total_in_quote(first_price);

        info!(
            "Running {} strategies over {} bars of {} on {}",
            self.slots.len(),
            bars.len(),
            self.bar_type,
            self.venue.name
        );

        for bar in bars {
            for idx in 0..self.slots.len() {
                let net = self.slots[idx].position.quantity;
                let commands = self.slots[idx].strategy.on_bar(bar, net);
                for command in commands {
                    self.execute(idx, command, bar, &mut account);
                }
            }
        }

        let last_price = bars.last().map(|b| b.close).unwrap_or(Decimal::ZERO);
        let mut strategies = Vec::with_capacity(self.slots.len());
        for mut slot in self.slots {
            slot.report.open_quantity = slot.position.quantity;
            slot.report.unrealized_pnl = slot.position.unrealized_pnl(last_price);
            if !slot.position.is_flat() {
                debug!(
                    "{} finished with open position {}",
                    slot.report.strategy_id, slot.position.quantity
                );
            }
            strategies.push(slot.report);
        }

        let result = NodeResult {
            bar_type: self.bar_type.to_string(),
            iterations: bars.len(),
            start: bars.first().map(|b| b.ts_event),
            end: bars.last().map(|b| b.ts_event),
            elapsed_secs: started.elapsed().as_secs_f64(),
            strategies,
            starting_value,
            account,
            last_price,
            quote_currency: self.instrument.quote_currency.clone(),
            base_currency: self.instrument.base_currency.clone(),
        };

        info!(
            "Node run complete: {} orders, {} closed positions",
            result.total_orders(),
            result.total_positions()
        );
        Ok(result)
    }

    fn execute(&mut self, idx: usize, command: Command, bar: &Bar, account: &mut CashAccount) {
        let (side, quantity) = match command {
            Command::Market { side, quantity } => (side, quantity),
            Command::ClosePosition => {
                let position = &self.slots[idx].position;
                match position.side() {
                    Some(side) => (side.opposite(), position.quantity.abs()),
                    None => return,
                }
            }
        };

        let slot = &mut self.slots[idx];
        let order_id = format!("O-{}-{}", slot.report.strategy_id, self.next_order_id);
        self.next_order_id += 1;

        let quantity = self.instrument.make_qty(quantity);
        let mut order = Order::market(
            order_id,
            &slot.report.strategy_id,
            &self.instrument.id.to_string(),
            side,
            quantity,
            bar.ts_event,
        );

        let price = bar.close;
        let denial = if quantity < self.instrument.min_quantity {
            Some(format!("quantity {} below minimum {}", quantity, self.instrument.min_quantity))
        } else if quantity > self.instrument.max_quantity {
            Some(format!("quantity {} above maximum {}", quantity, self.instrument.max_quantity))
        } else if quantity * price < self.instrument.min_notional {
            Some(format!(
                "notional {} below minimum {}",
                quantity * price,
                self.instrument.min_notional
            ))
        } else {
            match account.settle(&self.instrument, side, quantity, price) {
                Ok(commission) => {
                    order.fill(price, commission);
                    None
                }
                Err(reason) => Some(reason),
            }
        };

        match denial {
            Some(reason) => {
                warn!("{} {} {} denied: {}", order.id, side, quantity, reason);
                order.deny(reason);
            }
            None => {
                debug!("{} {} {} filled @ {}", order.id, side, quantity, price);
                slot.report.commissions += order.commission;
                if let Some(closed) =
                    slot.position
                        .apply_fill(side, quantity, price, order.commission, bar.ts_event)
                {
                    slot.report.realized_pnl += closed.realized_pnl;
                    slot.report.positions_closed.push(closed);
                }
            }
        }
        slot.report.orders.push(order);
    }
}
