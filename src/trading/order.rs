use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Submitted,
    Filled,
    Denied,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Submitted => write!(f, "SUBMITTED"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Denied => write!(f, "DENIED"),
        }
    }
}

/// Market order as submitted by a node strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub strategy_id: String,
    pub instrument_id: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub filled_price: Option<Decimal>,
    pub commission: Decimal,
    pub status: OrderStatus,
    pub reason: Option<String>,
    /// Unix millis of the bar that triggered the order
    pub ts_event: i64,
}

impl Order {
    pub fn market(
        id: String,
        strategy_id: &str,
        instrument_id: &str,
        side: OrderSide,
        quantity: Decimal,
        ts_event: i64,
    ) -> Self {
        Self {
            id,
            strategy_id: strategy_id.to_string(),
            instrument_id: instrument_id.to_string(),
            side,
            quantity,
            filled_price: None,
            commission: Decimal::ZERO,
            status: OrderStatus::Submitted,
            reason: None,
            ts_event,
        }
    }

    pub fn fill(&mut self, price: Decimal, commission: Decimal) {
        self.filled_price = Some(price);
        self.commission = commission;
        self.status = OrderStatus::Filled;
    }

    pub fn deny(&mut self, reason: impl Into<String>) {
        self.reason = Some(reason.into());
        self.status = OrderStatus::Denied;
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}

/// A position that went back to flat (or flipped)
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub strategy_id: String,
    pub side: OrderSide,
    pub peak_quantity: Decimal,
    pub avg_px_open: Decimal,
    pub avg_px_close: Decimal,
    pub realized_pnl: Decimal,
    pub opened_at: i64,
    pub closed_at: i64,
}

/// Netting position: one signed quantity per strategy and instrument
#[derive(Debug, Clone)]
pub struct Position {
    pub strategy_id: String,
    /// Positive long, negative short
    pub quantity: Decimal,
    pub avg_px_open: Decimal,
    pub peak_quantity: Decimal,
    pub realized_pnl: Decimal,
    pub opened_at: i64,
    closing_notional: Decimal,
    closing_quantity: Decimal,
}

impl Position {
    pub fn flat(strategy_id: &str) -> Self {
        Self {
            strategy_id: strategy_id.to_string(),
            quantity: Decimal::ZERO,
            avg_px_open: Decimal::ZERO,
            peak_quantity: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            opened_at: 0,
            closing_notional: Decimal::ZERO,
            closing_quantity: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }

    pub fn side(&self) -> Option<OrderSide> {
        if self.is_long() {
            Some(OrderSide::Buy)
        } else if self.is_short() {
            Some(OrderSide::Sell)
        } else {
            None
        }
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.avg_px_open) * self.quantity
    }

    fn open(&mut self, side: OrderSide, quantity: Decimal, price: Decimal, ts: i64) {
        let held = self.quantity.abs();
        self.avg_px_open = (self.avg_px_open * held + price * quantity) / (held + quantity);
        if held.is_zero() {
            self.opened_at = ts;
        }
        self.quantity += side.sign() * quantity;
        self.peak_quantity = self.peak_quantity.max(self.quantity.abs());
    }

    fn reset(&mut self) {
        self.avg_px_open = Decimal::ZERO;
        self.peak_quantity = Decimal::ZERO;
        self.realized_pnl = Decimal::ZERO;
        self.closing_notional = Decimal::ZERO;
        self.closing_quantity = Decimal::ZERO;
    }

    /// Apply a fill. Returns the closed position when the fill brings the
    /// position to flat or flips it; a flip reopens the remainder at `price`.
    pub fn apply_fill(
        &mut self,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        commission: Decimal,
        ts: i64,
    ) -> Option<ClosedPosition> {
        self.realized_pnl -= commission;

        let current = self.side();
        if current.is_none() || current == Some(side) {
            self.open(side, quantity, price, ts);
            return None;
        }

        let held = self.quantity.abs();
        let closing = quantity.min(held);
        self.realized_pnl += (price - self.avg_px_open) * closing * -side.sign();
        self.closing_notional += price * closing;
        self.closing_quantity += closing;
        self.quantity += side.sign() * closing;

        if !self.quantity.is_zero() {
            return None;
        }

        let closed = ClosedPosition {
            strategy_id: self.strategy_id.clone(),
            side: side.opposite(),
            peak_quantity: self.peak_quantity,
            avg_px_open: self.avg_px_open,
            avg_px_close: self.closing_notional / self.closing_quantity,
            realized_pnl: self.realized_pnl,
            opened_at: self.opened_at,
            closed_at: ts,
        };
        self.reset();

        let remainder = quantity - closing;
        if remainder > Decimal::ZERO {
            self.open(side, remainder, price, ts);
        }
        Some(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_long_round_trip() {
        let mut pos = Position::flat("S-001");
        assert!(pos.apply_fill(OrderSide::Buy, dec!(1), dec!(100), dec!(0.1), 1).is_none());
        assert!(pos.is_long());
        assert_eq!(pos.unrealized_pnl(dec!(110)), dec!(10));

        let closed = pos
            .apply_fill(OrderSide::Sell, dec!(1), dec!(110), dec!(0.11), 2)
            .unwrap();
        assert!(pos.is_flat());
        assert_eq!(closed.side, OrderSide::Buy);
        assert_eq!(closed.avg_px_close, dec!(110));
        assert_eq!(closed.realized_pnl, dec!(9.79));
        assert_eq!((closed.opened_at, closed.closed_at), (1, 2));
    }

    #[test]
    fn test_averaging_into_position() {
        let mut pos = Position::flat("S-001");
        pos.apply_fill(OrderSide::Buy, dec!(1), dec!(100), Decimal::ZERO, 1);
        pos.apply_fill(OrderSide::Buy, dec!(1), dec!(200), Decimal::ZERO, 2);
        assert_eq!(pos.quantity, dec!(2));
        assert_eq!(pos.avg_px_open, dec!(150));
        assert_eq!(pos.opened_at, 1);
    }

    #[test]
    fn test_short_profit() {
        let mut pos = Position::flat("S-001");
        pos.apply_fill(OrderSide::Sell, dec!(2), dec!(100), Decimal::ZERO, 1);
        assert!(pos.is_short());

        let closed = pos
            .apply_fill(OrderSide::Buy, dec!(2), dec!(90), Decimal::ZERO, 2)
            .unwrap();
        assert_eq!(closed.side, OrderSide::Sell);
        assert_eq!(closed.realized_pnl, dec!(20));
    }

    #[test]
    fn test_flip_reopens_remainder() {
        let mut pos = Position::flat("S-001");
        pos.apply_fill(OrderSide::Buy, dec!(1), dec!(100), Decimal::ZERO, 1);

        let closed = pos
            .apply_fill(OrderSide::Sell, dec!(3), dec!(120), Decimal::ZERO, 2)
            .unwrap();
        assert_eq!(closed.realized_pnl, dec!(20));
        assert_eq!(pos.quantity, dec!(-2));
        assert_eq!(pos.avg_px_open, dec!(120));
        assert_eq!(pos.opened_at, 2);
    }

    #[test]
    fn test_order_lifecycle() {
        let mut order = Order::market("O-1".into(), "S-001", "BTCUSDT.BINANCE", OrderSide::Buy, dec!(1), 0);
        assert_eq!(order.status, OrderStatus::Submitted);
        order.deny("insufficient balance");
        assert_eq!(order.status.to_string(), "DENIED");
        assert!(!order.is_filled());
    }
}
