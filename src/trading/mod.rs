pub mod order;

pub use order::{ClosedPosition, Order, OrderSide, OrderStatus, Position};
