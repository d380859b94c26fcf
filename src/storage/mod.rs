pub mod cache;
pub mod frame;

pub use frame::{batch_to_table, table_to_batch};
