pub mod amount;
pub mod config;
pub mod csv;
pub mod engine;
pub mod gateway;
pub mod model;
pub mod replay;
pub mod store;

pub use amount::{Amount, AmountOverflow};
pub use engine::{Engine, EngineError, ErrorKind};
pub use model::{Identity, Order, OrderId, OrderStatus, Quantity, VariantId};
