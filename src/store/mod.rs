//! Durable store seam.
//!
//! The store is the only synchronization point of the engine: every
//! invariant that must hold across concurrent callers is enforced by a
//! [`StoreTx`] operation, never by state kept in the engine itself.
//! Components get a store handle at construction time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::engine::InventoryRecord;
use crate::model::{
    CartLine, Order, OrderId, OrderStatus, Payment, PromoCode, Quantity, Variant, VariantId,
};

mod memory;
pub use memory::MemoryStore;

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("dangling reference to {0}")]
    Dangling(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of a clamped decrement on an inventory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjustment {
    /// Record after the update.
    pub record: InventoryRecord,
    /// Whether a counter would have gone negative and was floored at zero.
    pub clamped: bool,
}

/// Filter for order listings. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub owner: Option<String>,
    pub status: Option<OrderStatus>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction. Nothing it writes is visible to others before commit.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

/// One all-or-nothing unit of work.
///
/// Dropping a transaction without calling [`StoreTx::commit`] rolls it back.
#[async_trait]
pub trait StoreTx: Send {
    // Catalog and inventory

    async fn insert_variant(&mut self, variant: &Variant, stock: Quantity)
    -> Result<(), StoreError>;

    async fn variant(&mut self, id: VariantId) -> Result<Option<Variant>, StoreError>;

    async fn inventory(&mut self, id: VariantId) -> Result<Option<InventoryRecord>, StoreError>;

    /// Every variant with its counters, ordered by variant id.
    async fn inventories(&mut self) -> Result<Vec<(Variant, InventoryRecord)>, StoreError>;

    /// Set physical stock unless it would drop below `reserved`.
    /// `None` if the variant has no inventory record.
    async fn set_stock(
        &mut self,
        id: VariantId,
        stock: Quantity,
    ) -> Result<Option<bool>, StoreError>;

    /// Single conditional update: `reserved += quantity` only where
    /// `stock - reserved >= quantity`. Returns whether a row was updated.
    async fn reserve_inventory(
        &mut self,
        id: VariantId,
        quantity: Quantity,
    ) -> Result<bool, StoreError>;

    /// `reserved -= quantity`, floored at zero.
    async fn release_inventory(
        &mut self,
        id: VariantId,
        quantity: Quantity,
    ) -> Result<Option<Adjustment>, StoreError>;

    /// `stock -= quantity` and `reserved -= quantity`, each floored at zero.
    async fn fulfill_inventory(
        &mut self,
        id: VariantId,
        quantity: Quantity,
    ) -> Result<Option<Adjustment>, StoreError>;

    // Carts

    /// Cart lines in insertion order, priced from the catalog.
    async fn cart_lines(&mut self, owner: &str) -> Result<Vec<CartLine>, StoreError>;

    /// Same as [`cart_lines`](Self::cart_lines), but the lines stay locked until
    /// the transaction ends, so a concurrent checkout of the same cart waits and
    /// then sees it cleared.
    async fn lock_cart_lines(&mut self, owner: &str) -> Result<Vec<CartLine>, StoreError>;

    /// Set the quantity of a cart line, creating the cart and the line as needed.
    async fn upsert_cart_item(
        &mut self,
        owner: &str,
        variant: VariantId,
        quantity: Quantity,
    ) -> Result<(), StoreError>;

    async fn remove_cart_item(&mut self, owner: &str, variant: VariantId)
    -> Result<bool, StoreError>;

    /// Empty the cart; the cart itself is kept.
    async fn clear_cart(&mut self, owner: &str) -> Result<(), StoreError>;

    // Promo codes, always addressed by normalized code

    async fn promo(&mut self, code: &str) -> Result<Option<PromoCode>, StoreError>;

    async fn promos(&mut self) -> Result<Vec<PromoCode>, StoreError>;

    async fn insert_promo(&mut self, promo: &PromoCode) -> Result<(), StoreError>;

    /// Replace the promo stored under `code`; the new record may carry a different code.
    async fn replace_promo(&mut self, code: &str, promo: &PromoCode) -> Result<bool, StoreError>;

    async fn delete_promo(&mut self, code: &str) -> Result<bool, StoreError>;

    /// Single conditional update: `usage_count += 1` only where the limit is
    /// unset or not yet reached. Returns whether a row was updated.
    async fn redeem_promo(&mut self, code: &str) -> Result<bool, StoreError>;

    // Orders

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError>;

    async fn order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError>;

    async fn orders(&mut self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError>;

    /// Compare-and-set on the status column. Returns whether the order was in `from`.
    async fn update_order_status(
        &mut self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    // Payments

    async fn payment_for_order(&mut self, order: OrderId) -> Result<Option<Payment>, StoreError>;

    async fn payment_by_gateway_order(
        &mut self,
        gateway_order_id: &str,
    ) -> Result<Option<Payment>, StoreError>;

    /// Insert or overwrite the payment of `payment.order_id`.
    async fn upsert_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
