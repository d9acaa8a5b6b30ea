//! In-process store.
//!
//! A transaction holds the store lock for its whole lifetime and works on a
//! private copy of the tables: commit publishes the copy, rollback (or drop)
//! discards it. Transactions are therefore serializable and no reader ever
//! observes uncommitted writes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Adjustment, OrderFilter, Store, StoreError, StoreTx};
use crate::engine::InventoryRecord;
use crate::model::{
    CartItem, CartLine, Order, OrderId, OrderStatus, Payment, PromoCode, Quantity, Variant,
    VariantId,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    variants: BTreeMap<VariantId, Variant>,
    inventory: BTreeMap<VariantId, InventoryRecord>,
    carts: HashMap<String, Vec<CartItem>>,
    promos: HashMap<String, PromoCode>,
    /// Insertion order is creation order.
    orders: Vec<Order>,
    payments: HashMap<OrderId, Payment>,
}

impl Tables {
    fn order_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        self.orders.iter_mut().find(|order| order.id == id)
    }
}

/// Store kept entirely in memory, for tests and the replay binary.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_variant(
        &mut self,
        variant: &Variant,
        stock: Quantity,
    ) -> Result<(), StoreError> {
        if self.work.variants.contains_key(&variant.id) {
            return Err(StoreError::Duplicate(format!("variant {}", variant.id)));
        }
        if self.work.variants.values().any(|v| v.sku == variant.sku) {
            return Err(StoreError::Duplicate(format!("sku {}", variant.sku)));
        }
        self.work.variants.insert(variant.id, variant.clone());
        self.work
            .inventory
            .insert(variant.id, InventoryRecord::new(variant.id, stock));
        Ok(())
    }

    async fn variant(&mut self, id: VariantId) -> Result<Option<Variant>, StoreError> {
        Ok(self.work.variants.get(&id).cloned())
    }

    async fn inventory(&mut self, id: VariantId) -> Result<Option<InventoryRecord>, StoreError> {
        Ok(self.work.inventory.get(&id).copied())
    }

    async fn inventories(&mut self) -> Result<Vec<(Variant, InventoryRecord)>, StoreError> {
        self.work
            .variants
            .values()
            .map(|variant| {
                self.work
                    .inventory
                    .get(&variant.id)
                    .map(|record| (variant.clone(), *record))
                    .ok_or_else(|| StoreError::Dangling(format!("inventory of {}", variant.id)))
            })
            .collect()
    }

    async fn set_stock(
        &mut self,
        id: VariantId,
        stock: Quantity,
    ) -> Result<Option<bool>, StoreError> {
        Ok(self
            .work
            .inventory
            .get_mut(&id)
            .map(|record| record.try_set_stock(stock)))
    }

    async fn reserve_inventory(
        &mut self,
        id: VariantId,
        quantity: Quantity,
    ) -> Result<bool, StoreError> {
        Ok(self
            .work
            .inventory
            .get_mut(&id)
            .is_some_and(|record| record.try_reserve(quantity)))
    }

    async fn release_inventory(
        &mut self,
        id: VariantId,
        quantity: Quantity,
    ) -> Result<Option<Adjustment>, StoreError> {
        Ok(self.work.inventory.get_mut(&id).map(|record| {
            let clamped = record.release(quantity);
            Adjustment {
                record: *record,
                clamped,
            }
        }))
    }

    async fn fulfill_inventory(
        &mut self,
        id: VariantId,
        quantity: Quantity,
    ) -> Result<Option<Adjustment>, StoreError> {
        Ok(self.work.inventory.get_mut(&id).map(|record| {
            let clamped = record.fulfill(quantity);
            Adjustment {
                record: *record,
                clamped,
            }
        }))
    }

    async fn cart_lines(&mut self, owner: &str) -> Result<Vec<CartLine>, StoreError> {
        let Some(items) = self.work.carts.get(owner) else {
            return Ok(Vec::new());
        };
        items
            .iter()
            .map(|item| {
                let variant = self
                    .work
                    .variants
                    .get(&item.variant)
                    .ok_or_else(|| StoreError::Dangling(format!("variant {}", item.variant)))?;
                Ok(CartLine {
                    variant: item.variant,
                    sku: variant.sku.clone(),
                    quantity: item.quantity,
                    unit_price: variant.unit_price().map_err(|e| {
                        StoreError::Corrupt(format!("variant {}: {e}", item.variant))
                    })?,
                })
            })
            .collect()
    }

    async fn lock_cart_lines(&mut self, owner: &str) -> Result<Vec<CartLine>, StoreError> {
        // the transaction already holds the whole store
        self.cart_lines(owner).await
    }

    async fn upsert_cart_item(
        &mut self,
        owner: &str,
        variant: VariantId,
        quantity: Quantity,
    ) -> Result<(), StoreError> {
        if !self.work.variants.contains_key(&variant) {
            return Err(StoreError::Dangling(format!("variant {variant}")));
        }
        let items = self.work.carts.entry(owner.to_string()).or_default();
        match items.iter_mut().find(|item| item.variant == variant) {
            Some(item) => item.quantity = quantity,
            None => items.push(CartItem {
                variant,
                quantity,
                added_at: Utc::now(),
            }),
        }
        Ok(())
    }

    async fn remove_cart_item(
        &mut self,
        owner: &str,
        variant: VariantId,
    ) -> Result<bool, StoreError> {
        let Some(items) = self.work.carts.get_mut(owner) else {
            return Ok(false);
        };
        let before = items.len();
        items.retain(|item| item.variant != variant);
        Ok(items.len() != before)
    }

    async fn clear_cart(&mut self, owner: &str) -> Result<(), StoreError> {
        if let Some(items) = self.work.carts.get_mut(owner) {
            items.clear();
        }
        Ok(())
    }

    async fn promo(&mut self, code: &str) -> Result<Option<PromoCode>, StoreError> {
        Ok(self.work.promos.get(code).cloned())
    }

    async fn promos(&mut self) -> Result<Vec<PromoCode>, StoreError> {
        let mut promos: Vec<_> = self.work.promos.values().cloned().collect();
        promos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.code.cmp(&b.code)));
        Ok(promos)
    }

    async fn insert_promo(&mut self, promo: &PromoCode) -> Result<(), StoreError> {
        if self.work.promos.contains_key(&promo.code) {
            return Err(StoreError::Duplicate(format!("promo code {}", promo.code)));
        }
        self.work.promos.insert(promo.code.clone(), promo.clone());
        Ok(())
    }

    async fn replace_promo(&mut self, code: &str, promo: &PromoCode) -> Result<bool, StoreError> {
        if !self.work.promos.contains_key(code) {
            return Ok(false);
        }
        if promo.code != code && self.work.promos.contains_key(&promo.code) {
            return Err(StoreError::Duplicate(format!("promo code {}", promo.code)));
        }
        self.work.promos.remove(code);
        self.work.promos.insert(promo.code.clone(), promo.clone());
        Ok(true)
    }

    async fn delete_promo(&mut self, code: &str) -> Result<bool, StoreError> {
        Ok(self.work.promos.remove(code).is_some())
    }

    async fn redeem_promo(&mut self, code: &str) -> Result<bool, StoreError> {
        Ok(self
            .work
            .promos
            .get_mut(code)
            .is_some_and(PromoCode::try_redeem))
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        if self.work.order_mut(order.id).is_some() {
            return Err(StoreError::Duplicate(format!("order {}", order.id)));
        }
        self.work.orders.push(order.clone());
        Ok(())
    }

    async fn order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.work.order_mut(id).cloned())
    }

    async fn orders(&mut self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .work
            .orders
            .iter()
            .rev()
            .filter(|order| filter.owner.as_ref().is_none_or(|owner| &order.owner == owner))
            .filter(|order| filter.status.is_none_or(|status| order.status == status))
            .cloned()
            .collect())
    }

    async fn update_order_status(
        &mut self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.work.order_mut(id) {
            Some(order) if order.status == from => {
                order.status = to;
                order.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn payment_for_order(&mut self, order: OrderId) -> Result<Option<Payment>, StoreError> {
        Ok(self.work.payments.get(&order).cloned())
    }

    async fn payment_by_gateway_order(
        &mut self,
        gateway_order_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .work
            .payments
            .values()
            .find(|payment| payment.gateway_order_id == gateway_order_id)
            .cloned())
    }

    async fn upsert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        if self.work.order_mut(payment.order_id).is_none() {
            return Err(StoreError::Dangling(format!("order {}", payment.order_id)));
        }
        self.work.payments.insert(payment.order_id, payment.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;

    fn tee(id: VariantId) -> Variant {
        Variant {
            id,
            sku: format!("TEE-{id}"),
            base_price: Amount::from_major(20),
            price_modifier: Amount::ZERO,
        }
    }

    async fn seeded(stock: Quantity) -> MemoryStore {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_variant(&tee(1), stock).await.unwrap();
        tx.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn commit_publishes_writes() {
        let store = seeded(5).await;

        let mut tx = store.begin().await.unwrap();
        assert!(tx.reserve_inventory(1, 3).await.unwrap());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let record = tx.inventory(1).await.unwrap().unwrap();
        assert_eq!(record.reserved, 3);
    }

    #[tokio::test]
    async fn rollback_and_drop_discard_writes() {
        let store = seeded(5).await;

        let mut tx = store.begin().await.unwrap();
        assert!(tx.reserve_inventory(1, 3).await.unwrap());
        tx.rollback().await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            assert!(tx.reserve_inventory(1, 2).await.unwrap());
            // dropped without commit
        }

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.inventory(1).await.unwrap().unwrap().reserved, 0);
    }

    #[tokio::test]
    async fn reserve_is_conditional_on_availability() {
        let store = seeded(5).await;
        let mut tx = store.begin().await.unwrap();
        assert!(tx.reserve_inventory(1, 3).await.unwrap());
        assert!(!tx.reserve_inventory(1, 3).await.unwrap());
        assert!(!tx.reserve_inventory(99, 1).await.unwrap());
        assert_eq!(tx.inventory(1).await.unwrap().unwrap().reserved, 3);
    }

    #[tokio::test]
    async fn duplicate_variant_is_rejected() {
        let store = seeded(5).await;
        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_variant(&tee(1), 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn cart_keeps_insertion_order_and_merges_lines() {
        let store = seeded(5).await;
        let mut tx = store.begin().await.unwrap();
        tx.insert_variant(&tee(2), 5).await.unwrap();
        tx.upsert_cart_item("alice", 2, 1).await.unwrap();
        tx.upsert_cart_item("alice", 1, 1).await.unwrap();
        tx.upsert_cart_item("alice", 2, 4).await.unwrap();

        let lines = tx.cart_lines("alice").await.unwrap();
        let summary: Vec<_> = lines.iter().map(|l| (l.variant, l.quantity)).collect();
        assert_eq!(summary, vec![(2, 4), (1, 1)]);

        tx.clear_cart("alice").await.unwrap();
        assert!(tx.cart_lines("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn order_status_update_is_compare_and_set() {
        let store = seeded(5).await;
        let mut tx = store.begin().await.unwrap();
        let now = Utc::now();
        let order = Order {
            id: OrderId::new_v4(),
            owner: "alice".to_string(),
            items: Vec::new(),
            subtotal: Amount::ZERO,
            discount_amount: Amount::ZERO,
            promo_code: None,
            total_amount: Amount::ZERO,
            status: OrderStatus::Pending,
            shipping_address: "1 Main St".to_string(),
            created_at: now,
            updated_at: now,
        };
        tx.insert_order(&order).await.unwrap();

        let moved = tx
            .update_order_status(order.id, OrderStatus::Pending, OrderStatus::Confirmed, now)
            .await
            .unwrap();
        assert!(moved);
        let stale = tx
            .update_order_status(order.id, OrderStatus::Pending, OrderStatus::Cancelled, now)
            .await
            .unwrap();
        assert!(!stale);
        let status = tx.order(order.id).await.unwrap().unwrap().status;
        assert_eq!(status, OrderStatus::Confirmed);
    }
}
