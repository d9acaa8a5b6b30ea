//! Inventory ledger.
//!
//! Stock and reservations are tracked separately: a reservation removes units
//! from sale without deducting them, the physical deduction happens on
//! delivery, and cancellation hands reserved units back to the pool.
//! Invariant: `reserved <= stock` after every committed transaction.

use tracing::{info, warn};

use super::{Engine, EngineError, InventoryRecord, Missing, finish, log_result, require_admin};
use crate::Amount;
use crate::gateway::PaymentGateway;
use crate::model::{Identity, NewVariant, Quantity, Variant, VariantId};
use crate::store::{Adjustment, Store, StoreTx};

/// Hold `quantity` units of `variant`, or fail with `InsufficientStock`.
///
/// The availability check and the increment are one conditional store update,
/// so concurrent callers can never reserve past the available quantity.
pub async fn reserve(
    tx: &mut dyn StoreTx,
    variant: VariantId,
    quantity: Quantity,
) -> Result<(), EngineError> {
    if tx.reserve_inventory(variant, quantity).await? {
        return Ok(());
    }
    let record = tx.inventory(variant).await?.ok_or(Missing::Variant(variant))?;
    let sku = tx
        .variant(variant)
        .await?
        .map_or_else(|| variant.to_string(), |v| v.sku);
    Err(EngineError::InsufficientStock {
        variant,
        sku,
        available: record.available(),
        requested: quantity,
    })
}

/// Return reserved units to the pool. Releasing more than is reserved is
/// clamped at zero and logged.
pub async fn release(
    tx: &mut dyn StoreTx,
    variant: VariantId,
    quantity: Quantity,
) -> Result<InventoryRecord, EngineError> {
    let adjusted = tx
        .release_inventory(variant, quantity)
        .await?
        .ok_or(Missing::Variant(variant))?;
    log_clamp("release", variant, quantity, &adjusted);
    Ok(adjusted.record)
}

/// Deduct delivered units from stock together with their reservation.
pub async fn fulfill(
    tx: &mut dyn StoreTx,
    variant: VariantId,
    quantity: Quantity,
) -> Result<InventoryRecord, EngineError> {
    let adjusted = tx
        .fulfill_inventory(variant, quantity)
        .await?
        .ok_or(Missing::Variant(variant))?;
    log_clamp("fulfill", variant, quantity, &adjusted);
    Ok(adjusted.record)
}

/// Units currently for sale.
pub async fn available(tx: &mut dyn StoreTx, variant: VariantId) -> Result<Quantity, EngineError> {
    let record = tx.inventory(variant).await?.ok_or(Missing::Variant(variant))?;
    Ok(record.available())
}

fn log_clamp(op: &str, variant: VariantId, quantity: Quantity, adjusted: &Adjustment) {
    if adjusted.clamped {
        warn!(
            variant,
            quantity,
            stock = adjusted.record.stock,
            reserved = adjusted.record.reserved,
            "{op} exceeded counters and was clamped at zero"
        );
    }
}

/// Public API: catalog seeding and stock administration
impl<S: Store, G: PaymentGateway> Engine<S, G> {
    /// Register a variant with its catalog prices and initial stock. Admin only.
    pub async fn register_variant(
        &self,
        actor: &Identity,
        input: NewVariant,
    ) -> Result<InventoryRecord, EngineError> {
        let result = self.register_variant_inner(actor, input).await;
        log_result("register variant", actor, &result);
        result
    }

    /// Replace the physical stock count of a variant. Admin only.
    ///
    /// Refused when the new count is below the units already reserved.
    pub async fn set_stock(
        &self,
        actor: &Identity,
        variant: VariantId,
        stock: Quantity,
    ) -> Result<InventoryRecord, EngineError> {
        require_admin(actor)?;
        let mut tx = self.store.begin().await?;
        let result = set_stock_in(tx.as_mut(), variant, stock).await;
        let result = finish(tx, result).await;
        match &result {
            Ok(record) => info!(
                actor = %actor.subject,
                variant,
                stock = record.stock,
                reserved = record.reserved,
                "set stock applied"
            ),
            Err(e) => info!(actor = %actor.subject, variant, stock, reason = %e, "set stock rejected"),
        }
        result
    }

    pub async fn inventory(&self, variant: VariantId) -> Result<InventoryRecord, EngineError> {
        self.read(|tx| Box::pin(async move { Ok(tx.inventory(variant).await?) }))
            .await?
            .ok_or_else(|| Missing::Variant(variant).into())
    }

    pub async fn available_quantity(&self, variant: VariantId) -> Result<Quantity, EngineError> {
        self.read(|tx| Box::pin(async move { available(tx, variant).await }))
            .await
    }

    async fn register_variant_inner(
        &self,
        actor: &Identity,
        input: NewVariant,
    ) -> Result<InventoryRecord, EngineError> {
        require_admin(actor)?;
        if input.sku.trim().is_empty() {
            return Err(EngineError::InvalidInput("sku must not be empty".to_string()));
        }
        let unit_price = input.base_price.checked_add(input.price_modifier)?;
        if unit_price.scaled() < 0 {
            return Err(EngineError::InvalidInput(
                "unit price must not be negative".to_string(),
            ));
        }
        if unit_price > Amount::MAX_UNIT_PRICE {
            return Err(EngineError::InvalidInput(format!(
                "unit price {unit_price} exceeds {}",
                Amount::MAX_UNIT_PRICE
            )));
        }
        let variant = Variant {
            id: input.id,
            sku: input.sku.trim().to_string(),
            base_price: input.base_price,
            price_modifier: input.price_modifier,
        };
        let mut tx = self.store.begin().await?;
        let result = tx
            .insert_variant(&variant, input.stock)
            .await
            .map(|()| InventoryRecord::new(variant.id, input.stock))
            .map_err(EngineError::from);
        finish(tx, result).await
    }
}

async fn set_stock_in(
    tx: &mut dyn StoreTx,
    variant: VariantId,
    stock: Quantity,
) -> Result<InventoryRecord, EngineError> {
    match tx.set_stock(variant, stock).await? {
        None => Err(Missing::Variant(variant).into()),
        Some(false) => {
            let reserved = tx
                .inventory(variant)
                .await?
                .map_or(0, |record| record.reserved);
            Err(EngineError::InvalidInput(format!(
                "stock {stock} is below the {reserved} units reserved for variant {variant}"
            )))
        }
        Some(true) => Ok(tx.inventory(variant).await?.ok_or(Missing::Variant(variant))?),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::engine::ErrorKind;

    #[tokio::test]
    async fn register_variant_requires_admin() {
        let engine = engine();
        let err = engine
            .register_variant(
                &alice(),
                NewVariant {
                    id: 1,
                    sku: "TEE-1".to_string(),
                    base_price: Amount::from_major(10),
                    price_modifier: Amount::ZERO,
                    stock: 1,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn register_variant_rejects_negative_price() {
        let engine = engine();
        let err = engine
            .register_variant(
                &admin(),
                NewVariant {
                    id: 1,
                    sku: "TEE-1".to_string(),
                    base_price: Amount::from_major(10),
                    price_modifier: Amount::from_major(-11),
                    stock: 1,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn register_variant_rejects_out_of_range_price() {
        let engine = engine();
        let variant = |id: VariantId, base_price: Amount, price_modifier: Amount| NewVariant {
            id,
            sku: format!("TEE-{id}"),
            base_price,
            price_modifier,
            stock: 1,
        };

        // a CSV price of 1e15 saturates to i64::MAX scaled units
        let err = engine
            .register_variant(&admin(), variant(1, Amount::from_float(1e15), Amount::ZERO))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = engine
            .register_variant(
                &admin(),
                variant(2, Amount::from_float(1e15), Amount::from_major(1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Overflow(_)));

        engine
            .register_variant(&admin(), variant(3, Amount::MAX_UNIT_PRICE, Amount::ZERO))
            .await
            .unwrap();
        assert!(engine.inventory(1).await.is_err());
        assert!(engine.inventory(2).await.is_err());
    }

    #[tokio::test]
    async fn reserve_release_fulfill_through_store() {
        let engine = engine_with(&[(1, 10)]).await;
        let mut tx = engine.store.begin().await.unwrap();

        reserve(tx.as_mut(), 1, 4).await.unwrap();
        assert_eq!(available(tx.as_mut(), 1).await.unwrap(), 6);

        let record = fulfill(tx.as_mut(), 1, 2).await.unwrap();
        assert_eq!((record.stock, record.reserved), (8, 2));

        let record = release(tx.as_mut(), 1, 2).await.unwrap();
        assert_eq!((record.stock, record.reserved), (8, 0));

        // duplicate release floors at zero
        let record = release(tx.as_mut(), 1, 2).await.unwrap();
        assert_eq!(record.reserved, 0);
    }

    #[tokio::test]
    async fn reserve_past_available_names_the_variant() {
        let engine = engine_with(&[(3, 2)]).await;
        let mut tx = engine.store.begin().await.unwrap();
        let err = reserve(tx.as_mut(), 3, 5).await.unwrap_err();
        match err {
            EngineError::InsufficientStock {
                variant,
                sku,
                available,
                requested,
            } => {
                assert_eq!((variant, available, requested), (3, 2, 5));
                assert_eq!(sku, "TEE-3");
            }
            other => panic!("expected insufficient stock, got {other}"),
        }
    }

    #[tokio::test]
    async fn reserve_unknown_variant_is_not_found() {
        let engine = engine();
        let mut tx = engine.store.begin().await.unwrap();
        let err = reserve(tx.as_mut(), 9, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn set_stock_keeps_reserved_within_stock() {
        let engine = engine_with(&[(1, 10)]).await;
        engine.add_to_cart(&alice(), 1, 4).await.unwrap();
        engine.checkout(&alice(), "1 Main St", None).await.unwrap();

        let err = engine.set_stock(&admin(), 1, 3).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let record = engine.set_stock(&admin(), 1, 6).await.unwrap();
        assert_eq!((record.stock, record.reserved), (6, 4));
        assert_eq!(engine.available_quantity(1).await.unwrap(), 2);

        let err = engine.set_stock(&alice(), 1, 100).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }
}
