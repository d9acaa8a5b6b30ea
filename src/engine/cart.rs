//! Cart operations. Every mutation answers with the same priced view the read path uses.

use super::{Engine, EngineError, Missing, finish, ledger, log_result};
use crate::gateway::PaymentGateway;
use crate::model::{CartView, Identity, Quantity, VariantId};
use crate::store::{Store, StoreTx};

/// Priced view of `owner`'s cart.
async fn view(tx: &mut dyn StoreTx, owner: &str) -> Result<CartView, EngineError> {
    let lines = tx.cart_lines(owner).await?;
    Ok(CartView::new(owner, lines)?)
}

/// Availability check for a cart line. Advisory only: stock is reserved at checkout.
async fn ensure_available(
    tx: &mut dyn StoreTx,
    variant: VariantId,
    quantity: Quantity,
) -> Result<(), EngineError> {
    let sku = tx.variant(variant).await?.ok_or(Missing::Variant(variant))?.sku;
    let available = ledger::available(tx, variant).await?;
    if quantity > available {
        return Err(EngineError::InsufficientStock {
            variant,
            sku,
            available,
            requested: quantity,
        });
    }
    Ok(())
}

fn ensure_positive(quantity: Quantity) -> Result<(), EngineError> {
    if quantity == 0 {
        return Err(EngineError::InvalidInput(
            "quantity must be positive".to_string(),
        ));
    }
    Ok(())
}

async fn add_in(
    tx: &mut dyn StoreTx,
    owner: &str,
    variant: VariantId,
    quantity: Quantity,
) -> Result<CartView, EngineError> {
    let current = tx
        .cart_lines(owner)
        .await?
        .into_iter()
        .find(|line| line.variant == variant)
        .map_or(0, |line| line.quantity);
    let merged = current
        .checked_add(quantity)
        .ok_or_else(|| EngineError::InvalidInput("quantity overflow".to_string()))?;
    ensure_available(tx, variant, merged).await?;
    tx.upsert_cart_item(owner, variant, merged).await?;
    view(tx, owner).await
}

async fn update_in(
    tx: &mut dyn StoreTx,
    owner: &str,
    variant: VariantId,
    quantity: Quantity,
) -> Result<CartView, EngineError> {
    let exists = tx
        .cart_lines(owner)
        .await?
        .iter()
        .any(|line| line.variant == variant);
    if !exists {
        return Err(Missing::CartLine(variant).into());
    }
    ensure_available(tx, variant, quantity).await?;
    tx.upsert_cart_item(owner, variant, quantity).await?;
    view(tx, owner).await
}

async fn remove_in(
    tx: &mut dyn StoreTx,
    owner: &str,
    variant: VariantId,
) -> Result<CartView, EngineError> {
    if !tx.remove_cart_item(owner, variant).await? {
        return Err(Missing::CartLine(variant).into());
    }
    view(tx, owner).await
}

async fn clear_in(tx: &mut dyn StoreTx, owner: &str) -> Result<CartView, EngineError> {
    tx.clear_cart(owner).await?;
    view(tx, owner).await
}

/// Public API: cart reads and mutations
impl<S: Store, G: PaymentGateway> Engine<S, G> {
    pub async fn cart(&self, actor: &Identity) -> Result<CartView, EngineError> {
        let owner = actor.subject.clone();
        self.read(|tx| Box::pin(async move { view(tx, &owner).await }))
            .await
    }

    /// Add `quantity` units, merging into an existing line for the same variant.
    pub async fn add_to_cart(
        &self,
        actor: &Identity,
        variant: VariantId,
        quantity: Quantity,
    ) -> Result<CartView, EngineError> {
        ensure_positive(quantity)?;
        let mut tx = self.store.begin().await?;
        let result = add_in(tx.as_mut(), &actor.subject, variant, quantity).await;
        let result = finish(tx, result).await;
        log_result("add to cart", actor, &result);
        result
    }

    /// Replace the quantity of an existing line.
    pub async fn update_cart_item(
        &self,
        actor: &Identity,
        variant: VariantId,
        quantity: Quantity,
    ) -> Result<CartView, EngineError> {
        ensure_positive(quantity)?;
        let mut tx = self.store.begin().await?;
        let result = update_in(tx.as_mut(), &actor.subject, variant, quantity).await;
        let result = finish(tx, result).await;
        log_result("update cart item", actor, &result);
        result
    }

    pub async fn remove_from_cart(
        &self,
        actor: &Identity,
        variant: VariantId,
    ) -> Result<CartView, EngineError> {
        let mut tx = self.store.begin().await?;
        let result = remove_in(tx.as_mut(), &actor.subject, variant).await;
        let result = finish(tx, result).await;
        log_result("remove from cart", actor, &result);
        result
    }

    pub async fn clear_cart(&self, actor: &Identity) -> Result<CartView, EngineError> {
        let mut tx = self.store.begin().await?;
        let result = clear_in(tx.as_mut(), &actor.subject).await;
        let result = finish(tx, result).await;
        log_result("clear cart", actor, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::Amount;
    use crate::engine::{EngineError, ErrorKind};
    use crate::model::NewVariant;

    #[tokio::test]
    async fn add_merges_lines_and_prices_from_catalog() {
        let engine = engine_with(&[(1, 10), (2, 10)]).await;
        engine.add_to_cart(&alice(), 2, 1).await.unwrap();
        engine.add_to_cart(&alice(), 1, 2).await.unwrap();
        let cart = engine.add_to_cart(&alice(), 2, 2).await.unwrap();

        let lines: Vec<_> = cart.items.iter().map(|l| (l.variant, l.quantity)).collect();
        assert_eq!(lines, vec![(2, 3), (1, 2)]);
        // 3 * 102 + 2 * 101
        assert_eq!(cart.subtotal, Amount::from_major(508));
        assert_eq!(engine.cart(&alice()).await.unwrap(), cart);
    }

    #[tokio::test]
    async fn add_rejects_more_than_available() {
        let engine = engine_with(&[(1, 3)]).await;
        engine.add_to_cart(&alice(), 1, 2).await.unwrap();
        let err = engine.add_to_cart(&alice(), 1, 2).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(engine.cart(&alice()).await.unwrap().items[0].quantity, 2);
    }

    #[tokio::test]
    async fn add_rejects_zero_and_unknown_variant() {
        let engine = engine_with(&[(1, 3)]).await;
        let err = engine.add_to_cart(&alice(), 1, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = engine.add_to_cart(&alice(), 7, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn update_requires_existing_line() {
        let engine = engine_with(&[(1, 5)]).await;
        let err = engine.update_cart_item(&alice(), 1, 2).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        engine.add_to_cart(&alice(), 1, 1).await.unwrap();
        let cart = engine.update_cart_item(&alice(), 1, 4).await.unwrap();
        assert_eq!(cart.items[0].quantity, 4);

        let err = engine.update_cart_item(&alice(), 1, 6).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
    }

    #[tokio::test]
    async fn oversized_line_total_is_rejected_not_wrapped() {
        let engine = engine();
        engine
            .register_variant(
                &admin(),
                NewVariant {
                    id: 1,
                    sku: "GOLD".to_string(),
                    base_price: Amount::MAX_UNIT_PRICE,
                    price_modifier: Amount::ZERO,
                    stock: u32::MAX,
                },
            )
            .await
            .unwrap();

        let err = engine.add_to_cart(&alice(), 1, 1_000_000).await.unwrap_err();
        assert!(matches!(err, EngineError::Overflow(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(engine.cart(&alice()).await.unwrap().items.is_empty());

        let cart = engine.add_to_cart(&alice(), 1, 100).await.unwrap();
        assert_eq!(cart.subtotal, Amount::from_major(100_000_000_000));
    }

    #[tokio::test]
    async fn carts_are_per_identity() {
        let engine = engine_with(&[(1, 5), (2, 5)]).await;
        engine.add_to_cart(&alice(), 1, 1).await.unwrap();
        engine.add_to_cart(&bob(), 2, 1).await.unwrap();

        let cart = engine.remove_from_cart(&alice(), 1).await.unwrap();
        assert!(cart.items.is_empty());
        assert_eq!(cart.subtotal, Amount::ZERO);
        let err = engine.remove_from_cart(&alice(), 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert_eq!(engine.cart(&bob()).await.unwrap().items.len(), 1);
        assert!(engine.clear_cart(&bob()).await.unwrap().items.is_empty());
    }
}
