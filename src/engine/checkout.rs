use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use super::{CheckoutError, Engine, EngineError, PromoRejection, finish, ledger, promo};
use crate::Amount;
use crate::gateway::PaymentGateway;
use crate::model::{Identity, Order, OrderItem, OrderStatus, PromoCode};
use crate::store::{Store, StoreTx};

/// Public API: checkout
impl<S: Store, G: PaymentGateway> Engine<S, G> {
    /// Turn the caller's cart into a pending order.
    ///
    /// Reservations, promo redemption, order creation and the cart reset share
    /// one transaction: on any error nothing is kept, including reservations
    /// made for earlier lines and the consumed promo use.
    pub async fn checkout(
        &self,
        actor: &Identity,
        shipping_address: &str,
        promo_code: Option<&str>,
    ) -> Result<Order, EngineError> {
        let mut tx = self.store.begin().await?;
        let result =
            checkout_in(tx.as_mut(), actor, shipping_address, promo_code, Utc::now()).await;
        let result = finish(tx, result).await;
        match &result {
            Ok(order) => info!(
                actor = %actor.subject,
                order = %order.id,
                items = order.items.len(),
                subtotal = %order.subtotal,
                discount = %order.discount_amount,
                total = %order.total_amount,
                "checkout applied"
            ),
            Err(e) => info!(actor = %actor.subject, reason = %e, "checkout rejected"),
        }
        result
    }
}

async fn checkout_in(
    tx: &mut dyn StoreTx,
    actor: &Identity,
    shipping_address: &str,
    promo_code: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Order, EngineError> {
    if shipping_address.trim().is_empty() {
        return Err(EngineError::InvalidInput(
            "shipping address must not be empty".to_string(),
        ));
    }

    let lines = tx.lock_cart_lines(&actor.subject).await?;
    if lines.is_empty() {
        return Err(CheckoutError::EmptyCart.into());
    }

    for line in &lines {
        ledger::reserve(tx, line.variant, line.quantity).await?;
    }

    let items = lines
        .iter()
        .map(OrderItem::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    let subtotal = Amount::checked_sum(items.iter().map(|item| item.subtotal))?;

    let (discount_amount, promo_code) = match promo_code {
        None => (Amount::ZERO, None),
        Some(raw) => {
            let code = PromoCode::normalize(raw);
            let validation = promo::validate_code(tx, &code, subtotal, now).await?;
            match validation.reason {
                Some(PromoRejection::UsageLimitReached) => {
                    return Err(CheckoutError::PromoLimitReached(code).into());
                }
                Some(reason) => {
                    return Err(CheckoutError::InvalidPromoCode(reason.to_string()).into());
                }
                None => {}
            }
            if !promo::redeem(tx, &code).await? {
                return Err(CheckoutError::PromoLimitReached(code).into());
            }
            (validation.discount_amount, Some(code))
        }
    };

    let order = Order {
        id: Uuid::new_v4(),
        owner: actor.subject.clone(),
        items,
        subtotal,
        discount_amount,
        promo_code,
        total_amount: subtotal.saturating_sub(discount_amount),
        status: OrderStatus::Pending,
        shipping_address: shipping_address.trim().to_string(),
        created_at: now,
        updated_at: now,
    };
    tx.insert_order(&order).await?;
    tx.clear_cart(&actor.subject).await?;
    Ok(order)
}
