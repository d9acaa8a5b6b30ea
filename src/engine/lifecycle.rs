//! Order status state machine.
//!
//! ```text
//! pending -> confirmed -> shipped -> delivered
//!    |           |
//!    +-----------+-> cancelled
//! ```
//!
//! `delivered` fulfills every item on the ledger and `cancelled` releases
//! them. Cancelling is refused once an order has shipped, both for the owner
//! and for admins. The status write is a compare-and-set against the status
//! that was read, so a transition and its ledger effect happen at most once
//! even when the same request races with itself.

use chrono::{DateTime, Utc};
use tracing::info;

use super::{Engine, EngineError, Missing, TransitionError, finish, ledger, require_admin};
use crate::gateway::PaymentGateway;
use crate::model::{Identity, Order, OrderId, OrderStatus};
use crate::store::{Store, StoreTx};

/// Inventory side effect of entering a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEffect {
    None,
    Release,
    Fulfill,
}

/// Ledger effect of `from -> to`, or `None` if the move is not allowed.
pub fn transition(from: OrderStatus, to: OrderStatus) -> Option<LedgerEffect> {
    use OrderStatus::*;
    match (from, to) {
        (Pending, Confirmed) | (Confirmed, Shipped) => Some(LedgerEffect::None),
        (Shipped, Delivered) => Some(LedgerEffect::Fulfill),
        (Pending | Confirmed, Cancelled) => Some(LedgerEffect::Release),
        _ => None,
    }
}

/// Move `order` to `to` and apply the ledger effect of the move.
pub(super) async fn transition_in(
    tx: &mut dyn StoreTx,
    order: &Order,
    to: OrderStatus,
    now: DateTime<Utc>,
) -> Result<Order, EngineError> {
    let invalid = || TransitionError::InvalidTransition {
        order: order.id,
        from: order.status,
        to,
    };
    let effect = transition(order.status, to).ok_or_else(invalid)?;
    if !tx.update_order_status(order.id, order.status, to, now).await? {
        return Err(invalid().into());
    }

    for item in &order.items {
        match effect {
            LedgerEffect::None => {}
            LedgerEffect::Release => {
                ledger::release(tx, item.variant, item.quantity).await?;
            }
            LedgerEffect::Fulfill => {
                ledger::fulfill(tx, item.variant, item.quantity).await?;
            }
        }
    }

    Ok(Order {
        status: to,
        updated_at: now,
        ..order.clone()
    })
}

async fn load(tx: &mut dyn StoreTx, id: OrderId) -> Result<Order, EngineError> {
    Ok(tx.order(id).await?.ok_or(Missing::Order(id))?)
}

async fn cancel_in(
    tx: &mut dyn StoreTx,
    actor: &Identity,
    id: OrderId,
) -> Result<Order, EngineError> {
    let order = load(tx, id).await?;
    if order.owner != actor.subject {
        return Err(EngineError::Unauthorized("order belongs to another customer"));
    }
    transition_in(tx, &order, OrderStatus::Cancelled, Utc::now()).await
}

async fn update_in(
    tx: &mut dyn StoreTx,
    id: OrderId,
    to: OrderStatus,
) -> Result<Order, EngineError> {
    let order = load(tx, id).await?;
    transition_in(tx, &order, to, Utc::now()).await
}

fn log_transition(op: &str, actor: &Identity, id: OrderId, result: &Result<Order, EngineError>) {
    match result {
        Ok(order) => info!(actor = %actor.subject, order = %id, status = %order.status, "{op} applied"),
        Err(e) => info!(actor = %actor.subject, order = %id, reason = %e, "{op} rejected"),
    }
}

/// Public API: status transitions
impl<S: Store, G: PaymentGateway> Engine<S, G> {
    /// Cancel one of the caller's own orders, releasing its reservations.
    pub async fn cancel_order(&self, actor: &Identity, id: OrderId) -> Result<Order, EngineError> {
        let mut tx = self.store.begin().await?;
        let result = cancel_in(tx.as_mut(), actor, id).await;
        let result = finish(tx, result).await;
        log_transition("cancel order", actor, id, &result);
        result
    }

    /// Move any order to `status`. Admin only.
    pub async fn update_order_status(
        &self,
        actor: &Identity,
        id: OrderId,
        status: &str,
    ) -> Result<Order, EngineError> {
        let result = self.update_order_status_inner(actor, id, status).await;
        log_transition("update order status", actor, id, &result);
        result
    }

    async fn update_order_status_inner(
        &self,
        actor: &Identity,
        id: OrderId,
        status: &str,
    ) -> Result<Order, EngineError> {
        require_admin(actor)?;
        let to = status
            .trim()
            .to_ascii_lowercase()
            .parse::<OrderStatus>()
            .map_err(TransitionError::from)?;
        let mut tx = self.store.begin().await?;
        let result = update_in(tx.as_mut(), id, to).await;
        finish(tx, result).await
    }
}
