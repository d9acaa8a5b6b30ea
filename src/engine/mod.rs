//! Order fulfillment engine.
//!
//! The engine turns carts into orders while keeping per-variant stock and
//! reservation counters consistent. It is split into:
//! - [`ledger`]: stock/reservation arithmetic on top of the store's atomic updates
//! - [`promo`]: discount validation and limit-bounded redemption
//! - [`lifecycle`]: order status state machine and its ledger side effects
//! - cart: per-identity carts priced from the catalog
//! - checkout: cart to order conversion as one transaction
//! - [`payment`]: gateway order creation and signature verification
//!
//! Every operation runs in exactly one store transaction which is committed
//! on success and rolled back on any error.

use std::fmt::Display;

use tracing::{info, warn};

use crate::config::PaymentConfig;
use crate::gateway::PaymentGateway;
use crate::model::{Identity, Order, OrderId, OrderStatus, Variant};
use crate::store::{OrderFilter, Store, StoreTx};

mod cart;
mod checkout;
pub mod ledger;
pub mod lifecycle;
pub mod payment;
pub mod promo;

mod state;
pub use state::InventoryRecord;

mod error;
pub use error::{CheckoutError, EngineError, ErrorKind, Missing, PaymentError, TransitionError};

pub use payment::{PaymentCallback, SignatureVerifier};
pub use promo::{PromoRejection, PromoValidation};

/// The order fulfillment engine.
///
/// Holds no mutable state of its own; the store is the sole synchronization point,
/// so one engine can be shared between any number of concurrent callers.
pub struct Engine<S, G> {
    store: S,
    gateway: G,
    signer: SignatureVerifier,
    currency: String,
}

/// Public API: construction and order queries
impl<S: Store, G: PaymentGateway> Engine<S, G> {
    pub fn new(store: S, gateway: G, payment: &PaymentConfig) -> Self {
        Self {
            store,
            gateway,
            signer: SignatureVerifier::new(payment.key_secret.clone()),
            currency: payment.currency.clone(),
        }
    }

    pub fn signer(&self) -> &SignatureVerifier {
        &self.signer
    }

    /// Orders placed by the caller, newest first.
    pub async fn my_orders(&self, actor: &Identity) -> Result<Vec<Order>, EngineError> {
        let filter = OrderFilter {
            owner: Some(actor.subject.clone()),
            status: None,
        };
        self.read(|tx| Box::pin(async move { Ok(tx.orders(&filter).await?) }))
            .await
    }

    /// One order, visible to its owner and to admins.
    pub async fn order(&self, actor: &Identity, id: OrderId) -> Result<Order, EngineError> {
        let order = self
            .read(|tx| Box::pin(async move { Ok(tx.order(id).await?) }))
            .await?
            .ok_or(Missing::Order(id))?;
        authorize_owner(actor, &order)?;
        Ok(order)
    }

    /// Every order, optionally filtered by a status string. Admin only.
    pub async fn all_orders(
        &self,
        actor: &Identity,
        status: Option<&str>,
    ) -> Result<Vec<Order>, EngineError> {
        require_admin(actor)?;
        let status = status
            .map(str::parse::<OrderStatus>)
            .transpose()
            .map_err(TransitionError::from)?;
        let filter = OrderFilter {
            owner: None,
            status,
        };
        self.read(|tx| Box::pin(async move { Ok(tx.orders(&filter).await?) }))
            .await
    }

    /// Every variant with its stock counters, ordered by variant id.
    pub async fn inventory_report(&self) -> Result<Vec<(Variant, InventoryRecord)>, EngineError> {
        self.read(|tx| Box::pin(async move { Ok(tx.inventories().await?) }))
            .await
    }
}

/// Private API
impl<S: Store, G: PaymentGateway> Engine<S, G> {
    /// Run a read-only query in its own transaction.
    async fn read<T, F>(&self, query: F) -> Result<T, EngineError>
    where
        F: for<'t> FnOnce(
            &'t mut dyn StoreTx,
        ) -> std::pin::Pin<
            Box<dyn Future<Output = Result<T, EngineError>> + Send + 't>,
        >,
    {
        let mut tx = self.store.begin().await?;
        let result = query(tx.as_mut()).await;
        finish(tx, result).await
    }
}

/// Commit on success, roll back on error. A failed rollback never masks the original error.
async fn finish<T>(
    tx: Box<dyn StoreTx>,
    result: Result<T, EngineError>,
) -> Result<T, EngineError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(reason = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}

fn require_admin(actor: &Identity) -> Result<(), EngineError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(EngineError::Unauthorized("admin access required"))
    }
}

fn authorize_owner(actor: &Identity, order: &Order) -> Result<(), EngineError> {
    if order.owner == actor.subject || actor.is_admin() {
        Ok(())
    } else {
        Err(EngineError::Unauthorized("order belongs to another customer"))
    }
}

/// Small helper to log operation results
fn log_result<T, E: Display>(op: &str, actor: &Identity, result: &Result<T, E>) {
    match result {
        Ok(_) => info!(actor = %actor.subject, "{op} applied"),
        Err(e) => info!(actor = %actor.subject, reason = %e, "{op} rejected"),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::Amount;
    use crate::config::Config;
    use crate::gateway::OfflineGateway;
    use crate::model::NewVariant;
    use crate::store::MemoryStore;

    pub type TestEngine = Engine<MemoryStore, OfflineGateway>;

    pub fn admin() -> Identity {
        Identity::admin("admin")
    }

    pub fn alice() -> Identity {
        Identity::customer("alice")
    }

    pub fn bob() -> Identity {
        Identity::customer("bob")
    }

    pub fn engine() -> TestEngine {
        Engine::new(MemoryStore::new(), OfflineGateway, &Config::offline().payment)
    }

    /// Engine with one variant per `(id, stock)` pair, each priced 100 + id.
    pub async fn engine_with(variants: &[(i64, u32)]) -> TestEngine {
        let engine = engine();
        for &(id, stock) in variants {
            engine
                .register_variant(
                    &admin(),
                    NewVariant {
                        id,
                        sku: format!("TEE-{id}"),
                        base_price: Amount::from_major(100),
                        price_modifier: Amount::from_major(id),
                        stock,
                    },
                )
                .await
                .unwrap();
        }
        engine
    }
}
