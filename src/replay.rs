//! Scripted replay of engine operations.
//!
//! A script is a stream of [`Command`]s applied one by one. Rejected commands
//! are logged by the engine and skipped, so one bad step never stops a replay.

use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use crate::Amount;
use crate::engine::{Engine, EngineError, PaymentCallback};
use crate::gateway::PaymentGateway;
use crate::model::{
    DiscountType, Identity, NewVariant, Order, OrderStatus, PromoCodeInput, Quantity, VariantId,
};
use crate::store::Store;

/// Subject that replays as an admin identity.
pub const ADMIN_ACTOR: &str = "admin";

/// Shipping address used for scripted checkouts.
const REPLAY_ADDRESS: &str = "replay";

/// One scripted step, performed by `actor`.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub actor: String,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Variant {
        id: VariantId,
        sku: String,
        price: Amount,
        stock: Quantity,
    },
    Stock {
        variant: VariantId,
        stock: Quantity,
    },
    Promo {
        code: String,
        discount_type: DiscountType,
        value: Amount,
        usage_limit: Option<u32>,
    },
    Add {
        variant: VariantId,
        quantity: Quantity,
    },
    Remove {
        variant: VariantId,
    },
    Checkout {
        promo: Option<String>,
    },
    /// Pay the actor's latest order; `forged` sends a callback with a bad signature.
    Pay {
        forged: bool,
    },
    /// Move the latest order of `owner` to `status`.
    Advance {
        owner: String,
        status: OrderStatus,
    },
    /// Cancel the actor's latest order.
    Cancel,
}

impl Command {
    pub fn identity(&self) -> Identity {
        if self.actor == ADMIN_ACTOR {
            Identity::admin(&self.actor)
        } else {
            Identity::customer(&self.actor)
        }
    }
}

pub struct Replayer<S, G> {
    engine: Engine<S, G>,
}

impl<S: Store, G: PaymentGateway> Replayer<S, G> {
    pub fn new(engine: Engine<S, G>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine<S, G> {
        &self.engine
    }

    /// Apply every command of `stream` in order.
    pub async fn run(&self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = stream.next().await {
            // rejections are already logged by the engine
            if let Err(e) = self.apply(&command).await {
                warn!(actor = %command.actor, reason = %e, "command skipped");
            }
        }
    }

    pub async fn apply(&self, command: &Command) -> Result<(), EngineError> {
        let actor = command.identity();
        let engine = &self.engine;
        match &command.action {
            Action::Variant {
                id,
                sku,
                price,
                stock,
            } => {
                let input = NewVariant {
                    id: *id,
                    sku: sku.clone(),
                    base_price: *price,
                    price_modifier: Amount::ZERO,
                    stock: *stock,
                };
                engine.register_variant(&actor, input).await?;
            }
            Action::Stock { variant, stock } => {
                engine.set_stock(&actor, *variant, *stock).await?;
            }
            Action::Promo {
                code,
                discount_type,
                value,
                usage_limit,
            } => {
                let input = PromoCodeInput {
                    code: code.clone(),
                    discount_type: *discount_type,
                    discount_value: *value,
                    valid_from: None,
                    valid_until: None,
                    is_active: true,
                    usage_limit: *usage_limit,
                };
                engine.create_promo(&actor, input).await?;
            }
            Action::Add { variant, quantity } => {
                engine.add_to_cart(&actor, *variant, *quantity).await?;
            }
            Action::Remove { variant } => {
                engine.remove_from_cart(&actor, *variant).await?;
            }
            Action::Checkout { promo } => {
                engine
                    .checkout(&actor, REPLAY_ADDRESS, promo.as_deref())
                    .await?;
            }
            Action::Pay { forged } => {
                let order = self.latest_order(&actor.subject).await?;
                let gateway_order = engine.initiate_payment(&actor, order.id).await?;
                let gateway_payment_id = format!("pay_{}", order.id.simple());
                let signature = if *forged {
                    String::new()
                } else {
                    engine
                        .signer()
                        .sign(&gateway_order.id, &gateway_payment_id)
                        .unwrap_or_default()
                };
                let callback = PaymentCallback {
                    gateway_order_id: gateway_order.id,
                    gateway_payment_id,
                    signature,
                };
                engine.verify_payment(&actor, &callback).await?;
            }
            Action::Advance { owner, status } => {
                let order = self.latest_order(owner).await?;
                engine
                    .update_order_status(&actor, order.id, status.as_str())
                    .await?;
            }
            Action::Cancel => {
                let order = self.latest_order(&actor.subject).await?;
                engine.cancel_order(&actor, order.id).await?;
            }
        }
        Ok(())
    }

    async fn latest_order(&self, owner: &str) -> Result<Order, EngineError> {
        self.engine
            .my_orders(&Identity::customer(owner))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::InvalidInput(format!("{owner} has no orders")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gateway::OfflineGateway;
    use crate::model::PaymentStatus;
    use crate::store::MemoryStore;

    fn replayer() -> Replayer<MemoryStore, OfflineGateway> {
        let config = Config::offline();
        Replayer::new(Engine::new(MemoryStore::new(), OfflineGateway, &config.payment))
    }

    fn command(actor: &str, action: Action) -> Command {
        Command {
            actor: actor.to_string(),
            action,
        }
    }

    fn seed() -> Vec<Command> {
        vec![
            command(
                ADMIN_ACTOR,
                Action::Variant {
                    id: 1,
                    sku: "TEE-M".to_string(),
                    price: Amount::from_major(25),
                    stock: 10,
                },
            ),
            command(
                "alice",
                Action::Add {
                    variant: 1,
                    quantity: 2,
                },
            ),
            command("alice", Action::Checkout { promo: None }),
        ]
    }

    #[tokio::test]
    async fn replays_full_lifecycle() {
        let replayer = replayer();
        let mut script = seed();
        script.push(command("alice", Action::Pay { forged: false }));
        for status in [OrderStatus::Shipped, OrderStatus::Delivered] {
            script.push(command(
                ADMIN_ACTOR,
                Action::Advance {
                    owner: "alice".to_string(),
                    status,
                },
            ));
        }
        replayer.run(tokio_stream::iter(script)).await;

        let record = replayer.engine().inventory(1).await.unwrap();
        assert_eq!((record.stock, record.reserved), (8, 0));
        let alice = Identity::customer("alice");
        let order = &replayer.engine().my_orders(&alice).await.unwrap()[0];
        assert_eq!(order.status, OrderStatus::Delivered);
        let payment = replayer.engine().payment(&alice, order.id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Success);
    }

    #[tokio::test]
    async fn forged_payment_leaves_order_pending() {
        let replayer = replayer();
        let mut script = seed();
        script.push(command("alice", Action::Pay { forged: true }));
        replayer.run(tokio_stream::iter(script)).await;

        let alice = Identity::customer("alice");
        let order = &replayer.engine().my_orders(&alice).await.unwrap()[0];
        assert_eq!(order.status, OrderStatus::Pending);
        let payment = replayer.engine().payment(&alice, order.id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn rejected_commands_do_not_stop_the_replay() {
        let replayer = replayer();
        let mut script = vec![
            command("alice", Action::Cancel),
            command(
                "mallory",
                Action::Stock {
                    variant: 1,
                    stock: 100,
                },
            ),
        ];
        script.extend(seed());
        script.push(command("alice", Action::Cancel));
        replayer.run(tokio_stream::iter(script)).await;

        let record = replayer.engine().inventory(1).await.unwrap();
        assert_eq!((record.stock, record.reserved), (10, 0));
    }
}
