//! Payment initiation and confirmation.
//!
//! Initiation opens a hosted order at the gateway for the server-side order
//! total and records a pending payment linked to it. Confirmation checks the
//! callback signature, settles the payment and confirms the order.

use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tracing::{info, warn};

use super::{Engine, EngineError, Missing, PaymentError, authorize_owner, finish, lifecycle};
use crate::gateway::{GatewayOrder, GatewayOrderRequest, PaymentGateway};
use crate::model::{Identity, Order, OrderId, OrderStatus, Payment, PaymentStatus};
use crate::store::{Store, StoreTx};

type HmacSha256 = Hmac<Sha256>;

/// Method recorded on payments opened through the gateway.
pub const PAYMENT_METHOD: &str = "razorpay";

/// Signs and checks gateway callbacks with the server-held secret.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: SecretString,
}

impl SignatureVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    fn mac(&self, gateway_order_id: &str, gateway_payment_id: &str) -> Option<HmacSha256> {
        let key = self.secret.expose_secret();
        if key.is_empty() {
            return None;
        }
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).ok()?;
        mac.update(gateway_order_id.as_bytes());
        mac.update(b"|");
        mac.update(gateway_payment_id.as_bytes());
        Some(mac)
    }

    /// Hex HMAC-SHA256 over `order_id|payment_id`. `None` without a secret.
    pub fn sign(&self, gateway_order_id: &str, gateway_payment_id: &str) -> Option<String> {
        let mac = self.mac(gateway_order_id, gateway_payment_id)?;
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of a hex signature. Never succeeds without a secret.
    pub fn verify(&self, gateway_order_id: &str, gateway_payment_id: &str, signature: &str) -> bool {
        let Some(mac) = self.mac(gateway_order_id, gateway_payment_id) else {
            return false;
        };
        let Ok(signature) = hex::decode(signature.trim()) else {
            return false;
        };
        mac.verify_slice(&signature).is_ok()
    }
}

/// Triple handed back by the gateway after the customer paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCallback {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

enum Verification {
    Settled(Payment),
    Rejected,
}

fn ensure_pending(order: &Order) -> Result<(), PaymentError> {
    if order.status == OrderStatus::Pending {
        Ok(())
    } else {
        Err(PaymentError::OrderNotPending(order.id, order.status))
    }
}

fn ensure_owner(actor: &Identity, order: &Order) -> Result<(), EngineError> {
    if order.owner == actor.subject {
        Ok(())
    } else {
        Err(EngineError::Unauthorized("order belongs to another customer"))
    }
}

async fn payable_order(
    tx: &mut dyn StoreTx,
    actor: &Identity,
    id: OrderId,
) -> Result<Order, EngineError> {
    let order = tx.order(id).await?.ok_or(Missing::Order(id))?;
    ensure_owner(actor, &order)?;
    ensure_pending(&order)?;
    Ok(order)
}

async fn record_pending(
    tx: &mut dyn StoreTx,
    actor: &Identity,
    id: OrderId,
    gateway_order: &GatewayOrder,
) -> Result<Payment, EngineError> {
    let order = payable_order(tx, actor, id).await?;
    let now = Utc::now();
    let created_at = tx
        .payment_for_order(id)
        .await?
        .map_or(now, |previous| previous.created_at);
    let payment = Payment {
        order_id: id,
        amount: order.total_amount,
        status: PaymentStatus::Pending,
        method: PAYMENT_METHOD.to_string(),
        gateway_order_id: gateway_order.id.clone(),
        transaction_id: None,
        signature: None,
        created_at,
        updated_at: now,
    };
    tx.upsert_payment(&payment).await?;
    Ok(payment)
}

async fn verify_in(
    tx: &mut dyn StoreTx,
    signer: &SignatureVerifier,
    actor: &Identity,
    callback: &PaymentCallback,
) -> Result<Verification, EngineError> {
    let mut payment = tx
        .payment_by_gateway_order(&callback.gateway_order_id)
        .await?
        .ok_or_else(|| Missing::Payment(callback.gateway_order_id.clone()))?;
    let order = tx
        .order(payment.order_id)
        .await?
        .ok_or(Missing::Order(payment.order_id))?;
    ensure_owner(actor, &order)?;

    let now = Utc::now();
    if !signer.verify(
        &callback.gateway_order_id,
        &callback.gateway_payment_id,
        &callback.signature,
    ) {
        // a settled payment is never downgraded by a forged callback
        if payment.status != PaymentStatus::Success {
            payment.status = PaymentStatus::Failed;
            payment.updated_at = now;
            tx.upsert_payment(&payment).await?;
        }
        return Ok(Verification::Rejected);
    }

    ensure_pending(&order)?;
    payment.status = PaymentStatus::Success;
    payment.transaction_id = Some(callback.gateway_payment_id.clone());
    payment.signature = Some(callback.signature.trim().to_string());
    payment.updated_at = now;
    tx.upsert_payment(&payment).await?;
    lifecycle::transition_in(tx, &order, OrderStatus::Confirmed, now).await?;
    Ok(Verification::Settled(payment))
}

/// Public API: payments
impl<S: Store, G: PaymentGateway> Engine<S, G> {
    /// Open a gateway order for a pending order of the caller and record a pending payment.
    ///
    /// Calling again for the same order replaces the previous pending or failed payment.
    pub async fn initiate_payment(
        &self,
        actor: &Identity,
        id: OrderId,
    ) -> Result<GatewayOrder, EngineError> {
        let result = self.initiate_payment_inner(actor, id).await;
        match &result {
            Ok(gateway_order) => info!(
                actor = %actor.subject,
                order = %id,
                gateway_order = %gateway_order.id,
                amount_minor = gateway_order.amount_minor,
                "initiate payment applied"
            ),
            Err(e) => info!(actor = %actor.subject, order = %id, reason = %e, "initiate payment rejected"),
        }
        result
    }

    /// Check a gateway callback. On success the payment is settled and the order confirmed;
    /// on a bad signature the payment is marked failed and the call errors.
    pub async fn verify_payment(
        &self,
        actor: &Identity,
        callback: &PaymentCallback,
    ) -> Result<Payment, EngineError> {
        let mut tx = self.store.begin().await?;
        let result = verify_in(tx.as_mut(), &self.signer, actor, callback).await;
        let result = match finish(tx, result).await {
            Ok(Verification::Settled(payment)) => Ok(payment),
            Ok(Verification::Rejected) => Err(PaymentError::VerificationFailed.into()),
            Err(e) => Err(e),
        };
        match &result {
            Ok(payment) => info!(
                actor = %actor.subject,
                order = %payment.order_id,
                gateway_order = %callback.gateway_order_id,
                "verify payment applied"
            ),
            Err(e) => warn!(
                actor = %actor.subject,
                gateway_order = %callback.gateway_order_id,
                reason = %e,
                "verify payment rejected"
            ),
        }
        result
    }

    /// Payment of an order, visible to its owner and to admins.
    pub async fn payment(&self, actor: &Identity, id: OrderId) -> Result<Payment, EngineError> {
        let mut tx = self.store.begin().await?;
        let result = payment_in(tx.as_mut(), actor, id).await;
        finish(tx, result).await
    }

    async fn initiate_payment_inner(
        &self,
        actor: &Identity,
        id: OrderId,
    ) -> Result<GatewayOrder, EngineError> {
        let mut tx = self.store.begin().await?;
        let result = payable_order(tx.as_mut(), actor, id).await;
        let order = finish(tx, result).await?;

        // no transaction is held across the gateway round trip
        let request = GatewayOrderRequest {
            amount_minor: order.total_amount.to_minor_units(),
            currency: self.currency.clone(),
            receipt: format!("order_{}_{}", order.id.simple(), Utc::now().timestamp()),
        };
        let gateway_order = self
            .gateway
            .create_order(&request)
            .await
            .and_then(|created| created.validate(&request))
            .map_err(PaymentError::from)?;

        let mut tx = self.store.begin().await?;
        let result = record_pending(tx.as_mut(), actor, id, &gateway_order).await;
        finish(tx, result).await?;
        Ok(gateway_order)
    }
}

async fn payment_in(
    tx: &mut dyn StoreTx,
    actor: &Identity,
    id: OrderId,
) -> Result<Payment, EngineError> {
    let order = tx.order(id).await?.ok_or(Missing::Order(id))?;
    authorize_owner(actor, &order)?;
    Ok(tx
        .payment_for_order(id)
        .await?
        .ok_or_else(|| Missing::Payment(id.to_string()))?)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::Amount;
    use crate::engine::ErrorKind;

    fn signer() -> SignatureVerifier {
        SignatureVerifier::new(SecretString::from("s3cr3t"))
    }

    async fn placed(engine: &TestEngine) -> Order {
        engine.add_to_cart(&alice(), 1, 2).await.unwrap();
        engine.checkout(&alice(), "1 Main St", None).await.unwrap()
    }

    fn callback(engine: &TestEngine, gateway_order_id: &str) -> PaymentCallback {
        let signature = engine.signer().sign(gateway_order_id, "pay_123").unwrap();
        PaymentCallback {
            gateway_order_id: gateway_order_id.to_string(),
            gateway_payment_id: "pay_123".to_string(),
            signature,
        }
    }

    #[test]
    fn signature_is_hex_hmac_over_joined_ids() {
        let signature = signer().sign("order_1", "pay_1").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signer().verify("order_1", "pay_1", &signature));
        assert!(signer().verify("order_1", "pay_1", &signature.to_uppercase()));
        assert!(!signer().verify("order_1", "pay_2", &signature));
        assert!(!signer().verify("order_1", "pay_1", "not hex"));

        let other = SignatureVerifier::new(SecretString::from("other"));
        assert!(!other.verify("order_1", "pay_1", &signature));
    }

    #[test]
    fn empty_secret_never_verifies() {
        let signer = SignatureVerifier::new(SecretString::from(""));
        assert!(signer.sign("order_1", "pay_1").is_none());
        assert!(!signer.verify("order_1", "pay_1", ""));
    }

    #[tokio::test]
    async fn initiate_records_pending_payment_for_order_total() {
        let engine = engine_with(&[(1, 5)]).await;
        let order = placed(&engine).await;

        let gateway_order = engine.initiate_payment(&alice(), order.id).await.unwrap();
        assert_eq!(gateway_order.amount_minor, 20_200);
        assert_eq!(gateway_order.currency, "INR");
        let receipt = gateway_order.receipt.clone().unwrap();
        assert!(receipt.starts_with(&format!("order_{}_", order.id.simple())));

        let payment = engine.payment(&alice(), order.id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.amount, Amount::from_major(202));
        assert_eq!(payment.method, "razorpay");
        assert_eq!(payment.gateway_order_id, gateway_order.id);
    }

    #[tokio::test]
    async fn initiate_requires_owner_and_pending_order() {
        let engine = engine_with(&[(1, 5)]).await;
        let order = placed(&engine).await;

        let err = engine.initiate_payment(&bob(), order.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        engine.cancel_order(&alice(), order.id).await.unwrap();
        let err = engine.initiate_payment(&alice(), order.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OrderNotPending);
    }

    #[tokio::test]
    async fn verified_callback_confirms_order() {
        let engine = engine_with(&[(1, 5)]).await;
        let order = placed(&engine).await;
        let gateway_order = engine.initiate_payment(&alice(), order.id).await.unwrap();

        let payment = engine
            .verify_payment(&alice(), &callback(&engine, &gateway_order.id))
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payment.transaction_id.as_deref(), Some("pay_123"));

        let order = engine.order(&alice(), order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        // reservation is still held until delivery
        assert_eq!(engine.inventory(1).await.unwrap().reserved, 2);

        let err = engine
            .verify_payment(&alice(), &callback(&engine, &gateway_order.id))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OrderNotPending);
    }

    #[tokio::test]
    async fn bad_signature_marks_payment_failed_and_allows_retry() {
        let engine = engine_with(&[(1, 5)]).await;
        let order = placed(&engine).await;
        let gateway_order = engine.initiate_payment(&alice(), order.id).await.unwrap();

        let mut forged = callback(&engine, &gateway_order.id);
        forged.gateway_payment_id = "pay_999".to_string();
        let err = engine.verify_payment(&alice(), &forged).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PaymentVerificationFailed);

        let payment = engine.payment(&alice(), order.id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        let order_now = engine.order(&alice(), order.id).await.unwrap();
        assert_eq!(order_now.status, OrderStatus::Pending);

        let payment = engine
            .verify_payment(&alice(), &callback(&engine, &gateway_order.id))
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Success);
    }

    #[tokio::test]
    async fn verify_requires_owner_and_known_gateway_order() {
        let engine = engine_with(&[(1, 5)]).await;
        let order = placed(&engine).await;
        let gateway_order = engine.initiate_payment(&alice(), order.id).await.unwrap();

        let err = engine
            .verify_payment(&bob(), &callback(&engine, &gateway_order.id))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let err = engine
            .verify_payment(&alice(), &callback(&engine, "order_unknown"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
