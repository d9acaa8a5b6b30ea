//! Promo code validation and redemption.
//!
//! Validation is a pure query that may run any number of times, e.g. for a
//! live cart preview. Redemption is the only mutation and happens once, when
//! an order is finalized, as a conditional update bounded by the usage limit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::{Engine, EngineError, Missing, finish, log_result, require_admin};
use crate::Amount;
use crate::gateway::PaymentGateway;
use crate::model::{DiscountType, Identity, PromoCode, PromoCodeInput};
use crate::store::{Store, StoreTx};

/// Why a promo code did not validate, in check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum PromoRejection {
    #[error("code not found")]
    NotFound,
    #[error("code is inactive")]
    Inactive,
    #[error("code not yet valid")]
    NotYetValid,
    #[error("code has expired")]
    Expired,
    #[error("usage limit reached")]
    UsageLimitReached,
}

/// Outcome of validating a promo code against an order amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromoValidation {
    pub valid: bool,
    pub discount_amount: Amount,
    /// Set exactly when `valid` is false.
    pub reason: Option<PromoRejection>,
}

impl PromoValidation {
    fn rejected(reason: PromoRejection) -> Self {
        Self {
            valid: false,
            discount_amount: Amount::ZERO,
            reason: Some(reason),
        }
    }
}

/// Validate `promo` (already looked up by normalized code) for `order_amount` at `now`.
///
/// Checks run in order and stop at the first failure: existence, active flag,
/// start of the validity window, end of the window, usage limit. The discount
/// is capped at `order_amount`.
pub fn validate(
    promo: Option<&PromoCode>,
    order_amount: Amount,
    now: DateTime<Utc>,
) -> PromoValidation {
    let Some(promo) = promo else {
        return PromoValidation::rejected(PromoRejection::NotFound);
    };
    if !promo.is_active {
        return PromoValidation::rejected(PromoRejection::Inactive);
    }
    if promo.valid_from.is_some_and(|from| now < from) {
        return PromoValidation::rejected(PromoRejection::NotYetValid);
    }
    if promo.valid_until.is_some_and(|until| now > until) {
        return PromoValidation::rejected(PromoRejection::Expired);
    }
    if !promo.has_uses_left() {
        return PromoValidation::rejected(PromoRejection::UsageLimitReached);
    }

    let discount = match promo.discount_type {
        DiscountType::Percentage => order_amount.percent(promo.discount_value),
        DiscountType::Fixed => promo.discount_value,
    };

    PromoValidation {
        valid: true,
        discount_amount: discount.min(order_amount).max(Amount::ZERO),
        reason: None,
    }
}

/// Look up and validate a raw code inside a transaction.
pub async fn validate_code(
    tx: &mut dyn StoreTx,
    code: &str,
    order_amount: Amount,
    now: DateTime<Utc>,
) -> Result<PromoValidation, EngineError> {
    let promo = tx.promo(&PromoCode::normalize(code)).await?;
    Ok(validate(promo.as_ref(), order_amount, now))
}

/// Consume one use of `code`. Returns `false` when the limit was already reached.
pub async fn redeem(tx: &mut dyn StoreTx, code: &str) -> Result<bool, EngineError> {
    Ok(tx.redeem_promo(&PromoCode::normalize(code)).await?)
}

fn check_input(input: &PromoCodeInput) -> Result<(), EngineError> {
    let invalid = |msg: &str| Err(EngineError::InvalidInput(msg.to_string()));
    if PromoCode::normalize(&input.code).is_empty() {
        return invalid("promo code must not be empty");
    }
    if !input.discount_value.is_positive() {
        return invalid("discount value must be positive");
    }
    if input.discount_type == DiscountType::Percentage
        && input.discount_value > Amount::from_major(100)
    {
        return invalid("percentage discount cannot exceed 100");
    }
    if let (Some(from), Some(until)) = (input.valid_from, input.valid_until) {
        if from > until {
            return invalid("validity window ends before it starts");
        }
    }
    Ok(())
}

/// Public API: promo preview and administration
impl<S: Store, G: PaymentGateway> Engine<S, G> {
    /// Validate without side effects, for cart previews.
    pub async fn preview_promo(
        &self,
        code: &str,
        order_amount: Amount,
    ) -> Result<PromoValidation, EngineError> {
        let code = code.to_string();
        self.read(|tx| {
            Box::pin(async move { validate_code(tx, &code, order_amount, Utc::now()).await })
        })
        .await
    }

    pub async fn promo_codes(&self, actor: &Identity) -> Result<Vec<PromoCode>, EngineError> {
        require_admin(actor)?;
        self.read(|tx| Box::pin(async move { Ok(tx.promos().await?) }))
            .await
    }

    pub async fn create_promo(
        &self,
        actor: &Identity,
        input: PromoCodeInput,
    ) -> Result<PromoCode, EngineError> {
        let result = self.create_promo_inner(actor, input).await;
        log_result("create promo", actor, &result);
        result
    }

    /// Replace the settings of the promo stored under `code`. Usage count is kept.
    pub async fn update_promo(
        &self,
        actor: &Identity,
        code: &str,
        input: PromoCodeInput,
    ) -> Result<PromoCode, EngineError> {
        let result = self.update_promo_inner(actor, code, input).await;
        log_result("update promo", actor, &result);
        result
    }

    pub async fn delete_promo(&self, actor: &Identity, code: &str) -> Result<(), EngineError> {
        require_admin(actor)?;
        let code = PromoCode::normalize(code);
        let mut tx = self.store.begin().await?;
        let result = match tx.delete_promo(&code).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Missing::Promo(code).into()),
            Err(e) => Err(e.into()),
        };
        let result = finish(tx, result).await;
        log_result("delete promo", actor, &result);
        result
    }

    /// Flip the active flag.
    pub async fn toggle_promo(&self, actor: &Identity, code: &str) -> Result<PromoCode, EngineError> {
        require_admin(actor)?;
        let code = PromoCode::normalize(code);
        let mut tx = self.store.begin().await?;
        let result = toggle_in(tx.as_mut(), &code).await;
        let result = finish(tx, result).await;
        log_result("toggle promo", actor, &result);
        result
    }

    async fn create_promo_inner(
        &self,
        actor: &Identity,
        input: PromoCodeInput,
    ) -> Result<PromoCode, EngineError> {
        require_admin(actor)?;
        check_input(&input)?;
        let now = Utc::now();
        let promo = PromoCode {
            code: PromoCode::normalize(&input.code),
            discount_type: input.discount_type,
            discount_value: input.discount_value,
            valid_from: input.valid_from,
            valid_until: input.valid_until,
            is_active: input.is_active,
            usage_limit: input.usage_limit,
            usage_count: 0,
            created_at: now,
            updated_at: now,
        };
        let mut tx = self.store.begin().await?;
        let result = tx
            .insert_promo(&promo)
            .await
            .map(|()| promo)
            .map_err(EngineError::from);
        finish(tx, result).await
    }

    async fn update_promo_inner(
        &self,
        actor: &Identity,
        code: &str,
        input: PromoCodeInput,
    ) -> Result<PromoCode, EngineError> {
        require_admin(actor)?;
        check_input(&input)?;
        let code = PromoCode::normalize(code);
        let mut tx = self.store.begin().await?;
        let result = update_in(tx.as_mut(), &code, input).await;
        finish(tx, result).await
    }
}

async fn update_in(
    tx: &mut dyn StoreTx,
    code: &str,
    input: PromoCodeInput,
) -> Result<PromoCode, EngineError> {
    let current = tx
        .promo(code)
        .await?
        .ok_or_else(|| Missing::Promo(code.to_string()))?;
    let updated = PromoCode {
        code: PromoCode::normalize(&input.code),
        discount_type: input.discount_type,
        discount_value: input.discount_value,
        valid_from: input.valid_from,
        valid_until: input.valid_until,
        is_active: input.is_active,
        usage_limit: input.usage_limit,
        updated_at: Utc::now(),
        ..current
    };
    if !tx.replace_promo(code, &updated).await? {
        return Err(Missing::Promo(code.to_string()).into());
    }
    Ok(updated)
}

async fn toggle_in(tx: &mut dyn StoreTx, code: &str) -> Result<PromoCode, EngineError> {
    let mut promo = tx
        .promo(code)
        .await?
        .ok_or_else(|| Missing::Promo(code.to_string()))?;
    promo.is_active = !promo.is_active;
    promo.updated_at = Utc::now();
    tx.replace_promo(code, &promo).await?;
    Ok(promo)
}
