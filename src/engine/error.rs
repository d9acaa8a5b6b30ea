//! Error types for engine operations.

use thiserror::Error;

use crate::AmountOverflow;
use crate::gateway::GatewayError;
use crate::model::{OrderId, OrderStatus, Quantity, UnknownStatus, VariantId};
use crate::store::StoreError;

/// Machine-checkable classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthorized,
    EmptyCart,
    InsufficientStock,
    InvalidPromoCode,
    PromoLimitReached,
    InvalidTransition,
    OrderNotPending,
    PaymentVerificationFailed,
    NotFound,
    InvalidInput,
    Internal,
}

/// Entity a lookup failed to find.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Missing {
    #[error("order {0}")]
    Order(OrderId),
    #[error("payment for {0}")]
    Payment(String),
    #[error("variant {0}")]
    Variant(VariantId),
    #[error("promo code {0}")]
    Promo(String),
    #[error("cart line for variant {0}")]
    CartLine(VariantId),
}

/// Top-level error returned by every [`Engine`](super::Engine) operation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("{0} not found")]
    NotFound(#[from] Missing),

    #[error("insufficient stock for {sku}: available {available}, requested {requested}")]
    InsufficientStock {
        variant: VariantId,
        sku: String,
        available: Quantity,
        requested: Quantity,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid amount: {0}")]
    Overflow(#[from] AmountOverflow),

    #[error("checkout failed: {0}")]
    Checkout(#[from] CheckoutError),

    #[error("{0}")]
    Transition(#[from] TransitionError),

    #[error("{0}")]
    Payment(#[from] PaymentError),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

/// Error during checkout that is specific to it.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("cart is empty")]
    EmptyCart,

    #[error("invalid promo code: {0}")]
    InvalidPromoCode(String),

    #[error("promo code {0} reached its usage limit")]
    PromoLimitReached(String),
}

/// Error during an order status change.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("order {order} cannot move from {from} to {to}")]
    InvalidTransition {
        order: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error(transparent)]
    UnknownStatus(#[from] UnknownStatus),
}

/// Error during payment initiation or verification.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("order {0} is {1}, not pending")]
    OrderNotPending(OrderId, OrderStatus),

    #[error("payment verification failed")]
    VerificationFailed,

    #[error("payment gateway: {0}")]
    Gateway(#[from] GatewayError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            Self::InvalidInput(_) | Self::Overflow(_) => ErrorKind::InvalidInput,
            Self::Checkout(CheckoutError::EmptyCart) => ErrorKind::EmptyCart,
            Self::Checkout(CheckoutError::InvalidPromoCode(_)) => ErrorKind::InvalidPromoCode,
            Self::Checkout(CheckoutError::PromoLimitReached(_)) => ErrorKind::PromoLimitReached,
            Self::Transition(_) => ErrorKind::InvalidTransition,
            Self::Payment(PaymentError::OrderNotPending(..)) => ErrorKind::OrderNotPending,
            Self::Payment(PaymentError::VerificationFailed) => {
                ErrorKind::PaymentVerificationFailed
            }
            Self::Store(StoreError::Duplicate(_)) => ErrorKind::InvalidInput,
            Self::Payment(PaymentError::Gateway(_)) | Self::Store(_) => ErrorKind::Internal,
        }
    }
}
