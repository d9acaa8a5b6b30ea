//! Core domain types for the order engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{Amount, AmountOverflow};

/// Product variant identifier.
pub type VariantId = i64;

/// Order identifier.
pub type OrderId = Uuid;

/// Unit count of a variant.
pub type Quantity = u32;

/// Role attached to a verified caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Customer,
    Admin,
}

/// Verified caller identity, supplied by the identity provider.
///
/// `subject` is opaque: an authenticated user id or a guest token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub subject: String,
    pub role: Role,
}

impl Identity {
    pub fn customer(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            role: Role::Customer,
        }
    }

    pub fn admin(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Catalog facts for a variant, read at checkout time and never written by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub sku: String,
    pub base_price: Amount,
    pub price_modifier: Amount,
}

impl Variant {
    pub fn unit_price(&self) -> Result<Amount, AmountOverflow> {
        self.base_price.checked_add(self.price_modifier)
    }
}

/// A cart line as stored: variant and quantity, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub variant: VariantId,
    pub quantity: Quantity,
    pub added_at: DateTime<Utc>,
}

/// A cart line joined with current catalog prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub variant: VariantId,
    pub sku: String,
    pub quantity: Quantity,
    pub unit_price: Amount,
}

impl CartLine {
    pub fn subtotal(&self) -> Result<Amount, AmountOverflow> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// Priced view of a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartView {
    pub owner: String,
    pub items: Vec<CartLine>,
    pub subtotal: Amount,
}

impl CartView {
    pub fn new(owner: impl Into<String>, items: Vec<CartLine>) -> Result<Self, AmountOverflow> {
        let subtotal = items
            .iter()
            .try_fold(Amount::ZERO, |acc, line| acc.checked_add(line.subtotal()?))?;
        Ok(Self {
            owner: owner.into(),
            items,
            subtotal,
        })
    }
}

/// Returned when a status string is outside the known set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown order status '{0}'")]
pub struct UnknownStatus(pub String);

/// Order status. `Pending` is the only initial state, `Delivered` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Line snapshot captured at checkout; never repriced afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub variant: VariantId,
    pub sku: String,
    pub quantity: Quantity,
    pub unit_price: Amount,
    pub subtotal: Amount,
}

impl TryFrom<&CartLine> for OrderItem {
    type Error = AmountOverflow;

    fn try_from(line: &CartLine) -> Result<Self, Self::Error> {
        Ok(Self {
            variant: line.variant,
            sku: line.sku.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            subtotal: line.subtotal()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub owner: String,
    pub items: Vec<OrderItem>,
    pub subtotal: Amount,
    pub discount_amount: Amount,
    pub promo_code: Option<String>,
    pub total_amount: Amount,
    pub status: OrderStatus,
    pub shipping_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown payment status '{0}'")]
pub struct UnknownPaymentStatus(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownPaymentStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownPaymentStatus(other.to_string())),
        }
    }
}

/// Payment record; at most one per order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub order_id: OrderId,
    pub amount: Amount,
    pub status: PaymentStatus,
    pub method: String,
    pub gateway_order_id: String,
    pub transaction_id: Option<String>,
    pub signature: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown discount type '{0}'")]
pub struct UnknownDiscountType(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl DiscountType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Fixed => "fixed",
        }
    }
}

impl FromStr for DiscountType {
    type Err = UnknownDiscountType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(Self::Percentage),
            "fixed" => Ok(Self::Fixed),
            other => Err(UnknownDiscountType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoCode {
    /// Normalized code, see [`PromoCode::normalize`].
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Amount,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub usage_limit: Option<u32>,
    pub usage_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PromoCode {
    /// Codes compare case- and surrounding-whitespace-insensitively.
    pub fn normalize(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn has_uses_left(&self) -> bool {
        self.usage_limit.is_none_or(|limit| self.usage_count < limit)
    }

    /// Consume one use if the limit allows it.
    pub fn try_redeem(&mut self) -> bool {
        if !self.has_uses_left() {
            return false;
        }
        self.usage_count += 1;
        true
    }
}

/// Administrative input for creating or replacing a promo code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoCodeInput {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Amount,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub usage_limit: Option<u32>,
}

/// Administrative input for seeding a variant and its stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVariant {
    pub id: VariantId,
    pub sku: String,
    pub base_price: Amount,
    pub price_modifier: Amount,
    pub stock: Quantity,
}
