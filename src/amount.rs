use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Money arithmetic left the representable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("amount out of range")]
pub struct AmountOverflow;

/// Fixed-point decimal with 4 decimal places, stored as a scaled integer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    const SCALE: i64 = 10_000;
    /// Scaled units in one gateway minor unit (a hundredth of the major unit).
    const MINOR: i64 = Self::SCALE / 100;

    pub const ZERO: Amount = Amount(0);

    /// Highest unit price the catalog accepts.
    pub const MAX_UNIT_PRICE: Amount = Amount(1_000_000_000 * Self::SCALE);

    pub fn from_float(value: f64) -> Self {
        Amount((value * Self::SCALE as f64).round() as i64)
    }

    pub fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    pub fn from_major(units: i64) -> Self {
        Amount(units * Self::SCALE)
    }

    pub fn scaled(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self, AmountOverflow> {
        self.0.checked_add(rhs.0).map(Amount).ok_or(AmountOverflow)
    }

    /// Price of `quantity` units.
    pub fn checked_mul(self, quantity: u32) -> Result<Self, AmountOverflow> {
        self.0
            .checked_mul(i64::from(quantity))
            .map(Amount)
            .ok_or(AmountOverflow)
    }

    pub fn checked_sum(amounts: impl IntoIterator<Item = Self>) -> Result<Self, AmountOverflow> {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, Amount::checked_add)
    }

    /// Subtract, flooring the result at zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Amount(self.0.saturating_sub(rhs.0).max(0))
    }

    /// `self * percent / 100`, rounded half away from zero on the last digit.
    pub fn percent(self, percent: Amount) -> Self {
        let num = i128::from(self.0) * i128::from(percent.0);
        let den = i128::from(Self::SCALE) * 100;
        Amount(saturate(round_div(num, den)))
    }

    /// Amount in hundredths of the major unit, as payment gateways expect it.
    pub fn to_minor_units(self) -> i64 {
        saturate(round_div(i128::from(self.0), i128::from(Self::MINOR)))
    }
}

fn round_div(num: i128, den: i128) -> i128 {
    let quotient = num / den;
    let remainder = num % den;
    if 2 * remainder.abs() >= den {
        quotient + num.signum()
    } else {
        quotient
    }
}

fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let whole = abs / Self::SCALE;
        let frac = abs % Self::SCALE;
        write!(f, "{sign}{whole}.{frac:04}")
    }
}
