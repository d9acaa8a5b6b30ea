use serde::{Deserialize, Serialize};

use crate::model::{Quantity, VariantId};

/// Per-variant stock counters.
///
/// `reserved` units are held against unfulfilled orders. They are excluded
/// from sale but still physically present, so they stay part of `stock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub variant: VariantId,
    pub stock: Quantity,
    pub reserved: Quantity,
}

impl InventoryRecord {
    pub fn new(variant: VariantId, stock: Quantity) -> Self {
        Self {
            variant,
            stock,
            reserved: 0,
        }
    }

    pub fn available(&self) -> Quantity {
        self.stock.saturating_sub(self.reserved)
    }

    /// Hold `quantity` units if that many are available; otherwise leave the record untouched.
    pub fn try_reserve(&mut self, quantity: Quantity) -> bool {
        if self.available() < quantity {
            return false;
        }
        self.reserved += quantity;
        true
    }

    /// Drop `quantity` from `reserved`. Returns `true` when the decrement had to be clamped.
    pub fn release(&mut self, quantity: Quantity) -> bool {
        let clamped = self.reserved < quantity;
        self.reserved = self.reserved.saturating_sub(quantity);
        clamped
    }

    /// Deduct `quantity` from both counters, each clamped independently.
    /// Returns `true` when either decrement had to be clamped.
    pub fn fulfill(&mut self, quantity: Quantity) -> bool {
        let clamped = self.stock < quantity || self.reserved < quantity;
        self.stock = self.stock.saturating_sub(quantity);
        self.reserved = self.reserved.saturating_sub(quantity);
        clamped
    }

    /// Replace physical stock; refused when it would drop below what is reserved.
    pub fn try_set_stock(&mut self, stock: Quantity) -> bool {
        if stock < self.reserved {
            return false;
        }
        self.stock = stock;
        true
    }
}
