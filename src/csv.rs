use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Amount;
use crate::engine::InventoryRecord;
use crate::model::{DiscountType, OrderStatus, Quantity, Variant, VariantId};
use crate::replay::{Action, Command};

/// Errors that can occur when parsing script rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open script: {0}")]
    Open(csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized op '{op}'")]
    UnrecognizedOp { line: usize, op: String },

    #[error("line {line}: {op} missing {field}")]
    MissingField {
        line: usize,
        op: String,
        field: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    op: String,
    actor: String,
    variant: Option<VariantId>,
    quantity: Option<Quantity>,
    amount: Option<f64>,
    arg: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    variant: VariantId,
    sku: &'a str,
    stock: Quantity,
    reserved: Quantity,
    available: Quantity,
}

impl InputRow {
    fn into_command(self, line: usize) -> Result<Command, CsvError> {
        let missing = |field| CsvError::MissingField {
            line,
            op: self.op.clone(),
            field,
        };
        let variant = || self.variant.ok_or_else(|| missing("variant"));
        let quantity = || self.quantity.ok_or_else(|| missing("quantity"));
        let amount = || {
            self.amount
                .map(Amount::from_float)
                .ok_or_else(|| missing("amount"))
        };
        let arg = || self.arg.clone().ok_or_else(|| missing("arg"));

        let action = match self.op.as_str() {
            "variant" => {
                let id = variant()?;
                Action::Variant {
                    id,
                    sku: self.arg.clone().unwrap_or_else(|| format!("SKU-{id}")),
                    price: amount()?,
                    stock: quantity()?,
                }
            }
            "stock" => Action::Stock {
                variant: variant()?,
                stock: quantity()?,
            },
            "promo_percent" | "promo_fixed" => Action::Promo {
                code: arg()?,
                discount_type: if self.op == "promo_percent" {
                    DiscountType::Percentage
                } else {
                    DiscountType::Fixed
                },
                value: amount()?,
                usage_limit: self.quantity,
            },
            "add" => Action::Add {
                variant: variant()?,
                quantity: quantity()?,
            },
            "remove" => Action::Remove {
                variant: variant()?,
            },
            "checkout" => Action::Checkout {
                promo: self.arg.clone(),
            },
            "pay" => Action::Pay {
                forged: self.arg.as_deref() == Some("forged"),
            },
            "confirm" | "ship" | "deliver" => Action::Advance {
                owner: arg()?,
                status: match self.op.as_str() {
                    "confirm" => OrderStatus::Confirmed,
                    "ship" => OrderStatus::Shipped,
                    _ => OrderStatus::Delivered,
                },
            },
            "cancel" => Action::Cancel,
            other => {
                return Err(CsvError::UnrecognizedOp {
                    line,
                    op: other.to_string(),
                });
            }
        };

        Ok(Command {
            actor: self.actor,
            action,
        })
    }
}

/// Read script commands from a csv file with the header
/// `op,actor,variant,quantity,amount,arg`
pub fn read_commands(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Command, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_command(line)
        }))
}

/// Write the inventory report in csv format
pub fn write_inventory<'a>(
    writer: impl io::Write,
    records: impl IntoIterator<Item = &'a (Variant, InventoryRecord)>,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);

    for (variant, record) in records {
        writer.serialize(OutputRow {
            variant: variant.id,
            sku: &variant.sku,
            stock: record.stock,
            reserved: record.reserved,
            available: record.available(),
        })?;
    }

    writer.flush()?;
    Ok(())
}
