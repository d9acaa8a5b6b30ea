//! `PostgreSQL` store.
//!
//! Reservation and redemption are single conditional `UPDATE`s, so their
//! guarantees hold across processes sharing the database. Clamped decrements
//! lock the inventory row first and write the result back in the same
//! transaction. Amounts are stored as scaled `BIGINT`s.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{Adjustment, OrderFilter, Store, StoreError, StoreTx};
use crate::Amount;
use crate::engine::InventoryRecord;
use crate::model::{
    CartLine, DiscountType, Order, OrderId, OrderItem, OrderStatus, Payment, PaymentStatus,
    PromoCode, Quantity, Variant, VariantId,
};

const MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &SecretString) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(database_url.expose_secret())
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

fn to_quantity(value: i64, column: &str) -> Result<Quantity, StoreError> {
    Quantity::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

#[derive(FromRow)]
struct VariantRow {
    id: i64,
    sku: String,
    base_price: i64,
    price_modifier: i64,
}

impl From<VariantRow> for Variant {
    fn from(row: VariantRow) -> Self {
        Self {
            id: row.id,
            sku: row.sku,
            base_price: Amount::from_scaled(row.base_price),
            price_modifier: Amount::from_scaled(row.price_modifier),
        }
    }
}

#[derive(FromRow)]
struct InventoryRow {
    variant_id: i64,
    stock_quantity: i64,
    reserved_quantity: i64,
}

impl TryFrom<InventoryRow> for InventoryRecord {
    type Error = StoreError;

    fn try_from(row: InventoryRow) -> Result<Self, StoreError> {
        Ok(Self {
            variant: row.variant_id,
            stock: to_quantity(row.stock_quantity, "stock_quantity")?,
            reserved: to_quantity(row.reserved_quantity, "reserved_quantity")?,
        })
    }
}

#[derive(FromRow)]
struct CartRow {
    variant_id: i64,
    sku: String,
    quantity: i64,
    base_price: i64,
    price_modifier: i64,
}

impl TryFrom<CartRow> for CartLine {
    type Error = StoreError;

    fn try_from(row: CartRow) -> Result<Self, StoreError> {
        let unit_price = Amount::from_scaled(row.base_price)
            .checked_add(Amount::from_scaled(row.price_modifier))
            .map_err(|e| StoreError::Corrupt(format!("variant {}: {e}", row.variant_id)))?;
        Ok(Self {
            variant: row.variant_id,
            sku: row.sku,
            quantity: to_quantity(row.quantity, "quantity")?,
            unit_price,
        })
    }
}

#[derive(FromRow)]
struct PromoRow {
    code: String,
    discount_type: String,
    discount_value: i64,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
    is_active: bool,
    usage_limit: Option<i64>,
    usage_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PromoRow> for PromoCode {
    type Error = StoreError;

    fn try_from(row: PromoRow) -> Result<Self, StoreError> {
        Ok(Self {
            discount_type: row
                .discount_type
                .parse::<DiscountType>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            discount_value: Amount::from_scaled(row.discount_value),
            valid_from: row.valid_from,
            valid_until: row.valid_until,
            is_active: row.is_active,
            usage_limit: row
                .usage_limit
                .map(|limit| to_quantity(limit, "usage_limit"))
                .transpose()?,
            usage_count: to_quantity(row.usage_count, "usage_count")?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            code: row.code,
        })
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    owner: String,
    subtotal: i64,
    discount_amount: i64,
    promo_code: Option<String>,
    total_amount: i64,
    status: String,
    shipping_address: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct OrderItemRow {
    order_id: Uuid,
    variant_id: i64,
    sku: String,
    quantity: i64,
    unit_price: i64,
    subtotal: i64,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = StoreError;

    fn try_from(row: OrderItemRow) -> Result<Self, StoreError> {
        Ok(Self {
            variant: row.variant_id,
            sku: row.sku,
            quantity: to_quantity(row.quantity, "quantity")?,
            unit_price: Amount::from_scaled(row.unit_price),
            subtotal: Amount::from_scaled(row.subtotal),
        })
    }
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order, StoreError> {
        Ok(Order {
            id: self.id,
            owner: self.owner,
            items,
            subtotal: Amount::from_scaled(self.subtotal),
            discount_amount: Amount::from_scaled(self.discount_amount),
            promo_code: self.promo_code,
            total_amount: Amount::from_scaled(self.total_amount),
            status: self
                .status
                .parse::<OrderStatus>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            shipping_address: self.shipping_address,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct PaymentRow {
    order_id: Uuid,
    amount: i64,
    status: String,
    method: String,
    gateway_order_id: String,
    transaction_id: Option<String>,
    signature: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, StoreError> {
        Ok(Self {
            order_id: row.order_id,
            amount: Amount::from_scaled(row.amount),
            status: row
                .status
                .parse::<PaymentStatus>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            method: row.method,
            gateway_order_id: row.gateway_order_id,
            transaction_id: row.transaction_id,
            signature: row.signature,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const ORDER_COLUMNS: &str = "id, owner, subtotal, discount_amount, promo_code, total_amount, \
                             status, shipping_address, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "order_id, amount, status, method, gateway_order_id, \
                               transaction_id, signature, created_at, updated_at";

impl PgTx {
    /// Cart lines in insertion order. `lock` holds the rows until the transaction ends.
    async fn select_cart_lines(
        &mut self,
        owner: &str,
        lock: bool,
    ) -> Result<Vec<CartLine>, StoreError> {
        let mut sql = String::from(
            "SELECT c.variant_id, v.sku, c.quantity, v.base_price, v.price_modifier \
             FROM cart_items c JOIN variants v ON v.id = c.variant_id \
             WHERE c.owner = $1 ORDER BY c.seq",
        );
        if lock {
            sql.push_str(" FOR UPDATE OF c");
        }
        let rows = sqlx::query_as::<_, CartRow>(&sql)
            .bind(owner)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(CartLine::try_from).collect()
    }

    /// Lock an inventory row for the rest of the transaction.
    async fn lock_inventory(
        &mut self,
        id: VariantId,
    ) -> Result<Option<InventoryRecord>, StoreError> {
        sqlx::query_as::<_, InventoryRow>(
            "SELECT variant_id, stock_quantity, reserved_quantity FROM inventory \
             WHERE variant_id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(InventoryRecord::try_from)
        .transpose()
    }

    async fn write_inventory(&mut self, record: &InventoryRecord) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE inventory SET stock_quantity = $2, reserved_quantity = $3 \
             WHERE variant_id = $1",
        )
        .bind(record.variant)
        .bind(i64::from(record.stock))
        .bind(i64::from(record.reserved))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn adjust(
        &mut self,
        id: VariantId,
        apply: impl FnOnce(&mut InventoryRecord) -> bool + Send,
    ) -> Result<Option<Adjustment>, StoreError> {
        let Some(mut record) = self.lock_inventory(id).await? else {
            return Ok(None);
        };
        let clamped = apply(&mut record);
        self.write_inventory(&record).await?;
        Ok(Some(Adjustment { record, clamped }))
    }

    /// Attach items to order rows, keeping row order.
    async fn with_items(&mut self, rows: Vec<OrderRow>) -> Result<Vec<Order>, StoreError> {
        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let item_rows = sqlx::query_as::<_, OrderItemRow>(
            "SELECT order_id, variant_id, sku, quantity, unit_price, subtotal FROM order_items \
             WHERE order_id = ANY($1) ORDER BY order_id, position",
        )
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in item_rows {
            let order_id = row.order_id;
            items.entry(order_id).or_default().push(row.try_into()?);
        }
        rows.into_iter()
            .map(|row| {
                let order_items = items.remove(&row.id).unwrap_or_default();
                row.into_order(order_items)
            })
            .collect()
    }

    async fn write_promo(&mut self, promo: &PromoCode) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO promo_codes (code, discount_type, discount_value, valid_from, \
             valid_until, is_active, usage_limit, usage_count, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&promo.code)
        .bind(promo.discount_type.as_str())
        .bind(promo.discount_value.scaled())
        .bind(promo.valid_from)
        .bind(promo.valid_until)
        .bind(promo.is_active)
        .bind(promo.usage_limit.map(i64::from))
        .bind(i64::from(promo.usage_count))
        .bind(promo.created_at)
        .bind(promo.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_variant(
        &mut self,
        variant: &Variant,
        stock: Quantity,
    ) -> Result<(), StoreError> {
        let inserted = sqlx::query(
            "INSERT INTO variants (id, sku, base_price, price_modifier) VALUES ($1, $2, $3, $4) \
             ON CONFLICT DO NOTHING",
        )
        .bind(variant.id)
        .bind(&variant.sku)
        .bind(variant.base_price.scaled())
        .bind(variant.price_modifier.scaled())
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            return Err(StoreError::Duplicate(format!(
                "variant {} or sku {}",
                variant.id, variant.sku
            )));
        }

        sqlx::query("INSERT INTO inventory (variant_id, stock_quantity) VALUES ($1, $2)")
            .bind(variant.id)
            .bind(i64::from(stock))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn variant(&mut self, id: VariantId) -> Result<Option<Variant>, StoreError> {
        let row = sqlx::query_as::<_, VariantRow>(
            "SELECT id, sku, base_price, price_modifier FROM variants WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Variant::from))
    }

    async fn inventory(&mut self, id: VariantId) -> Result<Option<InventoryRecord>, StoreError> {
        sqlx::query_as::<_, InventoryRow>(
            "SELECT variant_id, stock_quantity, reserved_quantity FROM inventory \
             WHERE variant_id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(InventoryRecord::try_from)
        .transpose()
    }

    async fn inventories(&mut self) -> Result<Vec<(Variant, InventoryRecord)>, StoreError> {
        #[derive(FromRow)]
        struct Row {
            #[sqlx(flatten)]
            variant: VariantRow,
            #[sqlx(flatten)]
            inventory: InventoryRow,
        }

        let rows = sqlx::query_as::<_, Row>(
            "SELECT v.id, v.sku, v.base_price, v.price_modifier, \
                    i.variant_id, i.stock_quantity, i.reserved_quantity \
             FROM variants v JOIN inventory i ON i.variant_id = v.id ORDER BY v.id",
        )
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter()
            .map(|row| Ok((row.variant.into(), row.inventory.try_into()?)))
            .collect()
    }

    async fn set_stock(
        &mut self,
        id: VariantId,
        stock: Quantity,
    ) -> Result<Option<bool>, StoreError> {
        let updated = sqlx::query(
            "UPDATE inventory SET stock_quantity = $2 \
             WHERE variant_id = $1 AND reserved_quantity <= $2",
        )
        .bind(id)
        .bind(i64::from(stock))
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        if updated > 0 {
            return Ok(Some(true));
        }
        Ok(self.inventory(id).await?.map(|_| false))
    }

    async fn reserve_inventory(
        &mut self,
        id: VariantId,
        quantity: Quantity,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE inventory SET reserved_quantity = reserved_quantity + $2 \
             WHERE variant_id = $1 AND stock_quantity - reserved_quantity >= $2",
        )
        .bind(id)
        .bind(i64::from(quantity))
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn release_inventory(
        &mut self,
        id: VariantId,
        quantity: Quantity,
    ) -> Result<Option<Adjustment>, StoreError> {
        self.adjust(id, |record| record.release(quantity)).await
    }

    async fn fulfill_inventory(
        &mut self,
        id: VariantId,
        quantity: Quantity,
    ) -> Result<Option<Adjustment>, StoreError> {
        self.adjust(id, |record| record.fulfill(quantity)).await
    }

    async fn cart_lines(&mut self, owner: &str) -> Result<Vec<CartLine>, StoreError> {
        self.select_cart_lines(owner, false).await
    }

    async fn lock_cart_lines(&mut self, owner: &str) -> Result<Vec<CartLine>, StoreError> {
        self.select_cart_lines(owner, true).await
    }

    async fn upsert_cart_item(
        &mut self,
        owner: &str,
        variant: VariantId,
        quantity: Quantity,
    ) -> Result<(), StoreError> {
        if self.variant(variant).await?.is_none() {
            return Err(StoreError::Dangling(format!("variant {variant}")));
        }
        sqlx::query(
            "INSERT INTO cart_items (owner, variant_id, quantity) VALUES ($1, $2, $3) \
             ON CONFLICT (owner, variant_id) DO UPDATE SET quantity = EXCLUDED.quantity",
        )
        .bind(owner)
        .bind(variant)
        .bind(i64::from(quantity))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn remove_cart_item(
        &mut self,
        owner: &str,
        variant: VariantId,
    ) -> Result<bool, StoreError> {
        let removed = sqlx::query("DELETE FROM cart_items WHERE owner = $1 AND variant_id = $2")
            .bind(owner)
            .bind(variant)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }

    async fn clear_cart(&mut self, owner: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM cart_items WHERE owner = $1")
            .bind(owner)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn promo(&mut self, code: &str) -> Result<Option<PromoCode>, StoreError> {
        sqlx::query_as::<_, PromoRow>("SELECT * FROM promo_codes WHERE code = $1")
            .bind(code)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(PromoCode::try_from)
            .transpose()
    }

    async fn promos(&mut self) -> Result<Vec<PromoCode>, StoreError> {
        sqlx::query_as::<_, PromoRow>("SELECT * FROM promo_codes ORDER BY created_at DESC, code")
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(PromoCode::try_from)
            .collect()
    }

    async fn insert_promo(&mut self, promo: &PromoCode) -> Result<(), StoreError> {
        if self.promo(&promo.code).await?.is_some() {
            return Err(StoreError::Duplicate(format!("promo code {}", promo.code)));
        }
        self.write_promo(promo).await
    }

    async fn replace_promo(&mut self, code: &str, promo: &PromoCode) -> Result<bool, StoreError> {
        if self.promo(code).await?.is_none() {
            return Ok(false);
        }
        if promo.code != code && self.promo(&promo.code).await?.is_some() {
            return Err(StoreError::Duplicate(format!("promo code {}", promo.code)));
        }
        self.delete_promo(code).await?;
        self.write_promo(promo).await?;
        Ok(true)
    }

    async fn delete_promo(&mut self, code: &str) -> Result<bool, StoreError> {
        let deleted = sqlx::query("DELETE FROM promo_codes WHERE code = $1")
            .bind(code)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn redeem_promo(&mut self, code: &str) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE promo_codes SET usage_count = usage_count + 1, updated_at = now() \
             WHERE code = $1 AND (usage_limit IS NULL OR usage_count < usage_limit)",
        )
        .bind(code)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO orders (id, owner, subtotal, discount_amount, promo_code, total_amount, \
             status, shipping_address, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(order.id)
        .bind(&order.owner)
        .bind(order.subtotal.scaled())
        .bind(order.discount_amount.scaled())
        .bind(&order.promo_code)
        .bind(order.total_amount.scaled())
        .bind(order.status.as_str())
        .bind(&order.shipping_address)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            let position = i32::try_from(position)
                .map_err(|_| StoreError::Corrupt(format!("order {} has too many items", order.id)))?;
            sqlx::query(
                "INSERT INTO order_items (order_id, position, variant_id, sku, quantity, \
                 unit_price, subtotal) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(order.id)
            .bind(position)
            .bind(item.variant)
            .bind(&item.sku)
            .bind(i64::from(item.quantity))
            .bind(item.unit_price.scaled())
            .bind(item.subtotal.scaled())
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(self.with_items(rows).await?.into_iter().next())
    }

    async fn orders(&mut self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE ($1::text IS NULL OR owner = $1) AND ($2::text IS NULL OR status = $2) \
             ORDER BY seq DESC"
        ))
        .bind(filter.owner.as_deref())
        .bind(filter.status.map(OrderStatus::as_str))
        .fetch_all(&mut *self.tx)
        .await?;
        self.with_items(rows).await
    }

    async fn update_order_status(
        &mut self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE orders SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn payment_for_order(&mut self, order: OrderId) -> Result<Option<Payment>, StoreError> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1"
        ))
        .bind(order)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(Payment::try_from)
        .transpose()
    }

    async fn payment_by_gateway_order(
        &mut self,
        gateway_order_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE gateway_order_id = $1"
        ))
        .bind(gateway_order_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(Payment::try_from)
        .transpose()
    }

    async fn upsert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        let exists: (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM orders WHERE id = $1)")
            .bind(payment.order_id)
            .fetch_one(&mut *self.tx)
            .await?;
        if !exists.0 {
            return Err(StoreError::Dangling(format!("order {}", payment.order_id)));
        }

        sqlx::query(
            "INSERT INTO payments (order_id, amount, status, method, gateway_order_id, \
             transaction_id, signature, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (order_id) DO UPDATE SET amount = EXCLUDED.amount, \
             status = EXCLUDED.status, method = EXCLUDED.method, \
             gateway_order_id = EXCLUDED.gateway_order_id, \
             transaction_id = EXCLUDED.transaction_id, signature = EXCLUDED.signature, \
             updated_at = EXCLUDED.updated_at",
        )
        .bind(payment.order_id)
        .bind(payment.amount.scaled())
        .bind(payment.status.as_str())
        .bind(&payment.method)
        .bind(&payment.gateway_order_id)
        .bind(&payment.transaction_id)
        .bind(&payment.signature)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
