//! PostgreSQL implementations of the inventory ledger and payment processor.
//!
//! Each ledger mutation is a single conditional `UPDATE`, so concurrent
//! reservations of one product serialize on its row; the table's `CHECK`
//! constraint backs the same invariant. Payment idempotency relies on the
//! unique constraint on `payments.order_id`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductCode, UserId};
use domain::Money;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::catalog::{ProductCatalog, ProductSnapshot};
use super::inventory::{InventoryError, InventoryLedger, InventoryRecord};
use super::payment::{
    ApproveAll, PaymentError, PaymentMethod, PaymentOutcome, PaymentProcessor, PaymentRecord,
    PaymentStatus, SettlementPolicy,
};

/// PostgreSQL-backed inventory ledger.
#[derive(Clone)]
pub struct PostgresInventoryLedger {
    pool: PgPool,
}

impl PostgresInventoryLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_record(row: &PgRow) -> Result<InventoryRecord, InventoryError> {
        let product_code: String = row.try_get("product_code")?;
        let counter = |column: &str| -> Result<u32, InventoryError> {
            let value: i64 = row.try_get(column)?;
            u32::try_from(value).map_err(|_| {
                InventoryError::CorruptRecord(format!("{product_code}: invalid {column} {value}"))
            })
        };

        Ok(InventoryRecord {
            stock: counter("stock")?,
            reserved_stock: counter("reserved_stock")?,
            product_name: row.try_get("product_name")?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            product_code: ProductCode::new(product_code),
        })
    }

    fn check_quantity(product_code: &ProductCode, quantity: u32) -> Result<(), InventoryError> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity {
                product_code: product_code.clone(),
                quantity,
            });
        }
        Ok(())
    }

    async fn existing(
        &self,
        product_code: &ProductCode,
    ) -> Result<InventoryRecord, InventoryError> {
        self.record(product_code)
            .await?
            .ok_or_else(|| InventoryError::UnknownProduct(product_code.clone()))
    }
}

#[async_trait]
impl InventoryLedger for PostgresInventoryLedger {
    async fn can_reserve(
        &self,
        product_code: &ProductCode,
        quantity: u32,
    ) -> Result<bool, InventoryError> {
        Ok(self.existing(product_code).await?.can_reserve(quantity))
    }

    #[tracing::instrument(skip(self))]
    async fn reserve(
        &self,
        order_id: OrderId,
        product_code: &ProductCode,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        Self::check_quantity(product_code, quantity)?;

        let result = sqlx::query(
            r#"
            UPDATE inventory SET reserved_stock = reserved_stock + $2
            WHERE product_code = $1 AND stock - reserved_stock >= $2
            "#,
        )
        .bind(product_code.as_str())
        .bind(i64::from(quantity))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let record = self.existing(product_code).await?;
            return Err(InventoryError::InsufficientStock {
                product_code: product_code.clone(),
                requested: quantity,
                available: record.available(),
            });
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn confirm(
        &self,
        order_id: OrderId,
        product_code: &ProductCode,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        Self::check_quantity(product_code, quantity)?;

        let result = sqlx::query(
            r#"
            UPDATE inventory
            SET stock = stock - $2, reserved_stock = reserved_stock - $2
            WHERE product_code = $1 AND reserved_stock >= $2
            "#,
        )
        .bind(product_code.as_str())
        .bind(i64::from(quantity))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let record = self.existing(product_code).await?;
            let err = InventoryError::ConfirmExceedsReserved {
                product_code: product_code.clone(),
                requested: quantity,
                reserved: record.reserved_stock,
            };
            tracing::error!(error = %err, "inventory contract violation");
            return Err(err);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn cancel(
        &self,
        order_id: OrderId,
        product_code: &ProductCode,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        Self::check_quantity(product_code, quantity)?;

        let result = sqlx::query(
            r#"
            UPDATE inventory SET reserved_stock = reserved_stock - $2
            WHERE product_code = $1 AND reserved_stock >= $2
            "#,
        )
        .bind(product_code.as_str())
        .bind(i64::from(quantity))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let record = self.existing(product_code).await?;
            let err = InventoryError::CancelExceedsReserved {
                product_code: product_code.clone(),
                requested: quantity,
                reserved: record.reserved_stock,
            };
            tracing::error!(error = %err, "inventory contract violation");
            return Err(err);
        }
        Ok(())
    }

    async fn restock(
        &self,
        product_code: &ProductCode,
        product_name: &str,
        unit_price: Money,
        quantity: u32,
    ) -> Result<InventoryRecord, InventoryError> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            INSERT INTO inventory
                (product_code, product_name, stock, reserved_stock, unit_price_cents)
            VALUES ($1, $2, $3, 0, $4)
            ON CONFLICT (product_code) DO UPDATE
            SET stock = inventory.stock + EXCLUDED.stock,
                product_name = EXCLUDED.product_name,
                unit_price_cents = EXCLUDED.unit_price_cents
            WHERE inventory.stock + EXCLUDED.stock <= $5
            RETURNING product_code, product_name, stock, reserved_stock, unit_price_cents
            "#,
        )
        .bind(product_code.as_str())
        .bind(product_name)
        .bind(i64::from(quantity))
        .bind(unit_price.cents())
        .bind(i64::from(u32::MAX))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_record(&row),
            None => Err(InventoryError::StockOverflow(product_code.clone())),
        }
    }

    async fn record(
        &self,
        product_code: &ProductCode,
    ) -> Result<Option<InventoryRecord>, InventoryError> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT product_code, product_name, stock, reserved_stock, unit_price_cents
            FROM inventory
            WHERE product_code = $1
            "#,
        )
        .bind(product_code.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }
}

#[async_trait]
impl ProductCatalog for PostgresInventoryLedger {
    async fn product(
        &self,
        product_code: &ProductCode,
    ) -> Result<Option<ProductSnapshot>, InventoryError> {
        Ok(self
            .record(product_code)
            .await?
            .map(|record| ProductSnapshot::from(&record)))
    }
}

/// PostgreSQL-backed payment processor.
#[derive(Clone)]
pub struct PostgresPaymentProcessor {
    pool: PgPool,
    policy: Arc<dyn SettlementPolicy>,
}

impl PostgresPaymentProcessor {
    /// Creates a processor that approves every charge.
    pub fn new(pool: PgPool) -> Self {
        Self::with_policy(pool, ApproveAll)
    }

    pub fn with_policy(pool: PgPool, policy: impl SettlementPolicy + 'static) -> Self {
        Self {
            pool,
            policy: Arc::new(policy),
        }
    }

    fn row_to_record(row: &PgRow) -> Result<PaymentRecord, PaymentError> {
        let method: String = row.try_get("method")?;
        let status: String = row.try_get("status")?;

        Ok(PaymentRecord {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            method: method.parse().map_err(PaymentError::CorruptRecord)?,
            status: status.parse().map_err(PaymentError::CorruptRecord)?,
            transaction_ref: row.try_get("transaction_ref")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }

    async fn status_of(&self, order_id: OrderId) -> Result<Option<PaymentStatus>, PaymentError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM payments WHERE order_id = $1")
                .bind(order_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        status
            .map(|status| status.parse().map_err(PaymentError::CorruptRecord))
            .transpose()
    }
}

#[async_trait]
impl PaymentProcessor for PostgresPaymentProcessor {
    #[tracing::instrument(skip(self))]
    async fn process_payment(
        &self,
        order_id: OrderId,
        user_id: UserId,
        amount: Money,
        method: PaymentMethod,
    ) -> Result<PaymentOutcome, PaymentError> {
        if amount.is_negative() {
            return Ok(PaymentOutcome::rejected(format!("Invalid amount {amount}")));
        }

        let mut record = PaymentRecord::processing(order_id, user_id, amount, method);
        let inserted = sqlx::query(
            r#"
            INSERT INTO payments
                (id, order_id, user_id, amount_cents, method, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(order_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(amount.cents())
        .bind(method.as_str())
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            let status = self
                .status_of(order_id)
                .await?
                .ok_or(PaymentError::NotFound(order_id))?;
            tracing::warn!(%status, "duplicate payment request");
            metrics::counter!("payment_duplicates_total").increment(1);
            return Ok(PaymentOutcome::duplicate(order_id, status));
        }

        let outcome = record.settle(self.policy.settle(amount, method))?;
        sqlx::query(
            r#"
            UPDATE payments SET status = $2, transaction_ref = $3, updated_at = $4
            WHERE order_id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(record.status.as_str())
        .bind(record.transaction_ref.as_deref())
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(status = %record.status, "payment settled");
        Ok(outcome)
    }

    #[tracing::instrument(skip(self))]
    async fn refund_payment(&self, order_id: OrderId) -> Result<(), PaymentError> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET status = 'REFUNDED', updated_at = $2
            WHERE order_id = $1 AND status = 'COMPLETED'
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let status = self
                .status_of(order_id)
                .await?
                .ok_or(PaymentError::NotFound(order_id))?;
            let err = PaymentError::IllegalState {
                order_id,
                status,
                action: "refund",
            };
            tracing::error!(error = %err, "payment contract violation");
            return Err(err);
        }
        Ok(())
    }

    async fn payment(&self, order_id: OrderId) -> Result<Option<PaymentRecord>, PaymentError> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, order_id, user_id, amount_cents, method, status, transaction_ref,
                   created_at, updated_at
            FROM payments
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }
}
