//! Order persistence. Every multi-step mutation (reservation + order write,
//! reservation + paid transition) runs inside a single transaction; the
//! conditional `UPDATE ... WHERE status = 'PENDING'` takes the row lock, so
//! concurrent webhook deliveries for the same order serialize on it.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{OrderError, Result};
use crate::inventory;
use crate::models::{AddressSnapshot, Order, OrderLine, OrderStatus};

pub struct NewOrder {
    pub user_id: i64,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub payment_method: String,
    pub provider_order_ref: Option<String>,
    pub provider_payment_ref: Option<String>,
    pub provider_signature: Option<String>,
    pub address: AddressSnapshot,
}

pub struct NewOrderLine {
    pub product_id: i64,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWithLines {
    #[serde(flatten)]
    pub order: Order,
    pub lines: Vec<OrderLine>,
}

/// Result of the two-key provider-reference lookup.
pub enum RefLookup {
    NotFound,
    Found(Order),
    /// Both references present but resolving to different orders: a
    /// data-integrity failure, logged by the caller, never auto-resolved.
    Conflict,
}

/// Outcome of a paid-reconciliation attempt.
pub enum PaidOutcome {
    /// Transitioned to `PAID` with stock reserved in the same transaction.
    Applied(Order),
    /// Order was already `PAID` or in a terminal state; nothing changed.
    AlreadySettled,
}

/// The store operations webhook reconciliation is built on. The reconciler
/// takes these behind a trait object so its transition sequencing can be
/// exercised against an in-memory double.
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    async fn find_by_provider_refs(
        &self,
        provider_order_ref: Option<&str>,
        provider_payment_ref: Option<&str>,
    ) -> Result<RefLookup>;

    async fn apply_paid(
        &self,
        order_id: Uuid,
        provider_payment_ref: Option<&str>,
        provider_order_ref: Option<&str>,
    ) -> Result<PaidOutcome>;

    async fn apply_failed(
        &self,
        order_id: Uuid,
        provider_payment_ref: Option<&str>,
        provider_order_ref: Option<&str>,
    ) -> Result<Option<Order>>;

    async fn backfill_refs(
        &self,
        order_id: Uuid,
        provider_payment_ref: Option<&str>,
        provider_order_ref: Option<&str>,
    ) -> Result<()>;
}

#[async_trait]
impl ReconciliationStore for OrderStore {
    async fn find_by_provider_refs(
        &self,
        provider_order_ref: Option<&str>,
        provider_payment_ref: Option<&str>,
    ) -> Result<RefLookup> {
        OrderStore::find_by_provider_refs(self, provider_order_ref, provider_payment_ref).await
    }

    async fn apply_paid(
        &self,
        order_id: Uuid,
        provider_payment_ref: Option<&str>,
        provider_order_ref: Option<&str>,
    ) -> Result<PaidOutcome> {
        OrderStore::apply_paid(self, order_id, provider_payment_ref, provider_order_ref).await
    }

    async fn apply_failed(
        &self,
        order_id: Uuid,
        provider_payment_ref: Option<&str>,
        provider_order_ref: Option<&str>,
    ) -> Result<Option<Order>> {
        OrderStore::apply_failed(self, order_id, provider_payment_ref, provider_order_ref).await
    }

    async fn backfill_refs(
        &self,
        order_id: Uuid,
        provider_payment_ref: Option<&str>,
        provider_order_ref: Option<&str>,
    ) -> Result<()> {
        OrderStore::backfill_refs(self, order_id, provider_payment_ref, provider_order_ref).await
    }
}

#[derive(Clone)]
pub struct OrderStore {
    pool: PgPool,
}

impl OrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the order and its lines atomically. With
    /// `reserve_stock`, every line is reserved through the inventory guard
    /// inside the same transaction; any shortfall aborts the whole write.
    pub async fn create_with_lines(
        &self,
        new_order: NewOrder,
        lines: Vec<NewOrderLine>,
        reserve_stock: bool,
    ) -> Result<OrderWithLines> {
        let mut tx = self.pool.begin().await?;

        if reserve_stock {
            for line in &lines {
                inventory::reserve(&mut tx, line.product_id, line.quantity).await?;
            }
        }

        let order = sqlx::query_as::<_, Order>(
            "INSERT INTO orders (id, user_id, status, total_amount, payment_method,
                 provider_order_ref, provider_payment_ref, provider_signature,
                 address_line1, address_line2, city, state, postal_code, country, phone)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(new_order.user_id)
        .bind(new_order.status)
        .bind(new_order.total_amount)
        .bind(&new_order.payment_method)
        .bind(&new_order.provider_order_ref)
        .bind(&new_order.provider_payment_ref)
        .bind(&new_order.provider_signature)
        .bind(&new_order.address.address_line1)
        .bind(&new_order.address.address_line2)
        .bind(&new_order.address.city)
        .bind(&new_order.address.state)
        .bind(&new_order.address.postal_code)
        .bind(&new_order.address.country)
        .bind(&new_order.address.phone)
        .fetch_one(&mut *tx)
        .await?;

        let mut created_lines = Vec::with_capacity(lines.len());
        for line in &lines {
            let created = sqlx::query_as::<_, OrderLine>(
                "INSERT INTO order_lines (id, order_id, product_id, quantity, unit_price)
                 VALUES ($1, $2, $3, $4, $5) RETURNING *",
            )
            .bind(Uuid::now_v7())
            .bind(order.id)
            .bind(line.product_id)
            .bind(line.quantity)
            .bind(line.unit_price)
            .fetch_one(&mut *tx)
            .await?;
            created_lines.push(created);
        }

        tx.commit().await?;
        Ok(OrderWithLines {
            order,
            lines: created_lines,
        })
    }

    pub async fn find_user_orders(&self, user_id: i64) -> Result<Vec<OrderWithLines>> {
        let orders = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut lines = sqlx::query_as::<_, OrderLine>(
            "SELECT * FROM order_lines WHERE order_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders
            .into_iter()
            .map(|order| {
                let (own, rest): (Vec<_>, Vec<_>) =
                    lines.drain(..).partition(|l| l.order_id == order.id);
                lines = rest;
                OrderWithLines { order, lines: own }
            })
            .collect())
    }

    pub async fn find_user_order(&self, user_id: i64, order_id: Uuid) -> Result<OrderWithLines> {
        let order = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE id = $1 AND user_id = $2",
        )
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(OrderError::NotFound)?;

        let lines = self.lines_for(order_id).await?;
        Ok(OrderWithLines { order, lines })
    }

    pub async fn lines_for(&self, order_id: Uuid) -> Result<Vec<OrderLine>> {
        Ok(
            sqlx::query_as::<_, OrderLine>("SELECT * FROM order_lines WHERE order_id = $1")
                .bind(order_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Two-key lookup by provider references. A well-formed system never has
    /// the two references pointing at different orders; if it happens the
    /// caller gets `Conflict` and must log it rather than pick a winner.
    pub async fn find_by_provider_refs(
        &self,
        provider_order_ref: Option<&str>,
        provider_payment_ref: Option<&str>,
    ) -> Result<RefLookup> {
        let matches = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders
             WHERE ($1::TEXT IS NOT NULL AND provider_order_ref = $1)
                OR ($2::TEXT IS NOT NULL AND provider_payment_ref = $2)",
        )
        .bind(provider_order_ref)
        .bind(provider_payment_ref)
        .fetch_all(&self.pool)
        .await?;

        let mut iter = matches.into_iter();
        match iter.next() {
            None => Ok(RefLookup::NotFound),
            Some(first) => {
                if iter.any(|other| other.id != first.id) {
                    Ok(RefLookup::Conflict)
                } else {
                    Ok(RefLookup::Found(first))
                }
            }
        }
    }

    /// Paid reconciliation: one transaction that moves a `PENDING` order to
    /// `PAID`, backfills missing provider references and reserves stock for
    /// every line. The conditional update makes redelivery a no-op; an
    /// `InsufficientStock` error rolls the whole transition back.
    pub async fn apply_paid(
        &self,
        order_id: Uuid,
        provider_payment_ref: Option<&str>,
        provider_order_ref: Option<&str>,
    ) -> Result<PaidOutcome> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, Order>(
            "UPDATE orders SET status = $2,
                 provider_payment_ref = COALESCE(provider_payment_ref, $3),
                 provider_order_ref = COALESCE(provider_order_ref, $4)
             WHERE id = $1 AND status = $5
             RETURNING *",
        )
        .bind(order_id)
        .bind(OrderStatus::Paid)
        .bind(provider_payment_ref)
        .bind(provider_order_ref)
        .bind(OrderStatus::Pending)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(order) = updated else {
            tx.rollback().await?;
            return Ok(PaidOutcome::AlreadySettled);
        };

        let lines = sqlx::query_as::<_, OrderLine>(
            "SELECT * FROM order_lines WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await?;

        for line in &lines {
            inventory::reserve(&mut tx, line.product_id, line.quantity).await?;
        }

        tx.commit().await?;
        Ok(PaidOutcome::Applied(order))
    }

    /// Failed reconciliation: cancel only a still-`PENDING` order (a paid
    /// order never moves back). Stock is untouched since pending orders hold
    /// none. When the order is past `PENDING`, only missing references are
    /// backfilled.
    pub async fn apply_failed(
        &self,
        order_id: Uuid,
        provider_payment_ref: Option<&str>,
        provider_order_ref: Option<&str>,
    ) -> Result<Option<Order>> {
        let cancelled = sqlx::query_as::<_, Order>(
            "UPDATE orders SET status = $2,
                 provider_payment_ref = COALESCE(provider_payment_ref, $3),
                 provider_order_ref = COALESCE(provider_order_ref, $4)
             WHERE id = $1 AND status = $5
             RETURNING *",
        )
        .bind(order_id)
        .bind(OrderStatus::Cancelled)
        .bind(provider_payment_ref)
        .bind(provider_order_ref)
        .bind(OrderStatus::Pending)
        .fetch_optional(&self.pool)
        .await?;

        if cancelled.is_none() {
            self.backfill_refs(order_id, provider_payment_ref, provider_order_ref)
                .await?;
        }
        Ok(cancelled)
    }

    /// Fill in provider references the order is still missing; never
    /// overwrites an existing value.
    pub async fn backfill_refs(
        &self,
        order_id: Uuid,
        provider_payment_ref: Option<&str>,
        provider_order_ref: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE orders SET
                 provider_payment_ref = COALESCE(provider_payment_ref, $2),
                 provider_order_ref = COALESCE(provider_order_ref, $3)
             WHERE id = $1",
        )
        .bind(order_id)
        .bind(provider_payment_ref)
        .bind(provider_order_ref)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// User-initiated cancellation, `PENDING` only. The status predicate in
    /// the update closes the race with a concurrent paid webhook.
    pub async fn cancel_pending(&self, user_id: i64, order_id: Uuid) -> Result<Order> {
        let order = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE id = $1 AND user_id = $2",
        )
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(OrderError::NotFound)?;

        if !order.status.is_user_cancellable() {
            return Err(OrderError::CannotCancel);
        }

        sqlx::query_as::<_, Order>(
            "UPDATE orders SET status = $2 WHERE id = $1 AND status = $3 RETURNING *",
        )
        .bind(order_id)
        .bind(OrderStatus::Cancelled)
        .bind(OrderStatus::Pending)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(OrderError::CannotCancel)
    }
}
