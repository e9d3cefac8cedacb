//! Inventory guard: conditional, atomic stock decrement.

use sqlx::{PgConnection, PgPool};

use crate::error::{OrderError, Result};

/// Decrement `quantity` from the product's stock iff the product is active
/// and holds at least that much. Runs on the caller's transaction
/// connection so a failure rolls back sibling reservations; a zero-row
/// update means the condition did not hold at commit time. No retry.
pub async fn reserve(conn: &mut PgConnection, product_id: i64, quantity: i32) -> Result<()> {
    let result = sqlx::query(
        "UPDATE products SET stock = stock - $2 WHERE id = $1 AND active AND stock >= $2",
    )
    .bind(product_id)
    .bind(quantity)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(OrderError::InsufficientStock(product_id));
    }
    Ok(())
}

/// Read-only sufficiency check for the intent-first flow; mutates nothing.
/// The answer can go stale before payment confirms, which is why the
/// reconciler re-reserves under a transaction when the order turns paid.
pub async fn check_available(pool: &PgPool, product_id: i64, quantity: i32) -> Result<()> {
    let stock: Option<(i32,)> =
        sqlx::query_as("SELECT stock FROM products WHERE id = $1 AND active")
            .bind(product_id)
            .fetch_optional(pool)
            .await?;

    match stock {
        Some((stock,)) if stock >= quantity => Ok(()),
        _ => Err(OrderError::InsufficientStock(product_id)),
    }
}
