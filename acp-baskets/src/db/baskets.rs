//! Basket persistence
//!
//! Baskets are only ever written through [`commit_reconciliation`], which
//! applies a whole reconciliation (cycle reassignment, removals, additions
//! and the membership price) as one transaction.

use acp_common::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use super::to_u32;
use crate::models::{Basket, BasketComplementLine, NewBasket};

/// Baskets of a membership, ascending by delivery date
pub async fn load_baskets(pool: &SqlitePool, membership_id: i64) -> Result<Vec<Basket>> {
    let rows = sqlx::query(
        r#"
        SELECT b.id, b.membership_id, b.delivery_id, d.date AS delivery_date,
               b.basket_size_id, b.basket_price, b.quantity
        FROM baskets b
        JOIN deliveries d ON d.id = b.delivery_id
        WHERE b.membership_id = ?
        ORDER BY d.date, d.id
        "#,
    )
    .bind(membership_id)
    .fetch_all(pool)
    .await?;

    let mut baskets = rows
        .iter()
        .map(|row| {
            Ok(Basket {
                id: row.try_get("id")?,
                membership_id: row.try_get("membership_id")?,
                delivery_id: row.try_get("delivery_id")?,
                delivery_date: row.try_get("delivery_date")?,
                basket_size_id: row.try_get("basket_size_id")?,
                basket_price: row.try_get("basket_price")?,
                quantity: to_u32(row.try_get("quantity")?, "basket quantity")?,
                complements: Vec::new(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let rows = sqlx::query(
        r#"
        SELECT bc.basket_id, bc.basket_complement_id, bc.quantity, bc.price
        FROM baskets_basket_complements bc
        JOIN baskets b ON b.id = bc.basket_id
        WHERE b.membership_id = ?
        ORDER BY bc.basket_id, bc.basket_complement_id
        "#,
    )
    .bind(membership_id)
    .fetch_all(pool)
    .await?;

    let mut lines: HashMap<i64, Vec<BasketComplementLine>> = HashMap::new();
    for row in &rows {
        let basket_id: i64 = row.try_get("basket_id")?;
        lines.entry(basket_id).or_default().push(BasketComplementLine {
            basket_complement_id: row.try_get("basket_complement_id")?,
            quantity: to_u32(row.try_get("quantity")?, "complement quantity")?,
            price: row.try_get("price")?,
        });
    }
    for basket in &mut baskets {
        if let Some(complements) = lines.remove(&basket.id) {
            basket.complements = complements;
        }
    }

    Ok(baskets)
}

/// Everything one reconciliation writes
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationCommit {
    pub membership_id: i64,
    pub deliveries_cycle_id: i64,
    pub remove_basket_ids: Vec<i64>,
    pub add: Vec<NewBasket>,
}

/// Apply a reconciliation atomically and return the new membership price
///
/// The price is summed inside the transaction so it always matches the
/// committed basket set.
pub async fn commit_reconciliation(pool: &SqlitePool, commit: &ReconciliationCommit) -> Result<f64> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE memberships SET deliveries_cycle_id = ? WHERE id = ? AND deliveries_cycle_id != ?",
    )
    .bind(commit.deliveries_cycle_id)
    .bind(commit.membership_id)
    .bind(commit.deliveries_cycle_id)
    .execute(&mut *tx)
    .await?;

    for basket_id in &commit.remove_basket_ids {
        sqlx::query("DELETE FROM baskets WHERE id = ? AND membership_id = ?")
            .bind(basket_id)
            .bind(commit.membership_id)
            .execute(&mut *tx)
            .await?;
    }

    for basket in &commit.add {
        let result = sqlx::query(
            r#"
            INSERT INTO baskets (membership_id, delivery_id, basket_size_id, basket_price, quantity)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(commit.membership_id)
        .bind(basket.delivery.id)
        .bind(basket.basket_size_id)
        .bind(basket.basket_price)
        .bind(i64::from(basket.quantity))
        .execute(&mut *tx)
        .await?;
        let basket_id = result.last_insert_rowid();

        for line in &basket.complements {
            sqlx::query(
                r#"
                INSERT INTO baskets_basket_complements (basket_id, basket_complement_id, quantity, price)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(basket_id)
            .bind(line.basket_complement_id)
            .bind(i64::from(line.quantity))
            .bind(line.price)
            .execute(&mut *tx)
            .await?;
        }
    }

    let baskets_total: f64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(basket_price * quantity), 0.0) FROM baskets WHERE membership_id = ?",
    )
    .bind(commit.membership_id)
    .fetch_one(&mut *tx)
    .await?;
    let complements_total: f64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(bc.price * bc.quantity), 0.0)
        FROM baskets_basket_complements bc
        JOIN baskets b ON b.id = bc.basket_id
        WHERE b.membership_id = ?
        "#,
    )
    .bind(commit.membership_id)
    .fetch_one(&mut *tx)
    .await?;
    let price = baskets_total + complements_total;

    sqlx::query("UPDATE memberships SET price = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(price)
        .bind(commit.membership_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(price)
}
