//! Basket size and complement catalog, and the price lookup seam

use acp_common::{Error, FiscalYear, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::models::Delivery;

/// Price lookup used when new baskets are created
#[async_trait]
pub trait Pricing: Send + Sync {
    /// Per-delivery price of a basket size during a fiscal year
    async fn basket_price(&self, basket_size_id: i64, fiscal_year: FiscalYear) -> Result<f64>;

    /// Price of one complement on a delivery
    async fn complement_price(&self, basket_complement_id: i64, delivery: &Delivery) -> Result<f64>;
}

/// Prices read from the `basket_sizes` and `basket_complements` tables
#[derive(Clone)]
pub struct SqlitePricing {
    pool: SqlitePool,
}

impl SqlitePricing {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Pricing for SqlitePricing {
    async fn basket_price(&self, basket_size_id: i64, _fiscal_year: FiscalYear) -> Result<f64> {
        let price: Option<f64> = sqlx::query_scalar("SELECT price FROM basket_sizes WHERE id = ?")
            .bind(basket_size_id)
            .fetch_optional(&self.pool)
            .await?;
        price.ok_or_else(|| Error::NotFound(format!("basket size {}", basket_size_id)))
    }

    async fn complement_price(&self, basket_complement_id: i64, _delivery: &Delivery) -> Result<f64> {
        let price: Option<f64> =
            sqlx::query_scalar("SELECT price FROM basket_complements WHERE id = ?")
                .bind(basket_complement_id)
                .fetch_optional(&self.pool)
                .await?;
        price.ok_or_else(|| Error::NotFound(format!("basket complement {}", basket_complement_id)))
    }
}

pub async fn insert_basket_size(pool: &SqlitePool, name: &str, price: f64) -> Result<i64> {
    let result = sqlx::query("INSERT INTO basket_sizes (name, price) VALUES (?, ?)")
        .bind(name)
        .bind(price)
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

pub async fn delete_basket_size(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM basket_sizes WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Insert a complement available on the given deliveries
pub async fn insert_basket_complement(
    pool: &SqlitePool,
    name: &str,
    price: f64,
    delivery_ids: &[i64],
) -> Result<i64> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query("INSERT INTO basket_complements (name, price) VALUES (?, ?)")
        .bind(name)
        .bind(price)
        .execute(&mut *tx)
        .await?;
    let id = result.last_insert_rowid();

    for delivery_id in delivery_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO basket_complements_deliveries (basket_complement_id, delivery_id) \
             VALUES (?, ?)",
        )
        .bind(id)
        .bind(delivery_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(id)
}

/// Deliveries on which a complement can be ordered
pub async fn complement_delivery_ids(pool: &SqlitePool, basket_complement_id: i64) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT delivery_id FROM basket_complements_deliveries \
         WHERE basket_complement_id = ? ORDER BY delivery_id",
    )
    .bind(basket_complement_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}
