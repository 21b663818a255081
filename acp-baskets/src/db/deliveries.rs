//! Delivery calendar persistence

use acp_common::{Error, FiscalYear, Result};
use chrono::NaiveDate;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::models::Delivery;

fn delivery_from_row(row: &SqliteRow) -> Result<Delivery> {
    Ok(Delivery {
        id: row.try_get("id")?,
        date: row.try_get("date")?,
    })
}

pub async fn insert_delivery(pool: &SqlitePool, date: NaiveDate) -> Result<Delivery> {
    let result = sqlx::query("INSERT INTO deliveries (date) VALUES (?)")
        .bind(date)
        .execute(pool)
        .await?;

    Ok(Delivery {
        id: result.last_insert_rowid(),
        date,
    })
}

/// Move a delivery to another date
pub async fn update_delivery_date(pool: &SqlitePool, id: i64, date: NaiveDate) -> Result<()> {
    let result = sqlx::query(
        "UPDATE deliveries SET date = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(date)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("delivery {}", id)));
    }
    Ok(())
}

/// Delete a delivery; its baskets go with it
pub async fn delete_delivery(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM deliveries WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("delivery {}", id)));
    }
    Ok(())
}

pub async fn find_delivery(pool: &SqlitePool, id: i64) -> Result<Option<Delivery>> {
    let row = sqlx::query("SELECT id, date FROM deliveries WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(delivery_from_row).transpose()
}

pub async fn get_delivery(pool: &SqlitePool, id: i64) -> Result<Delivery> {
    find_delivery(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("delivery {}", id)))
}

/// Deliveries within `[from, to]`, ascending by date then id
pub async fn list_deliveries_between(
    pool: &SqlitePool,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<Delivery>> {
    let rows = sqlx::query(
        "SELECT id, date FROM deliveries WHERE date >= ? AND date <= ? ORDER BY date, id",
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    rows.iter().map(delivery_from_row).collect()
}

/// Every delivery of a fiscal year, ascending by date then id
pub async fn list_deliveries(pool: &SqlitePool, fiscal_year: FiscalYear) -> Result<Vec<Delivery>> {
    list_deliveries_between(pool, fiscal_year.beginning(), fiscal_year.end()).await
}

pub async fn earliest_delivery_date(pool: &SqlitePool) -> Result<Option<NaiveDate>> {
    let date: Option<NaiveDate> = sqlx::query_scalar("SELECT MIN(date) FROM deliveries")
        .fetch_one(pool)
        .await?;
    Ok(date)
}
