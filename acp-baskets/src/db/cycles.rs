//! Delivery cycle persistence and the cycle count cache table

use acp_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::BTreeMap;

use super::{from_json, to_json, to_u32};
use crate::models::{DeliveryCycle, ResultFilter, WeekParity};

const CYCLE_COLUMNS: &str = "id, names, public_names, weekdays, months, week_numbers, results";

fn cycle_from_row(row: &SqliteRow) -> Result<DeliveryCycle> {
    let names: String = row.try_get("names")?;
    let public_names: String = row.try_get("public_names")?;
    let weekdays: String = row.try_get("weekdays")?;
    let months: String = row.try_get("months")?;
    let week_numbers: String = row.try_get("week_numbers")?;
    let results: String = row.try_get("results")?;

    let mut cycle = DeliveryCycle::new(from_json(&names, "cycle names")?);
    cycle.id = row.try_get("id")?;
    cycle.public_names = from_json(&public_names, "cycle public names")?;
    cycle.set_weekdays(from_json::<Vec<i64>>(&weekdays, "cycle weekdays")?);
    cycle.set_months(from_json::<Vec<i64>>(&months, "cycle months")?);
    cycle.week_parity = week_numbers.parse::<WeekParity>()?;
    cycle.result_filter = results.parse::<ResultFilter>()?;
    Ok(cycle)
}

/// Insert a cycle, returning its id
pub async fn insert_cycle(pool: &SqlitePool, cycle: &DeliveryCycle) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO deliveries_cycles (names, public_names, weekdays, months, week_numbers, results)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(to_json(&cycle.names, "cycle names")?)
    .bind(to_json(&cycle.public_names, "cycle public names")?)
    .bind(to_json(&cycle.weekdays(), "cycle weekdays")?)
    .bind(to_json(&cycle.months(), "cycle months")?)
    .bind(cycle.week_parity.as_str())
    .bind(cycle.result_filter.as_str())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Overwrite a stored cycle definition
pub async fn update_cycle(pool: &SqlitePool, cycle: &DeliveryCycle) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE deliveries_cycles
        SET names = ?, public_names = ?, weekdays = ?, months = ?,
            week_numbers = ?, results = ?, updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(to_json(&cycle.names, "cycle names")?)
    .bind(to_json(&cycle.public_names, "cycle public names")?)
    .bind(to_json(&cycle.weekdays(), "cycle weekdays")?)
    .bind(to_json(&cycle.months(), "cycle months")?)
    .bind(cycle.week_parity.as_str())
    .bind(cycle.result_filter.as_str())
    .bind(cycle.id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("deliveries cycle {}", cycle.id)));
    }
    Ok(())
}

pub async fn load_cycle(pool: &SqlitePool, id: i64) -> Result<Option<DeliveryCycle>> {
    let sql = format!("SELECT {} FROM deliveries_cycles WHERE id = ?", CYCLE_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(cycle_from_row).transpose()
}

pub async fn get_cycle(pool: &SqlitePool, id: i64) -> Result<DeliveryCycle> {
    load_cycle(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("deliveries cycle {}", id)))
}

/// All cycles, ordered by name in the tenant's first language, then id
pub async fn list_cycles(pool: &SqlitePool, languages: &[String]) -> Result<Vec<DeliveryCycle>> {
    let sql = format!("SELECT {} FROM deliveries_cycles", CYCLE_COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    let mut cycles = rows.iter().map(cycle_from_row).collect::<Result<Vec<_>>>()?;
    cycles.sort_by_cached_key(|c| c.ordering_key(languages));
    Ok(cycles)
}

pub async fn count_cycles(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deliveries_cycles")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Number of depots offering the cycle
pub async fn count_depot_references(pool: &SqlitePool, id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM depots_deliveries_cycles WHERE deliveries_cycle_id = ?",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Number of membership complements restricted to the cycle
pub async fn count_complement_references(pool: &SqlitePool, id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM memberships_basket_complements WHERE deliveries_cycle_id = ?",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Number of memberships delivered on the cycle
pub async fn count_membership_references(pool: &SqlitePool, id: i64) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM memberships WHERE deliveries_cycle_id = ?")
            .bind(id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

pub async fn delete_cycle(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM deliveries_cycles WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("deliveries cycle {}", id)));
    }
    Ok(())
}

/// Replace every cached count of a cycle in one transaction
pub async fn replace_counts(
    pool: &SqlitePool,
    cycle_id: i64,
    counts: &BTreeMap<i32, u32>,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM deliveries_cycle_counts WHERE deliveries_cycle_id = ?")
        .bind(cycle_id)
        .execute(&mut *tx)
        .await?;

    for (fiscal_year, count) in counts {
        sqlx::query(
            "INSERT INTO deliveries_cycle_counts (deliveries_cycle_id, fiscal_year, count) \
             VALUES (?, ?, ?)",
        )
        .bind(cycle_id)
        .bind(*fiscal_year)
        .bind(i64::from(*count))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Cached counts of a cycle, fiscal year → matched deliveries
pub async fn load_counts(pool: &SqlitePool, cycle_id: i64) -> Result<BTreeMap<i32, u32>> {
    let rows = sqlx::query(
        "SELECT fiscal_year, count FROM deliveries_cycle_counts WHERE deliveries_cycle_id = ?",
    )
    .bind(cycle_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let fiscal_year: i32 = row.try_get("fiscal_year")?;
            let count: i64 = row.try_get("count")?;
            Ok((fiscal_year, to_u32(count, "cycle count")?))
        })
        .collect()
}

/// Cached count for one fiscal year, 0 when absent
pub async fn load_count(pool: &SqlitePool, cycle_id: i64, fiscal_year: i32) -> Result<u32> {
    let count: Option<i64> = sqlx::query_scalar(
        "SELECT count FROM deliveries_cycle_counts \
         WHERE deliveries_cycle_id = ? AND fiscal_year = ?",
    )
    .bind(cycle_id)
    .bind(fiscal_year)
    .fetch_optional(pool)
    .await?;

    to_u32(count.unwrap_or(0), "cycle count")
}
