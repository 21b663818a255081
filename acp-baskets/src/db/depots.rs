//! Depots and their cycle associations

use acp_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use crate::models::Depot;

pub async fn insert_depot(pool: &SqlitePool, name: &str) -> Result<Depot> {
    let result = sqlx::query("INSERT INTO depots (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?;

    Ok(Depot {
        id: result.last_insert_rowid(),
        name: name.to_string(),
    })
}

pub async fn load_depot(pool: &SqlitePool, id: i64) -> Result<Option<Depot>> {
    let row = sqlx::query("SELECT id, name FROM depots WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(|row| {
        Ok(Depot {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    })
    .transpose()
}

/// Ids of the cycles a depot offers
pub async fn cycles_for_depot(pool: &SqlitePool, depot_id: i64) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT deliveries_cycle_id FROM depots_deliveries_cycles \
         WHERE depot_id = ? ORDER BY deliveries_cycle_id",
    )
    .bind(depot_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Replace the cycle set of a depot atomically
pub async fn set_depot_cycles(pool: &SqlitePool, depot_id: i64, cycle_ids: &[i64]) -> Result<()> {
    let mut tx = pool.begin().await?;

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM depots WHERE id = ?")
        .bind(depot_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(Error::NotFound(format!("depot {}", depot_id)));
    }

    sqlx::query("DELETE FROM depots_deliveries_cycles WHERE depot_id = ?")
        .bind(depot_id)
        .execute(&mut *tx)
        .await?;

    for cycle_id in cycle_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO depots_deliveries_cycles (depot_id, deliveries_cycle_id) \
             VALUES (?, ?)",
        )
        .bind(depot_id)
        .bind(cycle_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}
