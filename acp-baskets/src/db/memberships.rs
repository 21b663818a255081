//! Membership persistence and impacted-membership queries

use acp_common::{Error, Result};
use chrono::NaiveDate;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use super::to_u32;
use crate::models::{Membership, MembershipComplement, NewMembership};

fn membership_from_row(row: &SqliteRow) -> Result<Membership> {
    Ok(Membership {
        id: row.try_get("id")?,
        member_name: row.try_get("member_name")?,
        depot_id: row.try_get("depot_id")?,
        deliveries_cycle_id: row.try_get("deliveries_cycle_id")?,
        basket_size_id: row.try_get("basket_size_id")?,
        basket_price: row.try_get("basket_price")?,
        basket_price_extra: row.try_get("basket_price_extra")?,
        basket_quantity: to_u32(row.try_get("basket_quantity")?, "basket quantity")?,
        started_on: row.try_get("started_on")?,
        ended_on: row.try_get("ended_on")?,
        price: row.try_get("price")?,
        complements: Vec::new(),
    })
}

/// Insert a membership and its subscribed complements
///
/// The membership starts without baskets and with a zero price; the
/// reconciler fills both in.
pub async fn insert_membership(pool: &SqlitePool, membership: &NewMembership) -> Result<i64> {
    if membership.started_on > membership.ended_on {
        return Err(Error::InvalidInput(format!(
            "membership starts on {} after it ends on {}",
            membership.started_on, membership.ended_on
        )));
    }

    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        INSERT INTO memberships (
            member_name, depot_id, deliveries_cycle_id, basket_size_id,
            basket_price, basket_price_extra, basket_quantity, started_on, ended_on
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&membership.member_name)
    .bind(membership.depot_id)
    .bind(membership.deliveries_cycle_id)
    .bind(membership.basket_size_id)
    .bind(membership.basket_price)
    .bind(membership.basket_price_extra)
    .bind(i64::from(membership.basket_quantity))
    .bind(membership.started_on)
    .bind(membership.ended_on)
    .execute(&mut *tx)
    .await?;
    let id = result.last_insert_rowid();

    for complement in &membership.complements {
        sqlx::query(
            r#"
            INSERT INTO memberships_basket_complements (
                membership_id, basket_complement_id, quantity, price, deliveries_cycle_id
            ) VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(complement.basket_complement_id)
        .bind(i64::from(complement.quantity))
        .bind(complement.price)
        .bind(complement.deliveries_cycle_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(id)
}

pub async fn load_membership(pool: &SqlitePool, id: i64) -> Result<Option<Membership>> {
    let row = sqlx::query(
        r#"
        SELECT id, member_name, depot_id, deliveries_cycle_id, basket_size_id, basket_price,
               basket_price_extra, basket_quantity, started_on, ended_on, price
        FROM memberships
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut membership = membership_from_row(&row)?;

    let rows = sqlx::query(
        r#"
        SELECT basket_complement_id, quantity, price, deliveries_cycle_id
        FROM memberships_basket_complements
        WHERE membership_id = ?
        ORDER BY basket_complement_id
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    membership.complements = rows
        .iter()
        .map(|row| {
            Ok(MembershipComplement {
                basket_complement_id: row.try_get("basket_complement_id")?,
                quantity: to_u32(row.try_get("quantity")?, "complement quantity")?,
                price: row.try_get("price")?,
                deliveries_cycle_id: row.try_get("deliveries_cycle_id")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(membership))
}

pub async fn get_membership(pool: &SqlitePool, id: i64) -> Result<Membership> {
    load_membership(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("membership {}", id)))
}

/// Shorten or extend a membership
pub async fn update_membership_end(pool: &SqlitePool, id: i64, ended_on: NaiveDate) -> Result<()> {
    let result = sqlx::query(
        "UPDATE memberships SET ended_on = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND started_on <= ?",
    )
    .bind(ended_on)
    .bind(id)
    .bind(ended_on)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::InvalidInput(format!(
            "membership {} cannot end on {}",
            id, ended_on
        )));
    }
    Ok(())
}

pub async fn all_membership_ids(pool: &SqlitePool) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM memberships ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

/// Memberships using the cycle, directly or through a complement
pub async fn membership_ids_for_cycle(pool: &SqlitePool, cycle_id: i64) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM memberships WHERE deliveries_cycle_id = ?
        UNION
        SELECT membership_id FROM memberships_basket_complements WHERE deliveries_cycle_id = ?
        ORDER BY 1
        "#,
    )
    .bind(cycle_id)
    .bind(cycle_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

pub async fn membership_ids_for_depot(pool: &SqlitePool, depot_id: i64) -> Result<Vec<i64>> {
    let ids: Vec<i64> =
        sqlx::query_scalar("SELECT id FROM memberships WHERE depot_id = ? ORDER BY id")
            .bind(depot_id)
            .fetch_all(pool)
            .await?;
    Ok(ids)
}

/// Memberships whose range intersects `[from, to]`
pub async fn membership_ids_active_between(
    pool: &SqlitePool,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM memberships WHERE started_on <= ? AND ended_on >= ? ORDER BY id",
    )
    .bind(to)
    .bind(from)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Memberships holding a basket for the delivery
pub async fn membership_ids_with_basket_for(pool: &SqlitePool, delivery_id: i64) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT membership_id FROM baskets WHERE delivery_id = ? ORDER BY membership_id",
    )
    .bind(delivery_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}
