//! Database initialization
//!
//! Creates the SQLite file on first run, applies connection pragmas and
//! creates every table idempotently. `init_schema` is split out so callers
//! holding their own pool (tests use `sqlite::memory:`) get the same schema.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets reconciliation workers read while another commits
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and default settings (idempotent)
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    create_settings_table(pool).await?;
    create_deliveries_cycles_tables(pool).await?;
    create_deliveries_table(pool).await?;
    create_depots_tables(pool).await?;
    create_pricing_tables(pool).await?;
    create_memberships_tables(pool).await?;
    create_baskets_tables(pool).await?;

    crate::db::settings::init_default_settings(pool).await?;

    Ok(())
}

/// Create the settings table
///
/// Stores tenant configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_deliveries_cycles_tables(pool: &SqlitePool) -> Result<()> {
    // weekdays/months/names are JSON documents
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deliveries_cycles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            names TEXT NOT NULL,
            public_names TEXT NOT NULL DEFAULT '{}',
            weekdays TEXT NOT NULL DEFAULT '[0,1,2,3,4,5,6]',
            months TEXT NOT NULL DEFAULT '[1,2,3,4,5,6,7,8,9,10,11,12]',
            week_numbers TEXT NOT NULL DEFAULT 'all',
            results TEXT NOT NULL DEFAULT 'all',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deliveries_cycle_counts (
            deliveries_cycle_id INTEGER NOT NULL
                REFERENCES deliveries_cycles(id) ON DELETE CASCADE,
            fiscal_year INTEGER NOT NULL,
            count INTEGER NOT NULL,
            PRIMARY KEY (deliveries_cycle_id, fiscal_year)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_deliveries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deliveries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_deliveries_date ON deliveries(date)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_depots_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS depots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // No cascade on the cycle side: a cycle in use by a depot cannot be deleted
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS depots_deliveries_cycles (
            depot_id INTEGER NOT NULL REFERENCES depots(id) ON DELETE CASCADE,
            deliveries_cycle_id INTEGER NOT NULL REFERENCES deliveries_cycles(id),
            PRIMARY KEY (depot_id, deliveries_cycle_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_pricing_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS basket_sizes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            price REAL NOT NULL CHECK (price >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS basket_complements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            price REAL NOT NULL CHECK (price >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS basket_complements_deliveries (
            basket_complement_id INTEGER NOT NULL
                REFERENCES basket_complements(id) ON DELETE CASCADE,
            delivery_id INTEGER NOT NULL REFERENCES deliveries(id) ON DELETE CASCADE,
            PRIMARY KEY (basket_complement_id, delivery_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_memberships_tables(pool: &SqlitePool) -> Result<()> {
    // basket_size_id and basket_complement_id are plain references: pricing
    // rows can disappear, which the reconciler reports as pricing failures
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS memberships (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            member_name TEXT NOT NULL,
            depot_id INTEGER NOT NULL REFERENCES depots(id),
            deliveries_cycle_id INTEGER NOT NULL REFERENCES deliveries_cycles(id),
            basket_size_id INTEGER NOT NULL,
            basket_price REAL,
            basket_price_extra REAL NOT NULL DEFAULT 0,
            basket_quantity INTEGER NOT NULL DEFAULT 1 CHECK (basket_quantity >= 1),
            started_on TEXT NOT NULL,
            ended_on TEXT NOT NULL,
            price REAL NOT NULL DEFAULT 0,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (started_on <= ended_on)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_memberships_cycle ON memberships(deliveries_cycle_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_memberships_depot ON memberships(depot_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS memberships_basket_complements (
            membership_id INTEGER NOT NULL REFERENCES memberships(id) ON DELETE CASCADE,
            basket_complement_id INTEGER NOT NULL,
            quantity INTEGER NOT NULL DEFAULT 1 CHECK (quantity >= 1),
            price REAL,
            deliveries_cycle_id INTEGER REFERENCES deliveries_cycles(id),
            PRIMARY KEY (membership_id, basket_complement_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_baskets_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS baskets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            membership_id INTEGER NOT NULL REFERENCES memberships(id) ON DELETE CASCADE,
            delivery_id INTEGER NOT NULL REFERENCES deliveries(id) ON DELETE CASCADE,
            basket_size_id INTEGER NOT NULL,
            basket_price REAL NOT NULL,
            quantity INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (membership_id, delivery_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_baskets_delivery ON baskets(delivery_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS baskets_basket_complements (
            basket_id INTEGER NOT NULL REFERENCES baskets(id) ON DELETE CASCADE,
            basket_complement_id INTEGER NOT NULL,
            quantity INTEGER NOT NULL CHECK (quantity >= 1),
            price REAL NOT NULL CHECK (price >= 0),
            PRIMARY KEY (basket_id, basket_complement_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
