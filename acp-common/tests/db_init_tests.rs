//! Database initialization tests

use acp_common::db::{
    init_database, init_schema, load_tenant_settings, set_fiscal_year_start_month, set_languages,
    TenantSettings,
};
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("acp.db");

    let pool = init_database(&db_path).await;

    assert!(pool.is_ok(), "Database initialization failed: {:?}", pool.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("acp.db");

    let first = init_database(&db_path).await.unwrap();
    first.close().await;

    let second = init_database(&db_path).await;
    assert!(second.is_ok(), "Failed to reopen database: {:?}", second.err());
}

#[tokio::test]
async fn test_schema_is_idempotent_and_defaults_settings() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    init_schema(&pool).await.unwrap();
    init_schema(&pool).await.unwrap();

    let settings = load_tenant_settings(&pool).await.unwrap();
    assert_eq!(settings, TenantSettings::default());

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();
    for expected in [
        "baskets",
        "baskets_basket_complements",
        "deliveries",
        "deliveries_cycle_counts",
        "deliveries_cycles",
        "depots_deliveries_cycles",
        "memberships",
        "memberships_basket_complements",
    ] {
        assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
    }
}

#[tokio::test]
async fn test_tenant_settings_round_trip() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_schema(&pool).await.unwrap();

    set_fiscal_year_start_month(&pool, 4).await.unwrap();
    set_languages(&pool, &["de", "en"]).await.unwrap();
    assert!(set_fiscal_year_start_month(&pool, 13).await.is_err());

    let settings = load_tenant_settings(&pool).await.unwrap();
    assert_eq!(settings.fiscal_year_start_month, 4);
    assert_eq!(settings.languages, vec!["de".to_string()]);
}

#[tokio::test]
async fn test_basket_uniqueness_enforced() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_schema(&pool).await.unwrap();

    sqlx::query("INSERT INTO deliveries_cycles (id, names) VALUES (1, '{\"fr\":\"Toutes\"}')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO depots (id, name) VALUES (1, 'Ferme')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO deliveries (id, date) VALUES (1, '2022-01-05')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        r#"
        INSERT INTO memberships (id, member_name, depot_id, deliveries_cycle_id, basket_size_id,
                                 started_on, ended_on)
        VALUES (1, 'Alex', 1, 1, 1, '2022-01-01', '2022-12-31')
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let insert = "INSERT INTO baskets (membership_id, delivery_id, basket_size_id, basket_price) \
                  VALUES (1, 1, 1, 30.0)";
    sqlx::query(insert).execute(&pool).await.unwrap();
    assert!(sqlx::query(insert).execute(&pool).await.is_err());
}
