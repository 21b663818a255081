//! Engine on a file database with a multi-connection pool

mod helpers;

use acp_baskets::db;
use acp_baskets::models::{DeliveryCycle, NewMembership};
use acp_baskets::Engine;
use acp_common::db::init_database;
use acp_common::time::FixedClock;
use helpers::{date, names, test_config, JANUARY_DATES};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_many_memberships_reconcile_concurrently() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("acp.db")).await.unwrap();
    let clock = FixedClock::new(date("2022-01-01"));
    let pricing = Arc::new(db::pricing::SqlitePricing::new(pool.clone()));
    let mut config = test_config();
    config.worker_count = 4;
    let engine = Engine::new(pool.clone(), &config, Arc::new(clock), pricing);

    let basket_size_id = db::pricing::insert_basket_size(&pool, "Grand", 40.0).await.unwrap();
    for day in JANUARY_DATES {
        db::deliveries::insert_delivery(&pool, date(day)).await.unwrap();
    }
    let mut cycle = engine.cycles.create_default(names("Tous")).await.unwrap();
    let depot = engine.depots.create_depot("Marché", &[cycle.id]).await.unwrap();

    let mut ids = Vec::new();
    for i in 0..12 {
        let membership = NewMembership {
            member_name: format!("Member {}", i),
            depot_id: depot.id,
            deliveries_cycle_id: cycle.id,
            basket_size_id,
            basket_price: None,
            basket_price_extra: 0.0,
            basket_quantity: 1,
            started_on: date("2022-01-01"),
            ended_on: date("2022-12-31"),
            complements: Vec::new(),
        };
        let (membership, outcome) = engine.memberships.create_membership(&membership).await.unwrap();
        assert_eq!(outcome.added.len(), 6);
        ids.push(membership.id);
    }

    // Back-to-back saves, the last definition wins
    cycle.set_weekdays([3]);
    engine.cycles.update(&cycle).await.unwrap();
    cycle.set_weekdays([4]);
    engine.cycles.update(&cycle).await.unwrap();
    tokio::time::timeout(Duration::from_secs(30), engine.wait_idle())
        .await
        .unwrap();

    for id in ids {
        let baskets = engine.memberships.baskets(id).await.unwrap();
        let dates: Vec<String> = baskets.iter().map(|b| b.delivery_date.to_string()).collect();
        assert_eq!(dates, ["2022-01-06", "2022-01-13", "2022-01-20"]);
        assert_eq!(engine.memberships.membership(id).await.unwrap().price, 120.0);
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn test_unknown_cycle_is_rejected_on_create() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("acp.db")).await.unwrap();
    let engine = Engine::with_defaults(pool.clone(), &test_config());

    let cycle = engine
        .cycles
        .create(DeliveryCycle::new(names("Tous")))
        .await
        .unwrap();
    let depot = engine.depots.create_depot("Ferme", &[cycle.id]).await.unwrap();

    let membership = NewMembership {
        member_name: "Nobody".to_string(),
        depot_id: depot.id,
        deliveries_cycle_id: cycle.id + 100,
        basket_size_id: 1,
        basket_price: None,
        basket_price_extra: 0.0,
        basket_quantity: 1,
        started_on: date("2022-01-01"),
        ended_on: date("2022-12-31"),
        complements: Vec::new(),
    };

    assert!(engine.memberships.create_membership(&membership).await.is_err());
    assert!(db::memberships::all_membership_ids(&pool).await.unwrap().is_empty());
    engine.shutdown().await;
}
