//! Shared fixtures for basket engine integration tests
//!
//! A single-connection in-memory database seeded with:
//! - a basket size priced 30 per delivery
//! - a depot offering one default cycle (every weekday, every month)
//! - Wednesday and Thursday deliveries of the first three weeks of 2022
//! - one membership covering January 2022

#![allow(dead_code)]

use acp_baskets::db;
use acp_baskets::models::{Delivery, DeliveryCycle, NewMembership};
use acp_baskets::Engine;
use acp_common::config::EngineConfig;
use acp_common::db::init_schema;
use acp_common::events::AcpEvent;
use acp_common::time::FixedClock;
use chrono::NaiveDate;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const BASKET_PRICE: f64 = 30.0;

pub const JANUARY_DATES: [&str; 6] = [
    "2022-01-05",
    "2022-01-06",
    "2022-01-12",
    "2022-01-13",
    "2022-01-19",
    "2022-01-20",
];

pub fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

pub fn names(name: &str) -> BTreeMap<String, String> {
    let mut names = BTreeMap::new();
    names.insert("fr".to_string(), name.to_string());
    names
}

pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_schema(&pool).await.unwrap();
    pool
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        worker_count: 2,
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 10,
        ..EngineConfig::default()
    }
}

pub struct Fixture {
    pub engine: Engine,
    pub clock: FixedClock,
    pub basket_size_id: i64,
    pub depot_id: i64,
    pub cycle: DeliveryCycle,
    pub deliveries: Vec<Delivery>,
}

impl Fixture {
    /// Seeded engine with today pinned to 2022-01-01
    pub async fn new() -> Self {
        Self::with_engine(|pool, clock| {
            let pricing = Arc::new(db::pricing::SqlitePricing::new(pool.clone()));
            Engine::new(pool, &test_config(), Arc::new(clock), pricing)
        })
        .await
    }

    /// Same seed data on an engine built by `build`
    pub async fn with_engine(build: impl FnOnce(SqlitePool, FixedClock) -> Engine) -> Self {
        let pool = memory_pool().await;
        let clock = FixedClock::new(date("2022-01-01"));
        let engine = build(pool.clone(), clock.clone());

        let basket_size_id = db::pricing::insert_basket_size(&pool, "Eveil", BASKET_PRICE)
            .await
            .unwrap();

        let mut deliveries = Vec::new();
        for day in JANUARY_DATES {
            deliveries.push(db::deliveries::insert_delivery(&pool, date(day)).await.unwrap());
        }

        let cycle = engine.cycles.create_default(names("Tous")).await.unwrap();
        let depot = engine.depots.create_depot("Jardin", &[cycle.id]).await.unwrap();

        Self {
            engine,
            clock,
            basket_size_id,
            depot_id: depot.id,
            cycle,
            deliveries,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.engine.db
    }

    pub fn delivery(&self, day: &str) -> Delivery {
        let day = date(day);
        *self.deliveries.iter().find(|d| d.date == day).unwrap()
    }

    /// January 2022 membership on the fixture cycle
    pub fn new_membership(&self) -> NewMembership {
        NewMembership {
            member_name: "Jane Doe".to_string(),
            depot_id: self.depot_id,
            deliveries_cycle_id: self.cycle.id,
            basket_size_id: self.basket_size_id,
            basket_price: None,
            basket_price_extra: 0.0,
            basket_quantity: 1,
            started_on: date("2022-01-01"),
            ended_on: date("2022-01-31"),
            complements: Vec::new(),
        }
    }

    pub async fn create_membership(&self) -> i64 {
        self.create(self.new_membership()).await
    }

    pub async fn create(&self, membership: NewMembership) -> i64 {
        let (membership, _) = self
            .engine
            .memberships
            .create_membership(&membership)
            .await
            .unwrap();
        membership.id
    }

    /// Dates of the membership's baskets, ascending
    pub async fn basket_dates(&self, membership_id: i64) -> Vec<String> {
        self.engine
            .memberships
            .baskets(membership_id)
            .await
            .unwrap()
            .iter()
            .map(|b| b.delivery_date.to_string())
            .collect()
    }

    pub async fn price(&self, membership_id: i64) -> f64 {
        self.engine
            .memberships
            .membership(membership_id)
            .await
            .unwrap()
            .price
    }

    pub async fn idle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.engine.wait_idle())
            .await
            .expect("dispatcher did not become idle");
    }

    /// Save the fixture cycle with new weekdays and wait for the fan-out
    pub async fn set_weekdays(&mut self, weekdays: &[i64]) {
        self.cycle.set_weekdays(weekdays.iter().copied());
        self.engine.cycles.update(&self.cycle).await.unwrap();
        self.idle().await;
    }
}

/// Events received so far, without waiting
pub fn drain(events: &mut broadcast::Receiver<AcpEvent>) -> Vec<AcpEvent> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}
