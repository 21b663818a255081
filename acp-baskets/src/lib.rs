//! # ACP Basket Engine (acp-baskets)
//!
//! Delivery-cycle recurrence matching and membership basket recomputation.
//!
//! **Purpose:** Decide which calendar deliveries belong to each deliveries
//! cycle, keep the per-cycle delivery counts cached, and keep every
//! membership's baskets and price in sync when cycles, depots or the calendar
//! change.
//!
//! **Architecture:** SQLite through sqlx, one [`Engine`] wiring the matcher,
//! count cache, reconciler and a tokio worker pool behind the mutation
//! services.

pub mod db;
pub mod models;
pub mod services;
pub mod utils;

use acp_common::config::EngineConfig;
use acp_common::events::EventBus;
use acp_common::time::{Clock, SystemClock};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::db::pricing::{Pricing, SqlitePricing};
use crate::services::{
    CalendarService, CountCache, CycleReassignment, CycleService, DepotService, Dispatcher,
    FirstByOrdering, Matcher, MembershipService, Reconciler,
};
use crate::utils::RetryPolicy;

/// Engine state shared by the services
///
/// Building one spawns the dispatcher workers, so it must happen inside a
/// tokio runtime.
#[derive(Clone)]
pub struct Engine {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub clock: Arc<dyn Clock>,
    pub matcher: Matcher,
    pub count_cache: CountCache,
    pub reconciler: Reconciler,
    pub dispatcher: Arc<Dispatcher>,
    pub cycles: CycleService,
    pub calendar: CalendarService,
    pub depots: DepotService,
    pub memberships: MembershipService,
}

impl Engine {
    /// Engine on the system clock with prices read from the database
    pub fn with_defaults(db: SqlitePool, config: &EngineConfig) -> Self {
        let pricing = Arc::new(SqlitePricing::new(db.clone()));
        Self::new(db, config, Arc::new(SystemClock), pricing)
    }

    pub fn new(
        db: SqlitePool,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
        pricing: Arc<dyn Pricing>,
    ) -> Self {
        Self::with_reassignment(db, config, clock, pricing, Arc::new(FirstByOrdering))
    }

    pub fn with_reassignment(
        db: SqlitePool,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
        pricing: Arc<dyn Pricing>,
        reassignment: Arc<dyn CycleReassignment>,
    ) -> Self {
        let event_bus = EventBus::new(config.event_bus_capacity);
        let matcher = Matcher::new(db.clone());
        let count_cache = CountCache::new(
            db.clone(),
            matcher.clone(),
            Arc::clone(&clock),
            event_bus.clone(),
        );
        let reconciler =
            Reconciler::new(db.clone(), matcher.clone(), pricing).with_reassignment(reassignment);

        let dispatcher = Arc::new(Dispatcher::new(
            db.clone(),
            reconciler.clone(),
            Arc::clone(&clock),
            event_bus.clone(),
            RetryPolicy::from(config),
            config.worker_count,
        ));
        dispatcher.start();

        Self {
            cycles: CycleService::new(db.clone(), count_cache.clone(), Arc::clone(&dispatcher)),
            calendar: CalendarService::new(db.clone(), count_cache.clone(), Arc::clone(&dispatcher)),
            depots: DepotService::new(db.clone(), count_cache.clone(), Arc::clone(&dispatcher)),
            memberships: MembershipService::new(db.clone(), Arc::clone(&dispatcher)),
            db,
            event_bus,
            clock,
            matcher,
            count_cache,
            reconciler,
            dispatcher,
        }
    }

    /// Wait until every scheduled reconciliation has run
    pub async fn wait_idle(&self) {
        self.dispatcher.wait_idle().await;
    }

    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}
