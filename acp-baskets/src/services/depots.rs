//! Depot service

use acp_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

use crate::db;
use crate::models::Depot;
use crate::services::count_cache::CountCache;
use crate::services::dispatcher::{Dispatcher, RecomputeEvent};

#[derive(Clone)]
pub struct DepotService {
    pool: SqlitePool,
    count_cache: CountCache,
    dispatcher: Arc<Dispatcher>,
}

impl DepotService {
    pub fn new(pool: SqlitePool, count_cache: CountCache, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            pool,
            count_cache,
            dispatcher,
        }
    }

    pub async fn create_depot(&self, name: &str, cycle_ids: &[i64]) -> Result<Depot> {
        let depot = db::depots::insert_depot(&self.pool, name).await?;
        db::depots::set_depot_cycles(&self.pool, depot.id, cycle_ids).await?;
        info!(depot_id = depot.id, cycles = cycle_ids.len(), "Created depot");
        Ok(depot)
    }

    /// Replace the cycles a depot offers, members follow in the background
    pub async fn set_cycles(&self, depot_id: i64, cycle_ids: &[i64]) -> Result<usize> {
        db::depots::set_depot_cycles(&self.pool, depot_id, cycle_ids).await?;
        let scheduled = self
            .dispatcher
            .notify(RecomputeEvent::DepotCyclesChanged { depot_id })
            .await?;

        info!(depot_id, cycles = cycle_ids.len(), scheduled, "Changed depot cycles");
        Ok(scheduled)
    }

    pub async fn cycle_ids(&self, depot_id: i64) -> Result<Vec<i64>> {
        db::depots::cycles_for_depot(&self.pool, depot_id).await
    }

    /// Deliveries count of each depot cycle, in cycle order
    pub async fn delivery_counts(&self, depot_id: i64) -> Result<Vec<u32>> {
        self.count_cache.depot_delivery_counts(depot_id).await
    }
}
