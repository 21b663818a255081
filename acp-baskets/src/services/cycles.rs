//! Deliveries cycle service
//!
//! Every cycle save refreshes the cycle's count cache synchronously and then
//! schedules the memberships using it.

use acp_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::db;
use crate::models::DeliveryCycle;
use crate::services::count_cache::CountCache;
use crate::services::dispatcher::{Dispatcher, RecomputeEvent};

#[derive(Clone)]
pub struct CycleService {
    pool: SqlitePool,
    count_cache: CountCache,
    dispatcher: Arc<Dispatcher>,
}

impl CycleService {
    pub fn new(pool: SqlitePool, count_cache: CountCache, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            pool,
            count_cache,
            dispatcher,
        }
    }

    /// Insert a new cycle and compute its counts, returns the stored cycle
    pub async fn create(&self, mut cycle: DeliveryCycle) -> Result<DeliveryCycle> {
        if !cycle.has_name() {
            return Err(Error::InvalidInput(
                "deliveries cycle needs at least one name".to_string(),
            ));
        }

        cycle.id = db::cycles::insert_cycle(&self.pool, &cycle).await?;
        self.count_cache.refresh(&cycle).await?;

        info!(cycle_id = cycle.id, "Created deliveries cycle");
        Ok(cycle)
    }

    /// Default cycle: every weekday of every month, no filters
    pub async fn create_default(&self, names: BTreeMap<String, String>) -> Result<DeliveryCycle> {
        self.create(DeliveryCycle::new(names)).await
    }

    /// Save an edited cycle
    ///
    /// Counts are fresh when this returns; impacted memberships are
    /// reconciled in the background.
    pub async fn update(&self, cycle: &DeliveryCycle) -> Result<usize> {
        if !cycle.has_name() {
            return Err(Error::InvalidInput(format!(
                "deliveries cycle {} needs at least one name",
                cycle.id
            )));
        }

        db::cycles::update_cycle(&self.pool, cycle).await?;
        self.count_cache.refresh(cycle).await?;
        let scheduled = self
            .dispatcher
            .notify(RecomputeEvent::CycleSaved { cycle_id: cycle.id })
            .await?;

        info!(cycle_id = cycle.id, scheduled, "Saved deliveries cycle");
        Ok(scheduled)
    }

    /// A cycle can go when no depot, complement or membership uses it and it
    /// is not the last one
    pub async fn can_destroy(&self, cycle_id: i64) -> Result<bool> {
        if db::cycles::count_depot_references(&self.pool, cycle_id).await? > 0 {
            return Ok(false);
        }
        if db::cycles::count_membership_references(&self.pool, cycle_id).await? > 0 {
            return Ok(false);
        }
        if db::cycles::count_complement_references(&self.pool, cycle_id).await? > 0 {
            return Ok(false);
        }
        Ok(db::cycles::count_cycles(&self.pool).await? > 1)
    }

    pub async fn destroy(&self, cycle_id: i64) -> Result<()> {
        db::cycles::get_cycle(&self.pool, cycle_id).await?;
        if !self.can_destroy(cycle_id).await? {
            return Err(Error::InvalidInput(format!(
                "deliveries cycle {} is still in use or is the last one",
                cycle_id
            )));
        }

        db::cycles::delete_cycle(&self.pool, cycle_id).await?;
        info!(cycle_id, "Deleted deliveries cycle");
        Ok(())
    }
}
