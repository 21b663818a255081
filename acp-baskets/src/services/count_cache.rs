//! Cycle count cache
//!
//! Per-cycle, per-fiscal-year number of matched deliveries, stored in the
//! `deliveries_cycle_counts` table keyed by `(cycle_id, fiscal_year)`.
//! Invalidation contract: [`CountCache::refresh`] runs synchronously at the
//! end of every cycle save and [`CountCache::refresh_all`] after every
//! calendar change, so readers always see counts consistent with the
//! committed definitions.

use acp_common::db::{load_tenant_settings, TenantSettings};
use acp_common::events::{AcpEvent, EventBus};
use acp_common::time::Clock;
use acp_common::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::db;
use crate::models::{Delivery, DeliveryCycle};
use crate::services::matcher::Matcher;

#[derive(Clone)]
pub struct CountCache {
    pool: sqlx::SqlitePool,
    matcher: Matcher,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
}

impl CountCache {
    pub fn new(
        pool: sqlx::SqlitePool,
        matcher: Matcher,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            pool,
            matcher,
            clock,
            event_bus,
        }
    }

    /// Recompute the counts of one cycle
    ///
    /// Covers every fiscal year from the one of the earliest delivery (or the
    /// current one when the calendar is empty) through the next fiscal year.
    pub async fn refresh(&self, cycle: &DeliveryCycle) -> Result<BTreeMap<i32, u32>> {
        let settings = load_tenant_settings(&self.pool).await?;
        self.refresh_with(cycle, &settings).await
    }

    async fn refresh_with(
        &self,
        cycle: &DeliveryCycle,
        settings: &TenantSettings,
    ) -> Result<BTreeMap<i32, u32>> {
        let today = self.clock.today();
        let current = settings.current_fiscal_year(today)?;
        let first = match db::deliveries::earliest_delivery_date(&self.pool).await? {
            Some(date) => settings.fiscal_year_for(date)?,
            None => current,
        };
        let last = current.next();

        let mut counts = BTreeMap::new();
        let mut fiscal_year = first;
        while fiscal_year <= last {
            let matched = self.matcher.deliveries(cycle, fiscal_year).await?;
            counts.insert(fiscal_year.year(), matched.len() as u32);
            fiscal_year = fiscal_year.next();
        }

        db::cycles::replace_counts(&self.pool, cycle.id, &counts).await?;
        debug!(cycle_id = cycle.id, years = counts.len(), "Refreshed cycle counts");

        self.event_bus.emit_lossy(AcpEvent::CycleCountsRefreshed {
            cycle_id: cycle.id,
            counts: counts.clone(),
            timestamp: acp_common::time::now(),
        });

        Ok(counts)
    }

    /// Recompute the counts of every cycle, returns how many were refreshed
    pub async fn refresh_all(&self) -> Result<usize> {
        let settings = load_tenant_settings(&self.pool).await?;
        let cycles = db::cycles::list_cycles(&self.pool, &settings.languages).await?;
        for cycle in &cycles {
            self.refresh_with(cycle, &settings).await?;
        }
        Ok(cycles.len())
    }

    pub async fn counts(&self, cycle_id: i64) -> Result<BTreeMap<i32, u32>> {
        db::cycles::load_counts(&self.pool, cycle_id).await
    }

    /// Cached count for the current fiscal year
    pub async fn current_delivery_count(&self, cycle_id: i64) -> Result<u32> {
        let settings = load_tenant_settings(&self.pool).await?;
        let current = settings.current_fiscal_year(self.clock.today())?;
        db::cycles::load_count(&self.pool, cycle_id, current.year()).await
    }

    /// Cached count for the next fiscal year
    pub async fn next_delivery_count(&self, cycle_id: i64) -> Result<u32> {
        let settings = load_tenant_settings(&self.pool).await?;
        let next = settings.next_fiscal_year(self.clock.today())?;
        db::cycles::load_count(&self.pool, cycle_id, next.year()).await
    }

    /// Next fiscal year count, or the current one while next year has no
    /// scheduled delivery yet
    pub async fn deliveries_count(&self, cycle_id: i64) -> Result<u32> {
        let next = self.next_delivery_count(cycle_id).await?;
        if next > 0 {
            return Ok(next);
        }
        self.current_delivery_count(cycle_id).await
    }

    /// [`CountCache::deliveries_count`] of each cycle of a depot, in cycle order
    pub async fn depot_delivery_counts(&self, depot_id: i64) -> Result<Vec<u32>> {
        let settings = load_tenant_settings(&self.pool).await?;
        let depot_cycle_ids = db::depots::cycles_for_depot(&self.pool, depot_id).await?;
        let cycles = db::cycles::list_cycles(&self.pool, &settings.languages).await?;

        let mut counts = Vec::new();
        for cycle in cycles.iter().filter(|c| depot_cycle_ids.contains(&c.id)) {
            counts.push(self.deliveries_count(cycle.id).await?);
        }
        Ok(counts)
    }

    /// Earliest current or next fiscal year delivery on or after today
    pub async fn next_upcoming_delivery(&self, cycle: &DeliveryCycle) -> Result<Option<Delivery>> {
        let settings = load_tenant_settings(&self.pool).await?;
        let today = self.clock.today();
        let deliveries = self
            .matcher
            .current_and_future_deliveries(cycle, &settings, today)
            .await?;
        Ok(deliveries
            .into_iter()
            .filter(|d| d.date >= today)
            .min_by_key(|d| (d.date, d.id)))
    }
}
