//! Delivery calendar service
//!
//! Calendar changes shift matched positions for every cycle, so each one
//! refreshes all cycle counts before notifying the dispatcher.

use acp_common::Result;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

use crate::db;
use crate::models::Delivery;
use crate::services::count_cache::CountCache;
use crate::services::dispatcher::{Dispatcher, RecomputeEvent};

#[derive(Clone)]
pub struct CalendarService {
    pool: SqlitePool,
    count_cache: CountCache,
    dispatcher: Arc<Dispatcher>,
}

impl CalendarService {
    pub fn new(pool: SqlitePool, count_cache: CountCache, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            pool,
            count_cache,
            dispatcher,
        }
    }

    pub async fn create_delivery(&self, date: NaiveDate) -> Result<Delivery> {
        let delivery = db::deliveries::insert_delivery(&self.pool, date).await?;
        self.count_cache.refresh_all().await?;

        let scheduled = self
            .dispatcher
            .notify(RecomputeEvent::DeliveryCreated {
                delivery_id: delivery.id,
                date,
            })
            .await?;

        info!(delivery_id = delivery.id, %date, scheduled, "Created delivery");
        Ok(delivery)
    }

    pub async fn move_delivery(&self, delivery_id: i64, new_date: NaiveDate) -> Result<Delivery> {
        let old = db::deliveries::get_delivery(&self.pool, delivery_id).await?;
        db::deliveries::update_delivery_date(&self.pool, delivery_id, new_date).await?;
        self.count_cache.refresh_all().await?;

        let scheduled = self
            .dispatcher
            .notify(RecomputeEvent::DeliveryDateChanged {
                delivery_id,
                old_date: old.date,
                new_date,
            })
            .await?;

        info!(delivery_id, old_date = %old.date, %new_date, scheduled, "Moved delivery");
        Ok(Delivery {
            id: delivery_id,
            date: new_date,
        })
    }

    /// Delete a delivery together with its baskets
    pub async fn delete_delivery(&self, delivery_id: i64) -> Result<()> {
        let delivery = db::deliveries::get_delivery(&self.pool, delivery_id).await?;
        let holders = db::memberships::membership_ids_with_basket_for(&self.pool, delivery_id).await?;

        db::deliveries::delete_delivery(&self.pool, delivery_id).await?;
        self.count_cache.refresh_all().await?;

        let scheduled = self
            .dispatcher
            .notify(RecomputeEvent::DeliveryDeleted {
                delivery_id,
                date: delivery.date,
                membership_ids: holders,
            })
            .await?;

        info!(delivery_id, date = %delivery.date, scheduled, "Deleted delivery");
        Ok(())
    }
}
