//! Membership service
//!
//! New memberships get their baskets right away; later edits go through the
//! dispatcher like every other change.

use acp_common::{Error, Result};
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db;
use crate::models::{Basket, Membership, NewMembership};
use crate::services::dispatcher::Dispatcher;
use crate::services::reconciler::{ReconcileError, ReconcileOutcome};
use crate::utils::Retryable;

#[derive(Clone)]
pub struct MembershipService {
    pool: SqlitePool,
    dispatcher: Arc<Dispatcher>,
}

impl MembershipService {
    pub fn new(pool: SqlitePool, dispatcher: Arc<Dispatcher>) -> Self {
        Self { pool, dispatcher }
    }

    /// Insert a membership and create its baskets from today on
    ///
    /// Fails when its cycle is unknown. A reconciliation failure after the
    /// insert is returned; when it was transient the membership is queued
    /// again so its baskets still get created.
    pub async fn create_membership(
        &self,
        membership: &NewMembership,
    ) -> std::result::Result<(Membership, ReconcileOutcome), ReconcileError> {
        db::cycles::get_cycle(&self.pool, membership.deliveries_cycle_id).await?;
        let id = db::memberships::insert_membership(&self.pool, membership).await?;
        info!(membership_id = id, member = %membership.member_name, "Created membership");

        let outcome = match self.dispatcher.reconcile_locked(id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                if err.is_retryable() {
                    warn!(
                        membership_id = id,
                        error = %err,
                        "First reconciliation failed, membership rescheduled"
                    );
                    self.dispatcher.schedule(id);
                }
                return Err(err);
            }
        };
        let membership = db::memberships::get_membership(&self.pool, id).await?;
        Ok((membership, outcome))
    }

    /// Move the end of a membership, baskets follow in the background
    pub async fn terminate_membership(&self, membership_id: i64, ended_on: NaiveDate) -> Result<()> {
        let membership = db::memberships::get_membership(&self.pool, membership_id).await?;
        if ended_on < membership.started_on {
            return Err(Error::InvalidInput(format!(
                "membership {} cannot end on {} before it starts on {}",
                membership_id, ended_on, membership.started_on
            )));
        }

        db::memberships::update_membership_end(&self.pool, membership_id, ended_on).await?;
        self.dispatcher.schedule(membership_id);
        info!(membership_id, %ended_on, "Changed membership end");
        Ok(())
    }

    pub async fn membership(&self, membership_id: i64) -> Result<Membership> {
        db::memberships::get_membership(&self.pool, membership_id).await
    }

    /// Baskets of a membership, ascending by delivery date
    pub async fn baskets(&self, membership_id: i64) -> Result<Vec<Basket>> {
        db::baskets::load_baskets(&self.pool, membership_id).await
    }

    /// Reconcile now instead of through the queue, after any running pass
    pub async fn reconcile_now(
        &self,
        membership_id: i64,
    ) -> std::result::Result<ReconcileOutcome, ReconcileError> {
        self.dispatcher.reconcile_locked(membership_id).await
    }
}
