//! Basket reconciler
//!
//! Brings a membership's basket set back in sync with its cycle:
//!
//! 1. resolve the effective cycle (reassign when the depot dropped it);
//! 2. match the cycle over every fiscal year the membership covers;
//! 3. add baskets for missing matched deliveries and remove baskets whose
//!    delivery no longer matches, both only from `as_of` onwards;
//! 4. commit the changes and the recomputed price in one transaction.
//!
//! Deliveries before `as_of` are frozen history: their baskets are never
//! created, deleted or repriced here. Every price is looked up before the
//! write transaction opens, so a pricing failure leaves the membership
//! exactly as it was.

use acp_common::db::{load_tenant_settings, TenantSettings};
use acp_common::events::FailureKind;
use acp_common::Error;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db;
use crate::db::baskets::ReconciliationCommit;
use crate::db::pricing::Pricing;
use crate::models::{BasketComplementLine, Delivery, DeliveryCycle, Membership, NewBasket};
use crate::services::matcher::Matcher;
use crate::utils::Retryable;

/// Reconciliation failure, classified for the dispatcher
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Membership deleted since it was scheduled
    #[error("membership {0} not found")]
    MembershipNotFound(i64),

    /// A basket size or complement price could not be looked up
    #[error("pricing unavailable: {0}")]
    PricingUnavailable(String),

    /// Storage failure that may succeed on retry
    #[error("transient storage error: {0}")]
    TransientStorage(#[source] Error),

    /// Storage failure retrying cannot fix
    #[error("storage error: {0}")]
    PermanentStorage(#[source] Error),
}

impl ReconcileError {
    /// Failure kind reported on the event bus, `None` when there is nothing
    /// to report
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ReconcileError::MembershipNotFound(_) => None,
            ReconcileError::PricingUnavailable(_) => Some(FailureKind::PricingUnavailable),
            ReconcileError::TransientStorage(_) => Some(FailureKind::TransientStorage),
            ReconcileError::PermanentStorage(_) => Some(FailureKind::PermanentStorage),
        }
    }
}

impl From<Error> for ReconcileError {
    fn from(err: Error) -> Self {
        if err.is_transient() {
            ReconcileError::TransientStorage(err)
        } else {
            ReconcileError::PermanentStorage(err)
        }
    }
}

impl Retryable for ReconcileError {
    fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::TransientStorage(_))
    }
}

/// Pricing errors are pricing failures unless the store itself is flaky
fn pricing_error(err: Error) -> ReconcileError {
    if err.is_transient() {
        ReconcileError::TransientStorage(err)
    } else {
        ReconcileError::PricingUnavailable(err.to_string())
    }
}

/// Chooses a replacement cycle when a membership's depot no longer offers
/// its current one
pub trait CycleReassignment: Send + Sync {
    /// `available` is the depot's cycle set in cycle order, never empty
    fn choose(&self, membership: &Membership, available: &[DeliveryCycle]) -> i64;
}

/// Picks the first available cycle in cycle order
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstByOrdering;

impl CycleReassignment for FirstByOrdering {
    fn choose(&self, _membership: &Membership, available: &[DeliveryCycle]) -> i64 {
        available[0].id
    }
}

/// How the effective cycle was resolved
#[derive(Debug, Clone, PartialEq)]
pub enum CycleResolution {
    /// Current cycle is offered by the depot
    Kept,
    /// Depot dropped the current cycle, membership moved
    Reassigned { from: i64, to: i64 },
    /// Depot offers no cycle at all, current cycle kept
    Unavailable { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub membership_id: i64,
    pub deliveries_cycle_id: i64,
    pub cycle: CycleResolution,
    pub added: Vec<Delivery>,
    pub removed: Vec<Delivery>,
    pub price: f64,
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.cycle == CycleResolution::Kept
    }
}

#[derive(Clone)]
pub struct Reconciler {
    pool: SqlitePool,
    matcher: Matcher,
    pricing: Arc<dyn Pricing>,
    reassignment: Arc<dyn CycleReassignment>,
}

impl Reconciler {
    pub fn new(pool: SqlitePool, matcher: Matcher, pricing: Arc<dyn Pricing>) -> Self {
        Self {
            pool,
            matcher,
            pricing,
            reassignment: Arc::new(FirstByOrdering),
        }
    }

    pub fn with_reassignment(mut self, reassignment: Arc<dyn CycleReassignment>) -> Self {
        self.reassignment = reassignment;
        self
    }

    /// Reconcile one membership, treating deliveries before `as_of` as frozen
    pub async fn reconcile(
        &self,
        membership_id: i64,
        as_of: NaiveDate,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let settings = load_tenant_settings(&self.pool).await?;
        let membership = db::memberships::load_membership(&self.pool, membership_id)
            .await?
            .ok_or(ReconcileError::MembershipNotFound(membership_id))?;

        let (cycle, resolution) = self.resolve_cycle(&membership, &settings).await?;
        if let CycleResolution::Unavailable { message } = &resolution {
            warn!(membership_id, depot_id = membership.depot_id, "{}", message);
        }

        let target = self
            .matcher
            .deliveries_between(
                &cycle,
                membership.started_on,
                membership.ended_on,
                settings.fiscal_year_start_month,
            )
            .await?;
        let target_ids: HashSet<i64> = target.iter().map(|d| d.id).collect();

        let existing = db::baskets::load_baskets(&self.pool, membership_id).await?;
        let existing_ids: HashSet<i64> = existing.iter().map(|b| b.delivery_id).collect();

        let to_add: Vec<Delivery> = target
            .iter()
            .filter(|d| d.date >= as_of && !existing_ids.contains(&d.id))
            .copied()
            .collect();
        let to_remove: Vec<_> = existing
            .iter()
            .filter(|b| b.delivery_date >= as_of && !target_ids.contains(&b.delivery_id))
            .collect();

        let stored_total: f64 = existing.iter().map(|b| b.total_price()).sum();
        if to_add.is_empty()
            && to_remove.is_empty()
            && cycle.id == membership.deliveries_cycle_id
            && (stored_total - membership.price).abs() < 1e-9
        {
            debug!(membership_id, "Baskets already in sync");
            return Ok(ReconcileOutcome {
                membership_id,
                deliveries_cycle_id: cycle.id,
                cycle: resolution,
                added: Vec::new(),
                removed: Vec::new(),
                price: membership.price,
            });
        }

        let new_baskets = self.price_baskets(&membership, &to_add, &settings).await?;

        let commit = ReconciliationCommit {
            membership_id,
            deliveries_cycle_id: cycle.id,
            remove_basket_ids: to_remove.iter().map(|b| b.id).collect(),
            add: new_baskets,
        };
        let price = db::baskets::commit_reconciliation(&self.pool, &commit).await?;

        let removed: Vec<Delivery> = to_remove
            .iter()
            .map(|b| Delivery {
                id: b.delivery_id,
                date: b.delivery_date,
            })
            .collect();

        info!(
            membership_id,
            cycle_id = cycle.id,
            added = to_add.len(),
            removed = removed.len(),
            price,
            "Reconciled membership baskets"
        );

        Ok(ReconcileOutcome {
            membership_id,
            deliveries_cycle_id: cycle.id,
            cycle: resolution,
            added: to_add,
            removed,
            price,
        })
    }

    /// Effective cycle of the membership per its depot's current cycle set
    async fn resolve_cycle(
        &self,
        membership: &Membership,
        settings: &TenantSettings,
    ) -> Result<(DeliveryCycle, CycleResolution), ReconcileError> {
        let current_id = membership.deliveries_cycle_id;
        let depot_cycle_ids = db::depots::cycles_for_depot(&self.pool, membership.depot_id).await?;

        if depot_cycle_ids.contains(&current_id) {
            let cycle = db::cycles::get_cycle(&self.pool, current_id).await?;
            return Ok((cycle, CycleResolution::Kept));
        }

        if depot_cycle_ids.is_empty() {
            let cycle = db::cycles::get_cycle(&self.pool, current_id).await?;
            let message = format!(
                "depot {} offers no deliveries cycle, keeping cycle {}",
                membership.depot_id, current_id
            );
            return Ok((cycle, CycleResolution::Unavailable { message }));
        }

        let available: Vec<DeliveryCycle> =
            db::cycles::list_cycles(&self.pool, &settings.languages)
                .await?
                .into_iter()
                .filter(|c| depot_cycle_ids.contains(&c.id))
                .collect();
        if available.is_empty() {
            return Err(ReconcileError::PermanentStorage(Error::NotFound(format!(
                "cycles {:?} of depot {}",
                depot_cycle_ids, membership.depot_id
            ))));
        }

        let chosen_id = self.reassignment.choose(membership, &available);
        let cycle = available
            .into_iter()
            .find(|c| c.id == chosen_id)
            .ok_or_else(|| {
                ReconcileError::PermanentStorage(Error::Internal(format!(
                    "reassignment chose cycle {} outside depot {}",
                    chosen_id, membership.depot_id
                )))
            })?;

        info!(
            membership_id = membership.id,
            from_cycle_id = current_id,
            to_cycle_id = cycle.id,
            "Reassigning membership to a cycle offered by its depot"
        );
        let to = cycle.id;
        Ok((
            cycle,
            CycleResolution::Reassigned {
                from: current_id,
                to,
            },
        ))
    }

    /// Price the baskets to create, complement lines included
    async fn price_baskets(
        &self,
        membership: &Membership,
        deliveries: &[Delivery],
        settings: &TenantSettings,
    ) -> Result<Vec<NewBasket>, ReconcileError> {
        if deliveries.is_empty() {
            return Ok(Vec::new());
        }

        let eligible = self
            .complement_eligibility(membership, deliveries, settings)
            .await?;

        let mut baskets = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            let base_price = match membership.basket_price {
                Some(price) => price,
                None => self
                    .pricing
                    .basket_price(membership.basket_size_id, settings.fiscal_year_for(delivery.date)?)
                    .await
                    .map_err(pricing_error)?,
            };

            let mut complements = Vec::new();
            for complement in &membership.complements {
                let available = eligible
                    .get(&complement.basket_complement_id)
                    .is_some_and(|ids| ids.contains(&delivery.id));
                if !available {
                    continue;
                }
                let price = match complement.price {
                    Some(price) => price,
                    None => self
                        .pricing
                        .complement_price(complement.basket_complement_id, delivery)
                        .await
                        .map_err(pricing_error)?,
                };
                complements.push(BasketComplementLine {
                    basket_complement_id: complement.basket_complement_id,
                    quantity: complement.quantity,
                    price,
                });
            }

            baskets.push(NewBasket {
                delivery: *delivery,
                basket_size_id: membership.basket_size_id,
                basket_price: base_price + membership.basket_price_extra,
                quantity: membership.basket_quantity,
                complements,
            });
        }
        Ok(baskets)
    }

    /// Complement id → deliveries (among `deliveries`) it applies to
    ///
    /// A complement applies when it is offered on the delivery and, if the
    /// subscription names a cycle, that cycle matches the delivery.
    async fn complement_eligibility(
        &self,
        membership: &Membership,
        deliveries: &[Delivery],
        settings: &TenantSettings,
    ) -> Result<HashMap<i64, HashSet<i64>>, ReconcileError> {
        let wanted: HashSet<i64> = deliveries.iter().map(|d| d.id).collect();
        let mut cycle_matches: HashMap<i64, HashSet<i64>> = HashMap::new();
        let mut eligible = HashMap::new();

        for complement in &membership.complements {
            let offered: HashSet<i64> =
                db::pricing::complement_delivery_ids(&self.pool, complement.basket_complement_id)
                    .await?
                    .into_iter()
                    .filter(|id| wanted.contains(id))
                    .collect();

            let applicable = match complement.deliveries_cycle_id {
                None => offered,
                Some(cycle_id) => {
                    if !cycle_matches.contains_key(&cycle_id) {
                        let cycle = db::cycles::get_cycle(&self.pool, cycle_id).await?;
                        let matched: HashSet<i64> = self
                            .matcher
                            .deliveries_between(
                                &cycle,
                                membership.started_on,
                                membership.ended_on,
                                settings.fiscal_year_start_month,
                            )
                            .await?
                            .into_iter()
                            .map(|d| d.id)
                            .collect();
                        cycle_matches.insert(cycle_id, matched);
                    }
                    let matched = &cycle_matches[&cycle_id];
                    offered.intersection(matched).copied().collect()
                }
            };
            eligible.insert(complement.basket_complement_id, applicable);
        }

        Ok(eligible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transient: ReconcileError = Error::Database(sqlx::Error::PoolTimedOut).into();
        assert!(transient.is_retryable());
        assert_eq!(transient.failure_kind(), Some(FailureKind::TransientStorage));

        let permanent: ReconcileError = Error::Database(sqlx::Error::RowNotFound).into();
        assert!(!permanent.is_retryable());
        assert_eq!(permanent.failure_kind(), Some(FailureKind::PermanentStorage));

        let pricing = pricing_error(Error::NotFound("basket size 3".to_string()));
        assert!(!pricing.is_retryable());
        assert_eq!(pricing.failure_kind(), Some(FailureKind::PricingUnavailable));

        assert_eq!(ReconcileError::MembershipNotFound(1).failure_kind(), None);
    }
}
