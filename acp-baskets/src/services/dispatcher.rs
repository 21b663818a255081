//! Recomputation dispatcher
//!
//! Turns change notifications into membership reconciliations:
//!
//! - **Fan-out at enqueue:** [`Dispatcher::notify`] resolves the impacted
//!   memberships immediately, so a delivery that is about to disappear can
//!   still be traced to the memberships holding it.
//! - **Dedup while queued:** a membership already waiting in the queue is not
//!   queued twice. It leaves the pending set when a worker picks it up, so a
//!   change arriving during a run schedules one more run.
//! - **Per-membership lock:** two runs for the same membership never
//!   interleave, queued or direct through [`Dispatcher::reconcile_locked`];
//!   the later one waits.
//! - **Failures:** transient storage errors are retried with backoff, every
//!   other failure goes straight to the event bus as `ReconciliationFailed`.

use acp_common::db::load_tenant_settings;
use acp_common::events::{AcpEvent, EventBus};
use acp_common::time::Clock;
use acp_common::Result;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::db;
use crate::services::reconciler::{CycleResolution, ReconcileError, ReconcileOutcome, Reconciler};
use crate::utils::{retry_transient, RetryPolicy};

/// Data change that may invalidate membership baskets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecomputeEvent {
    CycleSaved {
        cycle_id: i64,
    },
    DepotCyclesChanged {
        depot_id: i64,
    },
    DeliveryCreated {
        delivery_id: i64,
        date: NaiveDate,
    },
    DeliveryDateChanged {
        delivery_id: i64,
        old_date: NaiveDate,
        new_date: NaiveDate,
    },
    /// `membership_ids` are the basket holders, resolved before the delete
    DeliveryDeleted {
        delivery_id: i64,
        date: NaiveDate,
        membership_ids: Vec<i64>,
    },
}

/// Worker pool reconciling memberships in the background
pub struct Dispatcher {
    pool: SqlitePool,
    reconciler: Reconciler,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    policy: RetryPolicy,
    worker_count: usize,

    queue_tx: mpsc::UnboundedSender<i64>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<i64>>,

    /// Memberships queued but not yet picked up
    pending: Mutex<HashSet<i64>>,

    /// Membership id → run lock, dropped once nobody holds it
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,

    /// Memberships queued or running
    outstanding: watch::Sender<usize>,

    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        pool: SqlitePool,
        reconciler: Reconciler,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        policy: RetryPolicy,
        worker_count: usize,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (outstanding, _) = watch::channel(0);

        Self {
            pool,
            reconciler,
            clock,
            event_bus,
            policy,
            worker_count: worker_count.max(1),
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            pending: Mutex::new(HashSet::new()),
            locks: Mutex::new(HashMap::new()),
            outstanding,
            cancel: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker tasks
    ///
    /// Memberships scheduled before this call stay queued until it happens.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        if !workers.is_empty() {
            return;
        }

        for worker_id in 0..self.worker_count {
            let dispatcher = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                debug!(worker_id, "Reconciliation worker started");
                dispatcher.worker_loop().await;
                debug!(worker_id, "Reconciliation worker stopped");
            }));
        }
        info!(workers = self.worker_count, "Recomputation dispatcher started");
    }

    /// Schedule every membership impacted by `event`, returns how many
    pub async fn notify(&self, event: RecomputeEvent) -> Result<usize> {
        let impacted = self.impacted_memberships(&event).await?;
        debug!(?event, impacted = impacted.len(), "Recompute event");
        for membership_id in &impacted {
            self.schedule(*membership_id);
        }
        Ok(impacted.len())
    }

    /// Queue one membership, `false` when it was already waiting
    pub fn schedule(&self, membership_id: i64) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if !pending.insert(membership_id) {
            return false;
        }

        self.outstanding.send_modify(|n| *n += 1);
        if self.queue_tx.send(membership_id).is_err() {
            pending.remove(&membership_id);
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
            warn!(membership_id, "Dispatcher queue closed, membership not scheduled");
            return false;
        }
        true
    }

    /// Memberships a change may affect, ascending by id
    pub async fn impacted_memberships(&self, event: &RecomputeEvent) -> Result<Vec<i64>> {
        let mut ids = BTreeSet::new();

        match event {
            RecomputeEvent::CycleSaved { cycle_id } => {
                ids.extend(db::memberships::membership_ids_for_cycle(&self.pool, *cycle_id).await?);
            }
            RecomputeEvent::DepotCyclesChanged { depot_id } => {
                ids.extend(db::memberships::membership_ids_for_depot(&self.pool, *depot_id).await?);
            }
            RecomputeEvent::DeliveryCreated { date, .. } => {
                ids.extend(self.active_in_fiscal_year_of(*date).await?);
            }
            RecomputeEvent::DeliveryDateChanged {
                delivery_id,
                old_date,
                new_date,
            } => {
                ids.extend(
                    db::memberships::membership_ids_with_basket_for(&self.pool, *delivery_id)
                        .await?,
                );
                ids.extend(self.active_in_fiscal_year_of(*old_date).await?);
                ids.extend(self.active_in_fiscal_year_of(*new_date).await?);
            }
            RecomputeEvent::DeliveryDeleted {
                date,
                membership_ids,
                ..
            } => {
                ids.extend(membership_ids.iter().copied());
                ids.extend(self.active_in_fiscal_year_of(*date).await?);
            }
        }

        Ok(ids.into_iter().collect())
    }

    /// Position filters renumber the whole fiscal year, so any calendar
    /// change can move baskets of every membership active in it
    async fn active_in_fiscal_year_of(&self, date: NaiveDate) -> Result<Vec<i64>> {
        let settings = load_tenant_settings(&self.pool).await?;
        let fiscal_year = settings.fiscal_year_for(date)?;
        db::memberships::membership_ids_active_between(
            &self.pool,
            fiscal_year.beginning(),
            fiscal_year.end(),
        )
        .await
    }

    /// Resolves once no membership is queued or running
    pub async fn wait_idle(&self) {
        let mut outstanding = self.outstanding.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = outstanding.wait_for(|n| *n == 0).await;
    }

    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Stop the workers once their current run completes
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let workers: Vec<_> = {
            let mut guard = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in workers {
            if let Err(e) = handle.await {
                error!("Reconciliation worker panicked: {}", e);
            }
        }
        info!("Recomputation dispatcher stopped");
    }

    /// Reconcile one membership now, under its lock and with retries
    ///
    /// Waits for a run of the same membership to finish first. Outcome and
    /// failure events reach the bus the same way as for queued runs.
    pub async fn reconcile_locked(
        &self,
        membership_id: i64,
    ) -> std::result::Result<ReconcileOutcome, ReconcileError> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(membership_id).or_default())
        };

        let result = {
            let _guard = lock.lock().await;
            let run_id = Uuid::new_v4();
            self.run(membership_id, run_id)
                .instrument(tracing::info_span!("reconcile", membership_id, %run_id))
                .await
        };

        drop(lock);
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&membership_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&membership_id);
        }
        result
    }

    async fn worker_loop(self: Arc<Self>) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                id = async { self.queue_rx.lock().await.recv().await } => id,
            };
            let Some(membership_id) = next else {
                break;
            };

            let _done = Done(&self.outstanding);
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&membership_id);

            // Own task, so a panicking run leaves this worker alive
            let dispatcher = Arc::clone(&self);
            let run = tokio::spawn(async move {
                // Failures are already on the event bus
                let _ = dispatcher.reconcile_locked(membership_id).await;
            });
            if let Err(e) = run.await {
                error!(membership_id, "Reconciliation run panicked: {}", e);
            }
        }
    }

    async fn run(
        &self,
        membership_id: i64,
        run_id: Uuid,
    ) -> std::result::Result<ReconcileOutcome, ReconcileError> {
        let as_of = self.clock.today();
        let reconciler = &self.reconciler;

        let outcome = retry_transient("reconcile_membership", &self.policy, move || {
            reconciler.reconcile(membership_id, as_of)
        })
        .await;
        let attempts = outcome.attempts;

        match outcome.result {
            Ok(outcome) => {
                match &outcome.cycle {
                    CycleResolution::Kept => {}
                    CycleResolution::Reassigned { from, to } => {
                        self.event_bus.emit_lossy(AcpEvent::MembershipCycleReassigned {
                            membership_id,
                            from_cycle_id: *from,
                            to_cycle_id: *to,
                            timestamp: acp_common::time::now(),
                        });
                    }
                    CycleResolution::Unavailable { message } => {
                        self.event_bus.emit_lossy(AcpEvent::ConfigurationWarning {
                            membership_id,
                            message: message.clone(),
                            timestamp: acp_common::time::now(),
                        });
                    }
                }

                self.event_bus.emit_lossy(AcpEvent::MembershipReconciled {
                    membership_id,
                    run_id,
                    added: outcome.added.len(),
                    removed: outcome.removed.len(),
                    price: outcome.price,
                    timestamp: acp_common::time::now(),
                });
                Ok(outcome)
            }
            Err(err @ ReconcileError::MembershipNotFound(_)) => {
                debug!("Membership gone before its run, nothing to do");
                Err(err)
            }
            Err(err) => {
                error!(attempts, error = %err, "Reconciliation failed, membership left unchanged");
                if let Some(kind) = err.failure_kind() {
                    self.event_bus.emit_lossy(AcpEvent::ReconciliationFailed {
                        membership_id,
                        run_id,
                        kind,
                        attempts,
                        error: err.to_string(),
                        timestamp: acp_common::time::now(),
                    });
                }
                Err(err)
            }
        }
    }
}

/// Marks one picked-up membership as no longer outstanding when dropped
struct Done<'a>(&'a watch::Sender<usize>);

impl Drop for Done<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pricing::SqlitePricing;
    use crate::services::matcher::Matcher;
    use acp_common::db::init_schema;
    use acp_common::time::FixedClock;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    async fn dispatcher() -> Arc<Dispatcher> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();

        let reconciler = Reconciler::new(
            pool.clone(),
            Matcher::new(pool.clone()),
            Arc::new(SqlitePricing::new(pool.clone())),
        );
        let clock = FixedClock::new(NaiveDate::from_ymd_opt(2022, 1, 1).unwrap());
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        };
        Arc::new(Dispatcher::new(
            pool,
            reconciler,
            Arc::new(clock),
            EventBus::new(16),
            policy,
            2,
        ))
    }

    #[tokio::test]
    async fn test_schedule_dedups_while_queued() {
        let dispatcher = dispatcher().await;

        assert!(dispatcher.schedule(7));
        assert!(!dispatcher.schedule(7));
        assert!(dispatcher.schedule(8));
        assert_eq!(dispatcher.outstanding(), 2);
    }

    #[tokio::test]
    async fn test_missing_membership_drains_quietly() {
        let dispatcher = dispatcher().await;
        let mut events = dispatcher.event_bus.subscribe();

        dispatcher.schedule(42);
        dispatcher.start();
        tokio::time::timeout(Duration::from_secs(5), dispatcher.wait_idle())
            .await
            .unwrap();

        assert_eq!(dispatcher.outstanding(), 0);
        assert!(events.try_recv().is_err());
        assert!(dispatcher.locks.lock().unwrap().is_empty());

        // Picked up, so the next schedule queues again
        assert!(dispatcher.schedule(42));
        dispatcher.wait_idle().await;
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconcile_locked_releases_its_lock() {
        let dispatcher = dispatcher().await;

        let result = dispatcher.reconcile_locked(42).await;
        assert!(matches!(result, Err(ReconcileError::MembershipNotFound(42))));
        assert!(dispatcher.locks.lock().unwrap().is_empty());
        assert_eq!(dispatcher.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_immediately_when_empty() {
        let dispatcher = dispatcher().await;
        tokio::time::timeout(Duration::from_millis(100), dispatcher.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_store_impacts_nobody() {
        let dispatcher = dispatcher().await;
        let date = NaiveDate::from_ymd_opt(2022, 1, 5).unwrap();

        let impacted = dispatcher
            .impacted_memberships(&RecomputeEvent::DeliveryDeleted {
                delivery_id: 1,
                date,
                membership_ids: vec![3, 1, 3],
            })
            .await
            .unwrap();
        assert_eq!(impacted, vec![1, 3]);

        let impacted = dispatcher
            .impacted_memberships(&RecomputeEvent::CycleSaved { cycle_id: 1 })
            .await
            .unwrap();
        assert!(impacted.is_empty());
    }
}
