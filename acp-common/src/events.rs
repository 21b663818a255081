//! Event types for the ACP event system
//!
//! The EventBus is the operational channel of the recomputation engine:
//! successful reconciliations, configuration warnings and reconciliation
//! failures are all broadcast here. Failures are never silently dropped; a
//! subscriber (log sink, alerting, tests) decides what to do with them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use uuid::Uuid;

/// How a failed reconciliation was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Price lookup failed, prior basket set preserved
    PricingUnavailable,
    /// Transient storage error that exhausted its retries
    TransientStorage,
    /// Storage error that retrying cannot fix
    PermanentStorage,
}

/// ACP event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AcpEvent {
    /// Cycle count cache rewritten for one cycle
    CycleCountsRefreshed {
        cycle_id: i64,
        /// Fiscal year → matched delivery count
        counts: BTreeMap<i32, u32>,
        timestamp: DateTime<Utc>,
    },

    /// Membership basket set brought in sync with its cycle
    MembershipReconciled {
        membership_id: i64,
        run_id: Uuid,
        added: usize,
        removed: usize,
        price: f64,
        timestamp: DateTime<Utc>,
    },

    /// Membership moved to another cycle because its depot dropped the old one
    MembershipCycleReassigned {
        membership_id: i64,
        from_cycle_id: i64,
        to_cycle_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// Membership depot has no cycle at all, current cycle kept
    ConfigurationWarning {
        membership_id: i64,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Reconciliation gave up; the membership keeps its last reconciled state
    ReconciliationFailed {
        membership_id: i64,
        run_id: Uuid,
        kind: FailureKind,
        attempts: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`AcpEvent`]
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AcpEvent>,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<AcpEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: AcpEvent) {
        let _ = self.tx.send(event);
    }
}
