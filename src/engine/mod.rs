//! Reconciliation engine: expiry sweeps, force execution, rebroadcast.
//!
//! Every replica runs the same engine against the shared store. The only
//! consistency primitive relied on is the store's per-document conditional
//! update, so losing a race to another replica is never an error.

pub mod control;
pub mod expiry;
pub mod force_exec;
pub mod queued;
pub mod rebroadcast;
pub mod strategy;
pub mod terminator;

use serde::Serialize;
use std::time::Duration;

pub use control::{Collaborators, ControlPlane};
pub use expiry::TaskExpiryReconciler;
pub use force_exec::ForceExecutionAssigner;
pub use queued::{Clustering, QueuedTaskReconciler};
pub use rebroadcast::{RebroadcastEngine, RebroadcastOutcome};
pub use strategy::{
    AssignmentStrategy, CapabilityAssignmentStrategy, FlaggedAssignmentStrategy,
    LegacyAssignmentStrategy,
};
pub use terminator::{TaskTerminator, Termination};

/// Per-tick cap on tasks fetched by each sweep.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Tunables for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Maximum number of tasks each sweep looks at per tick.
    pub batch_size: usize,
    /// Manager version; only tasks created under it are rebroadcast.
    pub version: String,
    /// Delay between the end of one tick and the start of the next.
    pub tick_interval: Duration,
    /// Upper bound of the random delay before the first tick.
    pub initial_jitter: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            version: env!("CARGO_PKG_VERSION").to_string(),
            tick_interval: Duration::from_secs(5),
            initial_jitter: Duration::from_secs(5),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// STARTED tasks deleted for running past their deadline.
    pub expired_started: usize,
    /// QUEUED or PARKED tasks deleted for waiting past their deadline.
    pub expired_queued: usize,
    /// Tasks rescued by force execution instead of expiring.
    pub force_assigned: usize,
    /// Failure notifications delivered to waiters.
    pub notified: usize,
    /// Deleted tasks whose documents could not be read at all.
    pub unreadable: usize,
    pub rebroadcast: usize,
    /// Rebroadcasts skipped because another replica got there first.
    pub rebroadcast_conflicts: usize,
    /// Clustering value the next long-queued sweep will use.
    pub clustering: u32,
}

impl TickReport {
    /// Did the tick change anything?
    pub fn is_idle(&self) -> bool {
        self.expired_started == 0
            && self.expired_queued == 0
            && self.force_assigned == 0
            && self.rebroadcast == 0
            && self.rebroadcast_conflicts == 0
    }

    fn absorb(&mut self, termination: &Termination) {
        self.force_assigned += termination.force_assigned;
        self.notified += termination.notified;
        self.unreadable += termination.unreadable;
    }
}
