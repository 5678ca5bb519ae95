//! Sweep of QUEUED and PARKED tasks that waited past their deadline.
//!
//! A large backlog is sampled rather than scanned from the head: with a
//! clustering value `c > 1` each pass only looks at tasks whose
//! `createdAt % c` equals a fresh random remainder, so successive passes
//! cover different slices of the backlog.

use rand::Rng;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::terminator::{TaskTerminator, Termination};
use crate::error::Result;
use crate::store::{Sampling, TaskStore};

/// Adaptive sampling density, always within `[MIN, MAX]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clustering(u32);

impl Clustering {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 16;

    pub fn new(value: u32) -> Self {
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Partition to query this pass, or `None` for an exhaustive scan.
    pub fn sampling<R: Rng + ?Sized>(self, rng: &mut R) -> Option<Sampling> {
        (self.0 > Self::MIN).then(|| Sampling {
            modulus: i64::from(self.0),
            remainder: i64::from(rng.gen_range(0..self.0)),
        })
    }

    /// Next value: sparser when a full batch came back, denser otherwise.
    pub fn adjust(self, fetched: usize, batch_size: usize) -> Self {
        if fetched >= batch_size {
            Self::new(self.0.saturating_mul(2))
        } else {
            Self::new(self.0 / 2)
        }
    }
}

impl Default for Clustering {
    fn default() -> Self {
        Self(Self::MIN)
    }
}

pub struct QueuedTaskReconciler {
    store: Arc<dyn TaskStore>,
    terminator: Arc<TaskTerminator>,
    batch_size: usize,
    clustering: Mutex<Clustering>,
}

impl QueuedTaskReconciler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        terminator: Arc<TaskTerminator>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            terminator,
            batch_size,
            clustering: Mutex::new(Clustering::default()),
        }
    }

    /// Start from a given clustering value instead of an exhaustive scan.
    pub fn with_clustering(self, clustering: Clustering) -> Self {
        Self {
            clustering: Mutex::new(clustering),
            ..self
        }
    }

    pub async fn clustering(&self) -> Clustering {
        *self.clustering.lock().await
    }

    /// Terminate up to one batch of long-waiting tasks and retune sampling.
    pub async fn run(&self, now: i64) -> Result<Termination> {
        let mut clustering = self.clustering.lock().await;
        let sampling = clustering.sampling(&mut rand::thread_rng());

        let ids = self
            .store
            .find_long_queued(now, sampling, self.batch_size)
            .await?;
        let next = clustering.adjust(ids.len(), self.batch_size);
        if next != *clustering {
            debug!(
                from = clustering.value(),
                to = next.value(),
                fetched = ids.len(),
                "long-queued clustering adjusted"
            );
        }
        *clustering = next;
        drop(clustering);

        if ids.is_empty() {
            return Ok(Termination::default());
        }
        debug!(count = ids.len(), ?sampling, "expiring long-queued tasks");
        Ok(self.terminator.end_tasks(&ids, now, "queued").await)
    }
}
