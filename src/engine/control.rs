//! Control plane: runs one reconciliation tick per period until shutdown.

use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{Instrument, debug, error, info};

use super::expiry::TaskExpiryReconciler;
use super::force_exec::ForceExecutionAssigner;
use super::queued::QueuedTaskReconciler;
use super::rebroadcast::RebroadcastEngine;
use super::strategy::AssignmentStrategy;
use super::terminator::TaskTerminator;
use super::{ReconcileConfig, TickReport};
use crate::error::Result;
use crate::services::{AssignmentService, BroadcastHelper, OutcomeNotifier, SelectionLogService};
use crate::store::TaskStore;
use crate::telemetry::{metrics, tick};

/// Everything the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn TaskStore>,
    pub assignment: Arc<dyn AssignmentService>,
    pub selection_log: Arc<dyn SelectionLogService>,
    pub notifier: Arc<dyn OutcomeNotifier>,
    pub broadcaster: Arc<dyn BroadcastHelper>,
    pub strategy: Arc<dyn AssignmentStrategy>,
}

/// Sequences the sweeps once per tick.
///
/// Expiry sweeps only run while this replica is primary; rebroadcast runs
/// everywhere.
pub struct ControlPlane {
    expiry: Arc<TaskExpiryReconciler>,
    queued: Arc<QueuedTaskReconciler>,
    rebroadcast: Arc<RebroadcastEngine>,
    config: ReconcileConfig,
    primary: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl Clone for ControlPlane {
    fn clone(&self) -> Self {
        Self {
            expiry: Arc::clone(&self.expiry),
            queued: Arc::clone(&self.queued),
            rebroadcast: Arc::clone(&self.rebroadcast),
            config: self.config.clone(),
            primary: Arc::clone(&self.primary),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl ControlPlane {
    pub fn new(collaborators: Collaborators, config: ReconcileConfig) -> Self {
        let Collaborators {
            store,
            assignment,
            selection_log,
            notifier,
            broadcaster,
            strategy,
        } = collaborators;

        let force_exec =
            ForceExecutionAssigner::new(Arc::clone(&store), Arc::clone(&assignment), selection_log);
        let terminator = Arc::new(TaskTerminator::new(
            Arc::clone(&store),
            assignment,
            notifier,
            force_exec,
        ));

        Self {
            expiry: Arc::new(TaskExpiryReconciler::new(
                Arc::clone(&store),
                Arc::clone(&terminator),
                config.batch_size,
            )),
            queued: Arc::new(QueuedTaskReconciler::new(
                Arc::clone(&store),
                terminator,
                config.batch_size,
            )),
            rebroadcast: Arc::new(RebroadcastEngine::new(
                store,
                broadcaster,
                strategy,
                config.batch_size,
            )),
            config,
            primary: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Share an externally driven primary-election flag.
    pub fn with_primary_flag(mut self, primary: Arc<AtomicBool>) -> Self {
        self.primary = primary;
        self
    }

    pub fn primary_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.primary)
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Signal the control plane to shut down.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run one reconciliation pass at `now` (epoch millis).
    ///
    /// Never fails: errors are logged and the next tick starts afresh.
    pub async fn tick(&self, now: i64, is_primary: bool) -> TickReport {
        let span = tick::start_tick_span(now, is_primary);
        async {
            let started = Instant::now();
            let mut report = TickReport::default();

            if is_primary {
                match self.expiry.run(now).await {
                    Ok(t) => {
                        report.expired_started = t.expired;
                        report.absorb(&t);
                    }
                    Err(e) => error!(error = %e, "expired started task sweep failed"),
                }
                match self.queued.run(now).await {
                    Ok(t) => {
                        report.expired_queued = t.expired;
                        report.absorb(&t);
                    }
                    Err(e) => error!(error = %e, "long-queued task sweep failed"),
                }
            }

            match self.rebroadcast.run(now, &self.config.version).await {
                Ok(r) => {
                    report.rebroadcast = r.rebroadcast;
                    report.rebroadcast_conflicts = r.conflicts;
                }
                Err(e) => error!(error = %e, "rebroadcast sweep failed"),
            }
            report.clustering = self.queued.clustering().await.value();

            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            metrics::tick_duration_ms().record(elapsed_ms, &[]);
            tick::record_tick_report(&tracing::Span::current(), &report);

            if report.is_idle() {
                debug!(elapsed_ms, "tick idle");
            } else {
                info!(
                    expired_started = report.expired_started,
                    expired_queued = report.expired_queued,
                    force_assigned = report.force_assigned,
                    notified = report.notified,
                    unreadable = report.unreadable,
                    rebroadcast = report.rebroadcast,
                    conflicts = report.rebroadcast_conflicts,
                    clustering = report.clustering,
                    elapsed_ms,
                    "tick complete"
                );
            }
            report
        }
        .instrument(span)
        .await
    }

    /// Run the tick loop until shutdown.
    pub async fn run(&self) -> Result<()> {
        let jitter = random_delay(self.config.initial_jitter);
        info!(
            strategy = self.rebroadcast.strategy_name(),
            version = %self.config.version,
            interval_ms = self.config.tick_interval.as_millis() as u64,
            jitter_ms = jitter.as_millis() as u64,
            "control plane started"
        );

        let mut delay = jitter;
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("control plane shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let now = chrono::Utc::now().timestamp_millis();
            self.tick(now, self.primary.load(Ordering::Relaxed)).await;
            delay = self.config.tick_interval;
        }
    }
}

fn random_delay(max: Duration) -> Duration {
    let millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..millis))
}
