//! Reconciliation span helpers.
//!
//! Each tick runs inside a `manager.tick` span whose counters are filled in
//! when the tick finishes; each terminated task gets its own child span.

use tracing::Span;

use crate::engine::TickReport;
use crate::model::TaskId;

/// Start a span for one reconciliation tick.
///
/// The report fields are declared empty and filled by [`record_tick_report`].
pub fn start_tick_span(now: i64, is_primary: bool) -> Span {
    tracing::info_span!(
        "manager.tick",
        "tick.now" = now,
        "tick.primary" = is_primary,
        "tick.expired" = tracing::field::Empty,
        "tick.notified" = tracing::field::Empty,
        "tick.rebroadcast" = tracing::field::Empty,
        "tick.clustering" = tracing::field::Empty,
    )
}

/// Copy the tick's counters onto its span.
pub fn record_tick_report(span: &Span, report: &TickReport) {
    span.record(
        "tick.expired",
        (report.expired_started + report.expired_queued) as u64,
    );
    span.record("tick.notified", report.notified as u64);
    span.record("tick.rebroadcast", report.rebroadcast as u64);
    span.record("tick.clustering", report.clustering);
}

/// Start a span around the termination of one task.
pub fn start_task_span(task_id: &TaskId, phase: &'static str) -> Span {
    tracing::info_span!("task.terminate", "task.id" = %task_id, "task.phase" = phase)
}
