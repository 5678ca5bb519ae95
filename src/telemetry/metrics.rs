//! Metric instrument factories for the delegate queue manager.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"delegate-queue"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for delegate-queue instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("delegate-queue")
}

/// Counter: tasks deleted because they ran out of time.
/// Labels: `phase` ("started" | "queued").
pub fn tasks_expired() -> Counter<u64> {
    meter()
        .u64_counter("dq.tasks.expired")
        .with_description("Number of tasks terminated on expiry")
        .build()
}

/// Counter: tasks rescued from expiry by force execution.
pub fn tasks_force_assigned() -> Counter<u64> {
    meter()
        .u64_counter("dq.tasks.force_assigned")
        .with_description("Number of tasks pinned to a delegate by force execution")
        .build()
}

/// Counter: successful task rebroadcasts.
pub fn tasks_rebroadcast() -> Counter<u64> {
    meter()
        .u64_counter("dq.tasks.rebroadcast")
        .with_description("Number of tasks rebroadcast to delegates")
        .build()
}

/// Counter: rebroadcasts lost to another replica.
pub fn rebroadcast_conflicts() -> Counter<u64> {
    meter()
        .u64_counter("dq.tasks.rebroadcast_conflicts")
        .with_description("Number of rebroadcasts skipped after a concurrent update")
        .build()
}

/// Counter: terminated tasks whose documents could not be read.
pub fn tasks_unreadable() -> Counter<u64> {
    meter()
        .u64_counter("dq.tasks.unreadable")
        .with_description("Number of unreadable task documents terminated")
        .build()
}

/// Counter: queue-level operations (create, send).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("dq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Histogram: tick duration in milliseconds.
pub fn tick_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("dq.tick.duration_ms")
        .with_description("Reconciliation tick duration in milliseconds")
        .with_unit("ms")
        .build()
}
