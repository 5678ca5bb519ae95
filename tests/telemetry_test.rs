//! Integration tests for telemetry initialization and span helpers.

use delegate_queue::config::AssignmentMode;
use delegate_queue::engine::TickReport;
use delegate_queue::model::TaskId;

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    // Using try_init() in the implementation avoids panics if another
    // test already initialized a subscriber.
    let config = delegate_queue::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "dq-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "debug".to_string(),
        assignment_mode: AssignmentMode::Legacy,
        primary: true,
        batch_size: 100,
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    if let Ok(guard) = delegate_queue::telemetry::init_telemetry(config) {
        assert!(!guard.is_exporting());
    }
}

#[test]
fn tick_span_creates_and_records_report() {
    let span = delegate_queue::telemetry::tick::start_tick_span(1_000, true);
    let report = TickReport {
        expired_started: 2,
        notified: 1,
        rebroadcast: 3,
        clustering: 4,
        ..TickReport::default()
    };
    delegate_queue::telemetry::tick::record_tick_report(&span, &report);
    assert!(!report.is_idle());
    assert!(TickReport::default().is_idle());
}

#[test]
fn task_span_creates() {
    let span = delegate_queue::telemetry::tick::start_task_span(&TaskId::new(), "started");
    let _enter = span.enter();
}

#[test]
fn metric_instruments_build_without_provider() {
    use delegate_queue::telemetry::metrics;
    use opentelemetry::KeyValue;

    metrics::tasks_expired().add(1, &[KeyValue::new("phase", "queued")]);
    metrics::tasks_force_assigned().add(1, &[]);
    metrics::tasks_rebroadcast().add(1, &[]);
    metrics::rebroadcast_conflicts().add(1, &[]);
    metrics::tasks_unreadable().add(1, &[]);
    metrics::tick_duration_ms().record(1.5, &[]);
}
