use std::sync::atomic::Ordering;
use std::sync::Arc;

use calltrace::config::TracerConfig;
use calltrace::domain::{Duration, Timestamp};
use calltrace::engine::testing::TraceInternals;
use calltrace::engine::{ChannelListener, LifecycleEvent, TraceController};
use calltrace_common::{CompletionReason, SpanKind};

fn controller() -> TraceController {
    TraceController::with_platform(TracerConfig::default(), None)
}

/// Move `started_at` and `last_updated_at` back by the given amounts
fn age_trace(tc: &TraceController, started_ago: Duration, idle_for: Duration) {
    tc.with_active_trace_mut(|trace| {
        let now = Timestamp::now();
        trace.set_started_at(now.saturating_sub(started_ago));
        trace.set_last_updated_at(now.saturating_sub(idle_for));
    })
    .expect("a trace is active");
}

#[test]
fn test_fresh_trace_survives_tick() {
    let tc = controller();
    tc.start_tracing("Display Main").unwrap();

    assert_eq!(tc.on_harvest_tick(), None);
    assert!(tc.is_tracing_active());
}

#[test]
fn test_idle_trace_completes_healthy() {
    let tc = controller();
    let (listener, rx) = ChannelListener::bounded(16);
    tc.add_listener(&listener);

    tc.start_tracing("Display Main").unwrap();
    tc.enter("never exits", SpanKind::Method).unwrap();
    age_trace(&tc, Duration::from_millis(1_000), Duration::from_millis(600));

    assert_eq!(tc.on_harvest_tick(), Some(CompletionReason::HealthyTimeout));
    assert!(!tc.is_tracing_active());
    assert_eq!(tc.stats().traces_healthy.load(Ordering::Relaxed), 1);
    assert_eq!(tc.stats().traces_unhealthy.load(Ordering::Relaxed), 0);

    let trace = rx
        .try_iter()
        .find_map(|event| match event {
            LifecycleEvent::TraceCompleted { trace, reason } => {
                assert_eq!(reason, CompletionReason::HealthyTimeout);
                Some(trace)
            }
            _ => None,
        })
        .expect("completion announced");
    assert!(trace.spans().iter().all(|span| span.is_complete()));
    assert!(!trace.has_open_spans());
}

#[test]
fn test_idle_trace_completes_despite_in_flight_request() {
    let tc = controller();
    let (listener, rx) = ChannelListener::bounded(16);
    tc.add_listener(&listener);

    tc.start_tracing("Display Cart").unwrap();
    std::thread::scope(|s| {
        s.spawn(|| tc.enter_network_segment("GET /cart").unwrap());
    });
    age_trace(&tc, Duration::from_millis(1_000), Duration::from_millis(600));

    assert_eq!(tc.on_harvest_tick(), Some(CompletionReason::HealthyTimeout));
    let trace = rx
        .try_iter()
        .find_map(|event| match event {
            LifecycleEvent::TraceCompleted { trace, .. } => Some(trace),
            _ => None,
        })
        .expect("completion announced");
    let request = trace
        .spans()
        .iter()
        .find(|span| span.kind() == SpanKind::Network)
        .expect("request recorded");
    assert_eq!(request.exit_time(), trace.root().exit_time());
}

#[test]
fn test_busy_but_overlong_trace_completes_unhealthy() {
    let tc = controller();
    tc.start_tracing("Display Main").unwrap();
    tc.enter("spinning", SpanKind::Method).unwrap();
    age_trace(&tc, Duration::from_millis(61_000), Duration::ZERO);

    assert_eq!(tc.on_harvest_tick(), Some(CompletionReason::UnhealthyTimeout));
    assert_eq!(tc.stats().traces_unhealthy.load(Ordering::Relaxed), 1);
    assert_eq!(tc.stats().traces_healthy.load(Ordering::Relaxed), 0);
}

#[test]
fn test_stale_check_wins_over_overlong() {
    let tc = controller();
    tc.start_tracing("Display Main").unwrap();
    age_trace(&tc, Duration::from_millis(120_000), Duration::from_millis(90_000));

    assert_eq!(tc.on_harvest_tick(), Some(CompletionReason::HealthyTimeout));
}

#[test]
fn test_timeouts_follow_config() {
    let config = TracerConfig { healthy_timeout_ms: 10_000, ..TracerConfig::default() };
    let tc = TraceController::with_platform(config, None);
    tc.start_tracing("Display Main").unwrap();
    age_trace(&tc, Duration::from_millis(5_000), Duration::from_millis(5_000));

    assert_eq!(tc.on_harvest_tick(), None);

    age_trace(&tc, Duration::from_millis(11_000), Duration::from_millis(11_000));
    assert_eq!(tc.on_harvest_tick(), Some(CompletionReason::HealthyTimeout));
}

#[test]
fn test_enter_keeps_trace_alive() {
    let tc = controller();
    tc.start_tracing("Display Main").unwrap();
    age_trace(&tc, Duration::from_millis(1_000), Duration::from_millis(1_000));

    tc.enter("activity", SpanKind::Method).unwrap();
    assert_eq!(tc.on_harvest_tick(), None);
}

#[test]
fn test_send_failure_bumps_report_attempts() {
    let tc = Arc::new(controller());
    tc.start_tracing("Display Main").unwrap();

    tc.on_harvest_send_failed();
    tc.on_harvest_send_failed();

    let attempts = tc.with_current_trace(|trace| trace.report_attempt_count()).unwrap();
    assert_eq!(attempts, 2);
}

#[test]
fn test_open_entries_cleared_by_completion() {
    let tc = controller();
    tc.start_tracing("Display Main").unwrap();
    tc.enter("a", SpanKind::Method).unwrap();
    tc.enter("b", SpanKind::Method).unwrap();
    assert_eq!(tc.open_entry_count(), 3);

    age_trace(&tc, Duration::ZERO, Duration::from_millis(700));
    tc.on_harvest_tick();
    assert_eq!(tc.open_entry_count(), 0);
}
