use std::path::PathBuf;

use calltrace::config::TracerConfig;
use calltrace::domain::{ReplayError, TraceError};
use calltrace::engine::TraceController;
use calltrace::replay::{replay, ReplayOptions, ReplayScript};
use calltrace_common::{CompletionReason, SpanKind};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

#[test]
fn test_checkout_script_builds_expected_trees() {
    let script = ReplayScript::from_file(fixture("checkout_script.json")).expect("fixture parses");
    assert_eq!(script.name.as_deref(), Some("checkout"));

    let controller = TraceController::new(TracerConfig::default());
    let report = replay(&controller, &script, ReplayOptions { strict: true }).expect("replay runs");

    assert_eq!(report.steps_run, script.steps.len());
    assert!(report.failed_steps.is_empty());
    assert!(!report.left_active);
    assert_eq!(report.completed.len(), 2);

    let checkout = &report.completed[0];
    assert_eq!(checkout.reason, CompletionReason::Finished);
    let trace = &checkout.trace;
    assert_eq!(trace.name(), "Checkout Complete");
    assert_eq!(trace.span_count(), 4);

    let root = trace.root();
    let load_cart: Vec<_> = trace.children(root).collect();
    assert_eq!(load_cart.len(), 1);
    assert_eq!(load_cart[0].display_name(), "loadCart");
    assert_eq!(load_cart[0].params().get("rows"), Some(&serde_json::json!(3)));
    assert_eq!(load_cart[0].thread_name(), "main");

    let nested: Vec<_> = trace.children(load_cart[0]).collect();
    let names: Vec<_> = nested.iter().map(|span| span.display_name()).collect();
    assert_eq!(names, vec!["GET /cart", "decodeCart"]);
    assert_eq!(nested[0].kind(), SpanKind::Network);
    assert_eq!(nested[1].thread_name(), "worker");
    assert!(nested[1].scope().starts_with("Mobile/Activity/Background/Name/"));
    assert!(load_cart[0].scope().starts_with("Mobile/Activity/Name/"));

    // Children's time was charged to loadCart
    let children_total = nested
        .iter()
        .filter_map(|span| span.total_duration())
        .fold(calltrace::domain::Duration::ZERO, |acc, d| acc.saturating_add(d));
    assert_eq!(load_cart[0].child_exclusive_time(), children_total);

    let settings = &report.completed[1];
    assert_eq!(settings.reason, CompletionReason::Ended);
    assert_eq!(settings.trace.name(), "Display Settings");
    assert_eq!(settings.trace.previous_activity().map(|s| s.name()), Some("Checkout Complete"));
    assert!(settings.trace.spans().iter().all(|span| span.is_complete()));
}

#[test]
fn test_unbalanced_script_reports_failures() {
    let script = ReplayScript::parse(
        r#"{"steps": [
            {"op": "start", "name": "Main"},
            {"op": "enter", "name": "a", "thread": "worker"},
            {"op": "exit", "thread": "worker"},
            {"op": "exit", "thread": "worker"},
            {"op": "tick"}
        ]}"#,
    )
    .unwrap();
    let controller = TraceController::new(TracerConfig::default());

    let report = replay(&controller, &script, ReplayOptions::default()).unwrap();

    assert_eq!(report.failed_steps, vec![(3, TraceError::NoOpenSpan)]);
    assert!(report.left_active, "a fresh trace survives the tick");
    assert!(report.completed.is_empty());
}

#[test]
fn test_halt_step_completes_nothing() {
    let script = ReplayScript::parse(
        r#"{"steps": [{"op": "start", "name": "Main"}, {"op": "halt"}]}"#,
    )
    .unwrap();
    let controller = TraceController::new(TracerConfig::default());

    let report = replay(&controller, &script, ReplayOptions::default()).unwrap();

    assert!(report.completed.is_empty());
    assert!(!report.left_active);
}

#[test]
fn test_missing_script_is_io_error() {
    let err = ReplayScript::from_file(fixture("does_not_exist.json")).unwrap_err();
    assert!(matches!(err, ReplayError::Io(_)));
}
