use std::sync::Arc;

use calltrace::config::TracerConfig;
use calltrace::engine::testing::TraceInternals;
use calltrace::engine::{ChannelListener, LifecycleEvent, TraceController};
use calltrace_common::{CompletionReason, SpanKind};

const THREADS: usize = 100;
const ROUNDS: usize = 10;

#[test]
fn test_concurrent_starts_leave_one_active_trace() {
    let tc = Arc::new(TraceController::new(TracerConfig::default()));
    let (listener, rx) = ChannelListener::bounded(THREADS * ROUNDS * 4);
    tc.add_listener(&listener);

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let tc = Arc::clone(&tc);
            s.spawn(move || {
                for round in 0..ROUNDS {
                    tc.start_tracing(format!("Display T{t}R{round}")).expect("enabled");
                    // Another thread may have replaced our trace already; a
                    // trace is active either way.
                    tc.rename(format!("Display T{t}R{round} renamed")).expect("a trace is active");
                }
            });
        }
    });

    assert!(tc.is_tracing_active());
    assert_eq!(listener.dropped(), 0);

    let events: Vec<_> = rx.try_iter().collect();
    let starts = events.iter().filter(|e| matches!(e, LifecycleEvent::TraceStarted(_))).count();
    let completions: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            LifecycleEvent::TraceCompleted { trace, reason } => Some((trace, *reason)),
            _ => None,
        })
        .collect();

    assert_eq!(starts, THREADS * ROUNDS);
    assert_eq!(completions.len(), THREADS * ROUNDS - 1);
    assert!(completions.iter().all(|(_, reason)| *reason == CompletionReason::Replaced));
    assert!(completions.iter().all(|(trace, _)| trace.is_complete()));
    assert_eq!(tc.activity_history().len(), THREADS * ROUNDS);
}

#[test]
fn test_thousand_threads_start_and_rename() {
    const WIDE: usize = 1000;
    let tc = Arc::new(TraceController::new(TracerConfig::default()));

    std::thread::scope(|s| {
        for t in 0..WIDE {
            let tc = Arc::clone(&tc);
            s.spawn(move || {
                tc.start_tracing(format!("Display T{t}")).expect("enabled");
                tc.rename(format!("Display T{t} renamed")).expect("a trace is active");
                tc.enter("work", SpanKind::Method).expect("a trace is active");
            });
        }
    });

    let info = tc.current_trace().expect("one trace stays active");
    assert!(info.name.starts_with("Display T"));
    assert_eq!(tc.activity_history().len(), WIDE);
}

#[test]
fn test_threads_keep_independent_stacks() {
    let tc = Arc::new(TraceController::new(TracerConfig::default()));
    tc.start_tracing("Display Main").unwrap();

    std::thread::scope(|s| {
        for t in 0..8 {
            let tc = Arc::clone(&tc);
            s.spawn(move || {
                for depth in 0..5 {
                    tc.enter(&format!("t{t}d{depth}"), SpanKind::Method).unwrap();
                }
                assert_eq!(tc.current_span().unwrap().display_name(), format!("t{t}d4"));
                for _ in 0..5 {
                    tc.exit().unwrap();
                }
            });
        }
    });

    assert_eq!(tc.open_entry_count(), 1, "only the root stays open");
    let (count, top_level) = tc
        .with_current_trace(|trace| (trace.span_count(), trace.children(trace.root()).count()))
        .unwrap();
    assert_eq!(count, 1 + 8 * 5);
    assert_eq!(top_level, 8);

    tc.exit().unwrap();
    assert!(!tc.is_tracing_active());
}
