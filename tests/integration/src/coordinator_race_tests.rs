//! Exactly-once delivery under racing reporters
//!
//! Success, failure, user cancel, application cancel and key-unavailable
//! signals are fired from independent threads. Whatever the interleaving,
//! the application must observe exactly one outcome, preceded by exactly one
//! completion notification, and key-unavailable never after the outcome.

use crate::test_utils::{init_tracing, Notification, RecordingCallback};
use keyward_biometry::{BiometricKeyData, ErrorCode, ResultCoordinator, SerialDispatcher};
use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;

#[derive(Debug, Clone, Copy)]
enum Report {
    Success,
    UserCancel,
    Error,
    AppCancel,
    KeyUnavailable,
}

fn fire(coordinator: &ResultCoordinator, report: Report) {
    match report {
        Report::Success => {
            coordinator.report_success(BiometricKeyData::new(vec![1], vec![2], true))
        }
        Report::UserCancel => coordinator.report_user_cancel(),
        Report::Error => coordinator.report_error(ErrorCode::AuthenticationFailed, "rejected"),
        Report::AppCancel => coordinator.cancel_handle().cancel(),
        Report::KeyUnavailable => coordinator.report_key_unavailable(),
    }
}

fn attempt(dispatcher: &SerialDispatcher) -> (Arc<RecordingCallback>, ResultCoordinator) {
    let recorder = RecordingCallback::new();
    let coordinator =
        ResultCoordinator::new(recorder.clone(), Arc::new(dispatcher.clone()), recorder.clone());
    (recorder, coordinator)
}

/// Check the delivery invariants on one attempt's log.
fn assert_single_outcome(log: &[Notification]) {
    let completions: Vec<_> = log
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == Notification::Completion)
        .map(|(i, _)| i)
        .collect();
    let outcomes: Vec<_> = log
        .iter()
        .enumerate()
        .filter(|(_, n)| n.is_outcome())
        .map(|(i, _)| i)
        .collect();
    let unavailable: Vec<_> = log
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == Notification::KeyUnavailable)
        .map(|(i, _)| i)
        .collect();

    assert_eq!(completions.len(), 1, "log: {:?}", log);
    assert_eq!(outcomes.len(), 1, "log: {:?}", log);
    assert!(completions[0] < outcomes[0], "log: {:?}", log);
    assert!(unavailable.len() <= 1, "log: {:?}", log);
    if let Some(&i) = unavailable.first() {
        assert!(i < completions[0], "log: {:?}", log);
    }
}

fn race(coordinator: &ResultCoordinator, reports: &[Report]) {
    let barrier = Arc::new(Barrier::new(reports.len()));
    let handles: Vec<_> = reports
        .iter()
        .map(|&report| {
            let coordinator = coordinator.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                fire(&coordinator, report);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_racing_success_delivers_one_outcome() {
    init_tracing();
    let dispatcher = SerialDispatcher::new("race-cancel-success");

    for _ in 0..200 {
        let (recorder, coordinator) = attempt(&dispatcher);
        race(&coordinator, &[Report::Success, Report::AppCancel]);
        dispatcher.flush().await;

        let log = recorder.log();
        assert_single_outcome(&log);
        let outcome = recorder.outcomes().remove(0);
        assert!(matches!(
            outcome,
            Notification::Success(_) | Notification::Cancelled { user_initiated: false }
        ));
        assert!(coordinator.is_cancelled());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_reporter_racing_at_once_delivers_one_outcome() {
    init_tracing();
    let dispatcher = SerialDispatcher::new("race-all");
    let reports = [
        Report::Success,
        Report::UserCancel,
        Report::Error,
        Report::AppCancel,
        Report::KeyUnavailable,
        Report::AppCancel,
        Report::Success,
    ];

    for _ in 0..100 {
        let (recorder, coordinator) = attempt(&dispatcher);
        race(&coordinator, &reports);
        dispatcher.flush().await;
        assert_single_outcome(&recorder.log());
        assert!(coordinator.state().is_dispatched());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn attempt_resources_are_released_after_dispatch() {
    init_tracing();
    let dispatcher = SerialDispatcher::new("release");
    let (recorder, coordinator) = attempt(&dispatcher);
    let handle = coordinator.cancel_handle();
    let weak = Arc::downgrade(&recorder);

    coordinator.report_success(BiometricKeyData::new(vec![7], vec![8], false));
    dispatcher.flush().await;
    drop(coordinator);
    drop(recorder);

    // The handle outlives the attempt without keeping the callback alive.
    assert!(weak.upgrade().is_none());
    handle.cancel();
    assert!(handle.is_cancelled());
}

fn report_strategy() -> impl Strategy<Value = Report> {
    prop_oneof![
        Just(Report::Success),
        Just(Report::UserCancel),
        Just(Report::Error),
        Just(Report::AppCancel),
        Just(Report::KeyUnavailable),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// All reports are queued before the worker runs, so the cancel flag is
    /// already set for every queued report once any app cancel was fired.
    #[test]
    fn queued_reports_resolve_to_one_outcome(
        reports in proptest::collection::vec(report_strategy(), 1..12)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let dispatcher = SerialDispatcher::with_handle("proptest", runtime.handle());
        let (recorder, coordinator) = attempt(&dispatcher);

        for &report in &reports {
            fire(&coordinator, report);
        }
        runtime.block_on(dispatcher.flush());

        let first_cancel = reports.iter().position(|r| matches!(r, Report::AppCancel));
        let first_terminal = reports
            .iter()
            .position(|r| !matches!(r, Report::KeyUnavailable));
        let claimed_at = first_cancel.or(first_terminal);
        let log = recorder.log();

        match claimed_at {
            None => {
                prop_assert!(recorder.outcomes().is_empty());
                prop_assert!(!coordinator.state().is_dispatched());
                prop_assert_eq!(log, vec![Notification::KeyUnavailable]);
            }
            Some(claimed_at) => {
                assert_single_outcome(&log);
                let outcome = recorder.outcomes().remove(0);
                let expected = match reports[claimed_at] {
                    Report::Success => matches!(outcome, Notification::Success(_)),
                    Report::UserCancel => outcome == Notification::Cancelled { user_initiated: true },
                    Report::Error => matches!(outcome, Notification::Failed(_)),
                    Report::AppCancel => outcome == Notification::Cancelled { user_initiated: false },
                    Report::KeyUnavailable => false,
                };
                prop_assert!(expected, "reports {:?} gave {:?}", reports, outcome);

                let unavailable_before = reports[..claimed_at]
                    .iter()
                    .any(|r| matches!(r, Report::KeyUnavailable));
                prop_assert_eq!(
                    coordinator.state().key_unavailable_reported(),
                    unavailable_before
                );
            }
        }
    }
}
