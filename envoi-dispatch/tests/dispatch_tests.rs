#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::{sync::Arc, time::Duration};

use envoi_common::{FailureKind, SendOutcome, SessionState, UnitStatus};
use envoi_dispatch::{
    DispatchError, DispatchEvent, Dispatcher, GateDecision, GateVerdict, PolicyError, Transport,
};
use envoi_store::{LedgerStore, MemoryLedger, MemorySessionStore, SessionStore, TestSessionStore};
use pretty_assertions::assert_eq;
use support::{Harness, HookedLedger, MockTransport, config, plan, recipient};

#[tokio::test(start_paused = true)]
async fn test_dispatch_runs_every_batch() {
    let harness = Harness::new(config(20.0, 50, 3));
    let mut events = harness.dispatcher.subscribe();

    let units = plan(&harness.dispatcher, 120);
    let report = harness
        .dispatcher
        .dispatch(units, GateDecision::Proceed)
        .await
        .unwrap();

    assert_eq!(report.verdict, GateVerdict::Proceed);
    assert_eq!(report.sessions.len(), 1);

    let session = &report.sessions[0];
    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.cursor, 120);
    assert_eq!(session.counts.succeeded, 120);
    assert!(session.failures.is_empty());
    assert_eq!(harness.transport.count(), 120);
    assert_eq!(harness.ledger.stats().await.unwrap().total_messages, 120);

    let mut batches = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let DispatchEvent::BatchStarted { start, end, .. } = event {
            batches.push(end - start);
        }
    }
    assert_eq!(batches, vec![50, 50, 20]);

    let stored = harness.sessions.load(&session.session).await.unwrap();
    assert_eq!(stored.state, SessionState::Completed);
    assert!(
        stored
            .statuses
            .iter()
            .all(|s| *s == UnitStatus::Succeeded { attempts: 1 })
    );
}

#[tokio::test(start_paused = true)]
async fn test_resubmitting_sends_nothing() {
    let harness = Harness::new(config(50.0, 50, 3));

    let first = plan(&harness.dispatcher, 30);
    harness
        .dispatcher
        .dispatch(first, GateDecision::Proceed)
        .await
        .unwrap();
    assert_eq!(harness.transport.count(), 30);

    let again = plan(&harness.dispatcher, 30);
    let report = harness
        .dispatcher
        .dispatch(again, GateDecision::Proceed)
        .await
        .unwrap();

    assert_eq!(harness.transport.count(), 30);
    assert_eq!(report.duplicates.len(), 30);
    assert_eq!(report.sessions[0].counts.total(), 0);
    assert_eq!(harness.ledger.stats().await.unwrap().total_messages, 30);
}

#[tokio::test(start_paused = true)]
async fn test_duplicates_within_a_plan_keep_the_first() {
    let harness = Harness::new(config(50.0, 50, 3));
    let dispatcher = &harness.dispatcher;

    let units = vec![
        dispatcher.unit(0, "+33 6 12 34 56 78", "Hello").build(),
        dispatcher.unit(1, "33612345678", "Hello").build(),
        dispatcher.unit(2, "33612345678", "Goodbye").build(),
    ];
    let planned = dispatcher.create_session(units).await.unwrap();

    assert_eq!(planned.accepted, 2);
    assert_eq!(planned.duplicates.len(), 1);
    assert_eq!(planned.duplicates[0].row_index(), 1);

    let report = dispatcher.run(&planned.id).await.unwrap();
    assert_eq!(report.counts.succeeded, 2);
    assert_eq!(harness.transport.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retries_back_off_then_succeed() {
    let harness = Harness::new(config(100.0, 10, 1));
    let target = recipient(0);
    harness.transport.script(
        &target,
        [
            SendOutcome::retryable(FailureKind::Timeout, "gateway timed out"),
            SendOutcome::retryable(FailureKind::Timeout, "gateway timed out"),
        ],
    );

    let units = plan(&harness.dispatcher, 1);
    let report = harness
        .dispatcher
        .dispatch(units, GateDecision::Proceed)
        .await
        .unwrap();

    let session = &report.sessions[0];
    assert_eq!(session.counts.succeeded, 1);
    assert!(session.failures.is_empty());
    assert_eq!(session.stats.retries, 2);

    let times: Vec<_> = harness
        .transport
        .attempts_for(&target)
        .iter()
        .map(|a| a.at)
        .collect();
    assert_eq!(times.len(), 3);
    assert_eq!(times[1] - times[0], Duration::from_millis(500));
    assert_eq!(times[2] - times[1], Duration::from_secs(1));

    let stored = harness.sessions.load(&session.session).await.unwrap();
    assert_eq!(stored.statuses[0], UnitStatus::Succeeded { attempts: 3 });
    assert_eq!(harness.ledger.stats().await.unwrap().total_messages, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_at_the_limit() {
    let harness = Harness::new(config(100.0, 10, 1));
    let target = recipient(0);
    harness.transport.script(
        &target,
        (0..10).map(|_| SendOutcome::retryable(FailureKind::Throttled, "slow down")),
    );

    let units = plan(&harness.dispatcher, 1);
    let report = harness
        .dispatcher
        .dispatch(units, GateDecision::Proceed)
        .await
        .unwrap();

    let session = &report.sessions[0];
    assert_eq!(harness.transport.count(), 4);
    assert_eq!(session.counts.failed, 1);
    assert_eq!(session.failures[0].kind, FailureKind::Throttled);
    assert_eq!(session.failures[0].attempts, 4);
    assert!(harness.ledger.history(&target.as_str().into()).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_terminal_failure_is_not_retried() {
    let harness = Harness::new(config(100.0, 10, 2));
    harness.transport.script(
        &recipient(1),
        [SendOutcome::terminal(FailureKind::ContentRejected, "blocked number")],
    );

    let units = plan(&harness.dispatcher, 3);
    let report = harness
        .dispatcher
        .dispatch(units, GateDecision::Proceed)
        .await
        .unwrap();

    let session = &report.sessions[0];
    assert_eq!(harness.transport.count(), 3);
    assert_eq!(session.counts.succeeded, 2);
    assert_eq!(session.failures.len(), 1);
    assert_eq!(session.failures[0].row_index, 1);
    assert_eq!(session.failures[0].attempts, 1);
    assert_eq!(session.stats.top_error_kinds, vec![(FailureKind::ContentRejected, 1)]);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_recipient_is_never_sent() {
    let harness = Harness::new(config(100.0, 10, 2));
    let dispatcher = &harness.dispatcher;

    let units = vec![
        dispatcher.unit(0, recipient(0), "Hello").build(),
        dispatcher.unit(1, "12-34", "Hello").build(),
        dispatcher.unit(2, recipient(2), "Hello").build(),
    ];
    let report = dispatcher
        .dispatch(units, GateDecision::Proceed)
        .await
        .unwrap();

    let session = &report.sessions[0];
    assert_eq!(harness.transport.count(), 2);
    assert!(harness.transport.attempts_for("12-34").is_empty());
    assert_eq!(session.failures.len(), 1);
    assert_eq!(session.failures[0].kind, FailureKind::InvalidRecipient);
    assert_eq!(session.failures[0].attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_send_times_out() {
    let mut config = config(100.0, 10, 1);
    config.send_timeout_secs = 30;
    config.retry.max_retries = 1;

    let harness = Harness::new(config);
    harness.transport.set_delay(Duration::from_secs(40));

    let units = plan(&harness.dispatcher, 1);
    let report = harness
        .dispatcher
        .dispatch(units, GateDecision::Proceed)
        .await
        .unwrap();

    let session = &report.sessions[0];
    assert_eq!(harness.transport.count(), 2);
    assert_eq!(session.failures[0].kind, FailureKind::Timeout);
    assert_eq!(session.failures[0].attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_over_limit_plan_is_refused() {
    let harness = Harness::new(config(1000.0, 500, 8));

    let units = plan(&harness.dispatcher, 2501);
    let err = harness
        .dispatcher
        .dispatch(units, GateDecision::Proceed)
        .await
        .unwrap_err();

    assert!(err.is_policy());
    assert!(matches!(
        err,
        DispatchError::Policy(PolicyError::ExceedsLimit {
            size: 2501,
            limit: 2500
        })
    ));
    assert_eq!(harness.transport.count(), 0);
    assert!(harness.sessions.list().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_truncated_plan_sends_only_the_limit() {
    let harness = Harness::new(config(1000.0, 500, 8));

    let units = plan(&harness.dispatcher, 3000);
    let report = harness
        .dispatcher
        .dispatch(units, GateDecision::TruncateToLimit)
        .await
        .unwrap();

    assert_eq!(report.verdict, GateVerdict::ExceedsLimit);
    assert_eq!(report.discarded.len(), 500);
    assert_eq!(report.discarded[0].row_index(), 2500);
    assert_eq!(report.sessions[0].counts.succeeded, 2500);
    assert_eq!(harness.transport.count(), 2500);

    let stats = harness.ledger.stats().await.unwrap();
    assert_eq!(stats.total_messages, 2500);
    assert!(
        harness
            .ledger
            .history(&recipient(2999).as_str().into())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test(start_paused = true)]
async fn test_split_plan_runs_one_session_per_slice() {
    let harness = Harness::new(config(1000.0, 500, 8));

    let units = plan(&harness.dispatcher, 3000);
    let report = harness
        .dispatcher
        .dispatch(units, GateDecision::SplitIntoSessions)
        .await
        .unwrap();

    let sizes: Vec<_> = report.sessions.iter().map(|s| s.counts.total()).collect();
    assert_eq!(sizes, vec![2500, 500]);
    assert!(report.discarded.is_empty());
    assert_eq!(harness.transport.count(), 3000);
}

#[tokio::test(start_paused = true)]
async fn test_throughput_never_exceeds_the_ceiling() {
    let mut config = config(2.0, 10, 3);
    config.rate.batch_pause_ms = 1500;

    let harness = Harness::new(config);
    let units = plan(&harness.dispatcher, 45);
    harness
        .dispatcher
        .dispatch(units, GateDecision::Proceed)
        .await
        .unwrap();

    let times: Vec<_> = harness.transport.attempts().iter().map(|a| a.at).collect();
    assert_eq!(times.len(), 45);

    let window = Duration::from_secs(10);
    for (i, start) in times.iter().enumerate() {
        let in_window = times[i..]
            .iter()
            .take_while(|t| **t - *start < window)
            .count();
        assert!(in_window <= 20, "{in_window} sends within 10s");
    }
}

#[tokio::test(start_paused = true)]
async fn test_many_workers_at_a_low_rate_send_everything() {
    let harness = Harness::new(config(1.0, 100, 60));

    let units = plan(&harness.dispatcher, 100);
    let report = harness
        .dispatcher
        .dispatch(units, GateDecision::Proceed)
        .await
        .unwrap();

    let session = &report.sessions[0];
    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.counts.succeeded, 100);
    assert!(session.failures.is_empty());
    assert!(session.stats.top_error_kinds.is_empty());
    assert_eq!(session.stats.retries, 0);
    assert_eq!(harness.transport.count(), 100);
    assert!((0..100).all(|i| harness.transport.attempts_for(&recipient(i)).len() == 1));
}

#[tokio::test(start_paused = true)]
async fn test_slow_single_worker_waits_for_every_slot() {
    let mut config = config(0.01, 50, 1);
    config.rate.acquire_timeout_secs = 101;

    let harness = Harness::new(config);
    let units = plan(&harness.dispatcher, 3);
    let report = harness
        .dispatcher
        .dispatch(units, GateDecision::Proceed)
        .await
        .unwrap();

    assert_eq!(report.sessions[0].counts.succeeded, 3);
    assert_eq!(harness.transport.count(), 3);

    let times: Vec<_> = harness.transport.attempts().iter().map(|a| a.at).collect();
    assert!(times.windows(2).all(|w| w[1] - w[0] >= Duration::from_secs(99)));
}

#[test]
fn test_backlog_beyond_acquire_timeout_is_refused() {
    for config in [config(1.0, 100, 100), config(0.01, 50, 1)] {
        let err = Dispatcher::new(
            config,
            MockTransport::new(),
            Arc::new(MemoryLedger::new()),
            Arc::new(MemorySessionStore::new()),
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_marks_the_rest_not_attempted() {
    let harness = Harness::new(config(50.0, 50, 1));
    let control = harness.dispatcher.control().clone();
    harness.transport.on_send(move |count| {
        if count == 3 {
            control.cancel();
        }
    });

    let units = plan(&harness.dispatcher, 12);
    let report = harness
        .dispatcher
        .dispatch(units, GateDecision::Proceed)
        .await
        .unwrap();

    let session = &report.sessions[0];
    assert_eq!(session.state, SessionState::Cancelled);
    assert_eq!(session.counts.succeeded, 3);
    assert_eq!(session.counts.not_attempted, 9);
    assert_eq!(session.cursor, 12);
    assert_eq!(harness.transport.count(), 3);

    let stored = harness.sessions.load(&session.session).await.unwrap();
    assert_eq!(stored.state, SessionState::Cancelled);
    assert!(!stored.is_resumable());
    assert!(harness.dispatcher.list_resumable().await.unwrap().is_empty());

    let err = harness.dispatcher.resume(&session.session).await.unwrap_err();
    assert!(matches!(err, DispatchError::NotResumable { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_pause_holds_until_resumed() {
    let harness = Harness::new(config(50.0, 50, 1));
    let control = harness.dispatcher.control().clone();
    harness.transport.on_send(move |count| {
        if count == 5 {
            control.pause();
        }
    });

    let mut events = harness.dispatcher.subscribe();
    let dispatcher = harness.dispatcher.clone();
    let units = plan(&dispatcher, 10);
    let running =
        tokio::spawn(async move { dispatcher.dispatch(units, GateDecision::Proceed).await });

    loop {
        let event = events.recv().await.unwrap();
        if let DispatchEvent::StateChanged {
            state: SessionState::Paused,
            ..
        } = event
        {
            break;
        }
    }

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.transport.count(), 5);
    assert!(!running.is_finished());

    harness.dispatcher.control().resume();
    let report = running.await.unwrap().unwrap();

    assert_eq!(report.sessions[0].state, SessionState::Completed);
    assert_eq!(harness.transport.count(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_pause_at_a_batch_boundary_is_announced_once() {
    let transport = MockTransport::new();
    let ledger = Arc::new(HookedLedger::default());
    let dispatcher = Dispatcher::new(
        config(50.0, 5, 1),
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::clone(&ledger) as Arc<dyn LedgerStore>,
        Arc::new(MemorySessionStore::new()),
    )
    .unwrap();

    // The last unit of the first batch lands in the ledger
    let control = dispatcher.control().clone();
    ledger.on_record(move |count| {
        if count == 5 {
            control.pause();
        }
    });

    let mut events = dispatcher.subscribe();
    let units = plan(&dispatcher, 10);
    let running = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.dispatch(units, GateDecision::Proceed).await })
    };

    let mut states = Vec::new();
    while states.last() != Some(&SessionState::Paused) {
        if let DispatchEvent::StateChanged { state, .. } = events.recv().await.unwrap() {
            states.push(state);
        }
    }

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.count(), 5);

    dispatcher.control().resume();
    let report = running.await.unwrap().unwrap();
    assert_eq!(report.sessions[0].state, SessionState::Completed);
    assert_eq!(transport.count(), 10);

    while let Ok(event) = events.try_recv() {
        if let DispatchEvent::StateChanged { state, .. } = event {
            states.push(state);
        }
    }
    assert_eq!(
        states,
        vec![
            SessionState::Running,
            SessionState::Paused,
            SessionState::Running,
            SessionState::Completed
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_halts_and_resumes() {
    let store = TestSessionStore::new();
    let harness = Harness::with_sessions(config(50.0, 50, 3), Arc::new(store.clone()));
    let mut events = harness.dispatcher.subscribe();

    // The initial checkpoint and the first batch go through
    store.fail_checkpoints_after(2);

    let units = plan(&harness.dispatcher, 120);
    let err = harness
        .dispatcher
        .dispatch(units, GateDecision::Proceed)
        .await
        .unwrap_err();
    assert!(err.is_halt());

    let mut halted = false;
    while let Ok(event) = events.try_recv() {
        halted |= matches!(event, DispatchEvent::Halted { .. });
    }
    assert!(halted);

    let resumable = harness.dispatcher.list_resumable().await.unwrap();
    assert_eq!(resumable.len(), 1);
    assert_eq!(resumable[0].cursor, 50);
    assert_eq!(harness.transport.count(), 100);

    store.heal();
    let report = harness.dispatcher.resume(&resumable[0].id).await.unwrap();

    assert_eq!(report.state, SessionState::Completed);
    assert_eq!(report.counts.succeeded, 120);
    assert_eq!(harness.transport.count(), 120);
    assert_eq!(harness.ledger.stats().await.unwrap().total_messages, 120);
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_units_are_recovered() {
    let store = TestSessionStore::new();
    let harness = Harness::with_sessions(config(50.0, 10, 2), Arc::new(store.clone()));

    let units = plan(&harness.dispatcher, 10);
    let planned = harness.dispatcher.create_session(units).await.unwrap();

    // As left behind by a crash in the middle of the first batch: unit 1
    // reached the ledger but not the checkpoint
    let mut record = store.load(&planned.id).await.unwrap();
    let fingerprint = record.units[1].fingerprint().clone();
    record.state = SessionState::Running;
    record.statuses[0] = UnitStatus::Succeeded { attempts: 1 };
    record.statuses[1] = UnitStatus::InFlight;
    record.statuses[2] = UnitStatus::FailedRetryable {
        attempts: 1,
        kind: FailureKind::ConnectionFailed,
    };
    store.replace(record);

    harness
        .ledger
        .record_success(&recipient(1).as_str().into(), &fingerprint, chrono::Utc::now())
        .await
        .unwrap();

    let report = harness.dispatcher.resume(&planned.id).await.unwrap();

    assert_eq!(report.state, SessionState::Completed);
    assert_eq!(report.counts.succeeded, 10);
    assert_eq!(harness.transport.count(), 8);
    assert!(harness.transport.attempts_for(&recipient(0)).is_empty());
    assert!(harness.transport.attempts_for(&recipient(1)).is_empty());
    assert_eq!(harness.transport.attempts_for(&recipient(2)).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_progress_events_track_the_session() {
    let harness = Harness::new(config(50.0, 5, 2));
    let mut events = harness.dispatcher.subscribe();

    let units = plan(&harness.dispatcher, 10);
    harness
        .dispatcher
        .dispatch(units, GateDecision::Proceed)
        .await
        .unwrap();

    let mut last = None;
    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            DispatchEvent::Progress { stats, .. } => last = Some(stats),
            DispatchEvent::StateChanged { state, .. } => states.push(state),
            _ => {}
        }
    }

    let last = last.unwrap();
    assert_eq!(last.sent, 10);
    assert_eq!(last.remaining, 0);
    assert!((last.progress_percentage - 100.0).abs() < f64::EPSILON);
    assert_eq!(states, vec![SessionState::Running, SessionState::Completed]);
}
