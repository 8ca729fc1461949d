mod common;

use common::fixtures::{hold_for, isolated_locker};
use locksmith::error::LockError;
use locksmith::locking::{
    CancellationToken, LockEventKind, LockPolicy, Locker, NotificationHooks, PolicyKind,
};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn lazy_lock_runs_unsynchronized_after_timeout() {
    let (locker, events) = isolated_locker("lazy-timeout");
    let runs = AtomicUsize::new(0);

    thread::scope(|scope| {
        hold_for(scope, &locker, "lazy-holder", Duration::from_millis(400));
        locker.lazy_with_timeout(Duration::from_millis(50), || {
            runs.fetch_add(1, Ordering::SeqCst);
            assert!(!locker.is_held_by_current_thread());
        });
    });

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let stats = locker.statistics();
    assert_eq!(stats.lazy_timeouts, 1);
    assert_eq!(stats.lazy.count, 0);

    let timed_out = events.events();
    assert_eq!(timed_out.len(), 1);
    assert_eq!(timed_out[0].kind(), LockEventKind::TimedOut);
    assert_eq!(timed_out[0].policy(), PolicyKind::Lazy);
    assert_eq!(timed_out[0].holder().unwrap().thread(), "lazy-holder");
    assert!(timed_out[0].message().contains("held by: [lazy-holder]"));
}

#[test]
fn lazy_lock_acquired_in_time_does_not_count_a_timeout() {
    let (locker, events) = isolated_locker("lazy-in-time");

    thread::scope(|scope| {
        hold_for(scope, &locker, "short-holder", Duration::from_millis(50));
        let value = locker.lazy_with_timeout(Duration::from_secs(5), || {
            assert!(locker.is_held_by_current_thread());
            42
        });
        assert_eq!(value, 42);
    });

    let stats = locker.statistics();
    assert_eq!(stats.lazy_timeouts, 0);
    assert_eq!(stats.lazy.count, 1);
    assert!(stats.lazy.longest_wait > Duration::ZERO);
    assert!(events.events().is_empty());
}

#[test]
fn hard_lock_times_out_without_running_action() {
    let (locker, events) = isolated_locker("hard-timeout");
    let runs = AtomicUsize::new(0);

    let result = thread::scope(|scope| {
        hold_for(scope, &locker, "hard-holder", Duration::from_millis(400));
        locker.hard_with_timeout(Duration::from_millis(60), || {
            runs.fetch_add(1, Ordering::SeqCst);
        })
    });

    let err = result.unwrap_err();
    assert!(err.is_hard_timeout());
    match &err {
        LockError::HardTimeout { waited, message, .. } => {
            assert!(*waited >= Duration::from_millis(50));
            assert!(message.contains("held by: [hard-holder]"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(runs.load(Ordering::SeqCst), 0);
    let stats = locker.statistics();
    assert_eq!(stats.hard_timeouts, 1);
    assert_eq!(stats.hard.count, 0);
    assert_eq!(events.count(LockEventKind::TimedOut), 1);
}

#[test]
fn patient_lock_warns_every_slice_behind_a_long_hold() {
    let (locker, events) = isolated_locker("patient-slices");
    let hold = Duration::from_secs(5);

    let entered_after = thread::scope(|scope| {
        hold_for(scope, &locker, "slow-holder", hold);
        let waiting_since = Instant::now();
        let entered_at = locker.patient_with_warning(Duration::from_secs(1), Instant::now);
        entered_at.duration_since(waiting_since)
    });

    let delays = events.count(LockEventKind::Delayed);
    assert!((4..=5).contains(&delays), "expected 4-5 delays, got {delays}");
    assert_eq!(locker.statistics().patient_delays as usize, delays);
    assert!(entered_after >= hold - Duration::from_millis(200));
    assert!(entered_after <= hold + Duration::from_millis(500));
}

#[test]
fn cancelled_patient_lock_never_runs_or_holds() {
    let (locker, _events) = isolated_locker("patient-cancel");
    let token = CancellationToken::new();
    let runs = AtomicUsize::new(0);

    let result = thread::scope(|scope| {
        hold_for(scope, &locker, "stubborn-holder", Duration::from_millis(600));
        let canceller = token.clone();
        scope.spawn(move || {
            thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });

        let started = Instant::now();
        let result = locker.patient_cancellable(Duration::from_secs(10), &token, || {
            runs.fetch_add(1, Ordering::SeqCst);
        });
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(locker.holder().unwrap().thread_name, "stubborn-holder");
        result
    });

    assert!(matches!(result, Err(LockError::Cancelled { .. })));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(locker.statistics().patient.count, 0);
}

#[test]
fn releasing_a_lazy_fallback_handle_is_harmless() {
    let (locker, _events) = isolated_locker("lazy-release");

    thread::scope(|scope| {
        hold_for(scope, &locker, "release-holder", Duration::from_millis(300));
        let handle = locker.acquire_lazy(Duration::from_millis(20));
        assert!(!handle.is_held());
        handle.release();
        assert_eq!(locker.holder().unwrap().thread_name, "release-holder");
    });

    assert!(!locker.is_held());
}

#[test]
fn caller_panic_still_releases() {
    let (locker, _events) = isolated_locker("panic-release");

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        locker.hard::<()>(|| panic!("caller failure")).ok();
    }));
    assert!(outcome.is_err());
    assert!(!locker.is_held());

    thread::scope(|scope| {
        scope
            .spawn(|| locker.hard_with_timeout(Duration::from_millis(50), || ()))
            .join()
            .unwrap()
            .unwrap();
    });
}

#[test]
fn nested_hard_locks_back_off_with_retries() {
    let (left, _) = isolated_locker("left");
    let (right, _) = isolated_locker("right");
    let completed = AtomicUsize::new(0);

    thread::scope(|scope| {
        for (outer, inner) in [(&left, &right), (&right, &left)] {
            let completed = &completed;
            scope.spawn(move || {
                for _ in 0..10 {
                    outer
                        .hard_with_retries(Duration::from_millis(20), || {
                            let patience = Duration::from_millis(rand::thread_rng().gen_range(1..15));
                            inner.hard_with_timeout(patience, || {
                                thread::sleep(Duration::from_millis(1));
                            })
                        })
                        .unwrap();
                    completed.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(completed.load(Ordering::SeqCst), 20);
    assert!(!left.is_held());
    assert!(!right.is_held());
}

#[test]
fn retries_reraise_caller_failures_unchanged() {
    let (locker, _events) = isolated_locker("retry-passthrough");
    let attempts = AtomicUsize::new(0);

    let err = locker
        .hard_with_retries(Duration::from_millis(20), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(LockError::action(std::io::Error::other("validation failed")))
        })
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(matches!(err, LockError::Action(_)));
    assert_eq!(err.to_string(), "validation failed");
}

#[test]
fn retries_stop_on_an_aggregate_that_is_not_all_timeouts() {
    let (locker, _events) = isolated_locker("retry-mixed");
    let attempts = AtomicUsize::new(0);

    let err = locker
        .hard_with_retries(Duration::from_millis(20), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(LockError::Aggregate(vec![
                LockError::WorkerPanicked {
                    locker: "'inner' (#0)".to_string(),
                },
                LockError::HardTimeout {
                    locker: "'other' (#0)".to_string(),
                    waited: Duration::from_millis(20),
                    message: String::new(),
                },
            ]))
        })
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(matches!(err, LockError::Aggregate(ref errors) if errors.len() == 2));
    assert!(!locker.is_held());
}

#[test]
fn policy_dispatch_matches_named_methods() {
    let (locker, _events) = isolated_locker("dispatch");
    for policy in [
        LockPolicy::lazy(),
        LockPolicy::patient().with_budget(Duration::from_millis(10)),
        LockPolicy::hard().with_budget(Duration::from_millis(10)),
    ] {
        assert_eq!(locker.run(&policy, || policy.kind()).unwrap(), policy.kind());
    }

    let stats = locker.statistics();
    assert_eq!(stats.lazy.count, 1);
    assert_eq!(stats.patient.count, 1);
    assert_eq!(stats.hard.count, 1);
}

#[test]
fn randomized_contention_keeps_statistics_consistent() {
    let locker = Locker::new("randomized")
        .with_default_timeout(Duration::from_millis(15))
        .with_hooks(Arc::new(NotificationHooks::new()));
    let entered = AtomicUsize::new(0);
    let hard_failures = AtomicUsize::new(0);

    thread::scope(|scope| {
        for worker in 0..6 {
            let locker = &locker;
            let entered = &entered;
            let hard_failures = &hard_failures;
            thread::Builder::new()
                .name(format!("worker-{worker}"))
                .spawn_scoped(scope, move || {
                    let mut rng = rand::thread_rng();
                    for _ in 0..25 {
                        let hold = Duration::from_millis(rng.gen_range(0..4));
                        match rng.gen_range(0..3) {
                            0 => locker.lazy(|| thread::sleep(hold)),
                            1 => locker.patient(|| {
                                entered.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(hold);
                            }),
                            _ => match locker.hard(|| thread::sleep(hold)) {
                                Ok(()) => {}
                                Err(_) => {
                                    hard_failures.fetch_add(1, Ordering::SeqCst);
                                }
                            },
                        }
                    }
                })
                .unwrap();
        }
    });

    let stats = locker.statistics();
    assert_eq!(stats.patient.count as usize, entered.load(Ordering::SeqCst));
    assert_eq!(stats.hard_timeouts as usize, hard_failures.load(Ordering::SeqCst));
    let attempts = stats.lazy.count
        + stats.lazy_timeouts
        + stats.patient.count
        + stats.hard.count
        + stats.hard_timeouts;
    assert_eq!(attempts, 150);

    for kind in [PolicyKind::Lazy, PolicyKind::Patient, PolicyKind::Hard] {
        let policy = stats.policy(kind);
        let rebuilt = policy.average_wait() * u32::try_from(policy.count).unwrap();
        let drift = policy.cumulative_wait.abs_diff(rebuilt);
        assert!(drift <= Duration::from_nanos(policy.count), "{kind}: drift {drift:?}");
        assert!(policy.longest_wait <= policy.cumulative_wait || policy.count == 0);
    }

    let json = serde_json::to_value(stats).unwrap();
    assert_eq!(json["hard_timeouts"], stats.hard_timeouts);
    assert_eq!(json["patient"]["count"], stats.patient.count);
}

#[test]
fn statistics_reads_do_not_wait_for_the_critical_section() {
    let (locker, _events) = isolated_locker("stats-read");

    thread::scope(|scope| {
        hold_for(scope, &locker, "busy-holder", Duration::from_millis(500));
        let started = Instant::now();
        let stats = locker.statistics();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(stats.patient.count, 1);
        locker.reset_statistics();
    });

    assert_eq!(locker.statistics().total_acquisitions(), 0);
}
