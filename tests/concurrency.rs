use gatekeeper::infrastructure::mocks::MockClock;
use gatekeeper::{BanRule, Gatekeeper, RateRule};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

#[test]
fn test_limit_is_exact_under_contention() {
    let clock = Arc::new(MockClock::new(Instant::now()));
    let gate = Gatekeeper::builder()
        .with_rate_rule(RateRule::per_secs(100, 60).unwrap())
        .with_clock(clock.clone())
        .build()
        .unwrap();
    let allowed = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..50 {
                    if gate.engine().decide("shared", None, "GET").is_allow() {
                        allowed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    assert_eq!(allowed.load(Ordering::Relaxed), 100);
    assert_eq!(gate.client_count(), 1);

    let snapshot = gate.metrics().snapshot();
    assert_eq!(snapshot.requests_allowed, 100);
    assert_eq!(snapshot.requests_rate_limited, 300);
}

#[test]
fn test_many_clients_in_parallel() {
    let clock = Arc::new(MockClock::new(Instant::now()));
    let gate = Gatekeeper::builder()
        .with_rate_rule(RateRule::per_secs(5, 10).unwrap())
        .with_clock(clock.clone())
        .build()
        .unwrap();

    thread::scope(|s| {
        for t in 0..8 {
            let gate = gate.clone();
            s.spawn(move || {
                for i in 0..100 {
                    let client = format!("client-{}-{}", t, i);
                    for _ in 0..5 {
                        assert!(gate.engine().decide(&client, None, "GET").is_allow());
                    }
                    assert!(gate.engine().decide(&client, None, "GET").is_rate_limited());
                }
            });
        }
    });

    assert_eq!(gate.client_count(), 800);
}

#[test]
fn test_concurrent_reports_ban_once() {
    let clock = Arc::new(MockClock::new(Instant::now()));
    let gate = Gatekeeper::builder()
        .with_ban_rule(BanRule::per_secs(10, 60, 60).unwrap())
        .with_clock(clock.clone())
        .build()
        .unwrap();
    let banned_reports = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..5 {
                    if gate.report_client("attacker") {
                        banned_reports.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    // Reports 10 through 20 all observe the ban.
    assert_eq!(banned_reports.load(Ordering::Relaxed), 11);
    assert!(gate.engine().decide("attacker", None, "GET").is_ban());
    assert_eq!(gate.metrics().reports_recorded(), 20);
}
