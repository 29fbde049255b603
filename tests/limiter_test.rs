//! Tests for [`RateLimiter`] pacing, ordering and isolation.
//!
//! All tests run with tokio's clock paused so sleeps complete instantly
//! while `Instant::now()` advances deterministically.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;

use huginn::{HuginnError, LimiterConfig, RateLimiter, Result};

/// Timer resolution slack per dispatch.
const SLACK_MS: u128 = 20;

fn quota(max_requests: u32, window_secs: u64) -> LimiterConfig {
    LimiterConfig::new()
        .max_requests(max_requests)
        .window(Duration::from_secs(window_secs))
}

/// Schedule `n` tasks at once; each records (index, ms since start).
async fn run_burst(limiter: &RateLimiter, n: usize) -> Vec<(usize, u128)> {
    let start = Instant::now();
    let log = Arc::new(Mutex::new(Vec::new()));

    let futures: Vec<_> = (0..n)
        .map(|i| {
            let log = log.clone();
            limiter.schedule(move || async move {
                log.lock()
                    .unwrap()
                    .push((i, start.elapsed().as_millis()));
                Ok::<_, HuginnError>(i)
            })
        })
        .collect();

    let results = join_all(futures).await;
    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), i);
    }
    let log = log.lock().unwrap().clone();
    log
}

fn assert_near(actual_ms: u128, expected_ms: u128) {
    assert!(
        actual_ms >= expected_ms && actual_ms <= expected_ms + SLACK_MS,
        "dispatched at {actual_ms}ms, expected ~{expected_ms}ms"
    );
}

// =========================================================================
// Pacing
// =========================================================================

#[tokio::test(start_paused = true)]
async fn burst_of_fifteen_is_spaced_then_waits_for_window() {
    let limiter = RateLimiter::new("dashboard", &quota(10, 60)).unwrap();
    let log = run_burst(&limiter, 15).await;
    assert_eq!(log.len(), 15);

    // First ten: one every 6s from t=0
    for (i, (_, at)) in log.iter().take(10).enumerate() {
        assert_near(*at, i as u128 * 6_000);
    }
    // Remaining five: from t=60s, still 6s apart
    for (i, (_, at)) in log.iter().skip(10).enumerate() {
        assert_near(*at, 60_000 + i as u128 * 6_000);
    }
}

#[tokio::test(start_paused = true)]
async fn sliding_window_never_exceeds_quota() {
    // Negligible spacing so the window is the binding constraint
    let config = quota(10, 60).min_spacing(Duration::from_millis(1));
    let limiter = RateLimiter::new("timeline", &config).unwrap();
    let log = run_burst(&limiter, 25).await;
    let times: Vec<u128> = log.iter().map(|(_, at)| *at).collect();

    for (i, &start) in times.iter().enumerate() {
        let in_window = times[i..].iter().filter(|&&t| t < start + 60_000).count();
        assert!(in_window <= 10, "{in_window} dispatches in window starting at {start}ms");
    }
    assert!(times[9] < 1_000, "first ten dispatch immediately");
    assert!(times[10] >= 60_000, "eleventh waits for the window");
    assert!(times[20] >= 120_000, "twenty-first waits for the next window");
}

#[tokio::test(start_paused = true)]
async fn explicit_spacing_is_respected() {
    let config = quota(100, 60).min_spacing(Duration::from_secs(2));
    let limiter = RateLimiter::new("insights", &config).unwrap();
    assert_eq!(limiter.min_spacing(), Duration::from_secs(2));

    let log = run_burst(&limiter, 4).await;
    for pair in log.windows(2) {
        assert!(pair[1].1 - pair[0].1 >= 2_000);
    }
}

#[tokio::test(start_paused = true)]
async fn idle_limiter_dispatches_immediately_after_spacing_elapsed() {
    let limiter = RateLimiter::new("dashboard", &quota(10, 60)).unwrap();
    run_burst(&limiter, 1).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    let log = run_burst(&limiter, 1).await;
    assert_near(log[0].1, 0);
}

// =========================================================================
// Ordering
// =========================================================================

#[tokio::test(start_paused = true)]
async fn dispatch_follows_schedule_order() {
    let limiter = RateLimiter::new("dashboard", &quota(5, 1)).unwrap();
    let log = run_burst(&limiter, 12).await;
    let order: Vec<usize> = log.iter().map(|(i, _)| *i).collect();
    assert_eq!(order, (0..12).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn tasks_run_one_at_a_time() {
    let limiter = RateLimiter::new("dashboard", &quota(100, 1)).unwrap();
    let running = Arc::new(Mutex::new(0usize));
    let peak = Arc::new(Mutex::new(0usize));

    let futures: Vec<_> = (0..5)
        .map(|_| {
            let running = running.clone();
            let peak = peak.clone();
            limiter.schedule(move || async move {
                {
                    let mut r = running.lock().unwrap();
                    *r += 1;
                    let mut p = peak.lock().unwrap();
                    *p = (*p).max(*r);
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                *running.lock().unwrap() -= 1;
                Ok::<_, HuginnError>(())
            })
        })
        .collect();
    join_all(futures).await;

    assert_eq!(*peak.lock().unwrap(), 1);
}

// =========================================================================
// Failure isolation
// =========================================================================

#[tokio::test(start_paused = true)]
async fn task_error_goes_to_its_caller_only() {
    let limiter = RateLimiter::new("dashboard", &quota(10, 1)).unwrap();

    let failing = limiter.schedule(|| async {
        Err::<u32, _>(HuginnError::Upstream("connection reset".into()))
    });
    let ok = limiter.schedule(|| async { Ok::<_, HuginnError>(7u32) });

    let (failing, ok) = tokio::join!(failing, ok);
    assert_eq!(failing, Err(HuginnError::Upstream("connection reset".into())));
    assert_eq!(ok, Ok(7));
}

#[tokio::test(start_paused = true)]
async fn panicking_task_does_not_stall_queue() {
    let limiter = RateLimiter::new("dashboard", &quota(10, 1)).unwrap();

    let panicking = limiter.schedule(|| async {
        if true {
            panic!("task blew up");
        }
        Ok::<u32, HuginnError>(0)
    });
    let next = limiter.schedule(|| async { Ok::<_, HuginnError>(1u32) });

    let (panicking, next): (Result<u32>, Result<u32>) = tokio::join!(panicking, next);
    assert!(matches!(panicking, Err(HuginnError::Upstream(_))));
    assert_eq!(next, Ok(1));
}

#[tokio::test(start_paused = true)]
async fn dropped_caller_does_not_cancel_task() {
    let limiter = RateLimiter::new("dashboard", &quota(10, 60)).unwrap();
    let ran = Arc::new(Mutex::new(false));

    let first = limiter.schedule(|| async { Ok::<_, HuginnError>(()) });
    let flag = ran.clone();
    let abandoned = limiter.schedule(move || async move {
        *flag.lock().unwrap() = true;
        Ok::<_, HuginnError>(())
    });
    drop(abandoned);
    first.await.unwrap();

    // Second slot opens after the 6s spacing
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(*ran.lock().unwrap());
}

// =========================================================================
// Status
// =========================================================================

#[tokio::test(start_paused = true)]
async fn status_reports_queue_and_window() {
    let limiter = RateLimiter::new("dashboard", &quota(10, 60)).unwrap();

    let pending: Vec<_> = (0..3)
        .map(|_| limiter.schedule(|| async { Ok::<_, HuginnError>(()) }))
        .collect();

    let status = limiter.status();
    assert_eq!(status.queue_depth, 3);
    assert!(status.draining);

    // Let the first ticket dispatch
    tokio::time::sleep(Duration::from_millis(1)).await;
    let status = limiter.status();
    assert_eq!(status.queue_depth, 2);
    assert_eq!(status.window_usage, 1);
    assert_eq!(status.max_requests, 10);
    assert!(status.next_slot_eta > Duration::from_millis(5_900));
    assert!(status.next_slot_eta <= Duration::from_secs(6));

    // Reading status twice changes nothing
    assert_eq!(limiter.status(), status);

    join_all(pending).await;
    tokio::time::sleep(Duration::from_millis(1)).await;
    let status = limiter.status();
    assert_eq!(status.queue_depth, 0);
    assert_eq!(status.window_usage, 3);
    assert!(!status.draining);
}

#[tokio::test(start_paused = true)]
async fn clones_share_one_queue() {
    let limiter = RateLimiter::new("dashboard", &quota(10, 60)).unwrap();
    let clone = limiter.clone();

    let start = Instant::now();
    limiter
        .schedule(|| async { Ok::<_, HuginnError>(()) })
        .await
        .unwrap();
    clone
        .schedule(|| async { Ok::<_, HuginnError>(()) })
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_secs(6));
    assert_eq!(clone.name(), "dashboard");
}
