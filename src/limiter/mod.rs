//! Per-context request pacing.
//!
//! A [`RateLimiter`] keeps one logical channel under a provider quota of
//! `max_requests` per rolling `window`, and additionally spaces dispatches
//! at least `min_spacing` apart (default `window / max_requests`) so a burst
//! is smoothed out instead of spending the whole quota at once and then
//! idling.
//!
//! # Queue model
//!
//! Every [`schedule`](RateLimiter::schedule) call turns its task into a
//! `RequestTicket` and appends it to a FIFO deque. A single drain loop per
//! limiter (guarded by the `draining` flag) sleeps until the next legal
//! dispatch time, pops the head ticket, records the dispatch timestamp and
//! runs the ticket to completion before looking at the queue again. The
//! loop exits when the queue is empty; the next `schedule` starts a new one.
//!
//! Tickets run on their own spawned task, so a panicking task fails only
//! its own caller and the loop keeps draining. Callers that drop their
//! future do not cancel anything: the ticket still runs in its turn.
//!
//! Pacing uses tokio's monotonic clock, so tests can drive it with
//! `#[tokio::test(start_paused = true)]`.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::telemetry;
use crate::{HuginnError, Result};

/// Quota configuration for one limiter.
///
/// ```rust
/// # use huginn::LimiterConfig;
/// # use std::time::Duration;
/// let config = LimiterConfig::new()
///     .max_requests(10)
///     .window(Duration::from_secs(60));
/// assert_eq!(config.effective_min_spacing(), Duration::from_secs(6));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Requests allowed per window. Default: 10.
    pub max_requests: u32,
    /// Rolling window length. Default: 60s.
    pub window: Duration,
    /// Minimum gap between dispatches. Default: `window / max_requests`.
    pub min_spacing: Option<Duration>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
            min_spacing: None,
        }
    }
}

impl LimiterConfig {
    /// Create a config with the provider defaults (10 RPM).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set requests allowed per window.
    pub fn max_requests(mut self, n: u32) -> Self {
        self.max_requests = n;
        self
    }

    /// Set the rolling window length.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Override the derived minimum spacing.
    pub fn min_spacing(mut self, spacing: Duration) -> Self {
        self.min_spacing = Some(spacing);
        self
    }

    /// Spacing actually enforced between consecutive dispatches.
    pub fn effective_min_spacing(&self) -> Duration {
        self.min_spacing
            .unwrap_or_else(|| self.window / self.max_requests.max(1))
    }

    /// Reject a zero quota or a zero window.
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(HuginnError::Configuration(
                "max_requests must be at least 1".into(),
            ));
        }
        if self.window.is_zero() {
            return Err(HuginnError::Configuration(
                "rate limit window must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Read-only snapshot of a limiter, for operational debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterStatus {
    /// Tickets waiting for dispatch.
    pub queue_depth: usize,
    /// Dispatches inside the current rolling window.
    pub window_usage: usize,
    /// Configured quota per window.
    pub max_requests: u32,
    /// Time until the next dispatch would be legal (zero if now).
    pub next_slot_eta: Duration,
    /// Whether a drain loop is currently running.
    pub draining: bool,
}

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// One unit of queued work.
struct RequestTicket {
    run: Box<dyn FnOnce() -> BoxedTask + Send>,
    enqueued_at: Instant,
}

#[derive(Default)]
struct LimiterState {
    /// Dispatch times, oldest first.
    timestamps: VecDeque<Instant>,
    queue: VecDeque<RequestTicket>,
    draining: bool,
}

struct Inner {
    name: String,
    max_requests: u32,
    window: Duration,
    min_spacing: Duration,
    state: Mutex<LimiterState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        // State stays consistent across a panic: every mutation is a
        // single push/pop.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Earliest instant at which the next dispatch is legal.
    fn next_slot(&self, state: &LimiterState, now: Instant) -> Instant {
        let mut active = state
            .timestamps
            .iter()
            .copied()
            .filter(|&t| t + self.window > now);
        let oldest = active.next();
        let in_window = oldest.map_or(0, |_| 1 + active.count());

        let mut at = now;
        if let Some(oldest) = oldest
            && in_window >= self.max_requests as usize
        {
            at = at.max(oldest + self.window);
        }
        if let Some(&last) = state.timestamps.back() {
            at = at.max(last + self.min_spacing);
        }
        at
    }

    fn window_usage(&self, state: &LimiterState, now: Instant) -> usize {
        state
            .timestamps
            .iter()
            .filter(|&&t| t + self.window > now)
            .count()
    }

    fn prune(&self, state: &mut LimiterState, now: Instant) {
        while let Some(&oldest) = state.timestamps.front() {
            // Keep the newest stamp for spacing even if it left the window
            if oldest + self.window > now || state.timestamps.len() == 1 {
                break;
            }
            state.timestamps.pop_front();
        }
    }

    fn record_depth(&self, depth: usize) {
        metrics::gauge!(telemetry::QUEUE_DEPTH, "context" => self.name.clone()).set(depth as f64);
    }
}

/// FIFO, quota-pacing scheduler for one context.
///
/// Cheap to clone; clones share the same queue and window.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    /// Create a limiter for the named context.
    ///
    /// Returns [`HuginnError::Configuration`] for a zero quota or window.
    pub fn new(name: impl Into<String>, config: &LimiterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                name: name.into(),
                max_requests: config.max_requests,
                window: config.window,
                min_spacing: config.effective_min_spacing(),
                state: Mutex::new(LimiterState::default()),
            }),
        })
    }

    /// Context name this limiter paces.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Minimum gap enforced between dispatches.
    pub fn min_spacing(&self) -> Duration {
        self.inner.min_spacing
    }

    /// Queue `task` for paced execution and return a future of its result.
    ///
    /// The ticket is enqueued immediately (not on first poll), so FIFO order
    /// follows call order. The limiter never retries: a task's error is
    /// returned to its caller unchanged.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut, T>(&self, task: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let ticket = RequestTicket {
            run: Box::new(move || {
                Box::pin(async move {
                    // Receiver may be gone; the work still counted.
                    let _ = tx.send(task().await);
                })
            }),
            enqueued_at: Instant::now(),
        };
        self.enqueue(ticket);

        async move {
            rx.await
                .map_err(|_| HuginnError::Upstream("rate limiter task dropped".into()))?
        }
    }

    /// Snapshot of queue depth, window usage and next-slot ETA.
    pub fn status(&self) -> LimiterStatus {
        let state = self.inner.lock();
        let now = Instant::now();
        LimiterStatus {
            queue_depth: state.queue.len(),
            window_usage: self.inner.window_usage(&state, now),
            max_requests: self.inner.max_requests,
            next_slot_eta: self.inner.next_slot(&state, now) - now,
            draining: state.draining,
        }
    }

    fn enqueue(&self, ticket: RequestTicket) {
        let start_drain = {
            let mut state = self.inner.lock();
            state.queue.push_back(ticket);
            self.inner.record_depth(state.queue.len());
            !std::mem::replace(&mut state.draining, true)
        };
        if start_drain {
            tokio::spawn(drain(self.inner.clone()));
        }
    }
}

/// Drain loop: at most one per limiter, guarded by `draining`.
async fn drain(inner: Arc<Inner>) {
    loop {
        let wait_until = {
            let mut state = inner.lock();
            if state.queue.is_empty() {
                state.draining = false;
                return;
            }
            inner.next_slot(&state, Instant::now())
        };

        tokio::time::sleep_until(wait_until).await;

        let ticket = {
            let mut state = inner.lock();
            let now = Instant::now();
            inner.prune(&mut state, now);
            let Some(ticket) = state.queue.pop_front() else {
                continue;
            };
            state.timestamps.push_back(now);
            inner.record_depth(state.queue.len());
            debug!(
                context = %inner.name,
                queue_depth = state.queue.len(),
                window_usage = inner.window_usage(&state, now),
                waited_ms = (now - ticket.enqueued_at).as_millis() as u64,
                "dispatching request"
            );
            ticket
        };

        metrics::counter!(telemetry::DISPATCHES_TOTAL, "context" => inner.name.clone())
            .increment(1);
        metrics::histogram!(telemetry::DISPATCH_WAIT_SECONDS, "context" => inner.name.clone())
            .record(ticket.enqueued_at.elapsed().as_secs_f64());

        // Serialised dispatch: wait for this ticket before the next one.
        // A panic inside the task only drops that caller's sender.
        let _ = tokio::spawn((ticket.run)()).await;
    }
}
