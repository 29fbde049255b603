//! Telemetry metric name constants.
//!
//! Centralised metric names for huginn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `huginn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `context`: rate-limited channel name (e.g. "dashboard", "timeline")
//! - `function`: cache kind (e.g. "correlation_summary")

/// Total tasks dispatched by a context's rate limiter.
///
/// Labels: `context`.
pub const DISPATCHES_TOTAL: &str = "huginn_dispatches_total";

/// Time a task spent queued before dispatch, in seconds.
///
/// Labels: `context`.
pub const DISPATCH_WAIT_SECONDS: &str = "huginn_dispatch_wait_seconds";

/// Pending tasks in a context's queue (gauge).
///
/// Labels: `context`.
pub const QUEUE_DEPTH: &str = "huginn_queue_depth";

/// Delayed retries after the provider signalled rate limiting.
///
/// Labels: `context`.
pub const QUOTA_RETRIES_TOTAL: &str = "huginn_quota_retries_total";

/// Generations that ended in fallback text.
///
/// Labels: `context`.
pub const GENERATION_FAILURES_TOTAL: &str = "huginn_generation_failures_total";

/// Total cache hits.
///
/// Labels: `function`.
pub const CACHE_HITS_TOTAL: &str = "huginn_cache_hits_total";

/// Total cache misses that started a computation.
///
/// Labels: `function`.
pub const CACHE_MISSES_TOTAL: &str = "huginn_cache_misses_total";

/// Callers that joined an in-flight computation instead of starting one.
///
/// Labels: `function`.
pub const CACHE_DEDUP_JOINS_TOTAL: &str = "huginn_cache_dedup_joins_total";

/// Sweeps of expired entries triggered by a full store.
pub const CACHE_SWEEPS_TOTAL: &str = "huginn_cache_sweeps_total";

/// Cache writes dropped after the sweep-and-retry also failed.
pub const CACHE_WRITE_FAILURES_TOTAL: &str = "huginn_cache_write_failures_total";
