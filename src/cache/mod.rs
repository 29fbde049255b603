//! Response caching subsystem.
//!
//! - [`key`]: [`CacheRequest`] and [`KeyBuilder`], explicit, versioned,
//!   normalised keys per call site.
//! - [`kinds`]: the built-in call-site kinds (correlation summaries,
//!   anomaly explanations, daily and period summaries, free-form
//!   questions, hero insights).
//! - [`response`]: [`ResponseCache`], TTL + session-epoch validity over a
//!   [`KvStore`](crate::store::KvStore), with in-flight deduplication.

pub mod key;
pub mod kinds;
pub mod response;

pub use key::{CacheKey, CacheRequest, KeyBuilder};
pub use kinds::{
    AnomalyExplanation, CorrelationSummary, DailySummary, FreeformQuestion, HeroInsight,
    PeriodSummary,
};
pub use response::{CacheConfig, Origin, ResponseCache};
