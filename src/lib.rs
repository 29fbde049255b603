//! Huginn - governance layer for AI calls in a personal health dashboard
//!
//! Every AI-backed feature of the dashboard (daily summaries, anomaly
//! explanations, correlation write-ups, the "hero" insight) goes through
//! this crate, which provides:
//!
//! - [`RateLimiter`]: sliding-window quota with minimum spacing, FIFO
//!   queueing and serial dispatch
//! - [`ContextDispatcher`]: one limiter and credential per feature context
//! - [`ResponseCache`]: stable keys, TTL, session epochs and in-flight
//!   deduplication over a pluggable [`KvStore`]
//! - [`scorer`]: deterministic weighted ranking of correlation candidates
//!
//! [`InsightGovernor`] wires them together and always hands the UI
//! renderable text, falling back to canned responses when generation fails.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use huginn::{Credentials, GenerationOptions, InsightGovernor, LlmClientFactory};
//! use huginn::cache::kinds::DailySummary;
//!
//! #[tokio::main]
//! async fn main() -> huginn::Result<()> {
//!     let governor = InsightGovernor::builder()
//!         .credentials(Credentials::new().default_key("your-key"))
//!         .client_factory(Arc::new(LlmClientFactory::new("google", "gemini-2.0-flash")?))
//!         .build()
//!         .await?;
//!
//!     let request = DailySummary {
//!         date: "2024-03-01".parse().expect("valid date"),
//!     };
//!     let summary = governor
//!         .explain(
//!             "dashboard",
//!             &request,
//!             "Summarise my health data for 2024-03-01.",
//!             &GenerationOptions::default(),
//!         )
//!         .await?;
//!
//!     println!("{}", summary.text);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fallback;
pub mod governor;
pub mod limiter;
pub mod scorer;
pub mod store;
pub mod telemetry;

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheKey, CacheRequest, KeyBuilder, ResponseCache};
pub use client::{
    ClientFactory, Credential, GenerationClient, GenerationOptions, GenerationResponse,
    LlmClientFactory, LlmGenerationClient,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GovernorConfig, Secrets};
pub use dispatcher::{ContextChannel, ContextDispatcher, Credentials, DispatcherConfig};
pub use error::{HuginnError, Result};
pub use governor::{
    Generation, GenerationSource, GovernorStatus, InsightGovernor, InsightGovernorBuilder,
};
pub use limiter::{LimiterConfig, LimiterStatus, RateLimiter};
pub use scorer::{Candidate, MetricTable, NoSeries, PairedSeries, ScoredCandidate, Subscores};
pub use store::{FileStore, KvStore, MemoryStore};
