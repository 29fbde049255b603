//! The single service object tying dispatcher, cache and scorer together.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::{CacheConfig, CacheRequest, Origin, ResponseCache};
use crate::client::{ClientFactory, GenerationOptions};
use crate::clock::{Clock, SystemClock};
use crate::dispatcher::{ContextDispatcher, Credentials, DispatcherConfig};
use crate::fallback::fallback_text;
use crate::limiter::LimiterStatus;
use crate::scorer::{self, Candidate, PairedSeries, ScoredCandidate};
use crate::store::{KvStore, MemoryStore};
use crate::telemetry;
use crate::{HuginnError, Result};

/// Where a [`Generation`]'s text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationSource {
    /// This call reached the model.
    Generated,
    /// Served from the cache or from another caller's in-flight generation.
    Cached,
    Fallback,
}

/// Outcome of a governed generation. Always carries renderable text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub source: GenerationSource,
}

impl Generation {
    fn ok(text: String, source: GenerationSource) -> Self {
        Self {
            text,
            success: true,
            error: None,
            source,
        }
    }

    fn fallback(prompt: &str, error: &HuginnError) -> Self {
        Self {
            text: fallback_text(prompt).to_string(),
            success: false,
            error: Some(error.to_string()),
            source: GenerationSource::Fallback,
        }
    }
}

/// Snapshot of limiter and cache state.
#[derive(Debug, Clone, Serialize)]
pub struct GovernorStatus {
    pub contexts: BTreeMap<String, LimiterStatus>,
    pub cache_epoch: u64,
    pub cache_in_flight: usize,
}

/// Governs every AI call of the dashboard: per-context rate limiting,
/// response caching with dedup, and hero-candidate selection.
///
/// Construct once at startup with [`InsightGovernor::builder`] and share by
/// reference (or clone; clones share all state).
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use huginn::{Credentials, InsightGovernor, LlmClientFactory, GenerationOptions};
/// use huginn::cache::kinds::CorrelationSummary;
///
/// # async fn example() -> huginn::Result<()> {
/// let governor = InsightGovernor::builder()
///     .credentials(Credentials::new().default_key("your-key"))
///     .client_factory(Arc::new(LlmClientFactory::new("google", "gemini-2.0-flash")?))
///     .build()
///     .await?;
///
/// let request = CorrelationSummary {
///     metric1: "sleep_hours".into(),
///     metric2: "sugar_craving".into(),
///     correlation: -0.62,
/// };
/// let insight = governor
///     .explain("dashboard", &request, "Explain how sleep relates to sugar cravings.", &GenerationOptions::default())
///     .await?;
/// println!("{}", insight.text);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InsightGovernor {
    dispatcher: Arc<ContextDispatcher>,
    cache: ResponseCache,
}

impl InsightGovernor {
    pub fn builder() -> InsightGovernorBuilder {
        InsightGovernorBuilder::new()
    }

    pub fn dispatcher(&self) -> &ContextDispatcher {
        &self.dispatcher
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Cached, deduplicated computation of any serializable result.
    pub async fn with_cache<R, T, F, Fut>(&self, request: &R, compute: F) -> Result<T>
    where
        R: CacheRequest,
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.cache.get_or_compute(request, compute).await
    }

    /// Generate text for `context`. Never fails: on any error the
    /// deterministic fallback text is returned with `success = false`.
    pub async fn generate(
        &self,
        context: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Generation {
        match self.dispatcher.generate(context, prompt, options).await {
            Ok(response) => Generation::ok(response.text, GenerationSource::Generated),
            Err(e) => self.degrade(context, prompt, &e),
        }
    }

    /// Cached generation for a call-site request.
    ///
    /// Successful text is cached under `request`'s key; fallback text never
    /// is. Only an invalid request key is reported as an error.
    pub async fn explain<R: CacheRequest>(
        &self,
        context: &str,
        request: &R,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation> {
        if let Some(text) = self.cache.get::<R, String>(request).await? {
            return Ok(Generation::ok(text, GenerationSource::Cached));
        }

        let dispatcher = self.dispatcher.clone();
        let owned_context = context.to_owned();
        let owned_prompt = prompt.to_owned();
        let options = options.clone();
        let outcome = self
            .cache
            .resolve(request, move || async move {
                dispatcher
                    .generate(&owned_context, &owned_prompt, &options)
                    .await
                    .map(|response| response.text)
            })
            .await;

        match outcome {
            Ok((text, Origin::Computed)) => Ok(Generation::ok(text, GenerationSource::Generated)),
            Ok((text, Origin::Cached | Origin::Joined)) => {
                Ok(Generation::ok(text, GenerationSource::Cached))
            }
            Err(e @ HuginnError::InvalidKey(_)) => Err(e),
            Err(e) => Ok(self.degrade(context, prompt, &e)),
        }
    }

    fn degrade(&self, context: &str, prompt: &str, error: &HuginnError) -> Generation {
        metrics::counter!(telemetry::GENERATION_FAILURES_TOTAL, "context" => context.to_owned())
            .increment(1);
        warn!(context, error = %error, "generation failed, serving fallback text");
        Generation::fallback(prompt, error)
    }

    /// Limiter state of every context plus cache bookkeeping.
    pub fn status(&self) -> GovernorStatus {
        GovernorStatus {
            contexts: self.dispatcher.status(),
            cache_epoch: self.cache.epoch(),
            cache_in_flight: self.cache.in_flight(),
        }
    }

    /// Pick the hero candidate. `None` only for an empty list.
    pub fn select_best<S: PairedSeries + ?Sized>(
        &self,
        candidates: &[Candidate],
        series: &S,
    ) -> Option<ScoredCandidate> {
        scorer::select_best(candidates, series)
    }
}

/// Builder for [`InsightGovernor`].
///
/// A client factory is required; the store defaults to an unbounded
/// [`MemoryStore`] and the clock to [`SystemClock`].
pub struct InsightGovernorBuilder {
    dispatcher_config: DispatcherConfig,
    cache_config: CacheConfig,
    credentials: Credentials,
    factory: Option<Arc<dyn ClientFactory>>,
    store: Option<Arc<dyn KvStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl Default for InsightGovernorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InsightGovernorBuilder {
    pub fn new() -> Self {
        Self {
            dispatcher_config: DispatcherConfig::default(),
            cache_config: CacheConfig::default(),
            credentials: Credentials::default(),
            factory: None,
            store: None,
            clock: None,
        }
    }

    pub fn dispatcher_config(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher_config = config;
        self
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn client_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate limits, open the cache session and assemble the governor.
    pub async fn build(self) -> Result<InsightGovernor> {
        let factory = self.factory.ok_or_else(|| {
            HuginnError::Configuration("a client factory is required".to_string())
        })?;
        self.dispatcher_config.default_limits.validate()?;
        for limits in self.dispatcher_config.context_limits.values() {
            limits.validate()?;
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KvStore>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let cache = ResponseCache::open(store, clock, self.cache_config).await?;

        let dispatcher = ContextDispatcher::new(self.dispatcher_config, self.credentials, factory);
        info!(
            max_requests = dispatcher.config().default_limits.max_requests,
            overrides = dispatcher.config().context_limits.len(),
            cache_epoch = cache.epoch(),
            "insight governor ready"
        );

        Ok(InsightGovernor {
            dispatcher: Arc::new(dispatcher),
            cache,
        })
    }
}
