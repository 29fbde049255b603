//! Per-context rate limiting and credential routing.
//!
//! A *context* is a feature area ("dashboard", "timeline",
//! "insights_anomalies", ...) with its own provider quota and credential.
//! [`ContextDispatcher`] lazily creates exactly one [`RateLimiter`] and one
//! [`GenerationClient`] per context name and routes calls to them, so
//! exhausting one context's quota never delays another.
//!
//! # Credential resolution
//!
//! A context-specific credential wins; otherwise the default credential is
//! used; with neither, that context reports
//! [`HuginnError::Unavailable`] while every other context keeps working.
//!
//! # Quota retry
//!
//! The limiter paces but never retries. When the provider still answers
//! with [`HuginnError::RateLimited`], [`ContextDispatcher::generate`] waits a
//! fixed back-off (7s by default, or the provider's `retry_after` hint) and
//! re-queues the call once before surfacing the failure.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::client::{ClientFactory, Credential, GenerationClient, GenerationOptions, GenerationResponse};
use crate::limiter::{LimiterConfig, LimiterStatus, RateLimiter};
use crate::telemetry;
use crate::{HuginnError, Result};

/// Environment variable holding the default credential.
pub const DEFAULT_KEY_ENV: &str = "HUGINN_API_KEY";

/// Prefix of per-context credential variables (`HUGINN_API_KEY_<CONTEXT>`).
pub const CONTEXT_KEY_ENV_PREFIX: &str = "HUGINN_API_KEY_";

/// Default credential plus per-context overrides.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    default: Option<Credential>,
    contexts: HashMap<String, Credential>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback credential used by contexts without their own.
    pub fn default_key(mut self, secret: impl Into<String>) -> Self {
        self.default = Some(Credential::new(secret));
        self
    }

    /// Set the credential for one context.
    pub fn context_key(mut self, context: impl Into<String>, secret: impl Into<String>) -> Self {
        self.contexts
            .insert(context.into(), Credential::new(secret));
        self
    }

    /// Resolve `context`'s credential: its own, else the default.
    pub fn resolve(&self, context: &str) -> Option<&Credential> {
        self.contexts.get(context).or(self.default.as_ref())
    }

    /// Fill unset credentials from `HUGINN_API_KEY` and
    /// `HUGINN_API_KEY_<CONTEXT>` (context upper-cased, `-` → `_`).
    pub fn with_env_fallback(mut self, contexts: &[&str]) -> Self {
        if self.default.is_none()
            && let Ok(key) = std::env::var(DEFAULT_KEY_ENV)
        {
            self.default = Some(Credential::new(key));
        }
        for context in contexts {
            if self.contexts.contains_key(*context) {
                continue;
            }
            if let Ok(key) = std::env::var(context_env_var(context)) {
                self.contexts
                    .insert((*context).to_string(), Credential::new(key));
            }
        }
        self
    }
}

/// Environment variable name for a context's credential.
pub fn context_env_var(context: &str) -> String {
    format!(
        "{CONTEXT_KEY_ENV_PREFIX}{}",
        context.to_ascii_uppercase().replace('-', "_")
    )
}

/// Limits, retry policy and generation defaults for a dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Limits for contexts without an override.
    pub default_limits: LimiterConfig,
    /// Per-context limit overrides.
    pub context_limits: HashMap<String, LimiterConfig>,
    /// Wait before re-queueing a rate-limited call. Default: 7s.
    pub quota_backoff: Duration,
    /// Re-queues after a rate-limited answer. Default: 1.
    pub max_quota_retries: u32,
    /// Options applied where a call leaves a field unset.
    pub generation_defaults: GenerationOptions,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_limits: LimiterConfig::default(),
            context_limits: HashMap::new(),
            quota_backoff: Duration::from_secs(7),
            max_quota_retries: 1,
            generation_defaults: GenerationOptions::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the limits for contexts without an override.
    pub fn default_limits(mut self, limits: LimiterConfig) -> Self {
        self.default_limits = limits;
        self
    }

    /// Override the limits of one context.
    pub fn context_limits(mut self, context: impl Into<String>, limits: LimiterConfig) -> Self {
        self.context_limits.insert(context.into(), limits);
        self
    }

    /// Set the back-off before a quota retry.
    pub fn quota_backoff(mut self, backoff: Duration) -> Self {
        self.quota_backoff = backoff;
        self
    }

    /// Set how many times a rate-limited call is re-queued.
    pub fn max_quota_retries(mut self, n: u32) -> Self {
        self.max_quota_retries = n;
        self
    }

    /// Set generation defaults.
    pub fn generation_defaults(mut self, options: GenerationOptions) -> Self {
        self.generation_defaults = options;
        self
    }

    /// Limits that apply to `context`.
    pub fn limits_for(&self, context: &str) -> &LimiterConfig {
        self.context_limits
            .get(context)
            .unwrap_or(&self.default_limits)
    }
}

/// One context's isolated limiter and client.
pub struct ContextChannel {
    name: String,
    limiter: RateLimiter,
    client: Arc<dyn GenerationClient>,
}

impl ContextChannel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn client(&self) -> &Arc<dyn GenerationClient> {
        &self.client
    }
}

/// Routes generation calls to per-context limiters.
pub struct ContextDispatcher {
    config: DispatcherConfig,
    credentials: Credentials,
    factory: Arc<dyn ClientFactory>,
    channels: Mutex<HashMap<String, Arc<ContextChannel>>>,
}

impl ContextDispatcher {
    pub fn new(
        config: DispatcherConfig,
        credentials: Credentials,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            config,
            credentials,
            factory,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// The context's channel, created on first use and memoised.
    ///
    /// Returns [`HuginnError::Unavailable`] when the context has no
    /// credential and there is no default. Failures are not memoised.
    pub fn for_context(&self, name: &str) -> Result<Arc<ContextChannel>> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(channel) = channels.get(name) {
            return Ok(channel.clone());
        }

        let credential =
            self.credentials
                .resolve(name)
                .ok_or_else(|| HuginnError::Unavailable {
                    context: name.to_string(),
                })?;
        let limits = self.config.limits_for(name);
        let limiter = RateLimiter::new(name, limits)?;
        let client = self.factory.connect(name, credential)?;
        debug!(
            context = name,
            client = client.name(),
            max_requests = limits.max_requests,
            window_ms = limits.window.as_millis() as u64,
            "created context channel"
        );

        let channel = Arc::new(ContextChannel {
            name: name.to_string(),
            limiter,
            client,
        });
        channels.insert(name.to_string(), channel.clone());
        Ok(channel)
    }

    /// Generate through `context`'s limiter, retrying once on rate limiting.
    ///
    /// Blank text is reported as [`HuginnError::EmptyResponse`].
    pub async fn generate(
        &self,
        context: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse> {
        let channel = self.for_context(context)?;
        let options = options.clone().or(&self.config.generation_defaults);

        let mut retries = 0;
        loop {
            let client = channel.client.clone();
            let prompt = prompt.to_owned();
            let opts = options.clone();
            let result = channel
                .limiter
                .schedule(move || async move { client.generate(&prompt, &opts).await })
                .await;

            match result {
                Err(e @ HuginnError::RateLimited { .. }) if retries < self.config.max_quota_retries => {
                    let delay = e.retry_after().unwrap_or(self.config.quota_backoff);
                    retries += 1;
                    metrics::counter!(telemetry::QUOTA_RETRIES_TOTAL, "context" => context.to_owned())
                        .increment(1);
                    warn!(
                        context,
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        "provider rate limited, retrying after back-off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(response) if response.text.trim().is_empty() => {
                    return Err(HuginnError::EmptyResponse);
                }
                other => return other,
            }
        }
    }

    /// Status of every context created so far.
    pub fn status(&self) -> BTreeMap<String, LimiterStatus> {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .iter()
            .map(|(name, channel)| (name.clone(), channel.limiter.status()))
            .collect()
    }
}
