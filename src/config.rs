//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.huginn/config.toml` (user)
//! 3. `/etc/huginn/config.toml` (system)
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.huginn/secrets.toml` (user, must be 0600)
//! 2. `/etc/huginn/secrets.toml` (system, must be 0600)
//!
//! ```toml
//! [provider]
//! name = "google"
//! default_model = "gemini-2.0-flash"
//!
//! [limits]
//! max_requests = 10
//! window_ms = 60000
//!
//! [contexts.timeline]
//! max_requests = 5
//!
//! [cache]
//! ttl_secs = 86400
//!
//! [retry]
//! quota_backoff_ms = 7000
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::client::{GenerationOptions, LlmClientFactory};
use crate::dispatcher::{Credentials, DispatcherConfig};
use crate::limiter::LimiterConfig;
use crate::{HuginnError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GovernorConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Per-context overrides of `[limits]`.
    #[serde(default)]
    pub contexts: BTreeMap<String, ContextLimitsConfig>,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub retry: RetrySection,
    /// Generation defaults applied to every call.
    #[serde(default)]
    pub generation: GenerationOptions,
}

/// Upstream provider selection.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Backend name: google, openai, anthropic, openrouter, ollama (default: google).
    #[serde(default = "default_provider")]
    pub name: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider(),
            default_model: default_model(),
            base_url: None,
            timeout_secs: None,
        }
    }
}

fn default_provider() -> String {
    "google".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

/// Default rate limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Requests per window (default: 10).
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Window length in milliseconds (default: 60000).
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Minimum spacing override (default: window_ms / max_requests).
    #[serde(default)]
    pub min_spacing_ms: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
            min_spacing_ms: None,
        }
    }
}

fn default_max_requests() -> u32 {
    10
}

fn default_window_ms() -> u64 {
    60_000
}

impl LimitsConfig {
    pub fn to_limiter_config(&self) -> LimiterConfig {
        let config = LimiterConfig::new()
            .max_requests(self.max_requests)
            .window(Duration::from_millis(self.window_ms));
        match self.min_spacing_ms {
            Some(ms) => config.min_spacing(Duration::from_millis(ms)),
            None => config,
        }
    }
}

/// Per-context limit overrides; unset fields inherit `[limits]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextLimitsConfig {
    #[serde(default)]
    pub max_requests: Option<u32>,
    #[serde(default)]
    pub window_ms: Option<u64>,
    #[serde(default)]
    pub min_spacing_ms: Option<u64>,
}

impl ContextLimitsConfig {
    fn over(&self, base: &LimitsConfig) -> LimitsConfig {
        LimitsConfig {
            max_requests: self.max_requests.unwrap_or(base.max_requests),
            window_ms: self.window_ms.unwrap_or(base.window_ms),
            // A context that changes its quota gets spacing derived from it.
            min_spacing_ms: self.min_spacing_ms.or(
                if self.max_requests.is_some() || self.window_ms.is_some() {
                    None
                } else {
                    base.min_spacing_ms
                },
            ),
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Entry time-to-live in seconds (default: 86400).
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Store key prefix (default: "huginn:").
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Keep the persisted session epoch instead of starting a new one.
    #[serde(default)]
    pub resume_session: bool,
    /// Cache file for the CLI (default: ~/.huginn/cache.json).
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Byte quota for the cache store.
    #[serde(default)]
    pub capacity_bytes: Option<usize>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            key_prefix: default_key_prefix(),
            resume_session: false,
            path: None,
            capacity_bytes: None,
        }
    }
}

fn default_ttl_secs() -> u64 {
    86_400
}

fn default_key_prefix() -> String {
    "huginn:".to_string()
}

/// Quota retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    /// Wait before re-queueing a rate-limited call (default: 7000).
    #[serde(default = "default_quota_backoff_ms")]
    pub quota_backoff_ms: u64,
    /// Re-queues after a rate-limited answer (default: 1).
    #[serde(default = "default_max_quota_retries")]
    pub max_quota_retries: u32,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            quota_backoff_ms: default_quota_backoff_ms(),
            max_quota_retries: default_max_quota_retries(),
        }
    }
}

fn default_quota_backoff_ms() -> u64 {
    7_000
}

fn default_max_quota_retries() -> u32 {
    1
}

impl GovernorConfig {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.huginn/config.toml`
    /// 3. `/etc/huginn/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from_file(&path)
    }

    /// Like [`GovernorConfig::load`], but defaults when no file exists.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        match explicit_path {
            Some(_) => Self::load(explicit_path),
            None => match Self::find_config_path() {
                Some(path) => Self::load_from_file(&path),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            HuginnError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(HuginnError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        Self::find_config_path().ok_or_else(|| {
            HuginnError::Configuration(
                "No config file found. Create ~/.huginn/config.toml or /etc/huginn/config.toml"
                    .to_string(),
            )
        })
    }

    fn find_config_path() -> Option<PathBuf> {
        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".huginn").join("config.toml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/huginn/config.toml");
        system_config.exists().then_some(system_config)
    }

    /// Context names with explicit sections.
    pub fn context_names(&self) -> Vec<&str> {
        self.contexts.keys().map(String::as_str).collect()
    }

    pub fn limits_for(&self, context: &str) -> LimitsConfig {
        match self.contexts.get(context) {
            Some(overrides) => overrides.over(&self.limits),
            None => self.limits.clone(),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let mut config = DispatcherConfig::new()
            .default_limits(self.limits.to_limiter_config())
            .quota_backoff(Duration::from_millis(self.retry.quota_backoff_ms))
            .max_quota_retries(self.retry.max_quota_retries)
            .generation_defaults(self.generation.clone());
        for name in self.contexts.keys() {
            config = config.context_limits(name.clone(), self.limits_for(name).to_limiter_config());
        }
        config
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .ttl(Duration::from_secs(self.cache.ttl_secs))
            .key_prefix(self.cache.key_prefix.clone())
            .resume_session(self.cache.resume_session)
    }

    /// Cache file location: `[cache] path`, else `~/.huginn/cache.json`.
    pub fn cache_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.cache.path {
            return Ok(path.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(".huginn").join("cache.json"))
            .ok_or_else(|| {
                HuginnError::Configuration("cannot determine home directory".to_string())
            })
    }

    /// Production client factory for `[provider]`.
    pub fn client_factory(&self) -> Result<LlmClientFactory> {
        let mut factory =
            LlmClientFactory::new(self.provider.name.clone(), self.provider.default_model.clone())?;
        if let Some(url) = &self.provider.base_url {
            factory = factory.base_url(url.clone());
        }
        if let Some(secs) = self.provider.timeout_secs {
            factory = factory.timeout_secs(secs);
        }
        Ok(factory)
    }
}

/// Secrets configuration (API keys).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    /// Key used by contexts without their own.
    #[serde(default)]
    pub default: Option<ApiKeySecret>,
    #[serde(default)]
    pub contexts: BTreeMap<String, ApiKeySecret>,
}

/// A single API key secret.
#[derive(Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

impl std::fmt::Debug for ApiKeySecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeySecret")
            .field("api_key", &"***")
            .finish()
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Resolution order:
    /// 1. `~/.huginn/secrets.toml` (if exists, must be 0600)
    /// 2. `/etc/huginn/secrets.toml` (if exists, must be 0600)
    ///
    /// Returns empty secrets if no file exists (keys may come from env vars).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".huginn").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_path(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/huginn/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_path(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Load one secrets file after checking its permissions.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            HuginnError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        // Reject if group or other bits are set
        if mode & 0o077 != 0 {
            return Err(HuginnError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Credentials from this file, with env fallback for anything unset.
    ///
    /// `contexts` lists the context names whose `HUGINN_API_KEY_<CONTEXT>`
    /// variables should be consulted.
    pub fn credentials(&self, contexts: &[&str]) -> Credentials {
        let mut credentials = Credentials::new();
        if let Some(secret) = &self.default {
            credentials = credentials.default_key(secret.api_key.clone());
        }
        for (context, secret) in &self.contexts {
            credentials = credentials.context_key(context.clone(), secret.api_key.clone());
        }
        credentials.with_env_fallback(contexts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = GovernorConfig::default();
        assert_eq!(config.provider.name, "google");
        assert_eq!(config.limits.max_requests, 10);
        assert_eq!(config.limits.window_ms, 60_000);
        assert_eq!(config.cache.ttl_secs, 86_400);
        assert_eq!(config.cache.key_prefix, "huginn:");
        assert_eq!(config.retry.quota_backoff_ms, 7_000);
        assert_eq!(config.retry.max_quota_retries, 1);
    }

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
            [limits]
            max_requests = 15
        "#;
        let config: GovernorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.limits.max_requests, 15);
        // Defaults preserved
        assert_eq!(config.limits.window_ms, 60_000);
        assert!(!config.cache.resume_session);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [provider]
            name = "openrouter"
            default_model = "google/gemini-2.0-flash-001"
            timeout_secs = 20

            [limits]
            max_requests = 10
            window_ms = 60000

            [contexts.timeline]
            max_requests = 5

            [contexts.insights_anomalies]
            min_spacing_ms = 1000

            [cache]
            ttl_secs = 3600
            key_prefix = "hd:"
            resume_session = true

            [retry]
            quota_backoff_ms = 5000
            max_quota_retries = 2

            [generation]
            temperature = 0.4
            max_tokens = 512
        "#;
        let config: GovernorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.provider.name, "openrouter");
        assert_eq!(config.provider.timeout_secs, Some(20));
        assert_eq!(config.context_names(), vec!["insights_anomalies", "timeline"]);
        assert_eq!(config.cache.key_prefix, "hd:");
        assert!(config.cache.resume_session);
        assert_eq!(config.retry.max_quota_retries, 2);
        assert_eq!(config.generation.max_tokens, Some(512));

        let cache = config.cache_config();
        assert_eq!(cache.ttl, Duration::from_secs(3600));

        let dispatcher = config.dispatcher_config();
        assert_eq!(dispatcher.quota_backoff, Duration::from_millis(5000));
        assert_eq!(dispatcher.limits_for("timeline").max_requests, 5);
        assert_eq!(
            dispatcher.limits_for("timeline").effective_min_spacing(),
            Duration::from_secs(12)
        );
        assert_eq!(
            dispatcher
                .limits_for("insights_anomalies")
                .effective_min_spacing(),
            Duration::from_secs(1)
        );
        assert_eq!(dispatcher.limits_for("dashboard").max_requests, 10);
    }

    #[test]
    fn context_override_inherits_unset_fields() {
        let toml = r#"
            [limits]
            max_requests = 20
            window_ms = 30000
            min_spacing_ms = 100

            [contexts.dashboard]
            window_ms = 60000
        "#;
        let config: GovernorConfig = toml::from_str(toml).unwrap();
        let limits = config.limits_for("dashboard");
        assert_eq!(limits.max_requests, 20);
        assert_eq!(limits.window_ms, 60_000);
        assert_eq!(limits.min_spacing_ms, None);
    }

    #[test]
    fn parse_secrets() {
        let toml = r#"
            [default]
            api_key = "shared-key"

            [contexts.timeline]
            api_key = "timeline-key"
        "#;
        let secrets: Secrets = toml::from_str(toml).unwrap();
        assert_eq!(secrets.default.as_ref().unwrap().api_key, "shared-key");
        let credentials = secrets.credentials(&[]);
        assert_eq!(credentials.resolve("timeline").unwrap().expose(), "timeline-key");
        assert_eq!(credentials.resolve("dashboard").unwrap().expose(), "shared-key");
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = ApiKeySecret {
            api_key: "sk-secret".to_string(),
        };
        assert!(!format!("{secret:?}").contains("sk-secret"));
    }

    #[test]
    fn config_not_found_returns_error() {
        let result = GovernorConfig::load(Some(Path::new("/nonexistent/config.toml")));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Config file not found"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = GovernorConfig {
            provider: ProviderConfig {
                name: "carrier-pigeon".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.client_factory().is_err());
    }
}
