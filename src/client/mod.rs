//! Upstream text generation boundary.
//!
//! [`GenerationClient`] is the only way huginn talks to a model. Clients are
//! created per context by a [`ClientFactory`] from that context's
//! [`Credential`], and every call is paced by the context's
//! [`RateLimiter`](crate::RateLimiter).
//!
//! Implementations report provider rate limiting as
//! [`HuginnError::RateLimited`](crate::HuginnError::RateLimited) so the
//! dispatcher can apply its delayed retry; transport problems map to
//! [`HuginnError::Upstream`](crate::HuginnError::Upstream).

mod llm_client;

pub use llm_client::{LlmClientFactory, LlmGenerationClient};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Sampling options for one generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model override; `None` uses the client's default model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum number of tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Nucleus sampling threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Top-k sampling. Ignored by [`LlmGenerationClient`], which logs it at
    /// debug level; custom clients may honour it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

impl GenerationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max tokens.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set top_p.
    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Set top-k sampling.
    pub fn top_k(mut self, k: u32) -> Self {
        self.top_k = Some(k);
        self
    }

    /// Fill unset fields from `defaults`.
    pub fn or(self, defaults: &GenerationOptions) -> Self {
        Self {
            model: self.model.or_else(|| defaults.model.clone()),
            temperature: self.temperature.or(defaults.temperature),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            top_p: self.top_p.or(defaults.top_p),
            top_k: self.top_k.or(defaults.top_k),
        }
    }
}

/// Text returned by a successful generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// An upstream text generation service.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Client name for logging/debugging.
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str, options: &GenerationOptions)
    -> Result<GenerationResponse>;
}

/// An API credential. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw secret, for handing to a transport.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Builds the client a context will use from its resolved credential.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, context: &str, credential: &Credential) -> Result<Arc<dyn GenerationClient>>;
}
