//! [`GenerationClient`] backed by the `llm` crate.

use std::sync::Arc;

use async_trait::async_trait;
use llm::LLMProvider;
use llm::builder::{LLMBackend, LLMBuilder};
use llm::completion::CompletionRequest;
use tracing::{debug, instrument};

use super::{ClientFactory, Credential, GenerationClient, GenerationOptions, GenerationResponse};
use crate::{HuginnError, Result};

/// Parse a provider name into an llm backend.
pub(crate) fn parse_backend(name: &str) -> Result<LLMBackend> {
    match name.to_ascii_lowercase().as_str() {
        "google" | "gemini" => Ok(LLMBackend::Google),
        "openai" => Ok(LLMBackend::OpenAI),
        "anthropic" => Ok(LLMBackend::Anthropic),
        "openrouter" => Ok(LLMBackend::OpenRouter),
        "ollama" => Ok(LLMBackend::Ollama),
        other => Err(HuginnError::Configuration(format!(
            "unknown generation provider '{other}'"
        ))),
    }
}

/// Generation client for one backend and API key.
///
/// Builds an llm provider per request (the llm crate bakes sampling
/// options in at build time).
pub struct LlmGenerationClient {
    backend: LLMBackend,
    api_key: String,
    name: String,
    default_model: String,
    base_url: Option<String>,
    timeout_secs: u64,
}

impl LlmGenerationClient {
    pub fn new(
        backend: LLMBackend,
        api_key: impl Into<String>,
        name: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            api_key: api_key.into(),
            name: name.into(),
            default_model: default_model.into(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    /// Override the provider base URL (Ollama, proxies).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn build_provider(&self, model: &str, options: &GenerationOptions) -> Result<Box<dyn LLMProvider>> {
        let mut builder = LLMBuilder::new()
            .backend(self.backend.clone())
            .api_key(&self.api_key)
            .model(model)
            .timeout_seconds(self.timeout_secs);

        if let Some(temp) = options.temperature {
            builder = builder.temperature(temp);
        }
        if let Some(max) = options.max_tokens {
            builder = builder.max_tokens(max);
        }
        if let Some(p) = options.top_p {
            builder = builder.top_p(p);
        }
        if let Some(k) = options.top_k {
            debug!(provider = %self.name, top_k = k, "top_k is not supported by the llm backend, ignoring");
        }
        if let Some(ref url) = self.base_url {
            builder = builder.base_url(url.clone());
        }

        builder.build().map_err(|e| HuginnError::Llm(e.to_string()))
    }
}

#[async_trait]
impl GenerationClient for LlmGenerationClient {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "llm.generate", skip(self, prompt, options), fields(provider = %self.name))]
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse> {
        let model = options.model.as_deref().unwrap_or(&self.default_model);
        let provider = self.build_provider(model, options)?;

        let mut req_builder = CompletionRequest::builder(prompt);
        if let Some(max_tokens) = options.max_tokens {
            req_builder = req_builder.max_tokens(max_tokens);
        }
        if let Some(temp) = options.temperature {
            req_builder = req_builder.temperature(temp);
        }

        let response = provider
            .complete(&req_builder.build())
            .await
            .map_err(HuginnError::from)?;

        Ok(GenerationResponse {
            text: response.text,
            model: Some(model.to_string()),
        })
    }
}

/// Creates one [`LlmGenerationClient`] per context.
#[derive(Debug, Clone)]
pub struct LlmClientFactory {
    provider: String,
    default_model: String,
    base_url: Option<String>,
    timeout_secs: u64,
}

impl LlmClientFactory {
    /// Factory for `provider` (e.g. `"google"`) using `default_model`.
    ///
    /// Fails with [`HuginnError::Configuration`] for unknown providers.
    pub fn new(provider: impl Into<String>, default_model: impl Into<String>) -> Result<Self> {
        let provider = provider.into();
        parse_backend(&provider)?;
        Ok(Self {
            provider,
            default_model: default_model.into(),
            base_url: None,
            timeout_secs: 60,
        })
    }

    /// Override the provider base URL for every client.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

impl ClientFactory for LlmClientFactory {
    fn connect(&self, context: &str, credential: &Credential) -> Result<Arc<dyn GenerationClient>> {
        let backend = parse_backend(&self.provider)?;
        let mut client = LlmGenerationClient::new(
            backend,
            credential.expose(),
            format!("{}:{context}", self.provider),
            self.default_model.clone(),
        )
        .timeout_secs(self.timeout_secs);
        if let Some(ref url) = self.base_url {
            client = client.base_url(url.clone());
        }
        Ok(Arc::new(client))
    }
}
