//! Generative-text service clients.
//!
//! Defines the [`TextGenerator`] trait and its implementations:
//! - **[`DisabledGenerator`]**: always fails; used when generation is not configured.
//! - **[`OpenAiGenerator`]**: calls an OpenAI-compatible `/v1/chat/completions` endpoint.
//! - **[`OllamaGenerator`]**: calls a local Ollama instance's `/api/generate` endpoint.
//!
//! Use [`create_generator`] to pick one from `[generation]` config.
//!
//! # No Retries
//!
//! A generation call is billable and not idempotent, so failures are
//! returned immediately as [`AnalysisError::Generation`] (or `Timeout`).
//! Callers fall back to cached or placeholder text instead of retrying.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::AnalysisError;

/// A single request/response text generation call.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model identifier, recorded in logs.
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, AnalysisError>;
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, AnalysisError> {
        Err(AnalysisError::Generation(
            "text generation is disabled".to_string(),
        ))
    }
}

// ============ OpenAI ============

/// Chat-completions client. Requires `OPENAI_API_KEY`.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let Ok(api_key) = std::env::var("OPENAI_API_KEY") else {
            bail!("OPENAI_API_KEY environment variable not set");
        };
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        Self::with_api_key(base_url, model, api_key, config.timeout_secs)
    }

    pub fn with_api_key(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, AnalysisError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let json = read_json(response, "OpenAI").await?;
        parse_openai_response(&json)
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<String, AnalysisError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            AnalysisError::Generation("invalid OpenAI response: missing message content".into())
        })
}

// ============ Ollama ============

/// Calls `POST /api/generate` on the configured Ollama URL (default:
/// `http://localhost:11434`) with streaming disabled.
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, AnalysisError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let json = read_json(response, "Ollama").await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AnalysisError::Generation("invalid Ollama response: missing response".into()))
    }
}

// ============ Shared ============

fn request_error(err: reqwest::Error) -> AnalysisError {
    if err.is_timeout() {
        AnalysisError::Timeout(err.to_string())
    } else {
        AnalysisError::Generation(err.to_string())
    }
}

async fn read_json(
    response: reqwest::Response,
    service: &str,
) -> Result<serde_json::Value, AnalysisError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AnalysisError::Generation(format!(
            "{} API error {}: {}",
            service,
            status,
            body.trim()
        )));
    }
    response
        .json()
        .await
        .map_err(|e| AnalysisError::Generation(format!("invalid {} response: {}", service, e)))
}

/// Creates the generator named by `generation.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn TextGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "openai" => Ok(Box::new(OpenAiGenerator::new(config)?)),
        "ollama" => Ok(Box::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
