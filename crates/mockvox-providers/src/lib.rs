//! Reply-generation provider abstraction.
//!
//! Providers implement [`ChatModel`] to stream chat completions from an
//! OpenAI-compatible API. [`validate_upstream`] is the connectivity check
//! behind the configuration check.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use mockvox_core::protocol::ChatTurn;

pub mod openai;
pub mod sse;

pub use openai::OpenAiChatModel;

/// A chat completion request: system directive plus ordered turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ChatTurn>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatTurn>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// A streamed chunk from the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatChunk {
    pub delta: Option<String>,
    pub usage: Option<ChunkUsage>,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<ChatChunk>> + Send>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Provider identifier (e.g., "openai").
    fn id(&self) -> &str;

    async fn stream(&self, request: &ChatRequest) -> anyhow::Result<ChunkStream>;

    /// Run a request to completion and return the concatenated text.
    async fn complete(&self, request: &ChatRequest) -> anyhow::Result<String> {
        let mut stream = self.stream(request).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            if let Some(delta) = chunk?.delta {
                text.push_str(&delta);
            }
        }
        Ok(text)
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>>;
}

/// Upstream settings submitted for validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl UpstreamSettings {
    /// The first missing field, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().map(str::trim).unwrap_or("").is_empty();
        if blank(&self.api_key) {
            Some("apiKey")
        } else if blank(&self.model) {
            Some("model")
        } else if blank(&self.base_url) {
            Some("baseUrl")
        } else {
            None
        }
    }
}

/// Check that all fields are present and the upstream lists at least one model.
pub async fn validate_upstream(settings: &UpstreamSettings) -> anyhow::Result<usize> {
    if let Some(field) = settings.missing_field() {
        anyhow::bail!("{field} must not be empty");
    }
    let (Some(api_key), Some(base_url)) = (&settings.api_key, &settings.base_url) else {
        anyhow::bail!("incomplete upstream settings");
    };

    let provider = OpenAiChatModel::new(base_url.trim(), Some(api_key.trim().to_string()));
    let models = provider
        .list_models()
        .await
        .map_err(|e| anyhow::anyhow!("Cannot reach the model service: {e}"))?;
    if models.is_empty() {
        anyhow::bail!("The model service returned no models; check the configuration");
    }
    Ok(models.len())
}
