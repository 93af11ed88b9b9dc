//! OpenAI Chat Completions provider.
//!
//! Streams `chat/completions` and lists `models` on any OpenAI-compatible
//! base URL (the base already carries its `/v1` segment).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use mockvox_core::config::{Config, api_url};

use crate::sse::parse_sse_stream;
use crate::{ChatChunk, ChatModel, ChatRequest, ChunkStream, ChunkUsage, ModelInfo};

pub struct OpenAiChatModel {
    pub base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiChatModel {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.base_url(), config.api_key())
    }

    fn api_key(&self) -> anyhow::Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No chat API key configured"))
    }

    fn format_messages(request: &ChatRequest) -> Vec<serde_json::Value> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(
            request
                .messages
                .iter()
                .map(|turn| json!({ "role": turn.role, "content": turn.content })),
        );
        messages
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    owned_by: Option<String>,
}

/// Map one SSE `data:` payload to a chunk. `None` means skip.
fn chunk_from_data(data: &str) -> Option<ChatChunk> {
    let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
        Ok(c) => c,
        Err(e) => {
            trace!(%e, data, "Failed to parse OpenAI chunk");
            return None;
        }
    };

    if let Some(usage) = chunk.usage {
        return Some(ChatChunk {
            usage: Some(ChunkUsage {
                input_tokens: Some(usage.prompt_tokens),
                output_tokens: Some(usage.completion_tokens),
            }),
            ..ChatChunk::default()
        });
    }

    let choice = chunk.choices.into_iter().next()?;
    let delta = choice.delta.content.filter(|c| !c.is_empty());
    if delta.is_none() && choice.finish_reason.is_none() {
        return None;
    }
    Some(ChatChunk {
        delta,
        usage: None,
        stop_reason: choice.finish_reason,
    })
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn id(&self) -> &str {
        "openai"
    }

    async fn stream(&self, request: &ChatRequest) -> anyhow::Result<ChunkStream> {
        let api_key = self.api_key()?;

        let body = OpenAiRequest {
            model: request.model.clone(),
            messages: Self::format_messages(request),
            max_tokens: request.max_tokens,
            stream: true,
            temperature: request.temperature,
        };

        debug!(model = %body.model, base_url = %self.base_url, turns = request.messages.len(), "Streaming chat completion");

        let response = self
            .client
            .post(api_url(&self.base_url, "chat/completions"))
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat API error {status}: {body}");
        }

        let sse = Box::pin(parse_sse_stream(response));
        let chunks = futures::stream::unfold(sse, |mut sse| async move {
            loop {
                match sse.next().await {
                    Some(Ok(event)) => {
                        let data = event.data.trim();
                        // Terminated by "data: [DONE]"
                        if data == "[DONE]" {
                            return None;
                        }
                        if let Some(chunk) = chunk_from_data(data) {
                            return Some((Ok(chunk), sse));
                        }
                    }
                    Some(Err(e)) => return Some((Err(e), sse)),
                    None => return None,
                }
            }
        });

        Ok(Box::pin(chunks))
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let api_key = self.api_key()?;

        let response = self
            .client
            .get(api_url(&self.base_url, "models"))
            .header("authorization", format!("Bearer {api_key}"))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to list models {status}: {body}");
        }

        let body: ModelsResponse = response.json().await?;
        Ok(body
            .data
            .into_iter()
            .map(|m| ModelInfo {
                id: m.id,
                owned_by: m.owned_by,
            })
            .collect())
    }
}
