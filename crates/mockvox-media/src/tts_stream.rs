//! Speech synthesis over an OpenAI-compatible `audio/speech` endpoint.
//!
//! The service returns raw 16-bit little-endian PCM. Chunks from the HTTP
//! body can split a sample across two reads, so bytes are re-paired before
//! decoding.

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use mockvox_core::config::{Config, api_url};
use mockvox_core::pcm::SAMPLE_RATE;

use crate::resample::resample_linear;

/// Turns reply text into PCM at the pipeline sample rate.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<i16>>;
}

/// Reassembles samples from arbitrarily split byte chunks.
#[derive(Debug, Default)]
pub struct PcmAccumulator {
    samples: Vec<i16>,
    carry: Option<u8>,
}

impl PcmAccumulator {
    pub fn push(&mut self, mut bytes: &[u8]) {
        if let Some(low) = self.carry.take() {
            match bytes.split_first() {
                Some((&high, rest)) => {
                    self.samples.push(i16::from_le_bytes([low, high]));
                    bytes = rest;
                }
                None => {
                    self.carry = Some(low);
                    return;
                }
            }
        }
        let pairs = bytes.chunks_exact(2);
        if let [odd] = pairs.remainder() {
            self.carry = Some(*odd);
        }
        self.samples
            .extend(pairs.map(|pair| i16::from_le_bytes([pair[0], pair[1]])));
    }

    /// Finished samples. A dangling odd byte is dropped.
    pub fn finish(self) -> Vec<i16> {
        if self.carry.is_some() {
            debug!("Dropping trailing odd byte from synthesized audio");
        }
        self.samples
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiSpeech {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    voice: String,
    speed: f32,
    source_rate: u32,
    target_rate: u32,
}

impl OpenAiSpeech {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            voice: mockvox_core::config::DEFAULT_VOICE.to_string(),
            speed: 1.0,
            source_rate: mockvox_core::config::DEFAULT_SPEECH_RATE,
            target_rate: SAMPLE_RATE,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.base_url(), config.api_key(), config.speech_model())
            .with_voice(config.voice())
            .with_speed(config.speech_speed())
            .with_rates(config.speech_sample_rate(), config.client_sample_rate())
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    /// Rate the service produces, and rate to deliver.
    pub fn with_rates(mut self, source_rate: u32, target_rate: u32) -> Self {
        self.source_rate = source_rate;
        self.target_rate = target_rate;
        self
    }

    /// Stream raw PCM bytes as they arrive from the service.
    pub async fn stream(&self, text: &str, chunk_tx: mpsc::UnboundedSender<Vec<u8>>) -> Result<()> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No speech API key configured"))?;
        let url = api_url(&self.base_url, "audio/speech");

        debug!(voice = %self.voice, model = %self.model, text_len = text.len(), "Starting speech stream");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&serde_json::json!({
                "model": self.model,
                "voice": self.voice,
                "input": text,
                "response_format": "pcm",
                "speed": self.speed,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Speech API error {status}: {body}");
        }

        let mut stream = resp.bytes_stream();
        while let Some(chunk_result) = stream.next().await {
            match chunk_result {
                Ok(bytes) => {
                    if chunk_tx.send(bytes.to_vec()).is_err() {
                        debug!("Speech chunk receiver dropped, stopping stream");
                        break;
                    }
                }
                Err(e) => anyhow::bail!("Speech stream error: {e}"),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<i16>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let collect = async {
            let mut pcm = PcmAccumulator::default();
            while let Some(chunk) = chunk_rx.recv().await {
                pcm.push(&chunk);
            }
            pcm.finish()
        };
        let (streamed, samples) = tokio::join!(self.stream(text, chunk_tx), collect);
        streamed?;

        Ok(resample_linear(&samples, self.source_rate, self.target_rate))
    }
}
