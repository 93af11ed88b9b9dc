//! Upstream service bundle for one connection.

use std::sync::Arc;

use mockvox_core::config::Config;
use mockvox_media::{OpenAiSpeech, OpenAiTranscriber, SpeechSynthesizer, SpeechToText};
use mockvox_providers::{ChatModel, OpenAiChatModel};

/// Per-connection overrides taken from the upgrade query string.
#[derive(Debug, Clone, Default)]
pub struct ServiceOverrides {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// The three external collaborators of a turn plus chat parameters.
#[derive(Clone)]
pub struct Services {
    pub stt: Arc<dyn SpeechToText>,
    pub chat: Arc<dyn ChatModel>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub chat_model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// Builds the services a connection talks to.
pub trait ServiceFactory: Send + Sync {
    fn build(&self, overrides: &ServiceOverrides) -> Services;
}

/// OpenAI-compatible endpoints; overrides win over config and environment.
pub struct OpenAiServiceFactory {
    config: Arc<Config>,
}

impl OpenAiServiceFactory {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

impl ServiceFactory for OpenAiServiceFactory {
    fn build(&self, overrides: &ServiceOverrides) -> Services {
        let config = &self.config;
        let api_key = non_empty(&overrides.api_key).or_else(|| config.api_key());
        let base_url = non_empty(&overrides.base_url).unwrap_or_else(|| config.base_url());

        let stt = OpenAiTranscriber::new(base_url.clone(), api_key.clone(), config.transcription_model())
            .with_language(config.transcription_language());
        let tts = OpenAiSpeech::new(base_url.clone(), api_key.clone(), config.speech_model())
            .with_voice(config.voice())
            .with_speed(config.speech_speed())
            .with_rates(config.speech_sample_rate(), mockvox_core::pcm::SAMPLE_RATE);
        let chat = OpenAiChatModel::new(base_url, api_key);

        Services {
            stt: Arc::new(stt),
            chat: Arc::new(chat),
            tts: Arc::new(tts),
            chat_model: non_empty(&overrides.model).unwrap_or_else(|| config.chat_model()),
            max_tokens: config.max_tokens(),
            temperature: config.temperature(),
        }
    }
}
