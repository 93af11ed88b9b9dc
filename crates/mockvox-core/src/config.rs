//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_SPEECH_MODEL: &str = "tts-1";
pub const DEFAULT_VOICE: &str = "alloy";
pub const DEFAULT_SPEECH_RATE: u32 = 24_000;
pub const DEFAULT_CHUNK_SAMPLES: usize = 16_000;
pub const DEFAULT_TURN_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_INDUSTRY: &str = "tech";
pub const DEFAULT_INTERVIEW_TYPE: &str = "self-intro";

/// Environment variables consulted when no key or base URL is configured.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const BASE_URL_ENV: &str = "OPENAI_API_URL";

/// Top-level mockvox configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech: Option<SpeechConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub interview: Option<InterviewConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Shared credentials for the OpenAI-compatible upstream services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Base URL including the version segment, e.g. `https://api.openai.com/v1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl UpstreamConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// ISO-639-1 hint passed to the transcription service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeechConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    /// Rate of the raw PCM returned by the synthesis service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterviewConfig {
    /// YAML catalog replacing the bundled content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_industry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_samples: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "mockvox_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        json5::from_str(&substituted).map_err(|e| crate::error::MockvoxError::Config(e.to_string()))
    }

    /// Default config file location: `~/.mockvox/config.json`.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or(DEFAULT_PORT)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    /// Upstream API key: config, then `OPENAI_API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        self.upstream
            .as_ref()
            .and_then(|u| u.resolve_api_key())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()))
    }

    /// Upstream base URL: config, then `OPENAI_API_URL`, then the public endpoint.
    pub fn base_url(&self) -> String {
        self.upstream
            .as_ref()
            .and_then(|u| u.base_url.clone())
            .filter(|u| !u.is_empty())
            .or_else(|| std::env::var(BASE_URL_ENV).ok().filter(|u| !u.is_empty()))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn transcription_model(&self) -> String {
        self.transcription
            .as_ref()
            .and_then(|t| t.model.clone())
            .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string())
    }

    pub fn transcription_language(&self) -> Option<String> {
        self.transcription.as_ref().and_then(|t| t.language.clone())
    }

    pub fn chat_model(&self) -> String {
        self.chat
            .as_ref()
            .and_then(|c| c.model.clone())
            .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string())
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.chat.as_ref().and_then(|c| c.max_tokens)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.chat.as_ref().and_then(|c| c.temperature)
    }

    pub fn speech_model(&self) -> String {
        self.speech
            .as_ref()
            .and_then(|s| s.model.clone())
            .unwrap_or_else(|| DEFAULT_SPEECH_MODEL.to_string())
    }

    pub fn voice(&self) -> String {
        self.speech
            .as_ref()
            .and_then(|s| s.voice.clone())
            .unwrap_or_else(|| DEFAULT_VOICE.to_string())
    }

    pub fn speech_speed(&self) -> f32 {
        self.speech.as_ref().and_then(|s| s.speed).unwrap_or(1.0)
    }

    pub fn speech_sample_rate(&self) -> u32 {
        self.speech
            .as_ref()
            .and_then(|s| s.sample_rate)
            .unwrap_or(DEFAULT_SPEECH_RATE)
    }

    pub fn content_path(&self) -> Option<PathBuf> {
        self.interview
            .as_ref()
            .and_then(|i| i.content_path.as_ref())
            .map(PathBuf::from)
    }

    pub fn default_industry(&self) -> String {
        self.interview
            .as_ref()
            .and_then(|i| i.default_industry.clone())
            .unwrap_or_else(|| DEFAULT_INDUSTRY.to_string())
    }

    pub fn default_interview_type(&self) -> String {
        self.interview
            .as_ref()
            .and_then(|i| i.default_type.clone())
            .unwrap_or_else(|| DEFAULT_INTERVIEW_TYPE.to_string())
    }

    pub fn client_url(&self) -> String {
        self.client
            .as_ref()
            .and_then(|c| c.url.clone())
            .unwrap_or_else(|| format!("ws://127.0.0.1:{}/api/realtime", self.gateway_port()))
    }

    pub fn turn_timeout_secs(&self) -> u64 {
        self.client
            .as_ref()
            .and_then(|c| c.turn_timeout_secs)
            .unwrap_or(DEFAULT_TURN_TIMEOUT_SECS)
    }

    pub fn client_sample_rate(&self) -> u32 {
        self.client
            .as_ref()
            .and_then(|c| c.sample_rate)
            .unwrap_or(crate::pcm::SAMPLE_RATE)
    }

    pub fn chunk_samples(&self) -> usize {
        self.client
            .as_ref()
            .and_then(|c| c.chunk_samples)
            .unwrap_or(DEFAULT_CHUNK_SAMPLES)
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.api_key().is_none() {
            warnings.push(format!(
                "No upstream API key configured (set upstream.api_key or {API_KEY_ENV})"
            ));
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        if let Some(path) = self.content_path() {
            if !path.exists() {
                errors.push(format!("Content file not found: {}", path.display()));
            }
        }

        if let Some(speed) = self.speech.as_ref().and_then(|s| s.speed) {
            if !(0.25..=4.0).contains(&speed) {
                errors.push(format!("Speech speed {speed} outside 0.25..=4.0"));
            }
        }

        if self.speech_sample_rate() == 0 || self.client_sample_rate() == 0 {
            errors.push("Sample rates must be non-zero".to_string());
        }

        if self.chunk_samples() == 0 {
            errors.push("client.chunk_samples cannot be 0".to_string());
        }

        if self.turn_timeout_secs() == 0 {
            warnings.push("client.turn_timeout_secs is 0; every turn will time out".to_string());
        }

        if let Some(logging) = &self.logging {
            if !matches!(logging.format.as_str(), "plain" | "json") {
                warnings.push(format!(
                    "Unknown logging.format '{}', falling back to plain",
                    logging.format
                ));
            }
        }

        (warnings, errors)
    }
}

/// Append an API path to a base URL that already carries its version segment.
pub fn api_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Base directory for mockvox data: `~/.mockvox/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mockvox")
}
