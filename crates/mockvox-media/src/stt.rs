//! Speech-to-text over an OpenAI-compatible transcription endpoint.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use mockvox_core::config::{Config, api_url};

/// Wrap raw 16-bit PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let data_len = pcm.len() * 2;
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let file_size = 36 + data_len as u32;

    let mut wav = Vec::with_capacity(44 + data_len);

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &sample in pcm {
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    wav
}

/// Turns a finished recording into text.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe mono 16-bit PCM. Silence may yield an empty string.
    async fn transcribe(&self, pcm: &[i16], sample_rate: u32) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct OpenAiTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    language: Option<String>,
}

impl OpenAiTranscriber {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            language: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.base_url(), config.api_key(), config.transcription_model())
            .with_language(config.transcription_language())
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl SpeechToText for OpenAiTranscriber {
    async fn transcribe(&self, pcm: &[i16], sample_rate: u32) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No transcription API key configured"))?;

        let wav_data = pcm_to_wav(pcm, sample_rate, 1, 16);
        let url = api_url(&self.base_url, "audio/transcriptions");

        debug!(url, model = %self.model, wav_bytes = wav_data.len(), "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(wav_data)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;

        let mut form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "text")
            .part("file", part);
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Transcription API error {status}: {body}");
        }

        let text = resp.text().await?;
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    #[test]
    fn test_wav_header_generation() {
        let pcm = vec![0i16; 16000];
        let wav = pcm_to_wav(&pcm, 16000, 1, 16);

        assert_eq!(wav.len(), 44 + 16000 * 2);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");

        let sr = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(sr, 16000);
        let data_len = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
        assert_eq!(data_len, 32000);
    }

    #[tokio::test]
    async fn test_transcribe_posts_wav_form() {
        let app = Router::new().route(
            "/v1/audio/transcriptions",
            post(|headers: HeaderMap, body: Bytes| async move {
                let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
                assert_eq!(auth, Some("Bearer sk-test"));
                let body = String::from_utf8_lossy(&body);
                assert!(body.contains("whisper-1"));
                assert!(body.contains("RIFF"));
                assert!(body.contains("audio.wav"));
                "  I led the migration project. \n"
            }),
        );
        let base = serve(app).await;
        let stt = OpenAiTranscriber::new(base, Some("sk-test".into()), "whisper-1");
        let text = stt.transcribe(&[0i16; 1600], 16_000).await.unwrap();
        assert_eq!(text, "I led the migration project.");
    }

    #[tokio::test]
    async fn test_transcribe_empty_result() {
        let app = Router::new().route("/v1/audio/transcriptions", post(|| async { "" }));
        let base = serve(app).await;
        let stt = OpenAiTranscriber::new(base, Some("k".into()), "whisper-1");
        assert_eq!(stt.transcribe(&[0i16; 16_000], 16_000).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_transcribe_upstream_error() {
        let app = Router::new().route(
            "/v1/audio/transcriptions",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let base = serve(app).await;
        let stt = OpenAiTranscriber::new(base, Some("k".into()), "whisper-1");
        let err = stt.transcribe(&[0i16; 10], 16_000).await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_missing_key_fails_fast() {
        let stt = OpenAiTranscriber::new("http://127.0.0.1:9/v1", None, "whisper-1");
        assert!(stt.transcribe(&[0i16; 10], 16_000).await.is_err());
    }
}
