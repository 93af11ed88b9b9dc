//! Realtime interview wire protocol.
//!
//! Every frame is a JSON object tagged by `type`:
//!
//! - `text`: transcriptions, replies, phase changes, begin/end markers
//! - `audio`: base64 PCM plus the textual echo of a spoken reply
//! - `ping`: client liveness check sent right after connecting
//! - `error`: server error notice; the connection stays open
//!
//! Server frames carry `request_id`, the `event_id` of the client frame they
//! answer. The audio half of a reply reuses the `event_id` of its text half.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix for every generated event id.
pub const EVENT_ID_PREFIX: &str = "evt_";

const EVENT_ID_LEN: usize = 21;
const EVENT_ID_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Generic notice sent when a turn fails or a frame cannot be decoded.
pub const GENERIC_ERROR: &str = "Error processing message";

/// A frame that could not be turned into a [`Message`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid audio payload: {0}")]
    Audio(String),

    #[error("unsupported frame: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Author {
    Server,
    Client,
}

/// Refines server text/audio frames, and marks client session control frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Transcription,
    Response,
    PhaseChange,
    Begin,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior turn of the conversation, supplied by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Interview progress snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current_stage: usize,
    pub total_stages: usize,
    pub stage_name: String,
    pub progress_percent: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub event_id: String,
    pub author: Author,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "messageType", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<ChatTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioMessage {
    pub event_id: String,
    pub author: Author,
    #[serde(with = "crate::pcm::base64_samples")]
    pub audio: Vec<i16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "messageType", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<ChatTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingMessage {
    pub event_id: String,
}

/// Failure notice for a turn that could not be completed or a frame that
/// could not be decoded. It stands in for a server `text` notice: no text
/// frame is sent alongside, so clients must read `type:"error"` frames to
/// show the failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub event_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// A realtime wire frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Text(TextMessage),
    Audio(AudioMessage),
    Ping(PingMessage),
    Error(ErrorMessage),
}

/// Generate an opaque event id: `evt_` followed by random characters.
pub fn generate_event_id() -> String {
    generate_id(EVENT_ID_PREFIX, EVENT_ID_LEN)
}

/// Generate an id of `len` characters total, starting with `prefix`.
pub fn generate_id(prefix: &str, len: usize) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..len.saturating_sub(prefix.len()))
        .map(|_| EVENT_ID_ALPHABET[rng.random_range(0..EVENT_ID_ALPHABET.len())] as char)
        .collect();
    format!("{prefix}{suffix}")
}

impl Message {
    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a JSON frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn decode_str(text: &str) -> Result<Self, DecodeError> {
        Self::decode(text.as_bytes())
    }

    pub fn event_id(&self) -> &str {
        match self {
            Message::Text(m) => &m.event_id,
            Message::Audio(m) => &m.event_id,
            Message::Ping(m) => &m.event_id,
            Message::Error(m) => &m.event_id,
        }
    }

    /// The client event id this frame answers, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Message::Text(m) => m.request_id.as_deref(),
            Message::Audio(m) => m.request_id.as_deref(),
            Message::Error(m) => m.request_id.as_deref(),
            Message::Ping(_) => None,
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        match self {
            Message::Text(m) => m.message_type,
            Message::Audio(m) => m.message_type,
            _ => None,
        }
    }

    pub fn is_server(&self) -> bool {
        match self {
            Message::Text(m) => m.author == Author::Server,
            Message::Audio(m) => m.author == Author::Server,
            Message::Error(_) => true,
            Message::Ping(_) => false,
        }
    }

    // --- server frames ---

    /// Plain server notice with no `messageType` (welcome, presence).
    pub fn notice(content: impl Into<String>) -> Self {
        Self::server_text(content, None, None, None)
    }

    pub fn transcription(content: impl Into<String>, request_id: Option<String>) -> Self {
        Self::server_text(content, Some(MessageType::Transcription), None, request_id)
    }

    pub fn phase_change(
        content: impl Into<String>,
        progress: Progress,
        request_id: Option<String>,
    ) -> Self {
        Self::server_text(
            content,
            Some(MessageType::PhaseChange),
            Some(progress),
            request_id,
        )
    }

    pub fn response(
        content: impl Into<String>,
        progress: Option<Progress>,
        request_id: Option<String>,
    ) -> Self {
        Self::server_text(content, Some(MessageType::Response), progress, request_id)
    }

    pub fn end(
        content: impl Into<String>,
        progress: Option<Progress>,
        request_id: Option<String>,
    ) -> Self {
        Self::server_text(content, Some(MessageType::End), progress, request_id)
    }

    /// Audio half of a spoken reply. `event_id` must be the id of the
    /// matching `response` text frame.
    pub fn audio_reply(
        event_id: impl Into<String>,
        content: impl Into<String>,
        audio: Vec<i16>,
        progress: Option<Progress>,
        request_id: Option<String>,
    ) -> Self {
        Message::Audio(AudioMessage {
            event_id: event_id.into(),
            author: Author::Server,
            audio,
            content: Some(content.into()),
            message_type: Some(MessageType::Response),
            history: Vec::new(),
            progress,
            request_id,
        })
    }

    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        Message::Error(ErrorMessage {
            event_id: generate_event_id(),
            message: message.into(),
            request_id,
        })
    }

    fn server_text(
        content: impl Into<String>,
        message_type: Option<MessageType>,
        progress: Option<Progress>,
        request_id: Option<String>,
    ) -> Self {
        Message::Text(TextMessage {
            event_id: generate_event_id(),
            author: Author::Server,
            content: content.into(),
            message_type,
            history: Vec::new(),
            progress,
            request_id,
        })
    }

    // --- client frames ---

    pub fn ping() -> Self {
        Message::Ping(PingMessage {
            event_id: generate_event_id(),
        })
    }

    /// A recorded answer: 16 kHz samples plus the conversation so far.
    pub fn client_audio(audio: Vec<i16>, history: Vec<ChatTurn>) -> Self {
        Message::Audio(AudioMessage {
            event_id: generate_event_id(),
            author: Author::Client,
            audio,
            content: None,
            message_type: None,
            history,
            progress: None,
            request_id: None,
        })
    }

    /// A typed answer; skips transcription on the server.
    pub fn client_text(content: impl Into<String>, history: Vec<ChatTurn>) -> Self {
        Self::client_text_typed(content, None, history)
    }

    pub fn begin() -> Self {
        Self::client_text_typed("", Some(MessageType::Begin), Vec::new())
    }

    pub fn finish(history: Vec<ChatTurn>) -> Self {
        Self::client_text_typed("", Some(MessageType::End), history)
    }

    fn client_text_typed(
        content: impl Into<String>,
        message_type: Option<MessageType>,
        history: Vec<ChatTurn>,
    ) -> Self {
        Message::Text(TextMessage {
            event_id: generate_event_id(),
            author: Author::Client,
            content: content.into(),
            message_type,
            history,
            progress: None,
            request_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress() -> Progress {
        Progress {
            current_stage: 1,
            total_stages: 2,
            stage_name: "Opening".into(),
            progress_percent: 50,
        }
    }

    #[test]
    fn test_event_id_shape() {
        let a = generate_event_id();
        let b = generate_event_id();
        assert!(a.starts_with(EVENT_ID_PREFIX));
        assert_eq!(a.len(), 21);
        assert_ne!(a, b);
        assert!(!a.contains('0') && !a.contains('O') && !a.contains('l'));
    }

    #[test]
    fn test_round_trip_client_audio_with_history() {
        let msg = Message::client_audio(
            vec![0, 1, -1, i16::MAX, i16::MIN],
            vec![ChatTurn::assistant("Hello"), ChatTurn::user("Hi there")],
        );
        let wire = msg.encode().unwrap();
        assert_eq!(Message::decode_str(&wire).unwrap(), msg);
    }

    #[test]
    fn test_round_trip_server_reply_pair() {
        let text = Message::response("Tell me more.", Some(progress()), Some("evt_req".into()));
        let audio = Message::audio_reply(
            text.event_id(),
            "Tell me more.",
            vec![5; 32],
            Some(progress()),
            Some("evt_req".into()),
        );
        for msg in [text, audio] {
            let wire = msg.encode().unwrap();
            assert_eq!(Message::decode(wire.as_bytes()).unwrap(), msg);
        }
    }

    #[test]
    fn test_round_trip_error_and_ping() {
        for msg in [Message::error(GENERIC_ERROR, None), Message::ping()] {
            let wire = msg.encode().unwrap();
            assert_eq!(Message::decode_str(&wire).unwrap(), msg);
        }
    }

    #[test]
    fn test_wire_field_names() {
        let msg = Message::phase_change("Detail", progress(), Some("evt_c".into()));
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["author"], "Server");
        assert_eq!(value["messageType"], "phase_change");
        assert_eq!(value["progress"]["currentStage"], 1);
        assert_eq!(value["progress"]["totalStages"], 2);
        assert_eq!(value["progress"]["stageName"], "Opening");
        assert_eq!(value["progress"]["progressPercent"], 50);
        assert_eq!(value["request_id"], "evt_c");
        assert!(value.get("history").is_none());
    }

    #[test]
    fn test_decode_browser_style_frame() {
        let raw = r#"{
            "type": "audio",
            "event_id": "6f1c3a",
            "author": "Client",
            "audio": "AAABAP//",
            "history": [{"role": "assistant", "content": "Welcome"}]
        }"#;
        let Message::Audio(audio) = Message::decode_str(raw).unwrap() else {
            panic!("expected audio frame");
        };
        assert_eq!(audio.audio, vec![0, 1, -1]);
        assert_eq!(audio.author, Author::Client);
        assert_eq!(audio.history, vec![ChatTurn::assistant("Welcome")]);
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let raw = r#"{"type":"text","event_id":"e","author":"Server","content":"x","messageType":"summary"}"#;
        assert!(matches!(
            Message::decode_str(raw),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_frame_type_rejected() {
        let raw = r#"{"type":"video","event_id":"e"}"#;
        assert!(Message::decode_str(raw).is_err());
    }

    #[test]
    fn test_bad_audio_payload_rejected() {
        let frame = |audio: &str| format!(r#"{{"type":"audio","event_id":"e","author":"Client","audio":"{audio}"}}"#);

        // Two bytes form one sample.
        assert!(Message::decode_str(&frame("AAE=")).is_ok());
        // Three bytes leave half a sample.
        let err = Message::decode_str(&frame("AAEC")).unwrap_err();
        assert!(err.to_string().contains("odd PCM byte length 3"));
        // Not base64 at all.
        assert!(Message::decode_str(&frame("!!!")).is_err());
    }

    #[test]
    fn test_error_frame_shape() {
        let frame = Message::error(GENERIC_ERROR, Some("evt_req".into())).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], GENERIC_ERROR);
        assert_eq!(value["request_id"], "evt_req");
        assert!(value.get("content").is_none());
    }

    #[test]
    fn test_not_json_rejected() {
        assert!(Message::decode(b"\x00\x01garbage").is_err());
    }

    #[test]
    fn test_request_id_accessor() {
        let msg = Message::transcription("hi", Some("evt_abc".into()));
        assert_eq!(msg.request_id(), Some("evt_abc"));
        assert_eq!(msg.message_type(), Some(MessageType::Transcription));
        assert!(msg.is_server());
        assert_eq!(Message::ping().request_id(), None);
    }
}
