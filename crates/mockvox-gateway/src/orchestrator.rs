//! Per-connection turn pipeline.
//!
//! Client frames are handled one at a time. Every frame a turn emits carries
//! the client frame's `event_id` as its `request_id`.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use mockvox_core::error::{MockvoxError, Result};
use mockvox_core::pcm::SAMPLE_RATE;
use mockvox_core::protocol::{
    AudioMessage, Author, ChatTurn, DecodeError, GENERIC_ERROR, Message, MessageType, Progress,
    TextMessage,
};
use mockvox_interview::InterviewSession;
use mockvox_providers::ChatRequest;

use crate::services::Services;

fn upstream(stage: &str) -> impl FnOnce(anyhow::Error) -> MockvoxError + '_ {
    move |e| MockvoxError::Upstream(format!("{stage}: {e:#}"))
}

pub struct Orchestrator {
    conn_id: String,
    session: InterviewSession,
    services: Services,
    out: mpsc::UnboundedSender<String>,
}

impl Orchestrator {
    pub fn new(
        conn_id: String,
        session: InterviewSession,
        services: Services,
        out: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            conn_id,
            session,
            services,
            out,
        }
    }

    /// Process client frames until the sender side closes.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(msg) = rx.recv().await {
            self.handle(msg).await;
        }
        debug!(conn_id = %self.conn_id, "Orchestrator stopped");
    }

    /// Handle one client frame. Failures become an error frame; the session
    /// stays usable for the next turn.
    pub async fn handle(&mut self, msg: Message) {
        let request_id = msg.event_id().to_string();
        if let Err(e) = self.dispatch(msg, &request_id).await {
            error!(conn_id = %self.conn_id, %request_id, error = %e, "Turn failed");
            self.emit(Message::error(GENERIC_ERROR, Some(request_id)));
        }
    }

    async fn dispatch(&mut self, msg: Message, request_id: &str) -> Result<()> {
        match msg {
            Message::Audio(AudioMessage {
                author: Author::Client,
                audio,
                message_type: None,
                history,
                ..
            }) => self.audio_turn(audio, history, request_id).await,
            Message::Audio(AudioMessage {
                author: Author::Client,
                message_type: Some(other),
                ..
            }) => Err(DecodeError::Unsupported(format!("client audio with messageType {other:?}")).into()),
            Message::Text(TextMessage {
                author: Author::Client,
                content,
                message_type,
                history,
                ..
            }) => match message_type {
                None => self.answer_turn(content, history, request_id).await,
                Some(MessageType::Begin) => self.begin(request_id).await,
                Some(MessageType::End) => {
                    self.end(request_id);
                    Ok(())
                }
                Some(other) => Err(DecodeError::Unsupported(format!("client messageType {other:?}")).into()),
            },
            Message::Ping(_) => {
                debug!(conn_id = %self.conn_id, "Ping");
                Ok(())
            }
            _ => Err(DecodeError::Unsupported("server frame sent by a client".into()).into()),
        }
    }

    /// Spoken answer: transcribe, then continue as a typed answer.
    async fn audio_turn(&mut self, audio: Vec<i16>, history: Vec<ChatTurn>, request_id: &str) -> Result<()> {
        debug!(conn_id = %self.conn_id, %request_id, samples = audio.len(), "Audio turn");
        let text = self
            .services
            .stt
            .transcribe(&audio, SAMPLE_RATE)
            .await
            .map_err(upstream("transcription"))?;
        self.emit(Message::transcription(text.clone(), Some(request_id.to_string())));
        self.reply(text, history, request_id).await
    }

    async fn answer_turn(&mut self, content: String, history: Vec<ChatTurn>, request_id: &str) -> Result<()> {
        debug!(conn_id = %self.conn_id, %request_id, "Text turn");
        self.reply(content, history, request_id).await
    }

    async fn reply(&mut self, answer: String, history: Vec<ChatTurn>, request_id: &str) -> Result<()> {
        let plan = self.session.plan_turn(history.len());
        if let Some(change) = &plan.phase_change {
            info!(conn_id = %self.conn_id, stage = %change.stage.id, "Interview stage changed");
            self.emit(Message::phase_change(
                change.stage.name.clone(),
                change.progress.clone(),
                Some(request_id.to_string()),
            ));
        }

        let mut messages = history;
        if !answer.trim().is_empty() {
            messages.push(ChatTurn::user(answer));
        }
        let mut request = ChatRequest::new(self.services.chat_model.clone(), messages).with_system(plan.directive);
        request.max_tokens = self.services.max_tokens;
        request.temperature = self.services.temperature;

        let reply = self
            .services
            .chat
            .complete(&request)
            .await
            .map_err(upstream("reply generation"))?;

        self.speak(reply, plan.progress, request_id).await
    }

    /// Open the interview without transcription or reply generation.
    async fn begin(&mut self, request_id: &str) -> Result<()> {
        info!(conn_id = %self.conn_id, stage = %self.session.phase().current().id, "Interview started");
        let opening = self.session.opening();
        let progress = self.session.progress();
        self.speak(opening, progress, request_id).await
    }

    fn end(&mut self, request_id: &str) {
        info!(conn_id = %self.conn_id, "Interview ended by client");
        self.emit(Message::end(
            self.session.closing(),
            Some(self.session.final_progress()),
            Some(request_id.to_string()),
        ));
    }

    /// Emit the text response, synthesize it, then emit the paired audio
    /// under the same event id.
    async fn speak(&mut self, text: String, progress: Progress, request_id: &str) -> Result<()> {
        let response = Message::response(text.clone(), Some(progress.clone()), Some(request_id.to_string()));
        let response_id = response.event_id().to_string();
        self.emit(response);

        let audio = self
            .services
            .tts
            .synthesize(&text)
            .await
            .map_err(upstream("speech synthesis"))?;
        debug!(conn_id = %self.conn_id, event_id = %response_id, samples = audio.len(), "Reply synthesized");

        self.emit(Message::audio_reply(
            response_id,
            text,
            audio,
            Some(progress),
            Some(request_id.to_string()),
        ));
        Ok(())
    }

    fn emit(&self, msg: Message) {
        match msg.encode() {
            Ok(frame) => {
                if self.out.send(frame).is_err() {
                    warn!(conn_id = %self.conn_id, "Connection closed before frame was sent");
                }
            }
            Err(e) => error!(conn_id = %self.conn_id, %e, "Failed to serialize frame"),
        }
    }
}
