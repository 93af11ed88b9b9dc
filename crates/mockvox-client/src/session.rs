//! Client session handle for the realtime interview endpoint.
//!
//! One reader task decodes inbound frames and dispatches them: first to the
//! primary handler, then to every registered handler, then to the pending
//! request table. Turns are correlated by the `request_id` the server copies
//! from the client frame.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use mockvox_core::config::{Config, DEFAULT_TURN_TIMEOUT_SECS};
use mockvox_core::protocol::{ChatTurn, Message, MessageType, Progress};

use crate::error::{ClientError, Result};

pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&ClientError) + Send + Sync>;

/// Registration token returned by [`SessionHandle::add_message_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Clone)]
pub struct SessionOptions {
    pub url: String,
    pub turn_timeout: Duration,
    pub on_message: Option<MessageHandler>,
    pub on_error: Option<ErrorHandler>,
}

impl SessionOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            turn_timeout: Duration::from_secs(DEFAULT_TURN_TIMEOUT_SECS),
            on_message: None,
            on_error: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.client_url()).with_turn_timeout(Duration::from_secs(config.turn_timeout_secs()))
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn on_message(mut self, handler: impl Fn(&Message) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(handler));
        self
    }

    pub fn on_error(mut self, handler: impl Fn(&ClientError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }
}

/// Everything the server sent for one client request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnOutcome {
    pub request_id: String,
    pub transcription: Option<String>,
    /// New stage name and progress when the turn moved the interview on.
    pub phase_change: Option<(String, Progress)>,
    pub response_id: Option<String>,
    pub response: String,
    pub audio: Vec<i16>,
    pub progress: Option<Progress>,
    /// The server closed the interview (`end` reply).
    pub ended: bool,
}

/// Effect of one server frame on a pending turn.
#[derive(Debug, PartialEq, Eq)]
pub enum Absorb {
    Pending,
    Complete,
    Failed(String),
}

impl TurnOutcome {
    fn new(request_id: String) -> Self {
        Self {
            request_id,
            ..Self::default()
        }
    }

    /// Fold a frame answering this turn into the outcome. The turn completes
    /// on the audio frame paired with the response, or on an `end` reply.
    pub fn absorb(&mut self, msg: &Message) -> Absorb {
        match msg {
            Message::Error(err) => Absorb::Failed(err.message.clone()),
            Message::Text(text) => {
                match text.message_type {
                    Some(MessageType::Transcription) => self.transcription = Some(text.content.clone()),
                    Some(MessageType::PhaseChange) => {
                        if let Some(progress) = &text.progress {
                            self.phase_change = Some((text.content.clone(), progress.clone()));
                        }
                    }
                    Some(MessageType::Response) => {
                        self.response_id = Some(text.event_id.clone());
                        self.response = text.content.clone();
                        self.progress = text.progress.clone();
                    }
                    Some(MessageType::End) => {
                        self.response = text.content.clone();
                        self.progress = text.progress.clone();
                        self.ended = true;
                        return Absorb::Complete;
                    }
                    _ => {}
                }
                Absorb::Pending
            }
            Message::Audio(audio) if self.response_id.as_deref() == Some(audio.event_id.as_str()) => {
                self.audio = audio.audio.clone();
                if self.progress.is_none() {
                    self.progress = audio.progress.clone();
                }
                Absorb::Complete
            }
            _ => Absorb::Pending,
        }
    }
}

struct PendingTurn {
    outcome: TurnOutcome,
    reply: oneshot::Sender<Result<TurnOutcome>>,
}

#[derive(Default)]
struct Shared {
    handlers: Mutex<Vec<(HandlerId, MessageHandler)>>,
    pending: Mutex<HashMap<String, PendingTurn>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    next_handler: AtomicU64,
}

/// Handle to one realtime interview connection.
pub struct SessionHandle {
    options: SessionOptions,
    shared: Arc<Shared>,
    // (writer, reader)
    tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl SessionHandle {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            shared: Arc::new(Shared::default()),
            tasks: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.options.url
    }

    pub async fn is_connected(&self) -> bool {
        self.shared
            .outbound
            .lock()
            .await
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Open the transport and send a liveness ping.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected().await {
            return Ok(());
        }

        let (ws, _) = connect_async(self.options.url.as_str()).await?;
        info!(url = %self.options.url, "Connected to interview server");
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if ws_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let shared = self.shared.clone();
        let options = self.options.clone();
        let reader = tokio::spawn(async move {
            let mut failure = None;
            while let Some(frame) = ws_rx.next().await {
                let bytes = match frame {
                    Ok(WsMessage::Text(text)) => text.as_str().as_bytes().to_vec(),
                    Ok(WsMessage::Binary(data)) => data.to_vec(),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        failure = Some(ClientError::from(e));
                        break;
                    }
                };
                match Message::decode(&bytes) {
                    Ok(msg) => dispatch(&shared, &options, msg).await,
                    Err(e) => {
                        warn!(%e, "Undecodable frame from server");
                        report(&options, &ClientError::Decode(e));
                    }
                }
            }

            if let Some(err) = &failure {
                report(&options, err);
            }
            shared.outbound.lock().await.take();
            fail_pending(&shared, || ClientError::Transport("connection closed".into())).await;
            debug!("Reader stopped");
        });

        *self.shared.outbound.lock().await = Some(out_tx);
        if let Some((old_writer, old_reader)) = self.tasks.lock().await.replace((writer, reader)) {
            old_writer.abort();
            old_reader.abort();
        }
        self.send(&Message::ping()).await
    }

    /// Serialize and transmit without waiting for any answer.
    pub async fn send(&self, msg: &Message) -> Result<()> {
        let frame = msg
            .encode()
            .map_err(|e| ClientError::Transport(format!("serialize: {e}")))?;
        let outbound = self.shared.outbound.lock().await;
        let tx = outbound.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(frame).map_err(|_| ClientError::NotConnected)
    }

    pub async fn add_message_handler(&self, handler: impl Fn(&Message) + Send + Sync + 'static) -> HandlerId {
        let id = HandlerId(self.shared.next_handler.fetch_add(1, Ordering::SeqCst));
        self.shared.handlers.lock().await.push((id, Arc::new(handler)));
        id
    }

    /// Returns whether the handler was registered.
    pub async fn remove_message_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.shared.handlers.lock().await;
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        handlers.len() != before
    }

    /// Send a client frame and wait for the turn it starts to complete.
    ///
    /// On timeout the pending entry is removed; the server may still finish
    /// the turn but its frames are no longer matched.
    pub async fn request_turn(&self, msg: Message) -> Result<TurnOutcome> {
        let request_id = msg.event_id().to_string();
        let (reply, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(
            request_id.clone(),
            PendingTurn {
                outcome: TurnOutcome::new(request_id.clone()),
                reply,
            },
        );

        if let Err(e) = self.send(&msg).await {
            self.shared.pending.lock().await.remove(&request_id);
            return Err(e);
        }
        debug!(%request_id, "Turn submitted");

        match tokio::time::timeout(self.options.turn_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Cancelled),
            Err(_) => {
                self.shared.pending.lock().await.remove(&request_id);
                warn!(%request_id, timeout = ?self.options.turn_timeout, "Turn timed out");
                Err(ClientError::ProcessingTimeout(self.options.turn_timeout))
            }
        }
    }

    /// Submit a recorded answer.
    pub async fn submit_audio(&self, samples: Vec<i16>, history: Vec<ChatTurn>) -> Result<TurnOutcome> {
        self.request_turn(Message::client_audio(samples, history)).await
    }

    /// Submit a typed answer.
    pub async fn submit_text(&self, content: impl Into<String>, history: Vec<ChatTurn>) -> Result<TurnOutcome> {
        self.request_turn(Message::client_text(content, history)).await
    }

    /// Ask the server to open the interview.
    pub async fn begin(&self) -> Result<TurnOutcome> {
        self.request_turn(Message::begin()).await
    }

    /// Ask the server to close the interview.
    pub async fn finish(&self, history: Vec<ChatTurn>) -> Result<TurnOutcome> {
        self.request_turn(Message::finish(history)).await
    }

    pub async fn pending_count(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    /// Close the transport and fail every pending turn.
    pub async fn disconnect(&self) {
        self.shared.outbound.lock().await.take();
        fail_pending(&self.shared, || ClientError::NotConnected).await;
        if let Some((writer, reader)) = self.tasks.lock().await.take() {
            // The writer sends a close frame once its channel is dropped.
            if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
                debug!("Writer did not finish closing");
            }
            reader.abort();
        }
        info!(url = %self.options.url, "Disconnected");
    }
}

fn report(options: &SessionOptions, err: &ClientError) {
    if let Some(on_error) = &options.on_error {
        on_error(err);
    }
}

async fn dispatch(shared: &Shared, options: &SessionOptions, msg: Message) {
    if let Some(primary) = &options.on_message {
        primary(&msg);
    }

    // Handlers may deregister themselves; call them on a snapshot.
    let handlers: Vec<MessageHandler> = shared.handlers.lock().await.iter().map(|(_, h)| h.clone()).collect();
    for handler in handlers {
        handler(&msg);
    }

    let Some(request_id) = msg.request_id() else {
        return;
    };
    let mut pending = shared.pending.lock().await;
    let Some(turn) = pending.get_mut(request_id) else {
        debug!(%request_id, "Frame for unknown or expired request");
        return;
    };
    let result = match turn.outcome.absorb(&msg) {
        Absorb::Pending => return,
        Absorb::Complete => Ok(()),
        Absorb::Failed(message) => Err(ClientError::Upstream(message)),
    };
    if let Some(turn) = pending.remove(request_id) {
        let _ = turn.reply.send(result.map(|()| turn.outcome));
    }
}

async fn fail_pending(shared: &Shared, err: impl Fn() -> ClientError) {
    let drained: Vec<PendingTurn> = shared.pending.lock().await.drain().map(|(_, t)| t).collect();
    for turn in drained {
        let _ = turn.reply.send(Err(err()));
    }
}
