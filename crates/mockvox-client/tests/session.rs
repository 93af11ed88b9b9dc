//! Client session and pipeline tests against a scripted local server.
//!
//! Run with: `cargo test -p mockvox-client --test session`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use mockvox_client::device::{MemoryCapture, MemoryOutput};
use mockvox_client::{
    AudioPipeline, ClientError, PipelineOptions, PipelineState, RecordingMode, SessionHandle, SessionOptions,
};
use mockvox_core::protocol::{Author, GENERIC_ERROR, Message, MessageType, Progress};

/// Server behaviour shared by all connections of one test.
#[derive(Clone)]
struct Script {
    reply_samples: usize,
    audio_delay: Duration,
    received: Arc<Mutex<Vec<Message>>>,
}

impl Script {
    fn new(reply_samples: usize) -> Self {
        Self {
            reply_samples,
            audio_delay: Duration::ZERO,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_audio_delay(mut self, delay: Duration) -> Self {
        self.audio_delay = delay;
        self
    }

    fn received(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }
}

fn progress() -> Progress {
    Progress {
        current_stage: 1,
        total_stages: 2,
        stage_name: "Opening".into(),
        progress_percent: 50,
    }
}

fn emit(tx: &mpsc::UnboundedSender<String>, msg: Message) {
    let _ = tx.send(msg.encode().unwrap());
}

/// Answer one client frame the way the gateway would.
async fn answer(script: Script, tx: mpsc::UnboundedSender<String>, msg: Message) {
    let rid = Some(msg.event_id().to_string());
    let (reply, delay) = match &msg {
        Message::Audio(_) => {
            emit(&tx, Message::transcription("spoken answer", rid.clone()));
            ("Tell me more.".to_string(), script.audio_delay)
        }
        Message::Text(text) if text.message_type == Some(MessageType::Begin) => {
            ("Hello! Please introduce yourself.".to_string(), Duration::ZERO)
        }
        Message::Text(text) if text.content == "silent" => return,
        Message::Text(text) if text.content == "fail" => {
            emit(&tx, Message::error(GENERIC_ERROR, rid));
            return;
        }
        Message::Text(text) => {
            let delay = text
                .content
                .strip_prefix("wait ")
                .and_then(|rest| rest.split_whitespace().next())
                .and_then(|ms| ms.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or_default();
            (format!("echo: {}", text.content), delay)
        }
        _ => return,
    };

    tokio::time::sleep(delay).await;
    let response = Message::response(reply.clone(), Some(progress()), rid.clone());
    let response_id = response.event_id().to_string();
    emit(&tx, response);
    emit(
        &tx,
        Message::audio_reply(response_id, reply, vec![1000; script.reply_samples], Some(progress()), rid),
    );
}

async fn handle_socket(script: Script, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = ws_rx.next().await {
        let WsMessage::Text(text) = frame else { continue };
        let Ok(msg) = Message::decode_str(text.as_str()) else { continue };
        script.received.lock().unwrap().push(msg.clone());
        tokio::spawn(answer(script.clone(), tx.clone(), msg));
    }
}

async fn serve(script: Script) -> String {
    let app = Router::new().route(
        "/api/realtime",
        get(move |ws: WebSocketUpgrade| {
            let script = script.clone();
            async move { ws.on_upgrade(move |socket| handle_socket(script, socket)) }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("ws://{addr}/api/realtime")
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_connect_sends_liveness_ping() {
    let script = Script::new(10);
    let session = SessionHandle::new(SessionOptions::new(serve(script.clone()).await));
    session.connect().await.unwrap();
    assert!(session.is_connected().await);

    wait_until(|| !script.received().is_empty()).await;
    assert!(matches!(script.received()[0], Message::Ping(_)));
}

#[tokio::test]
async fn test_turn_and_handlers() {
    let script = Script::new(10);
    let primary = Arc::new(AtomicUsize::new(0));
    let counter = primary.clone();
    let options = SessionOptions::new(serve(script.clone()).await).on_message(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let session = SessionHandle::new(options);
    session.connect().await.unwrap();

    let extra = Arc::new(AtomicUsize::new(0));
    let counter = extra.clone();
    let id = session
        .add_message_handler(move |msg| {
            if msg.is_server() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

    let outcome = session.submit_audio(vec![7; 320], vec![]).await.unwrap();
    assert_eq!(outcome.transcription.as_deref(), Some("spoken answer"));
    assert_eq!(outcome.response, "Tell me more.");
    assert_eq!(outcome.audio.len(), 10);
    assert_eq!(primary.load(Ordering::SeqCst), 3);
    assert_eq!(extra.load(Ordering::SeqCst), 3);

    assert!(session.remove_message_handler(id).await);
    session.submit_text("again", vec![]).await.unwrap();
    assert_eq!(primary.load(Ordering::SeqCst), 5);
    assert_eq!(extra.load(Ordering::SeqCst), 3);

    let Message::Audio(sent) = &script.received()[1] else { panic!("expected audio frame") };
    assert_eq!(sent.author, Author::Client);
    assert_eq!(sent.audio, vec![7; 320]);
}

#[tokio::test]
async fn test_removed_handler_sees_nothing() {
    let session = SessionHandle::new(SessionOptions::new(serve(Script::new(4)).await));
    session.connect().await.unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let id = session
        .add_message_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;
    assert!(session.remove_message_handler(id).await);

    session.submit_audio(vec![3; 320], vec![]).await.unwrap();
    session.submit_text("and more", vec![]).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_turns_are_correlated() {
    let script = Script::new(4);
    let session = SessionHandle::new(SessionOptions::new(serve(script).await));
    session.connect().await.unwrap();

    // The first request is answered last.
    let (slow, fast) = tokio::join!(
        session.submit_text("wait 200 slow", vec![]),
        session.submit_text("wait 10 fast", vec![]),
    );
    assert_eq!(slow.unwrap().response, "echo: wait 200 slow");
    assert_eq!(fast.unwrap().response, "echo: wait 10 fast");
}

#[tokio::test]
async fn test_error_frame_fails_only_that_turn() {
    let session = SessionHandle::new(SessionOptions::new(serve(Script::new(4)).await));
    session.connect().await.unwrap();

    match session.submit_text("fail", vec![]).await {
        Err(ClientError::Upstream(message)) => assert_eq!(message, GENERIC_ERROR),
        other => panic!("expected upstream error, got {other:?}"),
    }
    assert!(session.submit_text("next", vec![]).await.is_ok());
}

#[tokio::test]
async fn test_timeout_removes_pending_turn() {
    let options = SessionOptions::new(serve(Script::new(4)).await).with_turn_timeout(Duration::from_millis(200));
    let session = SessionHandle::new(options);
    session.connect().await.unwrap();

    let err = session.submit_text("silent", vec![]).await.unwrap_err();
    assert!(matches!(err, ClientError::ProcessingTimeout(d) if d == Duration::from_millis(200)));
    assert_eq!(session.pending_count().await, 0);
}

#[tokio::test]
async fn test_disconnect_fails_pending() {
    let session = Arc::new(SessionHandle::new(SessionOptions::new(serve(Script::new(4)).await)));
    session.connect().await.unwrap();

    let waiting = {
        let session = session.clone();
        tokio::spawn(async move { session.submit_text("silent", vec![]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.disconnect().await;

    assert!(matches!(waiting.await.unwrap(), Err(ClientError::NotConnected)));
    assert!(!session.is_connected().await);
}

fn pipeline(url: String, capture: MemoryCapture, output: MemoryOutput, options: PipelineOptions) -> AudioPipeline {
    AudioPipeline::new(
        SessionHandle::new(SessionOptions::new(url)),
        Box::new(capture),
        Box::new(output),
        options,
    )
}

#[tokio::test]
async fn test_record_submit_play_in_chunks() {
    let url = serve(Script::new(40_000)).await;
    let capture = MemoryCapture::from_samples(&(0..1000).map(|i| i as i16).collect::<Vec<_>>())
        .with_frame_delay(Duration::from_millis(1));
    let output = MemoryOutput::new();
    let played = output.played();
    let (capture_stats, output_stats) = (capture.stats(), output.stats());
    let pipeline = pipeline(url, capture, output, PipelineOptions::default());

    pipeline.connect().await.unwrap();
    for _ in 0..2 {
        pipeline.start_recording().await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Recording);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let outcome = pipeline.stop_and_submit(vec![]).await.unwrap();
        assert_eq!(outcome.audio.len(), 40_000);
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    {
        let played = played.lock().unwrap();
        // 40,000 samples: two full one-second chunks and a remainder, twice.
        let sizes: Vec<usize> = played.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![16_000, 16_000, 8_000, 16_000, 16_000, 8_000]);
    }

    pipeline.disconnect().await;
    pipeline.disconnect().await;
    assert_eq!((capture_stats.opens(), capture_stats.closes()), (1, 1));
    assert_eq!((output_stats.opens(), output_stats.closes()), (1, 1));
    assert!(!pipeline.session().is_connected().await);
}

#[tokio::test]
async fn test_recorded_samples_keep_order() {
    let samples: Vec<i16> = (0..2000).map(|i| (i % 700) as i16).collect();
    let url = serve(Script::new(1)).await;
    let pipeline = pipeline(
        url,
        MemoryCapture::from_samples(&samples),
        MemoryOutput::new(),
        PipelineOptions::default(),
    );
    pipeline.connect().await.unwrap();

    pipeline.start_recording().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pipeline.stop_recording().await.unwrap(), samples);
}

#[tokio::test]
async fn test_barge_in_stops_playback() {
    let url = serve(Script::new(16_000 * 5)).await;
    let output = MemoryOutput::new().with_chunk_delay(Duration::from_millis(100));
    let played = output.played();
    let pipeline = pipeline(url, MemoryCapture::new(vec![]), output, PipelineOptions::default());
    pipeline.connect().await.unwrap();

    let playing = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.process_and_play(vec![1; 320], vec![]).await })
    };
    wait_until(|| !played.lock().unwrap().is_empty()).await;
    assert_eq!(pipeline.state(), PipelineState::Playing);

    pipeline.start_recording().await.unwrap();
    let after_barge_in = played.lock().unwrap().len();
    assert!(after_barge_in < 5);
    assert_eq!(pipeline.state(), PipelineState::Recording);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(played.lock().unwrap().len(), after_barge_in);
    assert!(playing.await.unwrap().is_ok());
    assert_eq!(pipeline.state(), PipelineState::Recording);
}

#[tokio::test]
async fn test_superseded_reply_is_not_played() {
    let script = Script::new(16_000).with_audio_delay(Duration::from_millis(300));
    let url = serve(script).await;
    let output = MemoryOutput::new();
    let played = output.played();
    let pipeline = pipeline(url, MemoryCapture::new(vec![]), output, PipelineOptions::default());
    pipeline.connect().await.unwrap();

    let pending = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.process_and_play(vec![1; 320], vec![]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    pipeline.start_recording().await.unwrap();

    let outcome = pending.await.unwrap().unwrap();
    assert_eq!(outcome.audio.len(), 16_000);
    assert!(played.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unavailable_device_aborts_connect() {
    let url = serve(Script::new(1)).await;
    let output = MemoryOutput::new();
    let output_stats = output.stats();
    let pipeline = pipeline(url, MemoryCapture::unavailable(), output, PipelineOptions::default());

    assert!(matches!(pipeline.connect().await, Err(ClientError::Device(_))));
    assert!(!pipeline.is_connected());
    assert!(!pipeline.session().is_connected().await);
    assert_eq!(output_stats.opens(), 0);
    assert!(matches!(pipeline.start_recording().await, Err(ClientError::NotConnected)));
}

#[tokio::test]
async fn test_vad_mode_delivers_utterance() {
    let mut frames = vec![vec![5000i16; 320]; 10];
    frames.extend(vec![vec![0i16; 320]; 60]);
    let url = serve(Script::new(1)).await;
    let pipeline = pipeline(
        url,
        MemoryCapture::new(frames),
        MemoryOutput::new(),
        PipelineOptions::default().with_mode(RecordingMode::Vad),
    );
    let mut utterances = pipeline.take_utterances().await.unwrap();
    pipeline.connect().await.unwrap();

    pipeline.start_recording().await.unwrap();
    let utterance = tokio::time::timeout(Duration::from_secs(2), utterances.recv())
        .await
        .unwrap()
        .unwrap();
    // 10 loud frames followed by 800 ms (40 frames) of silence
    assert_eq!(utterance.samples.len(), 50 * 320);
    assert_eq!(utterance.duration_ms, 1000);
    wait_until(|| pipeline.state() == PipelineState::Idle).await;

    let outcome = pipeline.process_and_play(utterance.samples, vec![]).await.unwrap();
    assert_eq!(outcome.transcription.as_deref(), Some("spoken answer"));
}

#[tokio::test]
async fn test_begin_plays_greeting() {
    let url = serve(Script::new(16_000)).await;
    let output = MemoryOutput::new();
    let played = output.played();
    let pipeline = pipeline(url, MemoryCapture::new(vec![]), output, PipelineOptions::default());
    pipeline.connect().await.unwrap();

    let outcome = pipeline.begin().await.unwrap();
    assert!(outcome.response.starts_with("Hello!"));
    assert_eq!(outcome.progress.unwrap().current_stage, 1);
    assert_eq!(played.lock().unwrap().len(), 1);
}
