//! Audio capture/playback pipeline.
//!
//! Owns the capture and output devices for one session. Starting a
//! recording interrupts playback (barge-in) and invalidates any turn still
//! waiting for its audio; only the latest outstanding turn is played.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mockvox_core::config::Config;
use mockvox_core::pcm::SAMPLE_RATE;
use mockvox_core::protocol::ChatTurn;

use crate::device::{CaptureDevice, DeviceError, OutputDevice};
use crate::error::{ClientError, Result};
use crate::session::{SessionHandle, TurnOutcome};
use crate::utterance::{RecordingMode, Utterance, UtteranceBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Recording,
    Playing,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Samples per playback chunk.
    pub chunk_samples: usize,
    pub sample_rate: u32,
    pub mode: RecordingMode,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_samples: mockvox_core::config::DEFAULT_CHUNK_SAMPLES,
            sample_rate: SAMPLE_RATE,
            mode: RecordingMode::Manual,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_samples: config.chunk_samples(),
            sample_rate: config.client_sample_rate(),
            mode: RecordingMode::Manual,
        }
    }

    pub fn with_mode(mut self, mode: RecordingMode) -> Self {
        self.mode = mode;
        self
    }
}

struct Recording {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    session: SessionHandle,
    options: PipelineOptions,
    capture: Mutex<Box<dyn CaptureDevice>>,
    output: Mutex<Box<dyn OutputDevice>>,
    buffer: Mutex<UtteranceBuffer>,
    recording: Mutex<Option<Recording>>,
    playback: Mutex<CancellationToken>,
    // Bumped by every new recording and every submitted turn. Audio is
    // played only for the turn holding the latest value.
    generation: AtomicU64,
    connected: AtomicBool,
    state: watch::Sender<PipelineState>,
    utterance_tx: mpsc::UnboundedSender<Utterance>,
    utterance_rx: Mutex<Option<mpsc::UnboundedReceiver<Utterance>>>,
}

/// Cloneable handle to a session's audio pipeline.
#[derive(Clone)]
pub struct AudioPipeline {
    inner: Arc<Inner>,
}

impl AudioPipeline {
    pub fn new(
        session: SessionHandle,
        capture: Box<dyn CaptureDevice>,
        output: Box<dyn OutputDevice>,
        options: PipelineOptions,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();
        let buffer = UtteranceBuffer::new(options.mode, options.sample_rate);
        Self {
            inner: Arc::new(Inner {
                session,
                options,
                capture: Mutex::new(capture),
                output: Mutex::new(output),
                buffer: Mutex::new(buffer),
                recording: Mutex::new(None),
                playback: Mutex::new(CancellationToken::new()),
                generation: AtomicU64::new(0),
                connected: AtomicBool::new(false),
                state,
                utterance_tx,
                utterance_rx: Mutex::new(Some(utterance_rx)),
            }),
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.inner.session
    }

    pub fn state(&self) -> PipelineState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Utterances completed automatically in [`RecordingMode::Vad`]. Can be
    /// taken once.
    pub async fn take_utterances(&self) -> Option<mpsc::UnboundedReceiver<Utterance>> {
        self.inner.utterance_rx.lock().await.take()
    }

    /// Whether the capture task of the current span has stopped reading,
    /// either because the source ran dry or because recording was stopped.
    pub async fn capture_finished(&self) -> bool {
        self.inner
            .recording
            .lock()
            .await
            .as_ref()
            .is_none_or(|r| r.task.is_finished())
    }

    /// Acquire both devices and open the session. On failure nothing stays
    /// acquired.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let mut capture = self.inner.capture.lock().await;
        let mut output = self.inner.output.lock().await;
        capture.open().await?;
        if let Err(e) = output.open().await {
            release(capture.close().await);
            return Err(e.into());
        }
        if let Err(e) = self.inner.session.connect().await {
            release(capture.close().await);
            release(output.close().await);
            return Err(e);
        }

        self.inner.connected.store(true, Ordering::SeqCst);
        info!(url = %self.inner.session.url(), "Audio pipeline connected");
        Ok(())
    }

    /// Stop everything in flight, close the session and release both devices.
    pub async fn disconnect(&self) {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.playback.lock().await.cancel();
        if let Some(recording) = self.inner.recording.lock().await.take() {
            recording.stop.cancel();
            let _ = recording.task.await;
        }
        self.inner.buffer.lock().await.clear();
        self.inner.session.disconnect().await;

        release(self.inner.capture.lock().await.close().await);
        release(self.inner.output.lock().await.close().await);
        self.inner.state.send_replace(PipelineState::Idle);
        info!("Audio pipeline disconnected");
    }

    /// Begin a recording span, interrupting any playback first.
    pub async fn start_recording(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let mut recording = self.inner.recording.lock().await;
        // A VAD span that already ended leaves a finished task behind.
        if recording.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return Ok(());
        }

        self.interrupt_playback().await?;
        self.inner.buffer.lock().await.clear();

        self.inner.state.send_replace(PipelineState::Recording);
        let stop = CancellationToken::new();
        let task = tokio::spawn(capture_loop(self.inner.clone(), stop.clone()));
        *recording = Some(Recording { stop, task });
        debug!(mode = ?self.inner.options.mode, "Recording started");
        Ok(())
    }

    /// Stop accumulating and return the recorded samples in capture order.
    pub async fn stop_recording(&self) -> Result<Vec<i16>> {
        if let Some(recording) = self.inner.recording.lock().await.take() {
            recording.stop.cancel();
            let _ = recording.task.await;
        }
        transition(&self.inner.state, PipelineState::Recording, PipelineState::Idle);

        let samples = self
            .inner
            .buffer
            .lock()
            .await
            .flush()
            .map(|u| u.samples)
            .unwrap_or_default();
        debug!(samples = samples.len(), "Recording stopped");
        Ok(samples)
    }

    /// Stop recording, submit the answer and play the reply.
    pub async fn stop_and_submit(&self, history: Vec<ChatTurn>) -> Result<TurnOutcome> {
        let samples = self.stop_recording().await?;
        self.process_and_play(samples, history).await
    }

    /// Submit recorded samples with the conversation so far, wait for the
    /// matched reply and play it unless a newer recording or turn started in
    /// the meantime.
    pub async fn process_and_play(&self, samples: Vec<i16>, history: Vec<ChatTurn>) -> Result<TurnOutcome> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self.inner.session.submit_audio(samples, history).await?;
        self.play(generation, &outcome.audio).await?;
        Ok(outcome)
    }

    /// Ask the server to open the interview and play the greeting.
    pub async fn begin(&self) -> Result<TurnOutcome> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self.inner.session.begin().await?;
        self.play(generation, &outcome.audio).await?;
        Ok(outcome)
    }

    async fn play(&self, generation: u64, audio: &[i16]) -> Result<()> {
        let current = || self.inner.generation.load(Ordering::SeqCst) == generation;
        if !current() {
            debug!(generation, "Reply superseded; not playing");
            return Ok(());
        }

        let token = CancellationToken::new();
        *self.inner.playback.lock().await = token.clone();
        self.inner.state.send_replace(PipelineState::Playing);

        let mut result = Ok(());
        for (index, chunk) in audio.chunks(self.inner.options.chunk_samples.max(1)).enumerate() {
            let mut output = self.inner.output.lock().await;
            // Checked under the output lock so an interrupt that returned
            // has already been observed.
            if token.is_cancelled() || !current() {
                debug!(chunk = index, "Playback interrupted");
                break;
            }
            if let Err(e) = output.play(chunk).await {
                result = Err(e.into());
                break;
            }
        }

        transition(&self.inner.state, PipelineState::Playing, PipelineState::Idle);
        result
    }

    /// Cancel current playback and invalidate outstanding turns. Returns
    /// once no further chunk can reach the output device.
    async fn interrupt_playback(&self) -> Result<()> {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.playback.lock().await.cancel();
        let mut output = self.inner.output.lock().await;
        if self.state() == PipelineState::Playing {
            debug!("Barge-in: interrupting playback");
        }
        output.interrupt().await?;
        Ok(())
    }
}

fn transition(state: &watch::Sender<PipelineState>, from: PipelineState, to: PipelineState) {
    state.send_if_modified(|s| {
        if *s == from {
            *s = to;
            true
        } else {
            false
        }
    });
}

fn release(result: std::result::Result<(), DeviceError>) {
    if let Err(e) = result {
        warn!(%e, "Failed to release device");
    }
}

async fn capture_loop(inner: Arc<Inner>, stop: CancellationToken) {
    let mut capture = inner.capture.lock().await;
    loop {
        let frame = tokio::select! {
            _ = stop.cancelled() => break,
            frame = capture.read_frame() => frame,
        };

        match frame {
            Ok(Some(frame)) => {
                let finished = inner.buffer.lock().await.push(&frame);
                if let Some(utterance) = finished {
                    deliver(&inner, utterance);
                    break;
                }
            }
            Ok(None) => {
                debug!("Capture source exhausted");
                if inner.options.mode == RecordingMode::Vad {
                    if let Some(utterance) = inner.buffer.lock().await.flush() {
                        deliver(&inner, utterance);
                    }
                }
                break;
            }
            Err(e) => {
                warn!(%e, "Capture failed; recording stopped");
                break;
            }
        }
    }
}

fn deliver(inner: &Inner, utterance: Utterance) {
    debug!(duration_ms = utterance.duration_ms, "Utterance complete");
    transition(&inner.state, PipelineState::Recording, PipelineState::Idle);
    let _ = inner.utterance_tx.send(utterance);
}
