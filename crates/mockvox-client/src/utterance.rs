//! Utterance buffer: accumulates captured audio and, in VAD mode, detects
//! the end of an answer.

use tracing::debug;

use mockvox_media::{VadEvent, VoiceActivityDetector};

/// How a recording span ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordingMode {
    /// Explicit start/stop from the caller.
    #[default]
    Manual,
    /// Automatic stop after sustained silence following speech.
    Vad,
}

/// A completed answer ready to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// 16-bit PCM at the pipeline rate, mono.
    pub samples: Vec<i16>,
    pub duration_ms: u64,
}

impl Utterance {
    fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        let duration_ms = (samples.len() as u64 * 1000) / sample_rate.max(1) as u64;
        Self { samples, duration_ms }
    }
}

/// Sample accumulator for one recording span. Samples are kept in arrival
/// order with nothing dropped.
pub struct UtteranceBuffer {
    mode: RecordingMode,
    vad: VoiceActivityDetector,
    samples: Vec<i16>,
    // Samples not yet fed to the VAD (less than one frame)
    pending: Vec<i16>,
    sample_rate: u32,
}

impl UtteranceBuffer {
    pub fn new(mode: RecordingMode, sample_rate: u32) -> Self {
        Self::with_vad(mode, sample_rate, VoiceActivityDetector::for_rate(sample_rate, 300.0, 800))
    }

    pub fn with_vad(mode: RecordingMode, sample_rate: u32, vad: VoiceActivityDetector) -> Self {
        Self {
            mode,
            vad,
            samples: Vec::new(),
            pending: Vec::new(),
            sample_rate,
        }
    }

    pub fn mode(&self) -> RecordingMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Start a fresh span.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.pending.clear();
        self.vad.reset();
    }

    /// Append captured samples. In VAD mode returns the finished utterance
    /// once speech is followed by enough silence.
    pub fn push(&mut self, frame: &[i16]) -> Option<Utterance> {
        self.samples.extend_from_slice(frame);
        if self.mode == RecordingMode::Manual {
            return None;
        }

        self.pending.extend_from_slice(frame);
        let frame_size = self.vad.frame_size();
        let mut ended = false;
        let mut offset = 0;
        while self.pending.len() - offset >= frame_size {
            let vad_frame = &self.pending[offset..offset + frame_size];
            offset += frame_size;
            match self.vad.process_frame(vad_frame) {
                Some(VadEvent::SpeechStarted) => debug!(samples = self.samples.len(), "Speech started"),
                Some(VadEvent::SpeechEnded) => {
                    ended = true;
                    break;
                }
                None => {}
            }
        }
        self.pending.drain(..offset);

        if ended {
            debug!(samples = self.samples.len(), "Speech ended");
            self.flush()
        } else {
            None
        }
    }

    /// Take everything buffered as an utterance.
    pub fn flush(&mut self) -> Option<Utterance> {
        if self.samples.is_empty() {
            return None;
        }
        let samples = std::mem::take(&mut self.samples);
        self.pending.clear();
        self.vad.reset();
        Some(Utterance::new(samples, self.sample_rate))
    }

    /// Whether speech is in progress (VAD mode only).
    pub fn speech_active(&self) -> bool {
        self.vad.is_active()
    }
}
