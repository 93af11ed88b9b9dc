//! Energy-based voice activity detection.

/// Speech boundary reported by [`VoiceActivityDetector::process_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStarted,
    /// Enough trailing silence followed speech: the utterance is complete.
    SpeechEnded,
}

/// RMS-threshold detector over fixed-size 16-bit PCM frames.
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    threshold: f64,
    min_silent_frames: usize,
    frame_size: usize,
    speech_active: bool,
    silent_count: usize,
}

impl VoiceActivityDetector {
    pub fn new(threshold: f64, min_silent_frames: usize, frame_size: usize) -> Self {
        Self {
            threshold,
            min_silent_frames: min_silent_frames.max(1),
            frame_size: frame_size.max(1),
            speech_active: false,
            silent_count: 0,
        }
    }

    /// 20 ms frames at `sample_rate`, ending speech after `silence_ms` of quiet.
    pub fn for_rate(sample_rate: u32, threshold: f64, silence_ms: u32) -> Self {
        let frame_size = (sample_rate as usize / 50).max(1);
        let min_silent_frames = (silence_ms / 20).max(1) as usize;
        Self::new(threshold, min_silent_frames, frame_size)
    }

    /// 16 kHz, threshold 300, 800 ms of silence.
    pub fn default_16khz() -> Self {
        Self::for_rate(16_000, 300.0, 800)
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Compute RMS energy of a PCM frame.
    pub fn rms(samples: &[i16]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    pub fn process_frame(&mut self, pcm: &[i16]) -> Option<VadEvent> {
        let is_speech = Self::rms(pcm) > self.threshold;

        if is_speech {
            self.silent_count = 0;
            if !self.speech_active {
                self.speech_active = true;
                return Some(VadEvent::SpeechStarted);
            }
        } else if self.speech_active {
            self.silent_count += 1;
            if self.silent_count >= self.min_silent_frames {
                self.speech_active = false;
                self.silent_count = 0;
                return Some(VadEvent::SpeechEnded);
            }
        }

        None
    }

    pub fn is_active(&self) -> bool {
        self.speech_active
    }

    pub fn reset(&mut self) {
        self.speech_active = false;
        self.silent_count = 0;
    }
}
