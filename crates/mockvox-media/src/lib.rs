//! Audio helpers and the speech services used by a realtime interview turn.

pub mod resample;
pub mod stt;
pub mod tts_stream;
pub mod vad;

pub use resample::resample_linear;
pub use stt::{OpenAiTranscriber, SpeechToText, pcm_to_wav};
pub use tts_stream::{OpenAiSpeech, PcmAccumulator, SpeechSynthesizer};
pub use vad::{VadEvent, VoiceActivityDetector};
