//! Client side of a realtime mock interview: session handle, audio devices,
//! capture/playback pipeline and the conversation log.

pub mod conversation;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod utterance;

pub use conversation::{Conversation, Entry};
pub use device::{CaptureDevice, DeviceError, OutputDevice};
pub use error::{ClientError, Result};
pub use pipeline::{AudioPipeline, PipelineOptions, PipelineState};
pub use session::{HandlerId, SessionHandle, SessionOptions, TurnOutcome};
pub use utterance::{RecordingMode, Utterance, UtteranceBuffer};
