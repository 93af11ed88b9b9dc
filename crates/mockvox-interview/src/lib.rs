//! Interview logic: stage progression, prompt selection, and the
//! interviewer directive sent with every reply-generation call.

pub mod directive;
pub mod phase;
pub mod session;

pub use directive::{CandidateProfile, DirectiveBuilder};
pub use phase::{FirstPromptPicker, PhaseChange, PhaseMachine, PromptPicker, RngPicker, determine_stage};
pub use session::{InterviewSession, TurnPlan};
