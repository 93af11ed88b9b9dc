//! Ordered interview log kept by the client.

use tracing::warn;

use mockvox_core::protocol::{ChatTurn, Progress};

use crate::error::ClientError;
use crate::session::TurnOutcome;

/// Shown in place of a reply when a turn fails.
pub const FAILURE_NOTICE: &str = "Sorry, that answer could not be processed. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Candidate(String),
    Interviewer(String),
    StageChange { stage: String, progress: Progress },
    Notice(String),
}

#[derive(Debug, Default)]
pub struct Conversation {
    entries: Vec<Entry>,
    progress: Option<Progress>,
    ended: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn progress(&self) -> Option<&Progress> {
        self.progress.as_ref()
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Chat turns sent with the next request. Notices and stage markers are
    /// not part of the history.
    pub fn history(&self) -> Vec<ChatTurn> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                Entry::Candidate(text) => Some(ChatTurn::user(text.clone())),
                Entry::Interviewer(text) => Some(ChatTurn::assistant(text.clone())),
                _ => None,
            })
            .collect()
    }

    /// Record a typed answer before it is submitted.
    pub fn record_answer(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.trim().is_empty() {
            self.entries.push(Entry::Candidate(text));
        }
    }

    /// Record a completed turn in server order.
    pub fn record(&mut self, outcome: &TurnOutcome) {
        if let Some(transcript) = outcome.transcription.as_deref().filter(|t| !t.trim().is_empty()) {
            self.entries.push(Entry::Candidate(transcript.to_string()));
        }
        if let Some((stage, progress)) = &outcome.phase_change {
            self.entries.push(Entry::StageChange {
                stage: stage.clone(),
                progress: progress.clone(),
            });
        }
        if !outcome.response.trim().is_empty() {
            self.entries.push(Entry::Interviewer(outcome.response.clone()));
        }
        if outcome.progress.is_some() {
            self.progress = outcome.progress.clone();
        }
        self.ended |= outcome.ended;
    }

    /// Record a failed turn. The conversation stays usable.
    pub fn record_failure(&mut self, err: &ClientError) {
        warn!(error = %err, "Turn failed");
        self.entries.push(Entry::Notice(FAILURE_NOTICE.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(stage: usize) -> Progress {
        Progress {
            current_stage: stage,
            total_stages: 2,
            stage_name: if stage == 1 { "Opening" } else { "Details" }.into(),
            progress_percent: (stage * 50) as u8,
        }
    }

    #[test]
    fn test_history_from_turns() {
        let mut conversation = Conversation::new();
        conversation.record(&TurnOutcome {
            response: "Please introduce yourself.".into(),
            progress: Some(progress(1)),
            ..TurnOutcome::default()
        });
        conversation.record(&TurnOutcome {
            transcription: Some("I build databases.".into()),
            phase_change: Some(("Details".into(), progress(2))),
            response: "Which one?".into(),
            progress: Some(progress(2)),
            ..TurnOutcome::default()
        });

        let history = conversation.history();
        assert_eq!(
            history,
            vec![
                ChatTurn::assistant("Please introduce yourself."),
                ChatTurn::user("I build databases."),
                ChatTurn::assistant("Which one?"),
            ]
        );
        assert!(matches!(conversation.entries()[2], Entry::StageChange { .. }));
        assert_eq!(conversation.progress().unwrap().current_stage, 2);
    }

    #[test]
    fn test_failure_notice_not_in_history() {
        let mut conversation = Conversation::new();
        conversation.record_answer("My answer");
        conversation.record_failure(&ClientError::Upstream("Error processing message".into()));
        assert_eq!(conversation.entries().last(), Some(&Entry::Notice(FAILURE_NOTICE.into())));
        assert_eq!(conversation.history(), vec![ChatTurn::user("My answer")]);
    }

    #[test]
    fn test_end_marks_conversation() {
        let mut conversation = Conversation::new();
        conversation.record(&TurnOutcome {
            response: "Thank you.".into(),
            ended: true,
            ..TurnOutcome::default()
        });
        assert!(conversation.is_ended());
    }
}
