//! Per-connection interview state.

use mockvox_core::content::{ContentStore, IndustryLogic, InterviewType};
use mockvox_core::error::{MockvoxError, Result};
use mockvox_core::protocol::Progress;

use crate::directive::{CandidateProfile, DirectiveBuilder};
use crate::phase::{PhaseChange, PhaseMachine, PromptPicker};

/// Directive and stage bookkeeping for one client turn.
#[derive(Debug, Clone)]
pub struct TurnPlan {
    pub directive: String,
    pub phase_change: Option<PhaseChange>,
    pub progress: Progress,
}

/// Mutable stage progress plus the content it was built from. Owned by
/// exactly one connection.
#[derive(Debug)]
pub struct InterviewSession {
    industry: IndustryLogic,
    interview: InterviewType,
    profile: Option<CandidateProfile>,
    phase: PhaseMachine,
}

impl InterviewSession {
    pub fn new(
        industry: IndustryLogic,
        interview: InterviewType,
        profile: Option<CandidateProfile>,
        picker: Box<dyn PromptPicker>,
    ) -> Result<Self> {
        let phase = PhaseMachine::new(interview.stages.clone(), picker)?;
        Ok(Self {
            industry,
            interview,
            profile,
            phase,
        })
    }

    /// Look up `industry` and `interview_type` in `store`.
    pub fn from_store(
        store: &ContentStore,
        industry: &str,
        interview_type: &str,
        profile: Option<CandidateProfile>,
        picker: Box<dyn PromptPicker>,
    ) -> Result<Self> {
        let industry = store
            .industry(industry)
            .ok_or_else(|| MockvoxError::Content(format!("unknown industry '{industry}'")))?;
        let interview = store.interview_type(interview_type).ok_or_else(|| {
            MockvoxError::Content(format!("unknown interview type '{interview_type}'"))
        })?;
        Self::new(industry.clone(), interview.clone(), profile, picker)
    }

    pub fn industry(&self) -> &IndustryLogic {
        &self.industry
    }

    pub fn interview(&self) -> &InterviewType {
        &self.interview
    }

    pub fn phase(&self) -> &PhaseMachine {
        &self.phase
    }

    pub fn progress(&self) -> Progress {
        self.phase.progress()
    }

    /// Directive for the remembered stage.
    pub fn directive(&self) -> String {
        self.builder().build()
    }

    fn builder(&self) -> DirectiveBuilder<'_> {
        DirectiveBuilder::new(&self.industry, &self.interview, self.phase.current())
            .profile(self.profile.as_ref())
    }

    /// Opening line: the industry greeting followed by the first stage's
    /// first prompt.
    pub fn opening(&self) -> String {
        let prompt = self
            .interview
            .stages
            .first()
            .and_then(|s| s.prompts.first())
            .map(String::as_str)
            .unwrap_or_default();
        format!("{} {}", self.industry.opening_response.trim(), prompt)
            .trim_end()
            .to_string()
    }

    /// Plan a turn whose client history held `history_len` entries before
    /// the new user message.
    ///
    /// The directive describes the stage in force before the message. If the
    /// remembered stage advances, either because the history had already
    /// passed it or because the message moves the interview on, the plan
    /// carries one change for the net move and the directive gets the
    /// transition line for the new stage.
    pub fn plan_turn(&mut self, history_len: usize) -> TurnPlan {
        let caught_up = self.phase.observe(history_len);
        let before = self.phase.current_index();
        let change = self.phase.observe(history_len + 1).or(caught_up);
        let builder = DirectiveBuilder::new(&self.industry, &self.interview, &self.interview.stages[before])
            .profile(self.profile.as_ref());
        let directive = match &change {
            Some(change) => builder.build_with_transition(&change.stage, &change.prompt),
            None => builder.build(),
        };

        TurnPlan {
            directive,
            progress: self.phase.progress(),
            phase_change: change,
        }
    }

    /// Closing remark for an explicit end of interview.
    pub fn closing(&self) -> String {
        format!(
            "Thank you, that concludes our {} interview. We covered {} of {} stages.",
            self.interview.name.to_lowercase(),
            self.phase.current_index() + 1,
            self.interview.stages.len()
        )
    }

    pub fn final_progress(&self) -> Progress {
        self.phase.final_progress()
    }
}
