//! Interview phase tracking driven by conversation length.

use mockvox_core::content::Stage;
use mockvox_core::error::{MockvoxError, Result};
use mockvox_core::protocol::Progress;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Index of the stage active for a history of `history_len` turns.
///
/// A stage is current while `history_len` is below the cumulative duration up
/// to and including it. Histories past the total stay in the last stage.
pub fn determine_stage(stages: &[Stage], history_len: usize) -> usize {
    let mut threshold = 0;
    for (index, stage) in stages.iter().enumerate() {
        threshold += stage.expected_duration;
        if history_len < threshold {
            return index;
        }
    }
    stages.len().saturating_sub(1)
}

/// Progress snapshot for the stage at `index`.
pub fn progress(stages: &[Stage], index: usize) -> Progress {
    let total = stages.len().max(1);
    let percent = ((index + 1) as f64 / total as f64 * 100.0).round();
    Progress {
        current_stage: index + 1,
        total_stages: stages.len(),
        stage_name: stages.get(index).map(|s| s.name.clone()).unwrap_or_default(),
        progress_percent: percent.clamp(0.0, 100.0) as u8,
    }
}

/// Chooses which of a stage's prompts to ask.
pub trait PromptPicker: Send {
    /// Return an index in `0..len`. `len` is never zero.
    fn pick(&mut self, len: usize) -> usize;
}

/// Uniform pick from a pseudo-random generator.
pub struct RngPicker<R> {
    rng: R,
}

impl RngPicker<StdRng> {
    pub fn from_os_rng() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<R: Rng + Send> PromptPicker for RngPicker<R> {
    fn pick(&mut self, len: usize) -> usize {
        self.rng.random_range(0..len)
    }
}

/// Always the first prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstPromptPicker;

impl PromptPicker for FirstPromptPicker {
    fn pick(&mut self, _len: usize) -> usize {
        0
    }
}

/// Emitted when the remembered stage advances.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseChange {
    pub index: usize,
    pub stage: Stage,
    pub prompt: String,
    pub progress: Progress,
}

/// Per-session remembered stage.
pub struct PhaseMachine {
    stages: Vec<Stage>,
    current: usize,
    picker: Box<dyn PromptPicker>,
}

impl std::fmt::Debug for PhaseMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseMachine")
            .field("stages", &self.stages.len())
            .field("current", &self.current)
            .finish()
    }
}

impl PhaseMachine {
    /// Start at the first stage.
    pub fn new(stages: Vec<Stage>, picker: Box<dyn PromptPicker>) -> Result<Self> {
        if stages.is_empty() {
            return Err(MockvoxError::Content(
                "phase machine needs at least one stage".into(),
            ));
        }
        Ok(Self {
            stages,
            current: 0,
            picker,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &Stage {
        &self.stages[self.current]
    }

    pub fn progress(&self) -> Progress {
        progress(&self.stages, self.current)
    }

    pub fn final_progress(&self) -> Progress {
        progress(&self.stages, self.stages.len() - 1)
    }

    /// Pick a prompt from the current stage.
    pub fn pick_prompt(&mut self) -> String {
        let prompts = &self.stages[self.current].prompts;
        if prompts.is_empty() {
            return String::new();
        }
        let index = self.picker.pick(prompts.len()).min(prompts.len() - 1);
        prompts[index].clone()
    }

    /// Re-evaluate the stage for a history of `history_len` turns.
    ///
    /// Returns the transition when the chosen stage is ahead of the remembered
    /// one. A shorter history never moves the machine backwards.
    pub fn observe(&mut self, history_len: usize) -> Option<PhaseChange> {
        let chosen = determine_stage(&self.stages, history_len);
        if chosen <= self.current {
            return None;
        }

        debug!(
            from = %self.stages[self.current].id,
            to = %self.stages[chosen].id,
            history_len,
            "Stage transition"
        );
        self.current = chosen;
        let prompt = self.pick_prompt();
        Some(PhaseChange {
            index: chosen,
            stage: self.stages[chosen].clone(),
            prompt,
            progress: self.progress(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(id: &str, duration: usize) -> Stage {
        Stage {
            id: id.into(),
            name: id.to_uppercase(),
            description: format!("{id} stage"),
            action: None,
            prompts: vec![format!("{id} a"), format!("{id} b"), format!("{id} c")],
            expected_duration: duration,
            evaluation_points: vec![],
        }
    }

    fn two_stages() -> Vec<Stage> {
        vec![stage("opening", 2), stage("detail", 3)]
    }

    #[test]
    fn test_stage_boundaries() {
        let stages = two_stages();
        let chosen: Vec<_> = (0..8).map(|n| determine_stage(&stages, n)).collect();
        assert_eq!(chosen, vec![0, 0, 1, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_empty_history_is_first_stage() {
        let stages = vec![stage("a", 1), stage("b", 1), stage("c", 1)];
        assert_eq!(determine_stage(&stages, 0), 0);
    }

    #[test]
    fn test_monotonic_in_history_length() {
        let stages = vec![stage("a", 1), stage("b", 4), stage("c", 2), stage("d", 3)];
        let mut last = 0;
        for n in 0..30 {
            let index = determine_stage(&stages, n);
            assert!(index >= last, "n={n}");
            assert_eq!(index, determine_stage(&stages, n));
            last = index;
        }
        assert_eq!(last, 3);
    }

    #[test]
    fn test_no_stages_is_zero() {
        assert_eq!(determine_stage(&[], 10), 0);
    }

    #[test]
    fn test_progress_snapshot() {
        let stages = vec![stage("a", 1), stage("b", 1), stage("c", 1)];
        let p = progress(&stages, 0);
        assert_eq!(p.current_stage, 1);
        assert_eq!(p.total_stages, 3);
        assert_eq!(p.stage_name, "A");
        assert_eq!(p.progress_percent, 33);
        assert_eq!(progress(&stages, 1).progress_percent, 67);
        assert_eq!(progress(&stages, 2).progress_percent, 100);
    }

    #[test]
    fn test_machine_requires_stages() {
        assert!(PhaseMachine::new(vec![], Box::new(FirstPromptPicker)).is_err());
    }

    #[test]
    fn test_observe_without_change_emits_nothing() {
        let mut machine = PhaseMachine::new(two_stages(), Box::new(FirstPromptPicker)).unwrap();
        assert!(machine.observe(0).is_none());
        assert!(machine.observe(1).is_none());
        assert_eq!(machine.current().id, "opening");
    }

    #[test]
    fn test_observe_transition() {
        let mut machine = PhaseMachine::new(two_stages(), Box::new(FirstPromptPicker)).unwrap();
        let change = machine.observe(2).expect("transition");
        assert_eq!(change.index, 1);
        assert_eq!(change.stage.id, "detail");
        assert_eq!(change.prompt, "detail a");
        assert_eq!(change.progress.current_stage, 2);
        assert_eq!(change.progress.progress_percent, 100);
        assert!(machine.observe(3).is_none());
        assert!(machine.observe(40).is_none());
    }

    #[test]
    fn test_observe_never_moves_backwards() {
        let mut machine = PhaseMachine::new(two_stages(), Box::new(FirstPromptPicker)).unwrap();
        machine.observe(4);
        assert!(machine.observe(0).is_none());
        assert_eq!(machine.current_index(), 1);
    }

    #[test]
    fn test_observe_can_skip_stages() {
        let stages = vec![stage("a", 1), stage("b", 1), stage("c", 1)];
        let mut machine = PhaseMachine::new(stages, Box::new(FirstPromptPicker)).unwrap();
        let change = machine.observe(5).unwrap();
        assert_eq!(change.stage.id, "c");
    }

    #[test]
    fn test_seeded_picker_is_deterministic() {
        let mut a = RngPicker::seeded(7);
        let mut b = RngPicker::seeded(7);
        let picks_a: Vec<_> = (0..20).map(|_| a.pick(3)).collect();
        let picks_b: Vec<_> = (0..20).map(|_| b.pick(3)).collect();
        assert_eq!(picks_a, picks_b);
        assert!(picks_a.iter().all(|&i| i < 3));
    }

    struct Scripted(Vec<usize>);

    impl PromptPicker for Scripted {
        fn pick(&mut self, _len: usize) -> usize {
            self.0.remove(0)
        }
    }

    #[test]
    fn test_injected_picker_selects_prompt() {
        let mut machine =
            PhaseMachine::new(two_stages(), Box::new(Scripted(vec![2, 1]))).unwrap();
        assert_eq!(machine.observe(2).unwrap().prompt, "detail c");
        assert_eq!(machine.pick_prompt(), "detail b");
    }
}
