//! Interviewer directive for the reply-generation call.

use mockvox_core::content::{IndustryLogic, InterviewType, Stage};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

const NOT_PROVIDED: &str = "not provided";

/// Candidate resume fields passed on connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub age: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(s)) => Some(s),
        Some(Raw::Int(n)) => Some(n.to_string()),
        Some(Raw::Float(n)) => Some(n.to_string()),
        None => None,
    })
}

fn field(value: &Option<String>) -> &str {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(NOT_PROVIDED)
}

/// Composes the directive in a fixed section order.
pub struct DirectiveBuilder<'a> {
    industry: &'a IndustryLogic,
    interview: &'a InterviewType,
    stage: &'a Stage,
    profile: Option<&'a CandidateProfile>,
}

impl<'a> DirectiveBuilder<'a> {
    pub fn new(industry: &'a IndustryLogic, interview: &'a InterviewType, stage: &'a Stage) -> Self {
        Self {
            industry,
            interview,
            stage,
            profile: None,
        }
    }

    pub fn profile(mut self, profile: Option<&'a CandidateProfile>) -> Self {
        self.profile = profile;
        self
    }

    pub fn build(&self) -> String {
        let mut parts = Vec::new();

        parts.push(self.base_prompt());
        parts.push(self.candidate_section());
        parts.push(format!(
            "Current interview stage: {}\nStage goal: {}",
            self.stage.name, self.stage.description
        ));
        if let Some(criteria) = self.criteria_section() {
            parts.push(criteria);
        }
        if let Some(points) = self.evaluation_points_section() {
            parts.push(points);
        }
        parts.push(self.closing_instructions());

        parts.join("\n\n")
    }

    /// `build()` plus the line announcing a move into `next`.
    pub fn build_with_transition(&self, next: &Stage, prompt: &str) -> String {
        format!("{}\n\n{}", self.build(), transition_line(next, prompt))
    }

    fn base_prompt(&self) -> String {
        let system = self.interview.system_prompt.trim();
        if system.is_empty() {
            self.industry.base_prompt.trim().to_string()
        } else {
            format!("{}\n\n{}", self.industry.base_prompt.trim(), system)
        }
    }

    fn candidate_section(&self) -> String {
        match self.profile {
            Some(p) => format!(
                "Candidate resume:\n- Name: {}\n- Age: {}\n- Resume details: {}",
                field(&p.name),
                field(&p.age),
                field(&p.text)
            ),
            None => "Candidate resume: no resume information provided".to_string(),
        }
    }

    fn criteria_section(&self) -> Option<String> {
        let lines: Vec<String> = self
            .industry
            .evaluation_criteria
            .iter()
            .filter(|c| {
                self.stage
                    .evaluation_points
                    .iter()
                    .any(|p| p.criterion_id == c.id)
            })
            .map(|c| format!("- {} (weight {}): {}", c.name, c.weight, c.description))
            .collect();

        if lines.is_empty() {
            warn!(
                stage = %self.stage.id,
                industry = %self.industry.id,
                "No matching evaluation criteria for stage"
            );
            return None;
        }
        Some(format!("Industry evaluation criteria:\n{}", lines.join("\n")))
    }

    fn evaluation_points_section(&self) -> Option<String> {
        let mut lines = Vec::new();
        for point in &self.stage.evaluation_points {
            let Some(criterion) = self.industry.criterion(&point.criterion_id) else {
                warn!(
                    criterion = %point.criterion_id,
                    industry = %self.industry.id,
                    "Evaluation point references unknown criterion"
                );
                continue;
            };
            let mut entry = format!("- {} (weight {}):", criterion.name, point.weight);
            for detail in &point.details {
                entry.push_str("\n    ");
                entry.push_str(detail);
            }
            lines.push(entry);
        }

        if lines.is_empty() {
            return None;
        }
        Some(format!("Focus for this stage:\n{}", lines.join("\n")))
    }

    fn closing_instructions(&self) -> String {
        format!(
            "Interview rules:\n\
             1. Always speak as the {} interviewer\n\
             2. Ask questions grounded in the candidate's background and the current stage\n\
             3. Judge answers strictly against the evaluation criteria\n\
             4. Keep every reply under 100 words",
            self.industry.name
        )
    }
}

/// Directive line for entering `next`.
pub fn transition_line(next: &Stage, prompt: &str) -> String {
    format!(
        "The interview now moves to the \"{}\" stage. {}. Ask: {}",
        next.name,
        next.action(),
        prompt
    )
}
