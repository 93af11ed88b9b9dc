//! Read-only interview content: industries with their evaluation criteria and
//! interview types with their ordered stages.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MockvoxError, Result};

const BUILTIN_CATALOG: &str = include_str!("../content/builtin.yaml");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    pub name: String,
    pub description: String,
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryLogic {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub base_prompt: String,
    pub opening_response: String,
    #[serde(default)]
    pub evaluation_criteria: Vec<Criterion>,
}

impl IndustryLogic {
    pub fn criterion(&self, id: &str) -> Option<&Criterion> {
        self.evaluation_criteria.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationPoint {
    pub criterion_id: String,
    pub weight: f32,
    #[serde(default)]
    pub details: Vec<String>,
}

/// One interview stage. `expected_duration` counts history turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub name: String,
    pub description: String,
    /// What the interviewer must do on entering this stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub prompts: Vec<String>,
    pub expected_duration: usize,
    #[serde(default)]
    pub evaluation_points: Vec<EvaluationPoint>,
}

impl Stage {
    pub fn action(&self) -> &str {
        self.action.as_deref().unwrap_or(&self.description)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewType {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    pub stages: Vec<Stage>,
}

impl InterviewType {
    /// Sum of all stage durations; histories at or beyond this stay in the last stage.
    pub fn total_duration(&self) -> usize {
        self.stages.iter().map(|s| s.expected_duration).sum()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentStore {
    #[serde(default)]
    industries: Vec<IndustryLogic>,
    #[serde(default)]
    interview_types: Vec<InterviewType>,
}

impl ContentStore {
    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_CATALOG)
    }

    /// Load a YAML catalog from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let store = Self::from_yaml(&raw)?;
        debug!(
            path = %path.display(),
            industries = store.industries.len(),
            types = store.interview_types.len(),
            "Loaded interview content"
        );
        Ok(store)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let store: ContentStore = serde_yaml::from_str(raw)?;
        store.validate()?;
        Ok(store)
    }

    fn validate(&self) -> Result<()> {
        let mut industry_ids = HashSet::new();
        for industry in &self.industries {
            if !industry_ids.insert(industry.id.as_str()) {
                return Err(MockvoxError::Content(format!(
                    "duplicate industry '{}'",
                    industry.id
                )));
            }
        }

        let mut type_ids = HashSet::new();
        for ty in &self.interview_types {
            if !type_ids.insert(ty.id.as_str()) {
                return Err(MockvoxError::Content(format!(
                    "duplicate interview type '{}'",
                    ty.id
                )));
            }
            if ty.stages.is_empty() {
                return Err(MockvoxError::Content(format!(
                    "interview type '{}' has no stages",
                    ty.id
                )));
            }
            let mut stage_ids = HashSet::new();
            for stage in &ty.stages {
                if !stage_ids.insert(stage.id.as_str()) {
                    return Err(MockvoxError::Content(format!(
                        "duplicate stage '{}' in interview type '{}'",
                        stage.id, ty.id
                    )));
                }
                if stage.prompts.is_empty() {
                    return Err(MockvoxError::Content(format!(
                        "stage '{}' in interview type '{}' has no prompts",
                        stage.id, ty.id
                    )));
                }
                if stage.expected_duration == 0 {
                    return Err(MockvoxError::Content(format!(
                        "stage '{}' in interview type '{}' has zero expected duration",
                        stage.id, ty.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn industries(&self) -> &[IndustryLogic] {
        &self.industries
    }

    pub fn interview_types(&self) -> &[InterviewType] {
        &self.interview_types
    }

    pub fn industry(&self, id: &str) -> Option<&IndustryLogic> {
        self.industries.iter().find(|i| i.id == id)
    }

    pub fn interview_type(&self, id: &str) -> Option<&InterviewType> {
        self.interview_types.iter().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_loads() {
        let store = ContentStore::builtin().unwrap();
        let ids: Vec<_> = store.industries().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["tech", "product"]);
        for id in ["self-intro", "project", "salary"] {
            let ty = store.interview_type(id).unwrap();
            let durations: Vec<_> = ty.stages.iter().map(|s| s.expected_duration).collect();
            assert_eq!(durations, vec![2, 3], "{id}");
            assert_eq!(ty.total_duration(), 5);
        }
    }

    #[test]
    fn test_stage_action_falls_back_to_description() {
        let store = ContentStore::builtin().unwrap();
        let mut stage = store.interview_type("self-intro").unwrap().stages[1].clone();
        assert_eq!(stage.action(), "Ask follow-up questions on the key points raised");
        stage.action = None;
        assert_eq!(stage.action(), "Dig into the key points");
    }

    #[test]
    fn test_criterion_lookup() {
        let store = ContentStore::builtin().unwrap();
        let tech = store.industry("tech").unwrap();
        assert!(tech.criterion("problem-solving").is_some());
        assert!(tech.criterion("product-thinking").is_none());
        assert!(store.industry("finance").is_none());
    }

    #[test]
    fn test_type_without_stages_rejected() {
        let raw = r#"
interview_types:
  - id: empty
    name: Empty
    system_prompt: x
    stages: []
"#;
        assert!(matches!(
            ContentStore::from_yaml(raw),
            Err(MockvoxError::Content(_))
        ));
    }

    #[test]
    fn test_stage_without_prompts_rejected() {
        let raw = r#"
interview_types:
  - id: t
    name: T
    system_prompt: x
    stages:
      - id: s
        name: S
        description: d
        prompts: []
        expected_duration: 1
"#;
        let err = ContentStore::from_yaml(raw).unwrap_err();
        assert!(err.to_string().contains("no prompts"));
    }

    #[test]
    fn test_duplicate_stage_ids_rejected() {
        let raw = r#"
interview_types:
  - id: t
    name: T
    system_prompt: x
    stages:
      - { id: s, name: S, description: d, prompts: [p], expected_duration: 1 }
      - { id: s, name: S2, description: d, prompts: [p], expected_duration: 1 }
"#;
        let err = ContentStore::from_yaml(raw).unwrap_err();
        assert!(err.to_string().contains("duplicate stage"));
    }

    #[test]
    fn test_zero_duration_rejected() {
        let raw = r#"
interview_types:
  - id: t
    name: T
    system_prompt: x
    stages:
      - { id: s, name: S, description: d, prompts: [p], expected_duration: 0 }
"#;
        assert!(ContentStore::from_yaml(raw).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(
            &path,
            r#"
industries:
  - id: ops
    name: Operations
    base_prompt: You interview for operations roles.
    opening_response: Hi there.
    evaluation_criteria:
      - { id: rigor, name: Rigor, description: Careful work, weight: 1.0 }
interview_types:
  - id: quick
    name: Quick
    system_prompt: Keep it short.
    stages:
      - { id: only, name: Only, description: Single stage, prompts: [Go], expected_duration: 4 }
"#,
        )
        .unwrap();
        let store = ContentStore::load(&path).unwrap();
        assert_eq!(store.industry("ops").unwrap().evaluation_criteria.len(), 1);
        assert_eq!(store.interview_type("quick").unwrap().total_duration(), 4);
    }

    #[test]
    fn test_invalid_yaml_is_yaml_error() {
        assert!(matches!(
            ContentStore::from_yaml("industries: [ {"),
            Err(MockvoxError::Yaml(_))
        ));
    }
}
