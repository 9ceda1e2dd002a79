use std::error::Error as StdError;

use tera::{Context, Tera};
use thiserror::Error;

use taskforge_core::WorkflowState;

use crate::stages::Stage;

const EPIC_EXTRACTION_TEMPLATE: &str = r#"Extract the major areas of development work (epics) needed to deliver the project requirement below.
Give each epic a short name and a one-sentence description.
Respond in JSON.

Requirement:
{{ requirement }}

Output format:
[
  {"name": "Epic name", "description": "What the epic covers"},
  ...
]
"#;

const TASK_DECOMPOSITION_TEMPLATE: &str = r#"Break the epics below down into concrete development tasks.
Every task must include:
- title: task name
- description: what has to be done
- priority: 1 (low), 2 (medium) or 3 (high)
- estimate: estimated effort in hours
- epic: name of the epic the task belongs to

Epics:
{{ epics_json }}

Output format:
[
  {"title": "Task name", "description": "Details", "priority": 2, "estimate": 8.0, "epic": "Epic name"},
  ...
]
"#;

const SPRINT_PLANNING_TEMPLATE: &str = r#"Group the tasks below into logical two-week sprints.
Every sprint must include:
- name: sprint name (for example "Sprint 1")
- tasks: list of task indices assigned to the sprint (0-based positions in the task list)
- total_estimate: sum of the assigned task estimates in hours

Tasks:
{{ tasks_json }}

Output format:
[
  {"name": "Sprint 1", "tasks": [0, 1, 2], "total_estimate": 24.0},
  {"name": "Sprint 2", "tasks": [3, 4, 5], "total_estimate": 32.0},
  ...
]
"#;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt template `{template}` failed: {message}")]
    Template { template: &'static str, message: String },
    #[error("could not serialize stage input: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Renders the instruction sent to the model for each stage.
pub struct PromptBuilder {
    tera: Tera,
}

impl PromptBuilder {
    pub fn new() -> Result<Self, PromptError> {
        Self::with_templates(
            EPIC_EXTRACTION_TEMPLATE,
            TASK_DECOMPOSITION_TEMPLATE,
            SPRINT_PLANNING_TEMPLATE,
        )
    }

    /// Builds a prompt set from caller-supplied template sources. Templates
    /// see `requirement`, `epics_json` and `tasks_json`.
    pub fn with_templates(
        epic_extraction: &str,
        task_decomposition: &str,
        sprint_planning: &str,
    ) -> Result<Self, PromptError> {
        let mut tera = Tera::default();
        for (stage, source) in [
            (Stage::EpicExtraction, epic_extraction),
            (Stage::TaskDecomposition, task_decomposition),
            (Stage::SprintPlanning, sprint_planning),
        ] {
            tera.add_raw_template(stage.as_str(), source).map_err(|error| {
                PromptError::Template { template: stage.as_str(), message: error_chain(&error) }
            })?;
        }
        Ok(Self { tera })
    }

    pub fn render(&self, stage: Stage, state: &WorkflowState) -> Result<String, PromptError> {
        let mut context = Context::new();
        match stage {
            Stage::EpicExtraction => context.insert("requirement", &state.requirement),
            Stage::TaskDecomposition => {
                context.insert("epics_json", &serde_json::to_string(&state.epics)?)
            }
            Stage::SprintPlanning => {
                context.insert("tasks_json", &serde_json::to_string(&state.tasks)?)
            }
        }

        self.tera.render(stage.as_str(), &context).map_err(|error| PromptError::Template {
            template: stage.as_str(),
            message: error_chain(&error),
        })
    }
}

fn error_chain(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
