//! The three LLM stages and the rules for folding their outcome back into
//! the shared [`WorkflowState`].
//!
//! A stage never aborts the run. On success it owns exactly one field of the
//! state (`epics`, `tasks` or `sprints`) and clears `error`. On failure it
//! resets that field to empty and records a message naming the stage.

use taskforge_core::{Epic, SprintPlan, TaskDraft, WorkflowState};
use thiserror::Error;

use crate::extract::{extract_structured, MalformedOutputError};
use crate::llm::LlmError;
use crate::prompts::PromptError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    EpicExtraction,
    TaskDecomposition,
    SprintPlanning,
}

impl Stage {
    pub const ORDER: [Stage; 3] =
        [Stage::EpicExtraction, Stage::TaskDecomposition, Stage::SprintPlanning];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EpicExtraction => "epic_extraction",
            Self::TaskDecomposition => "task_decomposition",
            Self::SprintPlanning => "sprint_planning",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::EpicExtraction => "epic extraction",
            Self::TaskDecomposition => "task decomposition",
            Self::SprintPlanning => "sprint planning",
        }
    }

    /// Checks the input the stage needs from earlier stages. A stage whose
    /// input is empty is skipped without calling the model.
    pub fn precondition(self, state: &WorkflowState) -> Result<(), StageError> {
        match self {
            Self::EpicExtraction => Ok(()),
            Self::TaskDecomposition if state.epics.is_empty() => {
                Err(StageError::InputMissing { missing: "no epics were extracted" })
            }
            Self::SprintPlanning if state.tasks.is_empty() => {
                Err(StageError::InputMissing { missing: "no tasks were decomposed" })
            }
            Self::TaskDecomposition | Self::SprintPlanning => Ok(()),
        }
    }

    pub fn parse(self, raw: &str) -> Result<StageOutput, MalformedOutputError> {
        Ok(match self {
            Self::EpicExtraction => StageOutput::Epics(extract_structured(raw)?),
            Self::TaskDecomposition => StageOutput::Tasks(extract_structured(raw)?),
            Self::SprintPlanning => StageOutput::Sprints(extract_structured(raw)?),
        })
    }

    pub fn failure_message(self, error: &StageError) -> String {
        match error {
            StageError::InputMissing { missing } => format!("{} skipped: {missing}", self.label()),
            other => format!("{} failed: {other}", self.label()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StageOutput {
    Epics(Vec<Epic>),
    Tasks(Vec<TaskDraft>),
    Sprints(Vec<SprintPlan>),
}

impl StageOutput {
    pub fn len(&self) -> usize {
        match self {
            Self::Epics(epics) => epics.len(),
            Self::Tasks(tasks) => tasks.len(),
            Self::Sprints(sprints) => sprints.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("{missing}")]
    InputMissing { missing: &'static str },
    #[error(transparent)]
    Provider(#[from] LlmError),
    #[error(transparent)]
    MalformedOutput(#[from] MalformedOutputError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

impl StageError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputMissing { .. } => "input_missing",
            Self::Provider(LlmError::Timeout(_)) => "timeout",
            Self::Provider(_) => "provider",
            Self::MalformedOutput(_) => "malformed_output",
            Self::Prompt(_) => "prompt",
        }
    }
}

/// Folds one stage outcome into the state. The output variant is trusted to
/// match `stage`; a mismatched variant is written to the field it describes.
pub fn apply_outcome(
    stage: Stage,
    mut state: WorkflowState,
    outcome: Result<StageOutput, StageError>,
) -> WorkflowState {
    match outcome {
        Ok(output) => {
            match output {
                StageOutput::Epics(epics) => state.epics = epics,
                StageOutput::Tasks(tasks) => state.tasks = tasks,
                StageOutput::Sprints(sprints) => state.sprints = sprints,
            }
            state.error = None;
        }
        Err(error) => {
            match stage {
                Stage::EpicExtraction => state.epics = Vec::new(),
                Stage::TaskDecomposition => state.tasks = Vec::new(),
                Stage::SprintPlanning => state.sprints = Vec::new(),
            }
            state.error = Some(stage.failure_message(&error));
        }
    }
    state
}
