//! Pure translation of a finished [`WorkflowState`] into the rows a store has
//! to create. Persisting the plan is the job of the database crate; this
//! module only decides which sprint each proposed task belongs to.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::domain::project::{ProjectId, SprintId, TaskStatus};
use crate::domain::workflow::{Priority, SprintPlan, WorkflowState};

/// How a proposed task is matched to a proposed sprint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SprintResolution {
    /// Task `j` belongs to the first sprint whose `task_indices` contains `j`.
    #[default]
    TaskIndex,
    /// Task belongs to the first sprint whose JSON form contains the task's
    /// `epic` text as a substring.
    EpicSubstring,
}

impl SprintResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskIndex => "task_index",
            Self::EpicSubstring => "epic_substring",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SprintAssignment {
    /// Index into [`MaterializationPlan::sprints`].
    Planned(usize),
    Existing(SprintId),
    Unassigned,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewSprint {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub estimate: f64,
    pub status: TaskStatus,
    pub assignment: SprintAssignment,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaterializationPlan {
    pub project_id: ProjectId,
    pub sprints: Vec<NewSprint>,
    pub tasks: Vec<NewTask>,
}

impl MaterializationPlan {
    pub fn build(
        state: &WorkflowState,
        project_id: ProjectId,
        default_sprint: Option<SprintId>,
        resolution: SprintResolution,
    ) -> Self {
        let mut sprints = Vec::new();
        let mut slot_by_name: HashMap<&str, usize> = HashMap::new();
        let slot_by_position: Vec<usize> = state
            .sprints
            .iter()
            .map(|sprint| {
                *slot_by_name.entry(sprint.name.as_str()).or_insert_with(|| {
                    sprints.push(NewSprint { name: sprint.name.clone() });
                    sprints.len() - 1
                })
            })
            .collect();

        warn_out_of_range(&state.sprints, state.tasks.len());

        let serialized: Vec<String> = match resolution {
            SprintResolution::TaskIndex => Vec::new(),
            SprintResolution::EpicSubstring => state.sprints.iter().map(model_record).collect(),
        };

        let tasks = state
            .tasks
            .iter()
            .enumerate()
            .map(|(index, task)| {
                let position = match resolution {
                    SprintResolution::TaskIndex => state
                        .sprints
                        .iter()
                        .position(|sprint| sprint.task_indices.contains(&(index as i64))),
                    SprintResolution::EpicSubstring => task
                        .epic
                        .as_deref()
                        .and_then(|epic| serialized.iter().position(|text| text.contains(epic))),
                };

                let assignment = match (position, default_sprint) {
                    (Some(position), _) => SprintAssignment::Planned(slot_by_position[position]),
                    (None, Some(sprint_id)) => SprintAssignment::Existing(sprint_id),
                    (None, None) => SprintAssignment::Unassigned,
                };

                NewTask {
                    title: task.title.clone(),
                    description: task.description.clone(),
                    priority: task.priority,
                    estimate: task.estimate,
                    status: TaskStatus::Todo,
                    assignment,
                }
            })
            .collect();

        Self { project_id, sprints, tasks }
    }
}

/// The sprint as the model wrote it, with its `tasks` key rather than the
/// field name used in this crate.
fn model_record(sprint: &SprintPlan) -> String {
    json!({
        "name": sprint.name,
        "tasks": sprint.task_indices,
        "total_estimate": sprint.total_estimate,
    })
    .to_string()
}

fn warn_out_of_range(sprints: &[SprintPlan], task_count: usize) {
    for sprint in sprints {
        let ignored: Vec<i64> = sprint
            .task_indices
            .iter()
            .copied()
            .filter(|index| usize::try_from(*index).map_or(true, |index| index >= task_count))
            .collect();
        if !ignored.is_empty() {
            warn!(
                event_name = "materializer.task_index_out_of_range",
                sprint = %sprint.name,
                task_count,
                ignored = ?ignored,
                "sprint references task positions that do not exist"
            );
        }
    }
}
