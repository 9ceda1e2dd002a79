use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse-grained work area proposed by the epic extraction stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epic {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "i64")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InvalidPriority(pub f64);

impl fmt::Display for InvalidPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "priority must be 1, 2 or 3 (got {})", self.0)
    }
}

impl Priority {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }
}

impl TryFrom<i64> for Priority {
    type Error = InvalidPriority;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Low),
            2 => Ok(Self::Medium),
            3 => Ok(Self::High),
            other => Err(InvalidPriority(other as f64)),
        }
    }
}

/// Models sometimes emit `2.0` for a priority. Integral values are accepted;
/// anything with a fractional part is not.
impl TryFrom<f64> for Priority {
    type Error = InvalidPriority;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if value.fract() != 0.0 || !(1.0..=3.0).contains(&value) {
            return Err(InvalidPriority(value));
        }
        Self::try_from(value as i64).map_err(|_| InvalidPriority(value))
    }
}

impl From<Priority> for i64 {
    fn from(value: Priority) -> Self {
        value.as_i64()
    }
}

/// A task proposed by the decomposition stage. `epic` echoes an epic name as
/// free text; it is not a reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub estimate: f64,
    #[serde(default)]
    pub epic: Option<String>,
}

/// A sprint proposed by the planning stage. `task_indices` are 0-based
/// positions into `WorkflowState::tasks`; they are kept signed because the
/// model is free to emit positions that do not exist.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SprintPlan {
    pub name: String,
    #[serde(alias = "tasks", default)]
    pub task_indices: Vec<i64>,
    #[serde(default)]
    pub total_estimate: f64,
}

/// State threaded through one decomposition run.
///
/// Each stage owns exactly one of `epics`, `tasks` and `sprints`. `error`
/// holds the outcome of the most recently executed stage only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub requirement: String,
    pub epics: Vec<Epic>,
    pub tasks: Vec<TaskDraft>,
    pub sprints: Vec<SprintPlan>,
    pub error: Option<String>,
}

impl WorkflowState {
    pub fn new(requirement: impl Into<String>) -> Self {
        Self { requirement: requirement.into(), ..Self::default() }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
