//! Domain model, configuration and error taxonomy shared by the TaskForge
//! crates.
//!
//! The decomposition pipeline itself lives in `taskforge-agent`; persistence
//! lives in `taskforge-db`. This crate holds the types both sides agree on.

pub mod config;
pub mod domain;
pub mod errors;
pub mod materialization;

pub use domain::project::{
    NewProject, Project, ProjectId, Sprint, SprintId, Task, TaskId, TaskStatus, UserId,
};
pub use domain::workflow::{Epic, Priority, SprintPlan, TaskDraft, WorkflowState};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use materialization::{
    MaterializationPlan, NewSprint, NewTask, SprintAssignment, SprintResolution,
};
