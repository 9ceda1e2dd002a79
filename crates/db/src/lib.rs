//! SQLite persistence for projects, sprints and tasks.
//!
//! The decomposition pipeline never touches the database. Callers verify
//! project access here before a run and hand the finished plan to a
//! [`PlanMaterializer`] afterwards.

pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect_with_settings, DbPool};
pub use repositories::{
    verify_project_access, AccessError, InMemoryProjectRepository, MaterializedPlan,
    PlanMaterializer, ProjectRepository, RepositoryError, SqlPlanMaterializer,
    SqlProjectRepository,
};
