use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use taskforge_core::{
    DomainError, MaterializationPlan, NewProject, Project, ProjectId, Sprint, SprintId, Task,
    UserId,
};

pub mod memory;
pub mod plan;
pub mod project;

pub use memory::InMemoryProjectRepository;
pub use plan::{MaterializedPlan, SqlPlanMaterializer};
pub use project::SqlProjectRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("sprint {sprint} does not belong to project {project}")]
    SprintOutsideProject { sprint: SprintId, project: ProjectId },
}

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn find_by_id(&self, id: ProjectId) -> Result<Option<Project>, RepositoryError>;
    async fn create(&self, project: NewProject) -> Result<Project, RepositoryError>;
    async fn list_sprints(&self, project_id: ProjectId) -> Result<Vec<Sprint>, RepositoryError>;
    async fn list_tasks(&self, project_id: ProjectId) -> Result<Vec<Task>, RepositoryError>;
}

/// Persists a [`MaterializationPlan`] atomically: either every sprint and task
/// row is written or none is.
#[async_trait]
pub trait PlanMaterializer: Send + Sync {
    async fn materialize(
        &self,
        plan: &MaterializationPlan,
    ) -> Result<MaterializedPlan, RepositoryError>;
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("project {0} not found")]
    NotFound(ProjectId),
    #[error("user {user} may not access project {project}")]
    Forbidden { project: ProjectId, user: UserId },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl AccessError {
    /// Domain view of the failure, `None` for storage errors.
    pub fn as_domain(&self) -> Option<DomainError> {
        match self {
            Self::NotFound(project) => Some(DomainError::ProjectNotFound(*project)),
            Self::Forbidden { project, user } => {
                Some(DomainError::ProjectForbidden { project: *project, user: *user })
            }
            Self::Repository(_) => None,
        }
    }
}

/// Loads the project and checks that `user_id` owns it.
pub async fn verify_project_access<R>(
    repository: &R,
    project_id: ProjectId,
    user_id: UserId,
) -> Result<Project, AccessError>
where
    R: ProjectRepository + ?Sized,
{
    let project =
        repository.find_by_id(project_id).await?.ok_or(AccessError::NotFound(project_id))?;

    if project.owner_id != user_id {
        warn!(
            event_name = "project.access.forbidden",
            project_id = project_id.0,
            user_id = user_id.0,
            "project access denied"
        );
        return Err(AccessError::Forbidden { project: project_id, user: user_id });
    }

    Ok(project)
}
