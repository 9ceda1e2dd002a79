use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use taskforge_core::{
    NewProject, Priority, Project, ProjectId, Sprint, SprintId, Task, TaskId, TaskStatus, UserId,
};

use super::{ProjectRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProjectRepository {
    pool: DbPool,
}

impl SqlProjectRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProjectRepository for SqlProjectRepository {
    async fn find_by_id(&self, id: ProjectId) -> Result<Option<Project>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                name,
                description,
                owner_id,
                created_at,
                updated_at
             FROM project
             WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(project_from_row).transpose()
    }

    async fn create(&self, project: NewProject) -> Result<Project, RepositoryError> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO project (name, description, owner_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&project.name)
        .bind(project.description.as_deref())
        .bind(project.owner_id.0)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Project {
            id: ProjectId(id),
            name: project.name,
            description: project.description,
            owner_id: project.owner_id,
            created_at: now,
            updated_at: now,
        })
    }

    async fn list_sprints(&self, project_id: ProjectId) -> Result<Vec<Sprint>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, project_id, name, created_at
             FROM sprint
             WHERE project_id = ?
             ORDER BY id ASC",
        )
        .bind(project_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(sprint_from_row).collect()
    }

    async fn list_tasks(&self, project_id: ProjectId) -> Result<Vec<Task>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                project_id,
                sprint_id,
                title,
                description,
                priority,
                estimate,
                status,
                created_at
             FROM task
             WHERE project_id = ?
             ORDER BY id ASC",
        )
        .bind(project_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(task_from_row).collect()
    }
}

fn project_from_row(row: SqliteRow) -> Result<Project, RepositoryError> {
    Ok(Project {
        id: ProjectId(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        owner_id: UserId(row.try_get("owner_id")?),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn sprint_from_row(row: SqliteRow) -> Result<Sprint, RepositoryError> {
    Ok(Sprint {
        id: SprintId(row.try_get("id")?),
        project_id: ProjectId(row.try_get("project_id")?),
        name: row.try_get("name")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn task_from_row(row: SqliteRow) -> Result<Task, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = TaskStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown task status `{status_raw}`")))?;

    let priority_raw = row.try_get::<i64, _>("priority")?;
    let priority = Priority::try_from(priority_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid `priority`: {error}")))?;

    Ok(Task {
        id: TaskId(row.try_get("id")?),
        project_id: ProjectId(row.try_get("project_id")?),
        sprint_id: row.try_get::<Option<i64>, _>("sprint_id")?.map(SprintId),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        priority,
        estimate: row.try_get("estimate")?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
