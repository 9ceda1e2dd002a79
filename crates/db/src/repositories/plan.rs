use chrono::Utc;
use serde::Serialize;
use taskforge_core::{MaterializationPlan, Sprint, SprintAssignment, SprintId, Task, TaskId};
use tracing::info;

use super::{PlanMaterializer, RepositoryError};
use crate::DbPool;

/// Rows created by one materialization, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MaterializedPlan {
    pub sprints: Vec<Sprint>,
    pub tasks: Vec<Task>,
}

pub struct SqlPlanMaterializer {
    pool: DbPool,
}

impl SqlPlanMaterializer {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PlanMaterializer for SqlPlanMaterializer {
    async fn materialize(
        &self,
        plan: &MaterializationPlan,
    ) -> Result<MaterializedPlan, RepositoryError> {
        let now = Utc::now();
        let timestamp = now.to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let mut sprints = Vec::with_capacity(plan.sprints.len());
        for sprint in &plan.sprints {
            let id = sqlx::query(
                "INSERT INTO sprint (project_id, name, created_at, updated_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(plan.project_id.0)
            .bind(&sprint.name)
            .bind(&timestamp)
            .bind(&timestamp)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            sprints.push(Sprint {
                id: SprintId(id),
                project_id: plan.project_id,
                name: sprint.name.clone(),
                created_at: now,
            });
        }

        let mut verified = Vec::new();
        for task in &plan.tasks {
            let SprintAssignment::Existing(sprint_id) = task.assignment else {
                continue;
            };
            if verified.contains(&sprint_id) {
                continue;
            }
            let owner: Option<i64> =
                sqlx::query_scalar("SELECT project_id FROM sprint WHERE id = ?")
                    .bind(sprint_id.0)
                    .fetch_optional(&mut *tx)
                    .await?;
            if owner != Some(plan.project_id.0) {
                return Err(RepositoryError::SprintOutsideProject {
                    sprint: sprint_id,
                    project: plan.project_id,
                });
            }
            verified.push(sprint_id);
        }

        let mut tasks = Vec::with_capacity(plan.tasks.len());
        for task in &plan.tasks {
            let sprint_id = match task.assignment {
                SprintAssignment::Planned(slot) => Some(
                    sprints
                        .get(slot)
                        .map(|sprint| sprint.id)
                        .ok_or_else(|| {
                            RepositoryError::Decode(format!(
                                "task `{}` references unknown planned sprint slot {slot}",
                                task.title
                            ))
                        })?,
                ),
                SprintAssignment::Existing(sprint_id) => Some(sprint_id),
                SprintAssignment::Unassigned => None,
            };

            let id = sqlx::query(
                "INSERT INTO task (
                    project_id,
                    sprint_id,
                    title,
                    description,
                    status,
                    priority,
                    estimate,
                    created_at,
                    updated_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(plan.project_id.0)
            .bind(sprint_id.map(|id| id.0))
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.status.as_str())
            .bind(task.priority.as_i64())
            .bind(task.estimate)
            .bind(&timestamp)
            .bind(&timestamp)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            tasks.push(Task {
                id: TaskId(id),
                project_id: plan.project_id,
                sprint_id,
                title: task.title.clone(),
                description: task.description.clone(),
                priority: task.priority,
                estimate: task.estimate,
                status: task.status,
                created_at: now,
            });
        }

        tx.commit().await?;

        info!(
            event_name = "materializer.committed",
            project_id = plan.project_id.0,
            sprints = sprints.len(),
            tasks = tasks.len(),
            "materialization committed"
        );

        Ok(MaterializedPlan { sprints, tasks })
    }
}
