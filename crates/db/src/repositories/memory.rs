use std::collections::BTreeMap;

use chrono::Utc;
use tokio::sync::RwLock;

use taskforge_core::{
    MaterializationPlan, NewProject, Project, ProjectId, Sprint, SprintAssignment, SprintId, Task,
    TaskId,
};

use super::{MaterializedPlan, PlanMaterializer, ProjectRepository, RepositoryError};

#[derive(Default)]
struct Store {
    projects: BTreeMap<i64, Project>,
    sprints: Vec<Sprint>,
    tasks: Vec<Task>,
    next_project_id: i64,
    next_sprint_id: i64,
    next_task_id: i64,
}

/// Process-local project store. Serves as both repository and materializer so
/// handlers can be exercised without SQLite.
#[derive(Default)]
pub struct InMemoryProjectRepository {
    store: RwLock<Store>,
}

#[async_trait::async_trait]
impl ProjectRepository for InMemoryProjectRepository {
    async fn find_by_id(&self, id: ProjectId) -> Result<Option<Project>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.projects.get(&id.0).cloned())
    }

    async fn create(&self, project: NewProject) -> Result<Project, RepositoryError> {
        let mut store = self.store.write().await;
        store.next_project_id += 1;
        let now = Utc::now();
        let project = Project {
            id: ProjectId(store.next_project_id),
            name: project.name,
            description: project.description,
            owner_id: project.owner_id,
            created_at: now,
            updated_at: now,
        };
        store.projects.insert(project.id.0, project.clone());
        Ok(project)
    }

    async fn list_sprints(&self, project_id: ProjectId) -> Result<Vec<Sprint>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.sprints.iter().filter(|sprint| sprint.project_id == project_id).cloned().collect())
    }

    async fn list_tasks(&self, project_id: ProjectId) -> Result<Vec<Task>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.tasks.iter().filter(|task| task.project_id == project_id).cloned().collect())
    }
}

#[async_trait::async_trait]
impl PlanMaterializer for InMemoryProjectRepository {
    async fn materialize(
        &self,
        plan: &MaterializationPlan,
    ) -> Result<MaterializedPlan, RepositoryError> {
        let mut store = self.store.write().await;
        if !store.projects.contains_key(&plan.project_id.0) {
            return Err(RepositoryError::Decode(format!(
                "project {} does not exist",
                plan.project_id.0
            )));
        }

        let now = Utc::now();
        let first_sprint_id = store.next_sprint_id + 1;
        let sprints: Vec<Sprint> = plan
            .sprints
            .iter()
            .zip(first_sprint_id..)
            .map(|(sprint, id)| Sprint {
                id: SprintId(id),
                project_id: plan.project_id,
                name: sprint.name.clone(),
                created_at: now,
            })
            .collect();

        let mut tasks = Vec::with_capacity(plan.tasks.len());
        for (task, id) in plan.tasks.iter().zip(store.next_task_id + 1..) {
            let sprint_id = match task.assignment {
                SprintAssignment::Planned(slot) => {
                    Some(sprints.get(slot).map(|sprint| sprint.id).ok_or_else(|| {
                        RepositoryError::Decode(format!("unknown planned sprint slot {slot}"))
                    })?)
                }
                SprintAssignment::Existing(sprint_id) => {
                    let owned = store.sprints.iter().any(|sprint| {
                        sprint.id == sprint_id && sprint.project_id == plan.project_id
                    });
                    if !owned {
                        return Err(RepositoryError::SprintOutsideProject {
                            sprint: sprint_id,
                            project: plan.project_id,
                        });
                    }
                    Some(sprint_id)
                }
                SprintAssignment::Unassigned => None,
            };

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

        store.next_sprint_id += sprints.len() as i64;
        store.next_task_id += tasks.len() as i64;
        store.sprints.extend(sprints.iter().cloned());
        store.tasks.extend(tasks.iter().cloned());

        Ok(MaterializedPlan { sprints, tasks })
    }
}
