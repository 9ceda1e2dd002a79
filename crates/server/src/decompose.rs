//! AI decomposition endpoint.
//!
//! - `POST /projects/{project_id}/ai/decompose` runs the pipeline for a
//!   project and, unless `persist` is false, store the resulting sprints and
//!   tasks.
//!
//! Caller identity comes from the `x-user-id` header set by the gateway in
//! front of this service.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use taskforge_agent::DecompositionPipeline;
use taskforge_core::{
    ApplicationError, InterfaceError, MaterializationPlan, ProjectId, SprintId, SprintResolution,
    UserId, WorkflowState,
};
use taskforge_db::{
    verify_project_access, AccessError, MaterializedPlan, PlanMaterializer, ProjectRepository,
};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct DecomposeState {
    pub projects: Arc<dyn ProjectRepository>,
    pub materializer: Arc<dyn PlanMaterializer>,
    pub pipeline: Arc<DecompositionPipeline>,
    pub sprint_resolution: SprintResolution,
}

#[derive(Debug, Deserialize)]
pub struct DecomposeRequest {
    pub prompt: String,
    #[serde(default)]
    pub sprint_id: Option<i64>,
    #[serde(default = "default_persist")]
    pub persist: bool,
}

fn default_persist() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct DecomposeResponse {
    #[serde(flatten)]
    pub workflow: WorkflowState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub materialized: Option<MaterializedPlan>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
    correlation_id: &'a str,
}

/// HTTP view of an [`InterfaceError`]. Internal failures expose their
/// message; every other class answers with the fixed user message.
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = match &self.0 {
            InterfaceError::Internal { message, .. } => message.as_str(),
            other => other.user_message(),
        };
        let body = ErrorBody { detail, correlation_id: self.0.correlation_id() };
        (self.status(), Json(body)).into_response()
    }
}

pub fn router(state: DecomposeState) -> Router {
    Router::new().route("/projects/{project_id}/ai/decompose", post(decompose)).with_state(state)
}

pub async fn decompose(
    State(state): State<DecomposeState>,
    Path(project_id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<DecomposeRequest>,
) -> Result<Json<DecomposeResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let project_id = ProjectId(project_id);

    let user_id = caller_identity(&headers)
        .map_err(|error| ApiError(error.into_interface(correlation_id.as_str())))?;
    let project = verify_project_access(state.projects.as_ref(), project_id, user_id)
        .await
        .map_err(|error| access_failure(error, &correlation_id))?;

    info!(
        event_name = "api.decompose.requested",
        correlation_id = %correlation_id,
        project_id = project.id.0,
        user_id = user_id.0,
        persist = request.persist,
        "decomposition requested"
    );

    let workflow = state.pipeline.run_with_correlation(&request.prompt, &correlation_id).await;

    let materialized = if request.persist && workflow.error.is_none() {
        let plan = MaterializationPlan::build(
            &workflow,
            project.id,
            request.sprint_id.map(SprintId),
            state.sprint_resolution,
        );
        let created = state.materializer.materialize(&plan).await.map_err(|source| {
            error!(
                event_name = "api.decompose.materialize_failed",
                correlation_id = %correlation_id,
                project_id = project.id.0,
                error = %source,
                "materialization failed"
            );
            ApiError(
                ApplicationError::Persistence(format!("AI decomposition failed: {source}"))
                    .into_interface(correlation_id.as_str()),
            )
        })?;
        Some(created)
    } else {
        None
    };

    Ok(Json(DecomposeResponse { workflow, materialized }))
}

fn caller_identity(headers: &HeaderMap) -> Result<UserId, ApplicationError> {
    let raw = headers.get(USER_ID_HEADER).ok_or_else(|| {
        ApplicationError::Unauthenticated(format!("`{USER_ID_HEADER}` header missing"))
    })?;

    raw.to_str()
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .map(UserId)
        .ok_or_else(|| {
            ApplicationError::Unauthenticated(format!("`{USER_ID_HEADER}` header is not a user id"))
        })
}

fn access_failure(error: AccessError, correlation_id: &str) -> ApiError {
    warn!(
        event_name = "api.decompose.access_denied",
        correlation_id = %correlation_id,
        error = %error,
        "project access check failed"
    );
    let application = match error.as_domain() {
        Some(domain) => ApplicationError::Domain(domain),
        None => ApplicationError::Persistence(format!("AI decomposition failed: {error}")),
    };
    ApiError(application.into_interface(correlation_id))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use taskforge_agent::{DecompositionPipeline, LlmError, PromptBuilder, ScriptedLlmClient};
    use taskforge_core::{MaterializationPlan, NewProject, ProjectId, SprintResolution, UserId};
    use taskforge_db::{
        InMemoryProjectRepository, MaterializedPlan, PlanMaterializer, ProjectRepository,
        RepositoryError,
    };
    use tower::ServiceExt;

    use super::{router, DecomposeState};

    const EPICS: &str = "```json\n[{\"name\":\"Backend\",\"description\":\"API and storage\"}]\n```";
    const TASKS: &str = "```json\n[{\"title\":\"Create task endpoint\",\"description\":\"...\",\"priority\":2,\"estimate\":4.0,\"epic\":\"Backend\"}]\n```";
    const SPRINTS: &str = "```json\n[{\"name\":\"Sprint 1\",\"tasks\":[0],\"total_estimate\":4.0}]\n```";

    struct BrokenMaterializer;

    #[async_trait]
    impl PlanMaterializer for BrokenMaterializer {
        async fn materialize(
            &self,
            _plan: &MaterializationPlan,
        ) -> Result<MaterializedPlan, RepositoryError> {
            Err(RepositoryError::Decode("disk full".to_string()))
        }
    }

    async fn fixture(
        client: ScriptedLlmClient,
        materializer: Option<Arc<dyn PlanMaterializer>>,
    ) -> (Router, Arc<InMemoryProjectRepository>, ProjectId) {
        let repo = Arc::new(InMemoryProjectRepository::default());
        let project = repo
            .create(NewProject {
                name: "Todo".to_string(),
                description: None,
                owner_id: UserId(1),
            })
            .await
            .expect("create project");

        let pipeline = DecompositionPipeline::new(
            Arc::new(client),
            PromptBuilder::new().expect("templates"),
        );
        let fallback: Arc<dyn PlanMaterializer> = repo.clone();
        let state = DecomposeState {
            projects: repo.clone(),
            materializer: materializer.unwrap_or(fallback),
            pipeline: Arc::new(pipeline),
            sprint_resolution: SprintResolution::TaskIndex,
        };
        (router(state), repo, project.id)
    }

    fn request(project_id: ProjectId, user: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/projects/{}/ai/decompose", project_id.0))
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn decompose_runs_pipeline_and_persists_rows() {
        let (app, repo, project_id) =
            fixture(ScriptedLlmClient::with_texts([EPICS, TASKS, SPRINTS]), None).await;

        let (status, body) = send(
            app,
            request(project_id, Some("1"), json!({"prompt": "Build a simple to-do app"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], Value::Null);
        assert_eq!(body["epics"][0]["name"], "Backend");
        assert_eq!(body["tasks"][0]["priority"], 2);
        assert_eq!(body["sprints"][0]["task_indices"], json!([0]));
        assert_eq!(body["materialized"]["tasks"][0]["status"], "todo");
        assert_eq!(
            body["materialized"]["tasks"][0]["sprint_id"],
            body["materialized"]["sprints"][0]["id"]
        );

        let tasks = repo.list_tasks(project_id).await.expect("tasks");
        assert_eq!(tasks.len(), 1);
        assert_eq!(repo.list_sprints(project_id).await.expect("sprints").len(), 1);
    }

    #[tokio::test]
    async fn persist_false_returns_result_without_writing() {
        let (app, repo, project_id) =
            fixture(ScriptedLlmClient::with_texts([EPICS, TASKS, SPRINTS]), None).await;

        let (status, body) = send(
            app,
            request(project_id, Some("1"), json!({"prompt": "todo", "persist": false})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.get("materialized").is_none());
        assert!(repo.list_tasks(project_id).await.expect("tasks").is_empty());
    }

    #[tokio::test]
    async fn pipeline_error_is_returned_and_nothing_is_persisted() {
        let client = ScriptedLlmClient::new([Err(LlmError::Http("connection refused".to_string()))]);
        let (app, repo, project_id) = fixture(client, None).await;

        let (status, body) =
            send(app, request(project_id, Some("1"), json!({"prompt": "todo"}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], "sprint planning skipped: no tasks were decomposed");
        assert_eq!(body["epics"], json!([]));
        assert!(body.get("materialized").is_none());
        assert!(repo.list_sprints(project_id).await.expect("sprints").is_empty());
    }

    #[tokio::test]
    async fn default_sprint_of_another_project_is_refused() {
        let unplanned = "```json\n[{\"name\":\"Sprint 1\",\"tasks\":[5],\"total_estimate\":0}]\n```";
        let (app, repo, project_id) =
            fixture(ScriptedLlmClient::with_texts([EPICS, TASKS, unplanned]), None).await;
        let other = repo
            .create(NewProject { name: "Other".to_string(), description: None, owner_id: UserId(2) })
            .await
            .expect("create other project");
        let other_state = taskforge_core::WorkflowState {
            sprints: vec![taskforge_core::SprintPlan {
                name: "Theirs".to_string(),
                task_indices: Vec::new(),
                total_estimate: 0.0,
            }],
            ..taskforge_core::WorkflowState::new("other")
        };
        let foreign = repo
            .materialize(&MaterializationPlan::build(
                &other_state,
                other.id,
                None,
                SprintResolution::TaskIndex,
            ))
            .await
            .expect("materialize other project")
            .sprints[0]
            .id;

        let (status, body) = send(
            app,
            request(project_id, Some("1"), json!({"prompt": "todo", "sprint_id": foreign.0})),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["detail"],
            format!(
                "AI decomposition failed: sprint {} does not belong to project {}",
                foreign.0, project_id.0
            )
        );
        assert!(repo.list_tasks(project_id).await.expect("tasks").is_empty());
    }

    #[tokio::test]
    async fn missing_caller_identity_is_unauthorized() {
        let (app, _, project_id) = fixture(ScriptedLlmClient::default(), None).await;

        let (status, body) = send(app, request(project_id, None, json!({"prompt": "x"}))).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["correlation_id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn foreign_user_is_forbidden_before_any_llm_call() {
        let client = ScriptedLlmClient::with_texts([EPICS, TASKS, SPRINTS]);
        let (app, _, project_id) = fixture(client, None).await;

        let (status, body) =
            send(app, request(project_id, Some("2"), json!({"prompt": "x"}))).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["detail"], "Not authorized");
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let (app, _, _) = fixture(ScriptedLlmClient::default(), None).await;

        let (status, body) =
            send(app, request(ProjectId(999), Some("1"), json!({"prompt": "x"}))).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Project not found");
    }

    #[tokio::test]
    async fn materialization_failure_maps_to_server_error() {
        let (app, _, project_id) = fixture(
            ScriptedLlmClient::with_texts([EPICS, TASKS, SPRINTS]),
            Some(Arc::new(BrokenMaterializer)),
        )
        .await;

        let (status, body) =
            send(app, request(project_id, Some("1"), json!({"prompt": "todo"}))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "AI decomposition failed: decode error: disk full");
    }
}
