use std::sync::Arc;
use std::time::Duration;

use taskforge_core::config::LlmConfig;
use taskforge_core::WorkflowState;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::llm::{build_client, truncate_for_log, LlmClient, LlmError};
use crate::prompts::{PromptBuilder, PromptError};
use crate::stages::{apply_outcome, Stage, StageError, StageOutput};

const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);
const LOG_PREVIEW_CHARS: usize = 1_000;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("llm client could not be built: {0}")]
    Client(#[from] LlmError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Runs epic extraction, task decomposition and sprint planning in that order
/// against one provider client.
///
/// A run always reaches the end. Stage failures are folded into the returned
/// [`WorkflowState`] and never surface as `Err`.
pub struct DecompositionPipeline {
    client: Arc<dyn LlmClient>,
    prompts: PromptBuilder,
    llm_timeout: Duration,
}

impl DecompositionPipeline {
    pub fn new(client: Arc<dyn LlmClient>, prompts: PromptBuilder) -> Self {
        Self { client, prompts, llm_timeout: DEFAULT_LLM_TIMEOUT }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, PipelineError> {
        let client = build_client(config)?;
        Ok(Self::new(client, PromptBuilder::new()?)
            .with_timeout(Duration::from_secs(config.timeout_secs)))
    }

    pub fn with_timeout(mut self, llm_timeout: Duration) -> Self {
        self.llm_timeout = llm_timeout;
        self
    }

    pub fn llm_timeout(&self) -> Duration {
        self.llm_timeout
    }

    pub async fn run(&self, requirement: &str) -> WorkflowState {
        let correlation_id = Uuid::new_v4().to_string();
        self.run_with_correlation(requirement, &correlation_id).await
    }

    pub async fn run_with_correlation(
        &self,
        requirement: &str,
        correlation_id: &str,
    ) -> WorkflowState {
        info!(
            event_name = "pipeline.run.started",
            correlation_id = %correlation_id,
            requirement_chars = requirement.chars().count(),
            "decomposition run started"
        );

        let mut state = WorkflowState::new(requirement);
        for stage in Stage::ORDER {
            state = self.run_stage(stage, state, correlation_id).await;
        }

        info!(
            event_name = "pipeline.run.finished",
            correlation_id = %correlation_id,
            epics = state.epics.len(),
            tasks = state.tasks.len(),
            sprints = state.sprints.len(),
            error = state.error.as_deref().unwrap_or(""),
            "decomposition run finished"
        );
        state
    }

    /// Executes a single stage and folds its outcome into `state`.
    pub async fn run_stage(
        &self,
        stage: Stage,
        state: WorkflowState,
        correlation_id: &str,
    ) -> WorkflowState {
        let outcome = self.execute(stage, &state, correlation_id).await;

        match &outcome {
            Ok(output) => info!(
                event_name = "pipeline.stage.completed",
                correlation_id = %correlation_id,
                stage = stage.as_str(),
                items = output.len(),
                "stage completed"
            ),
            Err(StageError::InputMissing { missing }) => info!(
                event_name = "pipeline.stage.skipped",
                correlation_id = %correlation_id,
                stage = stage.as_str(),
                reason = *missing,
                "stage skipped"
            ),
            Err(error) => warn!(
                event_name = "pipeline.stage.failed",
                correlation_id = %correlation_id,
                stage = stage.as_str(),
                error_kind = error.kind(),
                error = %error,
                "stage failed"
            ),
        }

        apply_outcome(stage, state, outcome)
    }

    async fn execute(
        &self,
        stage: Stage,
        state: &WorkflowState,
        correlation_id: &str,
    ) -> Result<StageOutput, StageError> {
        stage.precondition(state)?;

        let prompt = self.prompts.render(stage, state)?;
        debug!(
            event_name = "pipeline.stage.prompt",
            correlation_id = %correlation_id,
            stage = stage.as_str(),
            prompt = %truncate_for_log(&prompt, LOG_PREVIEW_CHARS),
            "stage prompt rendered"
        );

        let raw = self.complete(&prompt).await?;
        debug!(
            event_name = "pipeline.stage.response",
            correlation_id = %correlation_id,
            stage = stage.as_str(),
            response = %truncate_for_log(&raw, LOG_PREVIEW_CHARS),
            "stage response received"
        );

        Ok(stage.parse(&raw)?)
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        match tokio::time::timeout(self.llm_timeout, self.client.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.llm_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use taskforge_core::{Priority, WorkflowState};

    use super::DecompositionPipeline;
    use crate::llm::{LlmClient, LlmError, ScriptedLlmClient};
    use crate::prompts::PromptBuilder;
    use crate::stages::Stage;

    const EPICS: &str = "```json\n[{\"name\":\"Backend\",\"description\":\"API and storage\"}]\n```";
    const TASKS: &str = "```json\n[{\"title\":\"Create task endpoint\",\"description\":\"...\",\"priority\":2,\"estimate\":4.0,\"epic\":\"Backend\"}]\n```";
    const SPRINTS: &str = "```json\n[{\"name\":\"Sprint 1\",\"tasks\":[0],\"total_estimate\":4.0}]\n```";

    fn pipeline(client: Arc<dyn LlmClient>) -> DecompositionPipeline {
        DecompositionPipeline::new(client, PromptBuilder::new().expect("templates"))
    }

    struct StallingClient;

    #[async_trait]
    impl LlmClient for StallingClient {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("[]".to_string())
        }
    }

    #[tokio::test]
    async fn todo_app_runs_end_to_end() {
        let client = Arc::new(ScriptedLlmClient::with_texts([EPICS, TASKS, SPRINTS]));
        let state = pipeline(client.clone()).run("Build a simple to-do app").await;

        assert!(state.is_success(), "unexpected error: {:?}", state.error);
        assert_eq!(state.requirement, "Build a simple to-do app");
        assert_eq!(state.epics.len(), 1);
        assert_eq!(state.tasks.len(), 1);
        assert_eq!(state.tasks[0].priority, Priority::Medium);
        assert_eq!(state.tasks[0].epic.as_deref(), Some("Backend"));
        assert_eq!(state.sprints.len(), 1);
        assert_eq!(state.sprints[0].task_indices, vec![0]);
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn later_prompts_embed_earlier_output() {
        let client = Arc::new(ScriptedLlmClient::with_texts([EPICS, TASKS, SPRINTS]));
        pipeline(client.clone()).run("Build a simple to-do app").await;

        let prompts = client.prompts();
        assert!(prompts[0].contains("Build a simple to-do app"));
        assert!(prompts[1].contains(r#""name":"Backend""#));
        assert!(prompts[2].contains(r#""title":"Create task endpoint""#));
    }

    #[tokio::test]
    async fn epic_provider_failure_cascades_into_skips() {
        let client = Arc::new(ScriptedLlmClient::new([Err(LlmError::Status {
            status: 503,
            body: "overloaded".to_string(),
        })]));
        let state = pipeline(client.clone()).run("Build a simple to-do app").await;

        assert!(state.epics.is_empty());
        assert!(state.tasks.is_empty());
        assert!(state.sprints.is_empty());
        assert_eq!(state.error.as_deref(), Some("sprint planning skipped: no tasks were decomposed"));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn malformed_sprint_output_keeps_earlier_fields() {
        let client = Arc::new(ScriptedLlmClient::with_texts([
            EPICS,
            TASKS,
            "```json\n[{\"name\": \"Sprint 1\", \"tasks\": [0\n```",
        ]));
        let state = pipeline(client).run("Build a simple to-do app").await;

        assert_eq!(state.epics.len(), 1);
        assert_eq!(state.tasks.len(), 1);
        assert!(state.sprints.is_empty());
        let error = state.error.expect("sprint planning must record an error");
        assert!(error.starts_with("sprint planning failed: model output is not valid"), "{error}");
    }

    #[tokio::test]
    async fn recovery_in_a_later_stage_clears_the_error() {
        let failing = Arc::new(ScriptedLlmClient::with_texts(["not json at all"]));
        let pipeline = pipeline(failing);

        let state = pipeline.run_stage(Stage::EpicExtraction, WorkflowState::new("x"), "t").await;
        assert!(state.error.as_deref().is_some_and(|error| error.starts_with("epic extraction")));

        let recovered = DecompositionPipeline::new(
            Arc::new(ScriptedLlmClient::with_texts([EPICS])),
            PromptBuilder::new().expect("templates"),
        )
        .run_stage(Stage::EpicExtraction, state, "t")
        .await;
        assert!(recovered.is_success());
        assert_eq!(recovered.epics.len(), 1);
    }

    #[tokio::test]
    async fn negative_sprint_positions_do_not_discard_the_plan() {
        let tasks = "```json\n[{\"title\":\"A\",\"priority\":2.0},{\"title\":\"B\"}]\n```";
        let sprints = "```json\n[{\"name\":\"Sprint 1\",\"tasks\":[0,-1],\"total_estimate\":4.0},{\"name\":\"Sprint 2\",\"tasks\":[1],\"total_estimate\":2.0}]\n```";
        let client = Arc::new(ScriptedLlmClient::with_texts([EPICS, tasks, sprints]));

        let state = pipeline(client).run("Build a simple to-do app").await;

        assert!(state.is_success(), "unexpected error: {:?}", state.error);
        assert_eq!(state.tasks[0].priority, Priority::Medium);
        assert_eq!(state.sprints.len(), 2);
        assert_eq!(state.sprints[0].task_indices, vec![0, -1]);
    }

    #[tokio::test]
    async fn stalled_provider_times_out_as_provider_failure() {
        let pipeline = pipeline(Arc::new(StallingClient)).with_timeout(Duration::from_millis(20));

        let state =
            pipeline.run_stage(Stage::EpicExtraction, WorkflowState::new("x"), "timeout").await;

        assert!(state.epics.is_empty());
        assert_eq!(
            state.error.as_deref(),
            Some("epic extraction failed: provider call timed out after 20ms")
        );
    }

    #[tokio::test]
    async fn empty_requirement_still_reaches_the_provider() {
        let client = Arc::new(ScriptedLlmClient::with_texts(["[]"]));
        let state = pipeline(client.clone()).run("").await;

        assert_eq!(client.call_count(), 1);
        assert!(state.epics.is_empty());
        assert_eq!(state.error.as_deref(), Some("sprint planning skipped: no tasks were decomposed"));
    }

    #[tokio::test]
    async fn exhausted_fake_is_reported_by_the_failing_stage() {
        let state = pipeline(Arc::new(ScriptedLlmClient::default()))
            .run_stage(
                Stage::TaskDecomposition,
                WorkflowState {
                    epics: vec![taskforge_core::Epic {
                        name: "Backend".to_string(),
                        description: String::new(),
                    }],
                    ..WorkflowState::new("x")
                },
                "exhausted",
            )
            .await;

        assert!(state.tasks.is_empty());
        assert_eq!(
            state.error.as_deref(),
            Some("task decomposition failed: no scripted response left")
        );
    }
}
