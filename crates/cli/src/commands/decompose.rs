use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use taskforge_agent::{build_client, DecompositionPipeline, LlmClient, PromptBuilder};
use taskforge_core::config::{AppConfig, LoadOptions};
use taskforge_core::{
    MaterializationPlan, ProjectId, SprintId, SprintResolution, UserId, WorkflowState,
};
use taskforge_db::{
    connect_with_settings, migrations, verify_project_access, AccessError, MaterializedPlan,
    PlanMaterializer, SqlPlanMaterializer, SqlProjectRepository,
};

use crate::commands::CommandResult;

const COMMAND: &str = "decompose";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecomposeArgs {
    pub requirement: String,
    pub project_id: Option<i64>,
    pub user_id: Option<i64>,
    pub sprint_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct DecomposeReport<'a> {
    command: &'static str,
    status: &'static str,
    error_class: Option<&'static str>,
    sprint_resolution: &'static str,
    #[serde(flatten)]
    workflow: &'a WorkflowState,
    #[serde(skip_serializing_if = "Option::is_none")]
    materialized: Option<&'a MaterializedPlan>,
}

struct Failure {
    error_class: &'static str,
    message: String,
    exit_code: u8,
}

impl Failure {
    fn new(error_class: &'static str, message: impl Into<String>, exit_code: u8) -> Self {
        Self { error_class, message: message.into(), exit_code }
    }
}

pub fn run(args: DecomposeArgs) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let client = match build_client(&config.llm) {
        Ok(client) => client,
        Err(error) => {
            return CommandResult::failure(COMMAND, "llm_client", error.to_string(), 7);
        }
    };

    run_with_client(args, &config, client)
}

/// Runs the command against an already-built provider client.
pub fn run_with_client(
    args: DecomposeArgs,
    config: &AppConfig,
    client: Arc<dyn LlmClient>,
) -> CommandResult {
    let prompts = match PromptBuilder::new() {
        Ok(prompts) => prompts,
        Err(error) => return CommandResult::failure(COMMAND, "prompt", error.to_string(), 7),
    };
    let pipeline = DecompositionPipeline::new(client, prompts)
        .with_timeout(Duration::from_secs(config.llm.timeout_secs));

    let runtime = match super::current_thread_runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let resolution = config.pipeline.sprint_resolution;
    let outcome = runtime.block_on(execute(&args, config, &pipeline, resolution));

    match outcome {
        Ok((workflow, materialized)) => {
            let succeeded = workflow.error.is_none();
            let report = DecomposeReport {
                command: COMMAND,
                status: if succeeded { "ok" } else { "error" },
                error_class: if succeeded { None } else { Some("pipeline") },
                sprint_resolution: resolution.as_str(),
                workflow: &workflow,
                materialized: materialized.as_ref(),
            };
            CommandResult::report(if succeeded { 0 } else { 8 }, &report)
        }
        Err(failure) => CommandResult::failure(
            COMMAND,
            failure.error_class,
            failure.message,
            failure.exit_code,
        ),
    }
}

async fn execute(
    args: &DecomposeArgs,
    config: &AppConfig,
    pipeline: &DecompositionPipeline,
    resolution: SprintResolution,
) -> Result<(WorkflowState, Option<MaterializedPlan>), Failure> {
    let Some(project_id) = args.project_id.map(ProjectId) else {
        return Ok((pipeline.run(&args.requirement).await, None));
    };
    let user_id = args
        .user_id
        .map(UserId)
        .ok_or_else(|| Failure::new("usage", "--project-id requires --user-id", 64))?;

    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| Failure::new("db_connectivity", error.to_string(), 4))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| Failure::new("migration", error.to_string(), 5))?;

    let projects = SqlProjectRepository::new(pool.clone());
    let project = verify_project_access(&projects, project_id, user_id).await.map_err(|error| {
        let error_class = match &error {
            AccessError::NotFound(_) => "project_not_found",
            AccessError::Forbidden { .. } => "project_forbidden",
            AccessError::Repository(_) => "db_query",
        };
        Failure::new(error_class, error.to_string(), 6)
    })?;

    let workflow = pipeline.run(&args.requirement).await;
    if workflow.error.is_some() {
        pool.close().await;
        return Ok((workflow, None));
    }

    let plan = MaterializationPlan::build(
        &workflow,
        project.id,
        args.sprint_id.map(SprintId),
        resolution,
    );
    let materialized = SqlPlanMaterializer::new(pool.clone())
        .materialize(&plan)
        .await
        .map_err(|error| {
            Failure::new("materialization", format!("AI decomposition failed: {error}"), 9)
        })?;
    pool.close().await;

    Ok((workflow, Some(materialized)))
}
