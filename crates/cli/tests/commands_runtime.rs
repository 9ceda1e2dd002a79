use std::env;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;
use taskforge_agent::{LlmError, ScriptedLlmClient};
use taskforge_cli::commands::decompose::{run_with_client, DecomposeArgs};
use taskforge_cli::commands::{config, migrate};
use taskforge_core::config::{AppConfig, ConfigOverrides, LlmProvider, LoadOptions};
use taskforge_core::{NewProject, ProjectId, UserId};
use taskforge_db::{connect_with_settings, migrations, ProjectRepository, SqlProjectRepository};

const EPICS: &str = "```json\n[{\"name\":\"Backend\",\"description\":\"API and storage\"}]\n```";
const TASKS: &str = "```json\n[{\"title\":\"Create task endpoint\",\"priority\":1,\"estimate\":4.0},{\"title\":\"List tasks\",\"priority\":2,\"estimate\":2.0}]\n```";
const SPRINTS: &str = "```json\n[{\"name\":\"Sprint 1\",\"tasks\":[0,1],\"total_estimate\":6.0}]\n```";

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(
        &[
            ("TASKFORGE_DATABASE_URL", "sqlite::memory:"),
            ("TASKFORGE_LLM_PROVIDER", "ollama"),
            ("TASKFORGE_LLM_BASE_URL", "http://localhost:11434"),
        ],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "ok");
        },
    );
}

#[test]
fn migrate_returns_config_failure_without_api_key() {
    with_env(&[("TASKFORGE_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_reports_env_source_and_redacts_key() {
    with_env(
        &[
            ("TASKFORGE_DATABASE_URL", "sqlite::memory:"),
            ("OPENAI_API_KEY", "sk-proj-do-not-print"),
        ],
        || {
            let output = config::run();

            assert!(output.contains("- database.url = sqlite::memory: (source: env (TASKFORGE_DATABASE_URL))"));
            assert!(output.contains("- llm.api_key = sk-*** (source: env (OPENAI_API_KEY))"));
            assert!(output.contains("- llm.provider = openai (source: default)"));
            assert!(!output.contains("do-not-print"));
        },
    );
}

#[test]
fn decompose_without_project_prints_workflow_state() {
    with_env(&[], || {
        let config = ollama_config("sqlite::memory:");
        let client = Arc::new(ScriptedLlmClient::with_texts([EPICS, TASKS, SPRINTS]));

        let result = run_with_client(args("Build a simple to-do app"), &config, client);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["sprint_resolution"], "task_index");
        assert_eq!(payload["requirement"], "Build a simple to-do app");
        assert_eq!(payload["epics"][0]["name"], "Backend");
        assert_eq!(payload["tasks"].as_array().map(Vec::len), Some(2));
        assert_eq!(payload["sprints"][0]["task_indices"], serde_json::json!([0, 1]));
        assert!(payload["error"].is_null());
        assert!(payload.get("materialized").is_none());
    });
}

#[test]
fn decompose_into_project_persists_sprints_and_tasks() {
    with_env(&[], || {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = sqlite_url(&dir.path().join("taskforge.db"));
        let project_id = seed_project(&url, UserId(1));
        let config = ollama_config(&url);
        let client = Arc::new(ScriptedLlmClient::with_texts([EPICS, TASKS, SPRINTS]));

        let mut request = args("Build a simple to-do app");
        request.project_id = Some(project_id.0);
        request.user_id = Some(1);
        let result = run_with_client(request, &config, client);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        let sprints = payload["materialized"]["sprints"].as_array().expect("sprints");
        let tasks = payload["materialized"]["tasks"].as_array().expect("tasks");
        assert_eq!(sprints.len(), 1);
        assert_eq!(sprints[0]["name"], "Sprint 1");
        assert_eq!(tasks.len(), 2);
        for task in tasks {
            assert_eq!(task["sprint_id"], sprints[0]["id"]);
            assert_eq!(task["status"], "todo");
        }

        assert_eq!(count_rows(&url, "task"), 2);
    });
}

#[test]
fn decompose_rejects_caller_who_does_not_own_project() {
    with_env(&[], || {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = sqlite_url(&dir.path().join("taskforge.db"));
        let project_id = seed_project(&url, UserId(1));
        let config = ollama_config(&url);
        let client = Arc::new(ScriptedLlmClient::with_texts([EPICS, TASKS, SPRINTS]));

        let mut request = args("Build a simple to-do app");
        request.project_id = Some(project_id.0);
        request.user_id = Some(2);
        let result = run_with_client(request, &config, client.clone());
        assert_eq!(result.exit_code, 6);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "project_forbidden");
        assert_eq!(client.call_count(), 0, "pipeline must not run for a forbidden caller");
        assert_eq!(count_rows(&url, "task"), 0);
    });
}

#[test]
fn decompose_reports_pipeline_error_and_skips_persistence() {
    with_env(&[], || {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = sqlite_url(&dir.path().join("taskforge.db"));
        let project_id = seed_project(&url, UserId(1));
        let config = ollama_config(&url);
        let client = Arc::new(ScriptedLlmClient::new([Err(LlmError::Status {
            status: 503,
            body: "overloaded".to_string(),
        })]));

        let mut request = args("Build a simple to-do app");
        request.project_id = Some(project_id.0);
        request.user_id = Some(1);
        let result = run_with_client(request, &config, client);
        assert_eq!(result.exit_code, 8);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "pipeline");
        let error = payload["error"].as_str().expect("error text");
        assert_eq!(error, "sprint planning skipped: no tasks were decomposed");
        assert_eq!(payload["epics"], serde_json::json!([]));
        assert!(payload.get("materialized").is_none());
        assert_eq!(count_rows(&url, "sprint"), 0);
    });
}

fn args(requirement: &str) -> DecomposeArgs {
    DecomposeArgs { requirement: requirement.to_string(), ..DecomposeArgs::default() }
}

fn ollama_config(database_url: &str) -> AppConfig {
    AppConfig::load(LoadOptions {
        overrides: ConfigOverrides {
            database_url: Some(database_url.to_string()),
            llm_provider: Some(LlmProvider::Ollama),
            llm_base_url: Some("http://localhost:11434".to_string()),
            ..ConfigOverrides::default()
        },
        ..LoadOptions::default()
    })
    .expect("load config")
}

fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}", path.display())
}

fn seed_project(url: &str, owner_id: UserId) -> ProjectId {
    block_on(async {
        let pool = connect_with_settings(url, 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        let project = SqlProjectRepository::new(pool.clone())
            .create(NewProject { name: "To-do".to_string(), description: None, owner_id })
            .await
            .expect("create project");
        pool.close().await;
        project.id
    })
}

fn count_rows(url: &str, table: &str) -> i64 {
    block_on(async {
        let pool = connect_with_settings(url, 1, 30).await.expect("connect");
        let count: i64 = sqlx_count(&pool, table).await;
        pool.close().await;
        count
    })
}

async fn sqlx_count(pool: &taskforge_db::DbPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .expect("count rows")
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
        .block_on(future)
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid json")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "TASKFORGE_DATABASE_URL",
        "TASKFORGE_DATABASE_MAX_CONNECTIONS",
        "TASKFORGE_DATABASE_TIMEOUT_SECS",
        "TASKFORGE_LLM_PROVIDER",
        "TASKFORGE_LLM_API_KEY",
        "TASKFORGE_LLM_BASE_URL",
        "TASKFORGE_LLM_MODEL",
        "TASKFORGE_LLM_TEMPERATURE",
        "TASKFORGE_LLM_TIMEOUT_SECS",
        "TASKFORGE_PIPELINE_SPRINT_RESOLUTION",
        "TASKFORGE_SERVER_BIND_ADDRESS",
        "TASKFORGE_SERVER_PORT",
        "TASKFORGE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "TASKFORGE_LOGGING_LEVEL",
        "TASKFORGE_LOGGING_FORMAT",
        "TASKFORGE_LOG_LEVEL",
        "TASKFORGE_LOG_FORMAT",
        "OPENAI_API_KEY",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
