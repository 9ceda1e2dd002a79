pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use taskforge_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

use crate::commands::decompose::DecomposeArgs;

#[derive(Debug, Parser)]
#[command(
    name = "taskforge",
    about = "TaskForge operator CLI",
    long_about = "Apply migrations, inspect configuration, and break a requirement down into epics, tasks and sprints.",
    after_help = "Examples:\n  taskforge migrate\n  taskforge config\n  taskforge decompose \"Build a simple to-do app\"\n  taskforge decompose \"Build a simple to-do app\" --project-id 1 --user-id 1"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Run the decomposition pipeline and print the resulting state as JSON")]
    Decompose {
        #[arg(help = "Free-text project requirement")]
        requirement: String,
        #[arg(long, requires = "user_id", help = "Persist the result into this project")]
        project_id: Option<i64>,
        #[arg(long, requires = "project_id", help = "Caller identity checked against the project owner")]
        user_id: Option<i64>,
        #[arg(long, requires = "project_id", help = "Sprint for tasks no planned sprint claims")]
        sprint_id: Option<i64>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Decompose { requirement, project_id, user_id, sprint_id } => {
            init_stderr_logging();
            commands::decompose::run(DecomposeArgs { requirement, project_id, user_id, sprint_id })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Pipeline events go to stderr so stdout stays a single JSON document.
fn init_stderr_logging() {
    let level = AppConfig::load(LoadOptions::default())
        .map(|config| config.logging.level)
        .unwrap_or_else(|_| "warn".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(filter)
        .compact()
        .try_init();
}
