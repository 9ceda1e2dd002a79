//! Decomposition pipeline - LLM-driven breakdown of a requirement into work
//!
//! This crate turns a free-text project requirement into epics, tasks and
//! sprints by calling an LLM provider three times in sequence:
//! 1. **Epic extraction** (`stages`) - requirement → `Vec<Epic>`
//! 2. **Task decomposition** - epics → `Vec<TaskDraft>`
//! 3. **Sprint planning** - tasks → `Vec<SprintPlan>` (0-based task indices)
//!
//! # Key Types
//!
//! - `DecompositionPipeline` - sequencer that threads one `WorkflowState`
//!   through the stages (see `pipeline` module)
//! - `LlmClient` - pluggable provider trait for OpenAI, Anthropic and Ollama
//! - `ScriptedLlmClient` - deterministic provider for tests and dry runs
//!
//! # Failure Principle
//!
//! A run never aborts. Provider errors, timeouts and unparseable output are
//! recorded in `WorkflowState::error` and the stage's field is left empty.
//! Persisting the result is the caller's job (`taskforge-db`).

pub mod extract;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod stages;

pub use extract::{extract_structured, MalformedOutputError};
pub use llm::{build_client, LlmClient, LlmError, ScriptedLlmClient};
pub use pipeline::{DecompositionPipeline, PipelineError};
pub use prompts::{PromptBuilder, PromptError};
pub use stages::{Stage, StageError, StageOutput};
