//! Agent executor: the reasoning capability that turns a prompt into a plan and
//! runs single plan steps against the live tool connections.

mod llm_agent;
mod plan;

pub use llm_agent::OpenRouterExecutor;
pub use plan::parse_plan_steps;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::mcp::ToolConnection;

/// Errors from planning or step execution. The message becomes the task result.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),

    #[error("Step index {index} out of range for a plan with {total} step(s)")]
    StepOutOfRange { index: usize, total: usize },

    #[error("LLM request failed: {0}")]
    Llm(#[from] crate::llm::LlmError),

    #[error("No final answer after {0} tool-call round(s)")]
    IterationLimit(usize),
}

/// Inputs for executing one step of an approved plan.
#[derive(Debug, Clone, Copy)]
pub struct StepRequest<'a> {
    /// Original user request
    pub prompt: &'a str,
    /// Full plan text as approved
    pub plan: &'a str,
    /// Zero-based index into `parse_plan_steps(plan)`
    pub step_index: usize,
    /// Result of the previous step; `None` for the first step
    pub previous_result: Option<&'a str>,
}

#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Produce a plan for `prompt` using the given tools.
    async fn create_plan(
        &self,
        prompt: &str,
        tools: &[Arc<ToolConnection>],
    ) -> Result<String, ExecutionError>;

    /// Execute one plan step and return its result.
    async fn execute_step(
        &self,
        request: StepRequest<'_>,
        tools: &[Arc<ToolConnection>],
    ) -> Result<String, ExecutionError>;
}
