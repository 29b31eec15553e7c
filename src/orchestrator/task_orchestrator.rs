//! Per-task orchestrator: plan, wait for approval, execute.
//!
//! The orchestrator owns the task's tool connections. Errors never escape it:
//! every failure becomes a task status, and every outcome that ends the task's
//! life (completed, failed, abandoned, interrupted) tears the connections down.

use std::sync::Arc;

use crate::executor::{parse_plan_steps, AgentExecutor, StepRequest};
use crate::mcp::{LiveConnections, ToolConnection, ToolConnectionManager, ToolDescriptor};
use crate::task::{TaskId, TaskStatus, TaskStore};

use super::log::TaskLog;

/// Result of the planning phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    /// Plan stored; connections stay live until execution
    AwaitingApproval,
    /// Planning failed; connections are closed
    Failed,
}

/// Result of the execution phase. Connections are closed in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Failed,
    /// No approved plan to run; the task status is left untouched
    Abandoned,
}

pub struct TaskOrchestrator {
    task_id: TaskId,
    prompt: String,
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn AgentExecutor>,
    descriptors: Arc<Vec<ToolDescriptor>>,
    tools: ToolConnectionManager,
    log: TaskLog,
}

impl TaskOrchestrator {
    pub fn new(
        task_id: TaskId,
        prompt: impl Into<String>,
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn AgentExecutor>,
        descriptors: Arc<Vec<ToolDescriptor>>,
        tools: ToolConnectionManager,
        log: TaskLog,
    ) -> Self {
        Self {
            task_id,
            prompt: prompt.into(),
            store,
            executor,
            descriptors,
            tools,
            log,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Connections started for this task, readable while the orchestrator is busy.
    pub fn live_connections(&self) -> LiveConnections {
        self.tools.live_handle()
    }

    pub fn has_live_connections(&self) -> bool {
        self.tools.is_initialized()
    }

    /// Start tools, ask the executor for a plan and store it.
    pub async fn create_plan(&mut self) -> PlanOutcome {
        self.log.info("Planning started");
        let tools = self.ensure_tools().await;

        let plan = match self.executor.create_plan(&self.prompt, &tools).await {
            Ok(plan) => plan,
            Err(e) => {
                let message = e.to_string();
                self.log.error(format!("Planning failed: {}", message));
                self.finish(TaskStatus::Failed, &message).await;
                self.release().await;
                return PlanOutcome::Failed;
            }
        };

        match self.store.set_plan(self.task_id, &plan).await {
            Ok(()) => {
                self.log.info(format!(
                    "Plan ready with {} step(s), awaiting approval",
                    parse_plan_steps(&plan).len()
                ));
                PlanOutcome::AwaitingApproval
            }
            Err(e) => {
                self.log.error(format!("Could not store plan: {}", e));
                self.release().await;
                PlanOutcome::Failed
            }
        }
    }

    /// Run every step of the approved plan in order.
    pub async fn execute_plan(&mut self) -> ExecutionOutcome {
        let record = self.store.get(self.task_id).await;
        let plan = match record {
            Some(record) if record.is_approved() => record.plan.unwrap_or_default(),
            Some(record) if record.plan.is_none() => {
                self.log.warn("No plan found, abandoning execution");
                self.release().await;
                return ExecutionOutcome::Abandoned;
            }
            Some(record) => {
                self.log.warn(format!(
                    "Task is {} and not approved for execution, abandoning",
                    record.status
                ));
                self.release().await;
                return ExecutionOutcome::Abandoned;
            }
            None => {
                self.log.warn("Task record not found, abandoning execution");
                self.release().await;
                return ExecutionOutcome::Abandoned;
            }
        };

        let steps = parse_plan_steps(&plan);
        self.log.info(format!("Executing plan with {} step(s)", steps.len()));
        let tools = self.ensure_tools().await;

        let mut previous: Option<String> = None;
        for (index, step) in steps.iter().enumerate() {
            self.log.info(format!("Step {}/{}: {}", index + 1, steps.len(), step));
            let request = StepRequest {
                prompt: &self.prompt,
                plan: &plan,
                step_index: index,
                previous_result: previous.as_deref(),
            };
            match self.executor.execute_step(request, &tools).await {
                Ok(result) => previous = Some(result),
                Err(e) => {
                    let message = e.to_string();
                    self.log.error(format!("Step {} failed: {}", index + 1, message));
                    self.finish(TaskStatus::Failed, &message).await;
                    self.release().await;
                    return ExecutionOutcome::Failed;
                }
            }
        }

        let result = previous.unwrap_or_default();
        self.log.info("Plan execution finished");
        self.finish(TaskStatus::Completed, &result).await;
        self.release().await;
        ExecutionOutcome::Completed
    }

    /// Mark the task failed with `reason` (unless already finished) and tear down.
    pub async fn interrupt(&mut self, reason: &str) {
        self.log.warn(format!("Interrupted: {}", reason));
        self.finish(TaskStatus::Failed, reason).await;
        self.release().await;
    }

    /// Close tool connections and the task log.
    pub async fn release(&mut self) {
        self.tools.shutdown_all().await;
        self.log.close();
    }

    /// Start the enabled tool servers unless this orchestrator already has.
    pub(crate) async fn ensure_tools(&mut self) -> Vec<Arc<ToolConnection>> {
        if self.tools.is_initialized() {
            return self.tools.active();
        }
        let descriptors = Arc::clone(&self.descriptors);
        let tools = self.tools.start_all(&descriptors).await;
        self.log.info(format!("{} tool server(s) available", tools.len()));
        tools
    }

    async fn finish(&mut self, status: TaskStatus, result: &str) {
        if let Err(e) = self.store.set_result(self.task_id, status, result).await {
            self.log.warn(format!("Could not record {} result: {}", status, e));
        }
    }
}
