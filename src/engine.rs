//! Task engine: the entry point the API layer talks to.
//!
//! `submit` and `approve` return immediately; planning and execution run as
//! spawned background work whose handles the engine keeps. `shutdown` cancels
//! that work, marks interrupted tasks failed and closes every remaining tool
//! connection.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::{
    ExecutionOutcome, OrchestratorHandle, OrchestratorRegistry, PlanOutcome,
};
use crate::task::{TaskId, TaskRecord, TaskStore};

/// Result recorded for tasks cut short by process shutdown.
pub const SHUTDOWN_REASON: &str = "interrupted by shutdown";

/// Tool server status for the status view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolStatus {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub enabled: bool,
    /// Some live task holds a connected session with this server
    pub connected: bool,
    pub name: Option<String>,
}

#[derive(Clone)]
pub struct TaskEngine {
    store: Arc<dyn TaskStore>,
    registry: Arc<OrchestratorRegistry>,
    running: Arc<Mutex<Vec<JoinHandle<()>>>>,
    cancel: CancellationToken,
}

impl TaskEngine {
    pub fn new(store: Arc<dyn TaskStore>, registry: Arc<OrchestratorRegistry>) -> Self {
        Self {
            store,
            registry,
            running: Arc::new(Mutex::new(Vec::new())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &OrchestratorRegistry {
        &self.registry
    }

    /// Create a task and start planning it in the background.
    pub async fn submit(&self, prompt: &str) -> TaskId {
        let task_id = self.store.create(prompt).await;
        tracing::info!(task_id = %task_id, "Task submitted");

        if let Err(e) = self.registry.get_or_create(task_id, Some(prompt)) {
            tracing::error!(task_id = %task_id, "Could not create orchestrator: {}", e);
            return task_id;
        }

        let engine = self.clone();
        self.spawn(async move { engine.plan_task(task_id).await });
        task_id
    }

    /// Approve a task awaiting approval and start executing it in the background.
    ///
    /// Returns `false` (and does nothing) unless the task was awaiting approval.
    pub async fn approve(&self, task_id: TaskId) -> bool {
        if !self.store.approve(task_id).await {
            tracing::debug!(task_id = %task_id, "Task not awaiting approval");
            return false;
        }
        tracing::info!(task_id = %task_id, "Task approved");

        let engine = self.clone();
        self.spawn(async move { engine.execute_task(task_id).await });
        true
    }

    pub async fn get_status(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.store.get(task_id).await
    }

    /// Number of tasks holding a live orchestrator.
    pub fn active_tasks(&self) -> usize {
        self.registry.len()
    }

    /// Status of every configured tool server, in registry order.
    pub fn tool_status(&self) -> Vec<ToolStatus> {
        let connected = self.registry.connected_tool_ids();
        self.registry
            .descriptors()
            .iter()
            .map(|descriptor| ToolStatus {
                id: descriptor.id.clone(),
                kind: descriptor.kind.clone(),
                enabled: descriptor.enabled,
                connected: connected.contains(&descriptor.id),
                name: descriptor.name.clone(),
            })
            .collect()
    }

    /// Planning phase for `task_id`. The orchestrator is removed unless the
    /// task is left awaiting approval.
    pub async fn plan_task(&self, task_id: TaskId) {
        let Ok(handle) = self.registry.get_or_create(task_id, None) else {
            tracing::warn!(task_id = %task_id, "No orchestrator to plan with");
            return;
        };
        let mut orchestrator = handle.lock().await;

        let outcome = tokio::select! {
            outcome = orchestrator.create_plan() => Some(outcome),
            _ = self.cancel.cancelled() => None,
        };

        match outcome {
            Some(PlanOutcome::AwaitingApproval) => {}
            Some(PlanOutcome::Failed) => self.registry.remove(task_id),
            None => {
                orchestrator.interrupt(SHUTDOWN_REASON).await;
                self.registry.remove(task_id);
            }
        }
    }

    /// Execution phase for `task_id`. The orchestrator is always removed afterwards.
    pub async fn execute_task(&self, task_id: TaskId) {
        let Some(handle) = self.orchestrator_for(task_id).await else {
            return;
        };
        let mut orchestrator = handle.lock().await;

        let outcome = tokio::select! {
            outcome = orchestrator.execute_plan() => Some(outcome),
            _ = self.cancel.cancelled() => None,
        };

        match outcome {
            Some(ExecutionOutcome::Completed) => {
                tracing::info!(task_id = %task_id, "Task completed")
            }
            Some(ExecutionOutcome::Failed) => tracing::info!(task_id = %task_id, "Task failed"),
            Some(ExecutionOutcome::Abandoned) => {
                tracing::warn!(task_id = %task_id, "Task execution abandoned")
            }
            None => orchestrator.interrupt(SHUTDOWN_REASON).await,
        }
        self.registry.remove(task_id);
    }

    fn spawn<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        running.retain(|h| !h.is_finished());
        running.push(handle);
    }

    /// Existing orchestrator, or a fresh one built from the stored prompt.
    async fn orchestrator_for(&self, task_id: TaskId) -> Option<OrchestratorHandle> {
        let prompt = if self.registry.contains(task_id) {
            None
        } else {
            self.store.get(task_id).await.map(|record| record.prompt)
        };
        match self.registry.get_or_create(task_id, prompt.as_deref()) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(task_id = %task_id, "{}", e);
                None
            }
        }
    }

    /// Stop background work and release every tool connection.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down task engine");
        self.cancel.cancel();
        let handles: Vec<_> = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("Background task ended abnormally: {}", e);
            }
        }

        // Tasks still awaiting approval keep their status; only their tools are closed.
        for (task_id, handle) in self.registry.drain() {
            handle.lock().await.release().await;
            tracing::debug!(task_id = %task_id, "Released tool connections");
        }
        tracing::info!("Task engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::executor::testing::MockExecutor;
    use crate::mcp::testing::FakeConnector;
    use crate::mcp::ToolDescriptor;
    use crate::orchestrator::OrchestratorFactory;
    use crate::task::{InMemoryTaskStore, TaskStatus};

    struct Fixture {
        engine: TaskEngine,
        executor: Arc<MockExecutor>,
        connector: Arc<FakeConnector>,
    }

    fn fixture(executor: MockExecutor) -> Fixture {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let executor = Arc::new(executor);
        let connector = Arc::new(FakeConnector::default());
        let mut disabled = ToolDescriptor::local_process("disabled", "npx", Vec::new());
        disabled.enabled = false;
        let factory = OrchestratorFactory {
            store: Arc::clone(&store),
            executor: executor.clone(),
            connector: connector.clone(),
            descriptors: Arc::new(vec![
                ToolDescriptor::local_process("fs", "npx", Vec::new()),
                disabled,
            ]),
            log_dir: None,
        };
        let registry = Arc::new(OrchestratorRegistry::new(factory));
        Fixture {
            engine: TaskEngine::new(store, registry),
            executor,
            connector,
        }
    }

    async fn wait_for(engine: &TaskEngine, id: TaskId, status: TaskStatus) -> TaskRecord {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(record) = engine.get_status(id).await {
                    if record.status == status {
                        return record;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task did not reach expected status in time")
    }

    #[tokio::test]
    async fn submit_plan_approve_execute() {
        let f = fixture(MockExecutor::with_plan("1. read\n2. fetch"));

        let id = f.engine.submit("fetch the url in the file").await;
        let record = f.engine.get_status(id).await.expect("task exists right after submit");
        assert!(matches!(record.status, TaskStatus::Pending | TaskStatus::AwaitingApproval));

        let record = wait_for(&f.engine, id, TaskStatus::AwaitingApproval).await;
        assert_eq!(record.plan.as_deref(), Some("1. read\n2. fetch"));
        assert!(f.engine.registry().contains(id));
        let status = f.engine.tool_status();
        assert!(status[0].connected);
        assert!(!status[1].connected);

        assert!(f.engine.approve(id).await);
        let record = wait_for(&f.engine, id, TaskStatus::Completed).await;
        assert_eq!(record.result.as_deref(), Some("done"));

        f.engine.shutdown().await;
        assert!(!f.engine.registry().contains(id));
        assert_eq!(f.connector.open_count(), 0);
        assert_eq!(f.executor.recorded_steps().len(), 2);
    }

    #[tokio::test]
    async fn approve_unknown_task_is_rejected() {
        let f = fixture(MockExecutor::with_plan("1. a"));
        let id = TaskId::new();
        assert!(!f.engine.approve(id).await);
        assert!(f.engine.get_status(id).await.is_none());
    }

    #[tokio::test]
    async fn approve_twice_runs_once() {
        let f = fixture(MockExecutor::with_plan("1. a"));
        let id = f.engine.submit("p").await;
        wait_for(&f.engine, id, TaskStatus::AwaitingApproval).await;

        assert!(f.engine.approve(id).await);
        assert!(!f.engine.approve(id).await);
        wait_for(&f.engine, id, TaskStatus::Completed).await;
        f.engine.shutdown().await;
        assert_eq!(f.executor.recorded_steps().len(), 1);
    }

    #[tokio::test]
    async fn planning_failure_removes_orchestrator() {
        let mut executor = MockExecutor::with_plan("");
        executor.fail_plan = Some("no model".to_string());
        let f = fixture(executor);

        let id = f.engine.submit("p").await;
        let record = wait_for(&f.engine, id, TaskStatus::Failed).await;
        assert_eq!(record.result.as_deref(), Some("no model"));

        f.engine.shutdown().await;
        assert!(!f.engine.registry().contains(id));
        assert_eq!(f.connector.open_count(), 0);
    }

    #[tokio::test]
    async fn tasks_have_isolated_connections() {
        let f = fixture(MockExecutor::with_plan("1. a"));
        let a = f.engine.submit("a").await;
        let b = f.engine.submit("b").await;
        wait_for(&f.engine, a, TaskStatus::AwaitingApproval).await;
        wait_for(&f.engine, b, TaskStatus::AwaitingApproval).await;

        assert_eq!(f.engine.active_tasks(), 2);
        assert_eq!(f.connector.open_count(), 2);

        f.engine.approve(a).await;
        wait_for(&f.engine, a, TaskStatus::Completed).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while f.engine.registry().contains(a) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("finished task should leave the registry");
        assert_eq!(f.connector.open_count(), 1);
        assert!(f.engine.tool_status()[0].connected);

        f.engine.shutdown().await;
        assert_eq!(f.connector.open_count(), 0);
        assert_eq!(
            f.engine.get_status(b).await.unwrap().status,
            TaskStatus::AwaitingApproval
        );
    }

    #[tokio::test]
    async fn shutdown_interrupts_running_execution() {
        let mut executor = MockExecutor::with_plan("1. slow\n2. never");
        executor.step_delay = Some(Duration::from_secs(30));
        let f = fixture(executor);

        let id = f.engine.submit("p").await;
        wait_for(&f.engine, id, TaskStatus::AwaitingApproval).await;
        f.engine.approve(id).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.executor.recorded_steps().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("first step should start");

        f.engine.shutdown().await;
        let record = f.engine.get_status(id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.result.as_deref(), Some(SHUTDOWN_REASON));
        assert_eq!(f.executor.recorded_steps().len(), 1);
        assert_eq!(f.connector.open_count(), 0);
        assert_eq!(f.engine.active_tasks(), 0);
    }

    #[tokio::test]
    async fn executing_task_without_plan_tears_down_and_leaves_registry() {
        let f = fixture(MockExecutor::with_plan("1. a"));
        let id = f.engine.store.create("never planned").await;
        let handle = f
            .engine
            .registry()
            .get_or_create(id, Some("never planned"))
            .unwrap();
        handle.lock().await.ensure_tools().await;
        assert_eq!(f.connector.open_count(), 1);

        f.engine.execute_task(id).await;

        assert!(!f.engine.registry().contains(id));
        assert_eq!(f.connector.open_count(), 0);
        let record = f.engine.get_status(id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert!(record.result.is_none());
        assert!(f.executor.recorded_steps().is_empty());
    }
}
