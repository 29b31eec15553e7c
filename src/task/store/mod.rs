//! Task record storage.
//!
//! Only an in-memory backend exists; task state does not survive a restart.

mod memory;

pub use memory::InMemoryTaskStore;

use async_trait::async_trait;

use super::record::{TaskError, TaskId, TaskRecord, TaskStatus};

/// Store of task records. Every transition is atomic per task id.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a `pending` task and return its id.
    async fn create(&self, prompt: &str) -> TaskId;

    /// Snapshot of a task, `None` if unknown.
    async fn get(&self, id: TaskId) -> Option<TaskRecord>;

    /// Record the plan and move the task to `awaiting_approval`.
    ///
    /// # Errors
    /// `NotFound` for unknown ids, `InvalidTransition` unless the task is
    /// `pending` without a plan.
    async fn set_plan(&self, id: TaskId, plan: &str) -> Result<(), TaskError>;

    /// Move an `awaiting_approval` task back to `pending`.
    ///
    /// Returns `false` with no effect for unknown ids or any other status.
    async fn approve(&self, id: TaskId) -> bool;

    /// Record the final outcome.
    ///
    /// # Errors
    /// `NotFound` for unknown ids, `InvalidTransition` if `status` is not
    /// terminal or the task already finished.
    async fn set_result(&self, id: TaskId, status: TaskStatus, result: &str) -> Result<(), TaskError>;
}
