//! In-memory task store (non-persistent).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use super::TaskStore;
use crate::task::record::{TaskError, TaskId, TaskRecord, TaskStatus};

/// Records live behind their own mutex; the map lock is only held for lookups.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<TaskId, Arc<Mutex<TaskRecord>>>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, id: TaskId) -> Option<Arc<Mutex<TaskRecord>>> {
        self.tasks.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, prompt: &str) -> TaskId {
        let record = TaskRecord::new(prompt);
        let id = record.id;
        self.tasks
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(record)));
        id
    }

    async fn get(&self, id: TaskId) -> Option<TaskRecord> {
        let entry = self.entry(id).await?;
        let record = entry.lock().await.clone();
        Some(record)
    }

    async fn set_plan(&self, id: TaskId, plan: &str) -> Result<(), TaskError> {
        let entry = self.entry(id).await.ok_or(TaskError::NotFound(id))?;
        let mut record = entry.lock().await;
        if record.status != TaskStatus::Pending || record.plan.is_some() {
            return Err(TaskError::InvalidTransition {
                id,
                from: record.status,
                to: TaskStatus::AwaitingApproval,
            });
        }
        record.plan = Some(plan.to_string());
        record.status = TaskStatus::AwaitingApproval;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn approve(&self, id: TaskId) -> bool {
        let Some(entry) = self.entry(id).await else {
            return false;
        };
        let mut record = entry.lock().await;
        if record.status != TaskStatus::AwaitingApproval {
            return false;
        }
        record.status = TaskStatus::Pending;
        record.updated_at = Utc::now();
        true
    }

    async fn set_result(&self, id: TaskId, status: TaskStatus, result: &str) -> Result<(), TaskError> {
        let entry = self.entry(id).await.ok_or(TaskError::NotFound(id))?;
        let mut record = entry.lock().await;
        if !status.is_terminal() || record.status.is_terminal() {
            return Err(TaskError::InvalidTransition {
                id,
                from: record.status,
                to: status,
            });
        }
        record.status = status;
        record.result = Some(result.to_string());
        record.updated_at = Utc::now();
        Ok(())
    }
}
