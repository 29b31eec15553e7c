//! Registry of live task orchestrators, keyed by task id.
//!
//! Membership is the signal that a task currently holds (or may hold) tool
//! connections. The map lock is only held for lookups and inserts; each
//! orchestrator has its own async mutex.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use super::log::TaskLog;
use super::task_orchestrator::TaskOrchestrator;
use crate::executor::AgentExecutor;
use crate::mcp::{Connector, LiveConnections, ToolConnectionManager, ToolDescriptor};
use crate::task::{TaskId, TaskStore};

pub type OrchestratorHandle = Arc<tokio::sync::Mutex<TaskOrchestrator>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No orchestrator for task {0} and no prompt to create one")]
    MissingPrompt(TaskId),
}

/// Everything needed to build an orchestrator for a task.
#[derive(Clone)]
pub struct OrchestratorFactory {
    pub store: Arc<dyn TaskStore>,
    pub executor: Arc<dyn AgentExecutor>,
    pub connector: Arc<dyn Connector>,
    pub descriptors: Arc<Vec<ToolDescriptor>>,
    pub log_dir: Option<PathBuf>,
}

impl OrchestratorFactory {
    pub fn build(&self, task_id: TaskId, prompt: &str) -> TaskOrchestrator {
        TaskOrchestrator::new(
            task_id,
            prompt,
            Arc::clone(&self.store),
            Arc::clone(&self.executor),
            Arc::clone(&self.descriptors),
            ToolConnectionManager::new(Arc::clone(&self.connector)),
            TaskLog::open(task_id, self.log_dir.as_deref()),
        )
    }
}

struct Entry {
    orchestrator: OrchestratorHandle,
    live: LiveConnections,
}

pub struct OrchestratorRegistry {
    factory: OrchestratorFactory,
    entries: Mutex<HashMap<TaskId, Entry>>,
}

impl OrchestratorRegistry {
    pub fn new(factory: OrchestratorFactory) -> Self {
        Self {
            factory,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Tool descriptors every orchestrator is started with.
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.factory.descriptors
    }

    /// Return the live orchestrator for `task_id`, creating one when `prompt` is given.
    pub fn get_or_create(
        &self,
        task_id: TaskId,
        prompt: Option<&str>,
    ) -> Result<OrchestratorHandle, RegistryError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get(&task_id) {
            return Ok(Arc::clone(&entry.orchestrator));
        }

        let prompt = prompt.ok_or(RegistryError::MissingPrompt(task_id))?;
        let orchestrator = self.factory.build(task_id, prompt);
        let live = orchestrator.live_connections();
        let handle = Arc::new(tokio::sync::Mutex::new(orchestrator));
        entries.insert(
            task_id,
            Entry {
                orchestrator: Arc::clone(&handle),
                live,
            },
        );
        tracing::debug!(task_id = %task_id, "Orchestrator created");
        Ok(handle)
    }

    /// Drop the registry's reference. No-op for unknown ids.
    pub fn remove(&self, task_id: TaskId) {
        let removed = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task_id);
        if removed.is_some() {
            tracing::debug!(task_id = %task_id, "Orchestrator removed");
        }
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_task_ids(&self) -> Vec<TaskId> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Ids of tool servers with a connected session in any live orchestrator.
    pub fn connected_tool_ids(&self) -> BTreeSet<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .values()
            .flat_map(|entry| {
                entry
                    .live
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .filter(|connection| connection.is_connected())
                    .map(|connection| connection.id().to_string())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Remove and return every orchestrator (used on shutdown).
    pub fn drain(&self) -> Vec<(TaskId, OrchestratorHandle)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(id, entry)| (id, entry.orchestrator))
            .collect()
    }
}
