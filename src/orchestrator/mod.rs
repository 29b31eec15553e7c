//! Task orchestration: the per-task state machine and the registry of live orchestrators.

mod log;
mod registry;
mod task_orchestrator;

pub use log::TaskLog;
pub use registry::{OrchestratorFactory, OrchestratorHandle, OrchestratorRegistry, RegistryError};
pub use task_orchestrator::{ExecutionOutcome, PlanOutcome, TaskOrchestrator};
