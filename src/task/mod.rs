//! Task module - task records, lifecycle status and their store.

mod record;
pub mod store;

pub use record::{TaskError, TaskId, TaskRecord, TaskStatus};
pub use store::{InMemoryTaskStore, TaskStore};
