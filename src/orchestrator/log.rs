//! Per-task log sink.
//!
//! Every entry goes through `tracing` with the task id attached and, when a log
//! directory is configured, is appended to `<dir>/<task_id>.log` as
//! `[timestamp] LEVEL message`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;

use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

pub struct TaskLog {
    task_id: TaskId,
    file: Option<File>,
}

impl TaskLog {
    /// Open the sink. File problems are logged and the sink falls back to tracing only.
    pub fn open(task_id: TaskId, dir: Option<&Path>) -> Self {
        let file = dir.and_then(|dir| {
            let opened = std::fs::create_dir_all(dir).and_then(|_| {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(dir.join(format!("{}.log", task_id)))
            });
            match opened {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::warn!(task_id = %task_id, "Could not open task log in {}: {}", dir.display(), e);
                    None
                }
            }
        });
        Self { task_id, file }
    }

    /// A sink that only emits tracing events.
    pub fn tracing_only(task_id: TaskId) -> Self {
        Self { task_id, file: None }
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!(task_id = %self.task_id, "{}", message);
        self.append(Level::Info, message);
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::warn!(task_id = %self.task_id, "{}", message);
        self.append(Level::Warn, message);
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::error!(task_id = %self.task_id, "{}", message);
        self.append(Level::Error, message);
    }

    /// Flush and release the file. Later entries only reach tracing.
    pub fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                tracing::debug!(task_id = %self.task_id, "Flushing task log failed: {}", e);
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Blocking write on the caller's thread. Entries are a single short line
    /// each, so this stays off the async file API.
    fn append(&mut self, level: Level, message: &str) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let written = writeln!(file, "[{}] {} {}", timestamp, level.as_str(), message)
            .and_then(|_| file.flush());
        if let Err(e) = written {
            tracing::warn!(task_id = %self.task_id, "Writing task log failed, disabling: {}", e);
            self.file = None;
        }
    }
}

impl Drop for TaskLog {
    fn drop(&mut self) {
        self.close();
    }
}
