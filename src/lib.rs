//! # Task Composer
//!
//! Human-gated orchestrator for multi-step tasks that use MCP tool servers.
//!
//! ## Task Flow
//! 1. A task is submitted with a prompt and stored as `pending`
//! 2. Its orchestrator starts the enabled tool servers and asks the agent executor for a plan
//! 3. The task waits in `awaiting_approval` until a human approves it
//! 4. The plan's numbered steps run one after another, each seeing the previous result
//! 5. The task ends `completed` or `failed` and its tool servers are shut down
//!
//! ```text
//!   API ──▶ TaskEngine ──▶ OrchestratorRegistry ──▶ TaskOrchestrator ──▶ AgentExecutor
//!               │                                        │
//!               ▼                                        ▼
//!           TaskStore                          ToolConnectionManager ──▶ MCP servers
//! ```
//!
//! ## Modules
//! - `task`: task records and the task store
//! - `mcp`: tool registry, transports and the per-task connection manager
//! - `executor`: agent executor trait, plan parsing and the LLM-backed executor
//! - `orchestrator`: per-task state machine and registry
//! - `engine`: submit / approve / status and background work
//! - `api`: HTTP endpoints

pub mod api;
pub mod config;
pub mod engine;
pub mod executor;
pub mod llm;
pub mod mcp;
pub mod orchestrator;
pub mod task;

pub use config::Config;
