//! Hierarchical multi-agent orchestration core: an agent loop that
//! dispatches parsed [`Action`]s, a message bus for inter-agent mailboxes,
//! a token-budget-driven compaction engine, and the orchestrator that
//! owns every agent's lifecycle task.

pub mod action;
pub mod agent_loop;
pub mod compaction;
pub mod config;
pub mod message_bus;
pub mod model_client;
pub mod orchestrator;
pub mod parser;
pub mod retry;
pub mod token_counter;
pub mod tools;
pub mod types;

pub use action::{Action, AgentResponse, LaunchSpec};
pub use agent_loop::{AgentLoop, AgentLoopConfig, AgentRunSpec, AgentState, AgentStatus, Callbacks, SubagentTemplate};
pub use compaction::CompactionConfig;
pub use config::RuntimeConfig;
pub use message_bus::{AgentMessage, MessageBus, MessageKind};
pub use model_client::{ChatRole, ModelClient, ModelError};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use parser::ParseError;
pub use retry::RetryConfig;
pub use token_counter::{CounterStrategy, TokenCounter};
pub use types::*;
