use serde::{Deserialize, Serialize};

/// A single typed decision produced by parsing one model turn. Constructed
/// only by [`crate::parser::parse`] — never assembled by hand from a loose
/// map, so an unknown action tag is rejected at parse time, not dispatch
/// time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Action {
    Tool {
        name: String,
        arguments: serde_json::Value,
        thought: Option<String>,
    },
    LaunchSubagents {
        specs: Vec<LaunchSpec>,
        thought: Option<String>,
    },
    WaitForSubagents {
        thought: Option<String>,
    },
    Wait {
        thought: Option<String>,
    },
    SendMessage {
        to: String,
        content: String,
        thought: Option<String>,
    },
    Finish {
        content: String,
        thought: Option<String>,
    },
}

impl Action {
    pub fn thought(&self) -> Option<&str> {
        match self {
            Self::Tool { thought, .. }
            | Self::LaunchSubagents { thought, .. }
            | Self::WaitForSubagents { thought }
            | Self::Wait { thought }
            | Self::SendMessage { thought, .. }
            | Self::Finish { thought, .. } => thought.as_deref(),
        }
    }

    /// Matches the `Action:` label value this variant was (or would be)
    /// parsed from.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tool { .. } => "tool",
            Self::LaunchSubagents { .. } => "launch_subagents",
            Self::WaitForSubagents { .. } => "wait_for_subagents",
            Self::Wait { .. } => "wait",
            Self::SendMessage { .. } => "send_message",
            Self::Finish { .. } => "finish",
        }
    }

    pub fn finish(content: impl Into<String>) -> Self {
        Self::Finish {
            content: content.into(),
            thought: None,
        }
    }
}

/// One entry of a `LaunchSubagents` action: which subagent template to
/// instantiate, what task to hand it, and optional display/context
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub subagent_name: String,
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// What an agent loop run ultimately produced, returned to whoever invoked
/// it (the orchestrator for a root agent, or the caller of a library
/// entry point in tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    pub content: String,
    pub iterations: u32,
}

impl AgentResponse {
    pub fn ok(content: impl Into<String>, iterations: u32) -> Self {
        Self {
            success: true,
            content: content.into(),
            iterations,
        }
    }

    pub fn failed(content: impl Into<String>, iterations: u32) -> Self {
        Self {
            success: false,
            content: content.into(),
            iterations,
        }
    }
}
