use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Content types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Content {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(rename = "thinking")]
    Thinking {
        thinking: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Best-effort plain-text rendering, used by the token counter and by
    /// compaction to fold structured content back into a single string.
    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
            Self::Thinking { thinking, .. } => thinking,
            Self::Image { .. } => "",
        }
    }
}

// ---------------------------------------------------------------------------
// Messages — one role, one variant. The `tool` role can never be mistaken
// for `user` input because they are distinct enum variants, not a shared
// struct with a string tag.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "system")]
    System { content: String, timestamp: u64 },
    #[serde(rename = "user")]
    User {
        content: Vec<Content>,
        timestamp: u64,
    },
    #[serde(rename = "assistant")]
    Assistant {
        content: Vec<Content>,
        #[serde(rename = "stopReason")]
        stop_reason: StopReason,
        usage: Usage,
        timestamp: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    /// A tool observation fed back into the conversation. This is its own
    /// variant, not a flag on `User`, so nothing downstream can confuse a
    /// tool result for user-authored text.
    #[serde(rename = "tool")]
    Tool {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        content: Vec<Content>,
        #[serde(rename = "isError")]
        is_error: bool,
        timestamp: u64,
    },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            content: text.into(),
            timestamp: now_ms(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: vec![Content::text(text)],
            timestamp: now_ms(),
        }
    }

    pub fn tool_observation(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        text: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::Tool {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            content: vec![Content::text(text)],
            is_error,
            timestamp: now_ms(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Tool { .. } => "tool",
        }
    }

    /// Concatenated plain-text view of this message's content, used by the
    /// token counter and by compaction summaries.
    pub fn text(&self) -> String {
        match self {
            Self::System { content, .. } => content.clone(),
            Self::User { content, .. } | Self::Assistant { content, .. } => content
                .iter()
                .map(Content::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Tool { content, .. } => content
                .iter()
                .map(Content::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Self::System { timestamp, .. }
            | Self::User { timestamp, .. }
            | Self::Assistant { timestamp, .. }
            | Self::Tool { timestamp, .. } => *timestamp,
        }
    }
}

/// The conversation an agent holds with the model: system prompt plus the
/// alternating user/assistant/tool turns that follow it.
pub type ConversationHistory = Vec<Message>;

// ---------------------------------------------------------------------------
// Stop reasons & usage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Stop,
    Length,
    ToolUse,
    Error,
    Aborted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Length => write!(f, "length"),
            Self::ToolUse => write!(f, "toolUse"),
            Self::Error => write!(f, "error"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    #[serde(default)]
    pub cache_read: u64,
    #[serde(default)]
    pub cache_write: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input + self.output
    }

    /// Fraction of input tokens served from cache (0.0-1.0). 0.0 if no
    /// input tokens were processed yet.
    pub fn cache_hit_rate(&self) -> f64 {
        let total_input = self.input + self.cache_read + self.cache_write;
        if total_input == 0 {
            return 0.0;
        }
        self.cache_read as f64 / total_input as f64
    }
}

// ---------------------------------------------------------------------------
// Tool definition
// ---------------------------------------------------------------------------

/// Per-call context threaded into every tool invocation: who's calling,
/// what they're allowed to do, and how to cancel them.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub message_id: String,
    pub call_id: String,
    pub cancel: tokio_util::sync::CancellationToken,
    pub permissions: std::sync::Arc<dyn PermissionHandler>,
    pub working_dir: std::path::PathBuf,
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("message_id", &self.message_id)
            .field("call_id", &self.call_id)
            .field("working_dir", &self.working_dir)
            .finish()
    }
}

/// A tool the agent loop can dispatch an `Action::Tool` to.
#[async_trait::async_trait]
pub trait AgentTool: Send + Sync {
    /// Unique tool name, matched against `Action::Tool::name`.
    fn name(&self) -> &str;
    /// Description surfaced to the model (tool catalog / system prompt).
    fn description(&self) -> &str;
    /// JSON Schema for the tool's arguments.
    fn parameters_schema(&self) -> serde_json::Value;
    /// Execute the tool against the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolResult, ToolError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolResult {
    pub title: String,
    pub output: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub attachments: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(title: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            output: output.into(),
            metadata: serde_json::Value::Null,
            attachments: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub reason: Option<String>,
}

/// Decides whether a tool call is allowed to execute. The default
/// `AlwaysAllow` matches spec.md's "no core-imposed policy" stance: the core
/// ships a seam, not an opinion.
#[async_trait::async_trait]
pub trait PermissionHandler: Send + Sync {
    async fn ask(&self, request: &PermissionRequest) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAllow;

#[async_trait::async_trait]
impl PermissionHandler for AlwaysAllow {
    async fn ask(&self, _request: &PermissionRequest) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
