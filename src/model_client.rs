//! The out-of-scope model-provider seam (spec.md §1, §6): the core only
//! needs a stateful conversation holder with a `chat` entry point, never a
//! concrete HTTP client. Grounded on `provider/traits.rs`'s `StreamProvider`
//! shape, trimmed of the streaming/SSE machinery this crate doesn't need.

use crate::types::{ConversationHistory, Message};
use async_trait::async_trait;

pub mod mock;

/// The role a turn is injected under. `Tool` is distinct from `User` at the
/// type level for the same reason [`crate::types::Message`] splits them:
/// a provider adapter that collapses `tool` into `user` must do so
/// explicitly in its own `chat` implementation, never by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Tool,
    System,
}

/// A stateful conversation holder. Each agent owns exactly one instance;
/// parents and children never share one (spec.md §5) — sharing would
/// cross-contaminate chat history between parallel agents.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send one turn and return the model's raw text response.
    async fn chat(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        role: ChatRole,
    ) -> Result<String, ModelError>;

    async fn reset_history(&self);
    async fn get_history(&self) -> ConversationHistory;
    async fn set_history(&self, history: ConversationHistory);
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model API error: {0}")]
    Api(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("rate limited{}", .retry_after_ms.map(|ms| format!(", retry after {ms}ms")).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("context length exceeded")]
    ContextLengthExceeded,
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network(_))
    }

    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(std::time::Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// True for a typed [`Self::ContextLengthExceeded`], or — per spec.md
    /// §9's explicit fallback guidance — for any other variant whose
    /// message happens to mention "context length", for clients that can't
    /// distinguish the condition.
    pub fn looks_like_context_overflow(&self) -> bool {
        if matches!(self, Self::ContextLengthExceeded) {
            return true;
        }
        self.to_string().to_lowercase().contains("context length")
    }
}

/// Build the [`Message`] that would represent this turn in history, given
/// its role and text. Used by client implementations so their `chat`
/// bodies stay symmetric with how [`crate::types::Message`] models roles.
pub fn message_for_role(role: ChatRole, text: impl Into<String>) -> Message {
    match role {
        ChatRole::User => Message::user(text),
        ChatRole::System => Message::system(text),
        ChatRole::Tool => Message::tool_observation("", "", text, false),
    }
}
