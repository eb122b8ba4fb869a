//! A scripted [`ModelClient`] for tests, the same role `provider::mock::
//! MockProvider` plays in the teacher: production code that ships in the
//! crate purely so the loop is testable without a real network call.

use super::{message_for_role, ChatRole, ModelClient, ModelError};
use crate::types::{ConversationHistory, Message, StopReason, Usage};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// One scripted turn: either a text reply or an error to return instead.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Text(String),
    Error(MockError),
}

/// A cloneable stand-in for [`ModelError`] (which isn't `Clone`, owing to
/// its free-form string variants being fine to not clone but the enum as a
/// whole needing repeatable scripting in tests).
#[derive(Debug, Clone)]
pub enum MockError {
    ContextLengthExceeded,
    RateLimited,
    Other(String),
}

impl From<MockError> for ModelError {
    fn from(e: MockError) -> Self {
        match e {
            MockError::ContextLengthExceeded => ModelError::ContextLengthExceeded,
            MockError::RateLimited => ModelError::RateLimited {
                retry_after_ms: Some(10),
            },
            MockError::Other(s) => ModelError::Other(s),
        }
    }
}

impl MockResponse {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }
}

pub struct MockModelClient {
    responses: Mutex<VecDeque<MockResponse>>,
    history: Mutex<ConversationHistory>,
}

impl MockModelClient {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn text(response: impl Into<String>) -> Self {
        Self::new(vec![MockResponse::text(response)])
    }

    pub fn texts(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(responses.into_iter().map(MockResponse::text).collect())
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn chat(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        role: ChatRole,
    ) -> Result<String, ModelError> {
        {
            let mut history = self.history.lock().await;
            if let Some(sys) = system_prompt {
                if history.is_empty() {
                    history.push(Message::system(sys));
                }
            }
            history.push(message_for_role(role, prompt));
        }

        let next = self.responses.lock().await.pop_front();
        match next {
            Some(MockResponse::Text(text)) => {
                let mut history = self.history.lock().await;
                history.push(Message::Assistant {
                    content: vec![crate::types::Content::text(text.clone())],
                    stop_reason: StopReason::Stop,
                    usage: Usage::default(),
                    timestamp: crate::types::now_ms(),
                    error_message: None,
                });
                Ok(text)
            }
            Some(MockResponse::Error(err)) => Err(err.into()),
            None => Err(ModelError::Other("mock model client ran out of scripted responses".into())),
        }
    }

    async fn reset_history(&self) {
        self.history.lock().await.clear();
    }

    async fn get_history(&self) -> ConversationHistory {
        self.history.lock().await.clone()
    }

    async fn set_history(&self, history: ConversationHistory) {
        *self.history.lock().await = history;
    }
}
