//! Token estimation for conversation history. Two strategies share one
//! trait so the agent loop and compaction engine don't care which is
//! active; selection is a string (`"simple" | "precise" | "auto"`), the
//! same free-function-per-strategy shape the teacher uses for context
//! estimation.

use crate::types::Message;

/// Per-message overhead added on top of raw content length, mirroring
/// OpenAI-style chat accounting.
const MESSAGE_OVERHEAD_TOKENS: i64 = 4;
const REPLY_PRIMER_TOKENS: i64 = 2;

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> i64;
    fn count_messages(&self, messages: &[Message]) -> i64;
}

/// `count(text) = max(0, floor(len(text) / 4))`. Messages add per-turn
/// overhead of 4 tokens plus the length of the role string.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleCounter;

impl SimpleCounter {
    fn estimate(text: &str) -> i64 {
        (text.chars().count() as i64 / 4).max(0)
    }
}

impl TokenCounter for SimpleCounter {
    fn count(&self, text: &str) -> i64 {
        Self::estimate(text)
    }

    fn count_messages(&self, messages: &[Message]) -> i64 {
        messages
            .iter()
            .map(|m| {
                Self::estimate(m.role()) + Self::estimate(&m.text()) + MESSAGE_OVERHEAD_TOKENS
            })
            .sum()
    }
}

/// BPE-based counter. Falls back silently to [`SimpleCounter`] if the
/// requested model's encoding cannot be constructed.
pub struct PreciseCounter {
    model: String,
    fallback: SimpleCounter,
}

impl PreciseCounter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            fallback: SimpleCounter,
        }
    }

    fn bpe(&self) -> Option<tiktoken_rs::CoreBPE> {
        tiktoken_rs::get_bpe_from_model(&self.model).ok()
    }
}

impl TokenCounter for PreciseCounter {
    fn count(&self, text: &str) -> i64 {
        match self.bpe() {
            Some(bpe) => bpe.encode_ordinary(text).len() as i64,
            None => self.fallback.count(text),
        }
    }

    fn count_messages(&self, messages: &[Message]) -> i64 {
        let Some(bpe) = self.bpe() else {
            return self.fallback.count_messages(messages);
        };
        let per_message: i64 = messages
            .iter()
            .map(|m| {
                let role_tokens = bpe.encode_ordinary(m.role()).len() as i64;
                let content_tokens = bpe.encode_ordinary(&m.text()).len() as i64;
                role_tokens + content_tokens + MESSAGE_OVERHEAD_TOKENS
            })
            .sum();
        per_message + REPLY_PRIMER_TOKENS
    }
}

/// Strategy selector matching spec's `"simple" | "precise" | "auto"`
/// config knob.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterStrategy {
    Simple,
    Precise,
    Auto,
}

impl Default for CounterStrategy {
    fn default() -> Self {
        Self::Auto
    }
}

/// Build a boxed counter from a strategy + model name. `auto` prefers
/// precise and falls back to simple internally (via [`PreciseCounter`]'s own
/// fallback), so the returned counter is always deterministic.
pub fn build_counter(strategy: &CounterStrategy, model: &str) -> Box<dyn TokenCounter> {
    match strategy {
        CounterStrategy::Simple => Box::new(SimpleCounter),
        CounterStrategy::Precise | CounterStrategy::Auto => Box::new(PreciseCounter::new(model)),
    }
}
