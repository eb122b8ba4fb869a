//! Token-budget-driven history summarization. No teacher equivalent beyond
//! `context.rs`'s truncate-and-drop strategy (which discards messages
//! rather than summarizing them); built as a pure, best-effort function
//! per spec.md §9's explicit instruction: never mutate in place, never
//! throw.

use crate::model_client::{ChatRole, ModelClient, ModelError};
use crate::token_counter::{build_counter, CounterStrategy};
use crate::types::{Content, Message, StopReason, Usage};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CompactionConfig {
    pub enabled: bool,
    /// Fraction of the usable budget that triggers compaction, in (0, 1].
    pub threshold: f64,
    /// Number of most-recent non-system messages never summarized.
    pub protect_recent: usize,
    pub reserved_output_tokens: i64,
    pub context_limits: HashMap<String, i64>,
    pub counter_strategy: CounterStrategy,
    pub max_retries: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.75,
            protect_recent: 2,
            reserved_output_tokens: 4000,
            context_limits: HashMap::new(),
            counter_strategy: CounterStrategy::Auto,
            max_retries: 1,
        }
    }
}

impl CompactionConfig {
    fn usable(&self, model: &str) -> Option<i64> {
        let limit = *self.context_limits.get(model)?;
        let usable = limit - self.reserved_output_tokens;
        if usable <= 0 {
            None
        } else {
            Some(usable)
        }
    }
}

const SUMMARY_SYSTEM_PROMPT: &str = "\
You are compacting an agent's conversation history. Produce a summary that is \
substantially shorter than the input: 20-30% of the original length. Use \
bullets or telegraphic prose, write in first person as continuity of the same \
agent, introduce no new plans, and preserve file paths, identifiers, and \
decisions made so far.";

/// Attempt to shrink `history` under `cfg`'s budget. Returns `Some(new
/// history)` only if it is both produced successfully and strictly
/// shorter (by token count) than the original; otherwise returns `None`
/// and the caller's history is left untouched. Never panics, never
/// returns an `Err` — compaction failure is logged and swallowed.
pub async fn compact(
    history: &[Message],
    cfg: &CompactionConfig,
    model: &str,
    client: &dyn ModelClient,
) -> Option<Vec<Message>> {
    if !cfg.enabled {
        return None;
    }
    let usable = cfg.usable(model)?;
    let counter = build_counter(&cfg.counter_strategy, model);
    let old_count = counter.count_messages(history);
    if (old_count as f64) <= usable as f64 * cfg.threshold {
        return None;
    }

    let systems: Vec<Message> = history
        .iter()
        .filter(|m| matches!(m, Message::System { .. }))
        .cloned()
        .collect();
    let non_system: Vec<&Message> = history
        .iter()
        .filter(|m| !matches!(m, Message::System { .. }))
        .collect();
    if non_system.len() <= cfg.protect_recent {
        return None;
    }
    let split_at = non_system.len() - cfg.protect_recent;
    let summarizable: Vec<Message> = non_system[..split_at].iter().map(|m| (*m).clone()).collect();
    let protected: Vec<Message> = non_system[split_at..].iter().map(|m| (*m).clone()).collect();
    if summarizable.is_empty() {
        return None;
    }

    let original_tokens = counter.count_messages(&summarizable);
    let target_words = (original_tokens as f64 * 0.3).floor().max(50.0) as u64;
    let transcript = summarizable
        .iter()
        .map(|m| format!("[{}] {}", m.role(), m.text()))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "Summarize the following conversation in roughly {target_words} words:\n\n{transcript}"
    );

    let saved_history = client.get_history().await;
    let mut attempt = 0u32;
    let result = loop {
        client.set_history(vec![]).await;
        let summary = client
            .chat(&prompt, Some(SUMMARY_SYSTEM_PROMPT), ChatRole::System)
            .await;

        let summary = match summary {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(error = %err, attempt, "compaction model call failed");
                if attempt >= cfg.max_retries {
                    break None;
                }
                attempt += 1;
                tokio::time::sleep(backoff_delay(attempt)).await;
                continue;
            }
        };

        let summary_message = Message::Assistant {
            content: vec![Content::text(format!("[CONTEXT SUMMARY]\n{summary}"))],
            stop_reason: StopReason::Stop,
            usage: Usage::default(),
            timestamp: crate::types::now_ms(),
            error_message: None,
        };

        let mut new_history = systems.clone();
        new_history.push(summary_message);
        new_history.extend(protected.clone());

        let new_count = counter.count_messages(&new_history);
        if new_count < old_count {
            break Some(new_history);
        }

        tracing::warn!(
            old_count,
            new_count,
            attempt,
            "compaction summary did not shrink history, retrying"
        );
        if attempt >= cfg.max_retries {
            break None;
        }
        attempt += 1;
        tokio::time::sleep(backoff_delay(attempt)).await;
    };

    client.set_history(saved_history).await;
    if result.is_none() {
        tracing::warn!("compaction abandoned after exhausting retries; history left intact");
    }
    result
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(attempt as u64)
}

/// Detect a model error that suggests the context window overflowed and,
/// if so, whether an emergency single compaction should be attempted
/// before the failing turn is retried once (spec.md §4.3 integration
/// rule).
pub fn should_emergency_compact(err: &ModelError) -> bool {
    err.looks_like_context_overflow()
}
