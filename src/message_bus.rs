//! Per-agent inbound mailboxes. No teacher equivalent exists (the teacher
//! never models more than one agent talking to another); built around
//! `tokio::sync::Notify` plus a plain locked deque rather than an `mpsc`
//! channel, because `wait_for_any` needs to peek-and-filter without losing
//! non-matching messages, which a channel's `recv()` can't do without a
//! requeue dance.

use crate::types::now_ms;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Peer,
    ChildCompleted,
    ChildFailed,
    Resume,
}

/// The inter-agent envelope. Distinct from [`crate::types::Message`] (the
/// LLM conversation turn) on purpose: the spec uses "AgentMessage" for both
/// concepts, but they serve different layers and should not share a type.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AgentMessage {
    pub from: String,
    pub to: String,
    pub kind: MessageKind,
    pub payload: String,
    pub timestamp: u64,
}

impl AgentMessage {
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: MessageKind, payload: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            payload: payload.into(),
            timestamp: now_ms(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox for '{0}' not found")]
    NotFound(String),
    #[error("mailbox for '{0}' is full (capacity {1}); send timed out")]
    Full(String, usize),
    #[error("mailbox for '{0}' is closed")]
    Closed(String),
}

struct MailboxState {
    queue: VecDeque<AgentMessage>,
    closed: bool,
}

/// A single agent's bounded FIFO of inbound messages.
pub struct Mailbox {
    capacity: usize,
    state: Mutex<MailboxState>,
    notify: Notify,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(MailboxState {
                queue: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue `msg`, blocking the caller up to `timeout` if the mailbox is
    /// at capacity. Wakes any task suspended in `wait_for_any`.
    pub async fn deliver(
        &self,
        agent_id: &str,
        msg: AgentMessage,
        timeout: Duration,
    ) -> Result<(), MailboxError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut pending = Some(msg);
        loop {
            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(MailboxError::Closed(agent_id.to_string()));
                }
                if state.queue.len() < self.capacity {
                    state.queue.push_back(pending.take().expect("message consumed once"));
                    self.notify.notify_waiters();
                    return Ok(());
                }
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(MailboxError::Full(agent_id.to_string(), self.capacity));
            }
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }

    /// Remove and return every message currently buffered, in arrival
    /// order. Never blocks.
    pub async fn drain(&self) -> Vec<AgentMessage> {
        let mut state = self.state.lock().await;
        let drained: Vec<_> = state.queue.drain(..).collect();
        if !drained.is_empty() {
            self.notify.notify_waiters();
        }
        drained
    }

    /// Suspend until a message satisfying `predicate` arrives, then remove
    /// and return it. A `None` predicate matches any message.
    pub async fn wait_for_any(
        &self,
        predicate: Option<&(dyn Fn(&AgentMessage) -> bool + Send + Sync)>,
    ) -> AgentMessage {
        loop {
            let notified = {
                let mut state = self.state.lock().await;
                let idx = state
                    .queue
                    .iter()
                    .position(|m| predicate.map(|p| p(m)).unwrap_or(true));
                if let Some(idx) = idx {
                    let msg = state.queue.remove(idx).expect("index from position()");
                    self.notify.notify_waiters();
                    return msg;
                }
                self.notify.notified()
            };
            notified.await;
        }
    }

    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        self.notify.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }
}

/// Owns every agent's mailbox. Exclusively mutated through `deliver` (by
/// the sender's side) and `drain`/`wait_for_any` (by the owning agent) —
/// concurrent access is made safe by each mailbox's own lock, matching
/// spec.md §5's "per-mailbox lock" requirement.
pub struct MessageBus {
    capacity: usize,
    send_timeout: Duration,
    mailboxes: Mutex<HashMap<String, Arc<Mailbox>>>,
}

impl MessageBus {
    pub fn new(capacity: usize, send_timeout: Duration) -> Self {
        Self {
            capacity,
            send_timeout,
            mailboxes: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, agent_id: &str) {
        let mut mailboxes = self.mailboxes.lock().await;
        mailboxes
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mailbox::new(self.capacity)));
    }

    async fn get(&self, agent_id: &str) -> Result<Arc<Mailbox>, MailboxError> {
        self.mailboxes
            .lock()
            .await
            .get(agent_id)
            .cloned()
            .ok_or_else(|| MailboxError::NotFound(agent_id.to_string()))
    }

    pub async fn deliver(&self, to: &str, msg: AgentMessage) -> Result<(), MailboxError> {
        let mailbox = self.get(to).await?;
        mailbox.deliver(to, msg, self.send_timeout).await
    }

    pub async fn drain(&self, agent_id: &str) -> Result<Vec<AgentMessage>, MailboxError> {
        Ok(self.get(agent_id).await?.drain().await)
    }

    pub async fn wait_for_any(&self, agent_id: &str) -> Result<AgentMessage, MailboxError> {
        Ok(self.get(agent_id).await?.wait_for_any(None).await)
    }

    pub async fn close(&self, agent_id: &str) {
        if let Ok(mailbox) = self.get(agent_id).await {
            mailbox.close().await;
        }
    }
}

/// Render a batch of drained messages into one textual observation,
/// preserving arrival order, for the loop's resume-correctness contract.
pub fn format_observation(messages: &[AgentMessage]) -> String {
    messages
        .iter()
        .map(|m| match m.kind {
            MessageKind::ChildCompleted => format!("[child {} completed] {}", m.from, m.payload),
            MessageKind::ChildFailed => format!("[child {} failed] {}", m.from, m.payload),
            MessageKind::Peer => format!("[message from {}] {}", m.from, m.payload),
            MessageKind::Resume => format!("[resume] {}", m.payload),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
