//! The process-wide registry owning every agent's lifecycle task and
//! mailbox. No teacher equivalent (the teacher has no multi-agent
//! registry); grounded on the broader pack's sub-agent executors
//! (`krusty`'s subagent-execution.rs, `astrid`'s subagent_executor.rs) for
//! the "registry of spawned tasks + progress channel" shape, combined with
//! the teacher's `Arc<Mutex<...>>`-guarded shared-state style from
//! `agent.rs`'s steering/follow-up queues.

use crate::action::AgentResponse;
use crate::agent_loop::AgentStatus;
use crate::message_bus::{AgentMessage, MailboxError, MessageBus, MessageKind};
use crate::types::now_ms;
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("agent '{0}' is already launched")]
    AlreadyLaunched(String),
    #[error("cannot send to terminal agent: {0}")]
    Terminal(String),
    #[error(transparent)]
    Mailbox(#[from] MailboxError),
}

/// What the orchestrator knows about one agent.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub status: AgentStatus,
    pub result: Option<AgentResponse>,
    pub task: Option<String>,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
}

/// Read-only snapshot of one child launched via `Action::LaunchSubagents`,
/// returned by [`Orchestrator::launched_subagents`] — the parent never
/// builds or owns this itself, it only holds the id and asks the
/// orchestrator for the rest (spec.md §3's "Ownership" invariant).
#[derive(Debug, Clone)]
pub struct LaunchedSubagent {
    pub id: String,
    pub display_name: String,
    pub subagent_name: String,
    pub task: String,
    pub parent_id: String,
    pub started_at: u64,
    pub completed_at: Option<u64>,
    pub result_summary: Option<String>,
    pub status: AgentStatus,
}

struct Registry {
    agents: HashMap<String, AgentRecord>,
    tasks: HashMap<String, JoinHandle<()>>,
    cancel_tokens: HashMap<String, CancellationToken>,
    /// Every child ever registered under a parent, kept for the lifetime of
    /// the parent so `launched_subagents` can report on completed children
    /// too, not just ones still pending.
    children: HashMap<String, HashSet<String>>,
    name_seq: HashMap<String, u64>,
}

pub struct Orchestrator {
    registry: Mutex<Registry>,
    bus: MessageBus,
    shutdown_grace: Duration,
}

impl Orchestrator {
    pub fn new(mailbox_capacity: usize, mailbox_send_timeout: Duration, shutdown_grace: Duration) -> Self {
        Self {
            registry: Mutex::new(Registry {
                agents: HashMap::new(),
                tasks: HashMap::new(),
                cancel_tokens: HashMap::new(),
                children: HashMap::new(),
                name_seq: HashMap::new(),
            }),
            bus: MessageBus::new(mailbox_capacity, mailbox_send_timeout),
            shutdown_grace,
        }
    }

    /// Construct from the shared config aggregate instead of spelling out
    /// its three fields by hand.
    pub fn from_runtime(runtime: &crate::config::RuntimeConfig) -> Self {
        Self::new(runtime.mailbox.capacity, runtime.mailbox.send_timeout, runtime.shutdown.grace)
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    /// Allocate an id, create an empty mailbox, register bookkeeping.
    /// Does NOT start execution — call `launch` for that.
    pub async fn register(&self, name: &str, parent_id: Option<String>) -> String {
        let mut reg = self.registry.lock().await;
        let seq = reg.name_seq.entry(name.to_string()).or_insert(0);
        *seq += 1;
        let id = format!("{name}-{seq}");
        drop(seq);

        self.bus.register(&id).await;
        reg.agents.insert(
            id.clone(),
            AgentRecord {
                id: id.clone(),
                name: name.to_string(),
                parent_id: parent_id.clone(),
                status: AgentStatus::Idle,
                result: None,
                task: None,
                started_at: None,
                completed_at: None,
            },
        );
        if let Some(parent) = parent_id {
            reg.children.entry(parent).or_default().insert(id.clone());
        }
        id
    }

    /// Record the task a launched child was given, so `launched_subagents`
    /// can report it later. Called once, right after `register`, by
    /// whatever dispatches `Action::LaunchSubagents`.
    pub async fn set_task(&self, agent_id: &str, task: &str) {
        if let Some(record) = self.registry.lock().await.agents.get_mut(agent_id) {
            record.task = Some(task.to_string());
        }
    }

    /// Start the agent's cooperative task. Must be called exactly once per
    /// id. `fut` is the agent loop's run future; its output is delivered
    /// to `complete` automatically when it finishes. `cancel` is the same
    /// token the running loop observes at its suspension points (model
    /// calls, tool calls, mailbox waits) — `shutdown` fires it to ask the
    /// task to stop cooperatively before ever resorting to `abort`.
    pub async fn launch<Fut>(
        self: &Arc<Self>,
        agent_id: &str,
        cancel: CancellationToken,
        fut: Fut,
    ) -> Result<(), OrchestratorError>
    where
        Fut: Future<Output = AgentResponse> + Send + 'static,
    {
        {
            let mut reg = self.registry.lock().await;
            if reg.tasks.contains_key(agent_id) {
                return Err(OrchestratorError::AlreadyLaunched(agent_id.to_string()));
            }
            let record = reg
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| OrchestratorError::UnknownAgent(agent_id.to_string()))?;
            record.status = AgentStatus::Running;
            record.started_at = Some(now_ms());
            reg.cancel_tokens.insert(agent_id.to_string(), cancel);
        }

        tracing::info!(agent_id, "agent_started");
        let orchestrator = Arc::clone(self);
        let owned_id = agent_id.to_string();
        let handle = tokio::spawn(async move {
            // A panicking agent task must still resolve to a `Failed`
            // result and notify its parent (spec.md §4.5) rather than
            // silently dropping out of `children`/`tasks`.
            let response = match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                Ok(response) => response,
                Err(payload) => {
                    let message = panic_message(&payload);
                    tracing::error!(agent_id = owned_id.as_str(), panic = %message, "agent task panicked");
                    AgentResponse::failed(format!("agent panicked: {message}"), 0)
                }
            };
            orchestrator.complete(&owned_id, response).await;
        });
        self.registry
            .lock()
            .await
            .tasks
            .insert(agent_id.to_string(), handle);
        Ok(())
    }

    /// Every child ever launched under `parent_id`, completed or not — the
    /// materialized view of spec.md §3's `LaunchedSubagent` record. The
    /// parent itself holds only ids; this is how it looks the rest up.
    pub async fn launched_subagents(&self, parent_id: &str) -> Vec<LaunchedSubagent> {
        let reg = self.registry.lock().await;
        let Some(ids) = reg.children.get(parent_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| reg.agents.get(id))
            .map(|r| LaunchedSubagent {
                id: r.id.clone(),
                display_name: r.id.clone(),
                subagent_name: r.name.clone(),
                task: r.task.clone().unwrap_or_default(),
                parent_id: parent_id.to_string(),
                started_at: r.started_at.unwrap_or(0),
                completed_at: r.completed_at,
                result_summary: r.result.as_ref().map(|resp| resp.content.clone()),
                status: r.status,
            })
            .collect()
    }

    /// Called by the agent loop when terminating. Delivers `child_completed`
    /// / `child_failed` to the parent if present, removes bookkeeping, and
    /// closes the mailbox.
    pub async fn complete(&self, agent_id: &str, response: AgentResponse) {
        let parent_id = {
            let mut reg = self.registry.lock().await;
            let Some(record) = reg.agents.get_mut(agent_id) else {
                return;
            };
            record.status = if response.success {
                AgentStatus::Completed
            } else {
                AgentStatus::Failed
            };
            record.result = Some(response.clone());
            record.completed_at = Some(now_ms());
            reg.tasks.remove(agent_id);
            reg.cancel_tokens.remove(agent_id);
            record.parent_id.clone()
        };

        self.bus.close(agent_id).await;
        tracing::info!(agent_id, success = response.success, "agent_completed");

        if let Some(parent) = parent_id {
            let still_alive = {
                let reg = self.registry.lock().await;
                reg.agents.contains_key(&parent)
            };
            if !still_alive {
                tracing::warn!(agent_id, parent, "parent gone; orphaned completion dropped");
                return;
            }
            let kind = if response.success {
                MessageKind::ChildCompleted
            } else {
                MessageKind::ChildFailed
            };
            let msg = AgentMessage::new(agent_id, &parent, kind, response.content);
            if let Err(err) = self.bus.deliver(&parent, msg).await {
                tracing::warn!(agent_id, parent, error = %err, "failed to notify parent of completion");
            }
        }
    }

    /// Validates that `to` exists and is not terminal, then enqueues.
    pub async fn send(&self, from: &str, to: &str, content: String) -> Result<(), OrchestratorError> {
        let status = self.status(to).await.ok_or_else(|| OrchestratorError::UnknownAgent(to.to_string()))?;
        if matches!(status, AgentStatus::Completed | AgentStatus::Failed) {
            return Err(OrchestratorError::Terminal(to.to_string()));
        }
        let msg = AgentMessage::new(from, to, MessageKind::Peer, content);
        self.bus.deliver(to, msg).await.map_err(OrchestratorError::Mailbox)
    }

    pub async fn is_alive(&self, agent_id: &str) -> bool {
        matches!(
            self.status(agent_id).await,
            Some(AgentStatus::Idle) | Some(AgentStatus::Running) | Some(AgentStatus::Suspended)
        )
    }

    pub async fn status(&self, agent_id: &str) -> Option<AgentStatus> {
        self.registry.lock().await.agents.get(agent_id).map(|r| r.status)
    }

    pub async fn result(&self, agent_id: &str) -> Option<AgentResponse> {
        self.registry.lock().await.agents.get(agent_id).and_then(|r| r.result.clone())
    }

    /// Asks every outstanding task to stop cooperatively (spec.md §5:
    /// "cancellation is cooperative") by firing each agent's own
    /// `CancellationToken`, then waits up to `shutdown_grace` for them to
    /// unwind on their own. `JoinHandle::abort` — a hard task kill — is
    /// only used as a last resort on whatever hasn't stopped by then, and
    /// those stragglers are explicitly completed as failed so their
    /// parents still get notified. Idempotent: a second call finds no
    /// tasks left and returns immediately.
    pub async fn shutdown(&self) {
        let (agent_ids, mut handles): (Vec<String>, Vec<JoinHandle<()>>) = {
            let mut reg = self.registry.lock().await;
            let ids: Vec<String> = reg.tasks.keys().cloned().collect();
            let handles: Vec<JoinHandle<()>> = ids.iter().filter_map(|id| reg.tasks.remove(id)).collect();
            (ids, handles)
        };
        let cancels: Vec<CancellationToken> = {
            let reg = self.registry.lock().await;
            agent_ids.iter().filter_map(|id| reg.cancel_tokens.get(id).cloned()).collect()
        };
        for cancel in &cancels {
            cancel.cancel();
        }

        let waited = tokio::time::timeout(self.shutdown_grace, futures::future::join_all(handles.iter_mut())).await;
        if waited.is_err() {
            for (id, handle) in agent_ids.iter().zip(handles.iter()) {
                if handle.is_finished() {
                    continue;
                }
                tracing::warn!(agent_id = id.as_str(), "agent did not stop cooperatively within the shutdown grace period; aborting");
                handle.abort();
                // `abort` can race with the task reaching its own natural
                // completion; only force a result if nothing beat us to it.
                if !matches!(self.status(id).await, Some(AgentStatus::Completed) | Some(AgentStatus::Failed)) {
                    self.complete(id, AgentResponse::failed("cancelled (forced abort after shutdown grace period)", 0))
                        .await;
                }
            }
        }

        for id in agent_ids {
            self.bus.close(&id).await;
        }
        tracing::info!("orchestrator shutdown complete");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
