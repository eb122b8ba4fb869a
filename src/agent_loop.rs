//! The think/act state machine. One instance drives one running agent;
//! the same `AgentLoop` (shared tool registry, subagent catalog,
//! callbacks, compaction policy) is reused to run both the root agent and
//! every subagent it launches. Grounded on `agent_loop.rs`'s overall shape
//! (event-emitting `run_loop` driving provider -> dispatch -> observation)
//! but rebuilt around `Action` dispatch instead of native tool-use content
//! blocks, and around mailbox suspension instead of "no more tool calls".

use crate::action::{Action, AgentResponse, LaunchSpec};
use crate::compaction::{self, CompactionConfig};
use crate::message_bus::{format_observation, AgentMessage, MessageKind};
use crate::model_client::{ChatRole, ModelClient, ModelError};
use crate::orchestrator::Orchestrator;
use crate::parser::{self, ParseError};
use crate::types::{AgentTool, AlwaysAllow, PermissionHandler, ToolContext, ToolResult};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// AgentState / AgentStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Running,
    Suspended,
    Completed,
    Failed,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of one agent's state, valid across suspensions. `history_digest`
/// from spec.md §3 is realized here as the [`ModelClient`] instance itself
/// (each agent owns one exclusively) rather than an opaque handle, since
/// Rust lets us express that ownership directly in the type system.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub agent_id: String,
    pub status: AgentStatus,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub pending_children: HashSet<String>,
    pub received_messages: Vec<AgentMessage>,
    pub last_action: Option<Action>,
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// The twelve observation hooks from spec.md §4.6. Callbacks MUST NOT
/// influence control flow; a panicking callback is caught and logged, the
/// same "observe, never steer" contract the teacher gives its own
/// `before_turn`/`after_turn`/`on_error` hooks.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_agent_start: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_iteration_start: Option<Arc<dyn Fn(&str, u32) + Send + Sync>>,
    pub on_llm_request: Option<Arc<dyn Fn(&str, &str) + Send + Sync>>,
    pub on_llm_response: Option<Arc<dyn Fn(&str, &str) + Send + Sync>>,
    pub on_parse_success: Option<Arc<dyn Fn(&str, &Action) + Send + Sync>>,
    pub on_parse_error: Option<Arc<dyn Fn(&str, &ParseError, u32) + Send + Sync>>,
    pub on_tool_call: Option<Arc<dyn Fn(&str, &str, &serde_json::Value) + Send + Sync>>,
    pub on_tool_result: Option<Arc<dyn Fn(&str, &str, &ToolResult, bool) + Send + Sync>>,
    pub on_subagent_call: Option<Arc<dyn Fn(&str, &[LaunchSpec]) + Send + Sync>>,
    pub on_subagent_result: Option<Arc<dyn Fn(&str, &str, &AgentResponse) + Send + Sync>>,
    pub on_iteration_end: Option<Arc<dyn Fn(&str, u32) + Send + Sync>>,
    pub on_agent_finish: Option<Arc<dyn Fn(&str, &AgentResponse) + Send + Sync>>,
}

/// Call `f()` and swallow (log) a panic instead of letting it unwind past
/// the loop, so a misbehaving observer can never abort an agent. Callback
/// closures close over `Arc<dyn Fn>` fields that aren't provably
/// unwind-safe to the compiler; `AssertUnwindSafe` is sound here because a
/// panicking callback never leaves the loop's own state half-mutated (the
/// callback has no mutable access to it).
fn guarded(name: &'static str, f: impl FnOnce()) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
        tracing::error!(callback = name, "callback panicked; ignoring");
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SubagentTemplate {
    pub system_prompt: String,
    /// Empty means "all tools in the registry".
    pub tool_names: Vec<String>,
    pub max_iterations: u32,
}

/// Shared, reusable infrastructure for every agent an [`AgentLoop`] runs:
/// the tool registry, subagent catalog, callbacks, and compaction policy.
/// Per-agent knobs (system prompt, task, max iterations) are supplied to
/// [`AgentLoop::run`] instead, since children reuse this same config with
/// their own values for those.
#[derive(Clone)]
pub struct AgentLoopConfig {
    /// Model identifier used only for compaction's context-limit lookup.
    pub model: String,
    pub tools: HashMap<String, Arc<dyn AgentTool>>,
    pub subagents: HashMap<String, SubagentTemplate>,
    pub callbacks: Callbacks,
    pub compaction: CompactionConfig,
    pub parse_max_retries: u32,
    pub tool_timeout: Duration,
    pub permissions: Arc<dyn PermissionHandler>,
    pub tool_output_max_chars: usize,
    /// Builds a fresh, isolated [`ModelClient`] for each subagent launched
    /// — parents and children never share a client instance (spec.md §5).
    pub model_client_factory: Arc<dyn Fn() -> Box<dyn ModelClient> + Send + Sync>,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            tools: HashMap::new(),
            subagents: HashMap::new(),
            callbacks: Callbacks::default(),
            compaction: CompactionConfig::default(),
            parse_max_retries: 3,
            tool_timeout: Duration::from_secs(120),
            permissions: Arc::new(AlwaysAllow),
            tool_output_max_chars: 4000,
            model_client_factory: Arc::new(|| {
                Box::new(crate::model_client::mock::MockModelClient::text(""))
                    as Box<dyn ModelClient>
            }),
        }
    }
}

impl AgentLoopConfig {
    /// Seed the knobs `RuntimeConfig` actually governs (compaction, parse
    /// retries, tool timeout/output cap) from it, leaving the
    /// embedder-supplied fields — `model`, `tools`, `subagents`,
    /// `callbacks`, `permissions`, `model_client_factory` — at their
    /// defaults for the caller to fill in afterwards. `runtime.max_iterations`
    /// is a per-run knob, not a per-loop one; it seeds `AgentRunSpec`/
    /// `SubagentTemplate` instead, not this struct.
    pub fn from_runtime(runtime: &crate::config::RuntimeConfig) -> Self {
        Self {
            compaction: runtime.compaction.clone(),
            parse_max_retries: runtime.parse.max_retries,
            tool_timeout: runtime.tool.default_timeout,
            tool_output_max_chars: runtime.tool.output_max_chars,
            ..Self::default()
        }
    }
}

/// Per-run inputs: what to run, not how. Built fresh for the root agent
/// and for every subagent [`Action::LaunchSubagents`] spawns.
pub struct AgentRunSpec {
    pub agent_id: String,
    pub task: String,
    pub system_prompt: String,
    pub max_iterations: u32,
    /// `None` means "every tool in the registry".
    pub tool_names: Option<Vec<String>>,
    pub client: Box<dyn ModelClient>,
    pub cancel: CancellationToken,
}

enum DispatchOutcome {
    Continue(String),
    Finished(AgentResponse),
}

/// Await `fut`, short-circuiting to `None` if `cancel` fires first.
async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        res = fut => Some(res),
    }
}

pub struct AgentLoop {
    pub config: Arc<AgentLoopConfig>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AgentLoop {
    pub fn new(config: AgentLoopConfig, orchestrator: Arc<Orchestrator>) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            orchestrator,
        })
    }

    /// Run one agent to completion and return its final response.
    /// `orchestrator.complete` is NOT called here: the caller is expected to
    /// drive this future through `orchestrator.launch`, whose own wrapper
    /// calls `complete` exactly once with the returned response. Calling it
    /// here too would notify a parent of a child's completion twice.
    pub async fn run(self: &Arc<Self>, spec: AgentRunSpec) -> AgentResponse {
        let AgentRunSpec {
            agent_id,
            task,
            system_prompt,
            max_iterations,
            tool_names,
            client,
            cancel,
        } = spec;

        guarded("on_agent_start", {
            let cb = self.config.callbacks.on_agent_start.clone();
            let id = agent_id.clone();
            move || {
                if let Some(cb) = cb {
                    cb(&id)
                }
            }
        });

        let tools: HashMap<String, Arc<dyn AgentTool>> = match tool_names {
            Some(names) => names
                .into_iter()
                .filter_map(|n| self.config.tools.get(&n).cloned().map(|t| (n, t)))
                .collect(),
            None => self.config.tools.clone(),
        };

        let mut state = AgentState {
            agent_id: agent_id.clone(),
            status: AgentStatus::Running,
            iteration_count: 0,
            max_iterations,
            pending_children: HashSet::new(),
            received_messages: Vec::new(),
            last_action: None,
        };

        self.maybe_compact(client.as_ref(), &agent_id).await;

        self.fire_llm_request(&agent_id, &task);
        let initial = match cancellable(
            &cancel,
            self.chat_with_emergency_compaction(client.as_ref(), &agent_id, &task, Some(system_prompt.as_str()), ChatRole::User),
        )
        .await
        {
            None => return self.finish(&agent_id, &mut state, AgentResponse::failed("cancelled", 0)).await,
            Some(Ok(text)) => text,
            Some(Err(err)) => {
                let response = AgentResponse::failed(format!("model call failed: {err}"), 0);
                state.status = AgentStatus::Failed;
                return self.finish(&agent_id, &mut state, response).await;
            }
        };
        self.fire_llm_response(&agent_id, &initial);

        let mut llm_turn = initial;
        let mut consecutive_parse_failures: u32 = 0;

        let response = 'outer: loop {
            if cancel.is_cancelled() {
                state.status = AgentStatus::Failed;
                break AgentResponse::failed("cancelled", state.iteration_count);
            }
            if state.iteration_count >= state.max_iterations {
                state.status = AgentStatus::Completed;
                break AgentResponse::ok(
                    format!(
                        "[Agent stopped: reached max iterations ({})]",
                        state.max_iterations
                    ),
                    state.iteration_count,
                );
            }

            state.iteration_count += 1;
            self.fire_iteration_start(&agent_id, state.iteration_count);
            self.maybe_compact(client.as_ref(), &agent_id).await;

            match parser::parse(&llm_turn) {
                Ok(action) => {
                    consecutive_parse_failures = 0;
                    self.fire_parse_success(&agent_id, &action);
                    state.last_action = Some(action.clone());

                    match self
                        .dispatch(&agent_id, action, &mut state, client.as_ref(), &tools, &cancel)
                        .await
                    {
                        Ok(DispatchOutcome::Continue(next)) => {
                            llm_turn = next;
                            self.fire_llm_response(&agent_id, &llm_turn);
                        }
                        Ok(DispatchOutcome::Finished(response)) => {
                            state.status = if response.success {
                                AgentStatus::Completed
                            } else {
                                AgentStatus::Failed
                            };
                            break 'outer response;
                        }
                        Err(err) => {
                            state.status = AgentStatus::Failed;
                            break 'outer AgentResponse::failed(
                                format!("model call failed: {err}"),
                                state.iteration_count,
                            );
                        }
                    }
                }
                Err(parse_err) => {
                    consecutive_parse_failures += 1;
                    self.fire_parse_error(&agent_id, &parse_err, consecutive_parse_failures);

                    if consecutive_parse_failures >= self.config.parse_max_retries {
                        state.status = AgentStatus::Failed;
                        break 'outer AgentResponse::failed(
                            format!(
                                "could not parse a valid action after {consecutive_parse_failures} attempts: {parse_err}"
                            ),
                            state.iteration_count,
                        );
                    }

                    let feedback = parse_err.feedback();
                    self.fire_llm_request(&agent_id, &feedback);
                    match self
                        .chat_with_emergency_compaction(client.as_ref(), &agent_id, &feedback, None, ChatRole::Tool)
                        .await
                    {
                        Ok(next) => {
                            llm_turn = next;
                            self.fire_llm_response(&agent_id, &llm_turn);
                        }
                        Err(err) => {
                            state.status = AgentStatus::Failed;
                            break 'outer AgentResponse::failed(
                                format!("model call failed while recovering from a parse error: {err}"),
                                state.iteration_count,
                            );
                        }
                    }
                }
            }

            self.fire_iteration_end(&agent_id, state.iteration_count);
        };

        self.finish(&agent_id, &mut state, response).await
    }

    async fn finish(
        self: &Arc<Self>,
        agent_id: &str,
        state: &mut AgentState,
        response: AgentResponse,
    ) -> AgentResponse {
        state.status = if response.success {
            AgentStatus::Completed
        } else {
            AgentStatus::Failed
        };
        guarded("on_agent_finish", {
            let cb = self.config.callbacks.on_agent_finish.clone();
            let id = agent_id.to_string();
            let response = response.clone();
            move || {
                if let Some(cb) = cb {
                    cb(&id, &response)
                }
            }
        });
        response
    }

    async fn maybe_compact(&self, client: &dyn ModelClient, agent_id: &str) {
        let history = client.get_history().await;
        if let Some(new_history) =
            compaction::compact(&history, &self.config.compaction, &self.config.model, client).await
        {
            tracing::info!(agent_id, old = history.len(), new = new_history.len(), "compaction committed");
            client.set_history(new_history).await;
        }
    }

    /// `chat`, but if the model reports (or looks like) a context-length
    /// overflow, attempt one emergency compaction and retry the turn once
    /// before surfacing the error (spec.md §4.3).
    async fn chat_with_emergency_compaction(
        &self,
        client: &dyn ModelClient,
        agent_id: &str,
        prompt: &str,
        system_prompt: Option<&str>,
        role: ChatRole,
    ) -> Result<String, ModelError> {
        match client.chat(prompt, system_prompt, role).await {
            Ok(text) => Ok(text),
            Err(err) if compaction::should_emergency_compact(&err) => {
                tracing::warn!(agent_id, error = %err, "emergency compaction after context-length error");
                let history = client.get_history().await;
                let emergency = CompactionConfig {
                    threshold: 0.0,
                    ..self.config.compaction.clone()
                };
                if let Some(new_history) =
                    compaction::compact(&history, &emergency, &self.config.model, client).await
                {
                    client.set_history(new_history).await;
                }
                client.chat(prompt, system_prompt, role).await
            }
            Err(err) => Err(err),
        }
    }

    async fn dispatch(
        self: &Arc<Self>,
        agent_id: &str,
        action: Action,
        state: &mut AgentState,
        client: &dyn ModelClient,
        tools: &HashMap<String, Arc<dyn AgentTool>>,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, ModelError> {
        match action {
            Action::Finish { content, .. } => Ok(DispatchOutcome::Finished(AgentResponse::ok(
                content,
                state.iteration_count,
            ))),

            Action::Tool { name, arguments, .. } => {
                self.fire_tool_call(agent_id, &name, &arguments);
                let observation = self.run_tool(agent_id, &name, arguments, tools, cancel).await;
                self.fire_llm_request(agent_id, &observation);
                let next = self
                    .chat_with_emergency_compaction(client, agent_id, &observation, None, ChatRole::Tool)
                    .await?;
                Ok(DispatchOutcome::Continue(next))
            }

            Action::LaunchSubagents { specs, .. } => {
                self.fire_subagent_call(agent_id, &specs);
                let mut launched = 0usize;
                let mut unknown = Vec::new();
                for spec_item in &specs {
                    let Some(template) = self.config.subagents.get(&spec_item.subagent_name).cloned() else {
                        unknown.push(spec_item.subagent_name.clone());
                        continue;
                    };
                    let child_id = self
                        .orchestrator
                        .register(&spec_item.subagent_name, Some(agent_id.to_string()))
                        .await;
                    self.orchestrator.set_task(&child_id, &spec_item.task).await;
                    state.pending_children.insert(child_id.clone());

                    let child_loop = Arc::clone(self);
                    let child_client = (self.config.model_client_factory)();
                    let child_cancel = cancel.clone();
                    let child_spec = AgentRunSpec {
                        agent_id: child_id.clone(),
                        task: spec_item.task.clone(),
                        system_prompt: template.system_prompt.clone(),
                        max_iterations: template.max_iterations,
                        tool_names: if template.tool_names.is_empty() {
                            None
                        } else {
                            Some(template.tool_names.clone())
                        },
                        client: child_client,
                        cancel: child_cancel.clone(),
                    };
                    let fut = async move { child_loop.run(child_spec).await };
                    if let Err(err) = self.orchestrator.launch(&child_id, child_cancel, fut).await {
                        tracing::warn!(child_id, error = %err, "failed to launch subagent");
                    } else {
                        launched += 1;
                    }
                }
                let mut observation = format!("Launched {launched} subagent(s).");
                if !unknown.is_empty() {
                    observation.push_str(&format!(" Unknown subagent template(s): {}", unknown.join(", ")));
                }
                self.fire_llm_request(agent_id, &observation);
                let next = self
                    .chat_with_emergency_compaction(client, agent_id, &observation, None, ChatRole::Tool)
                    .await?;
                Ok(DispatchOutcome::Continue(next))
            }

            Action::WaitForSubagents { .. } => {
                if state.pending_children.is_empty() {
                    // Open question (spec.md §9): treat as an
                    // error-observation rather than a deadlock.
                    let observation =
                        "WaitForSubagents was called with no pending subagents; nothing to wait for.";
                    self.fire_llm_request(agent_id, observation);
                    let next = self
                        .chat_with_emergency_compaction(client, agent_id, observation, None, ChatRole::Tool)
                        .await?;
                    return Ok(DispatchOutcome::Continue(next));
                }
                let batch = match self.suspend_and_drain(agent_id, state, cancel).await {
                    Some(batch) => batch,
                    None => return Ok(DispatchOutcome::Finished(AgentResponse::failed("cancelled", state.iteration_count))),
                };
                let observation = format_observation(&batch);
                self.fire_llm_request(agent_id, &observation);
                let next = self
                    .chat_with_emergency_compaction(client, agent_id, &observation, None, ChatRole::Tool)
                    .await?;
                self.maybe_compact(client, agent_id).await;
                Ok(DispatchOutcome::Continue(next))
            }

            Action::Wait { .. } => {
                let batch = match self.suspend_and_drain(agent_id, state, cancel).await {
                    Some(batch) => batch,
                    None => return Ok(DispatchOutcome::Finished(AgentResponse::failed("cancelled", state.iteration_count))),
                };
                let observation = format_observation(&batch);
                self.fire_llm_request(agent_id, &observation);
                let next = self
                    .chat_with_emergency_compaction(client, agent_id, &observation, None, ChatRole::Tool)
                    .await?;
                self.maybe_compact(client, agent_id).await;
                Ok(DispatchOutcome::Continue(next))
            }

            Action::SendMessage { to, content, .. } => {
                let observation = match self.orchestrator.send(agent_id, &to, content).await {
                    Ok(()) => "Sent.".to_string(),
                    Err(err) => format!("Could not send message to '{to}': {err}"),
                };
                self.fire_llm_request(agent_id, &observation);
                let next = self
                    .chat_with_emergency_compaction(client, agent_id, &observation, None, ChatRole::Tool)
                    .await?;
                Ok(DispatchOutcome::Continue(next))
            }
        }
    }

    /// Suspend on the mailbox until at least one message arrives, then
    /// drain every message queued at that moment (resume correctness,
    /// spec.md §4.6): two children completing during one suspension are
    /// both surfaced before the next model decision.
    async fn suspend_and_drain(
        &self,
        agent_id: &str,
        state: &mut AgentState,
        cancel: &CancellationToken,
    ) -> Option<Vec<AgentMessage>> {
        state.status = AgentStatus::Suspended;
        let first = cancellable(cancel, self.orchestrator.bus().wait_for_any(agent_id)).await?;
        let first = first.ok()?;
        let mut batch = vec![first];
        if let Ok(rest) = self.orchestrator.bus().drain(agent_id).await {
            batch.extend(rest);
        }
        for msg in &batch {
            if matches!(msg.kind, MessageKind::ChildCompleted | MessageKind::ChildFailed) {
                state.pending_children.remove(&msg.from);
                guarded("on_subagent_result", {
                    let cb = self.config.callbacks.on_subagent_result.clone();
                    let agent_id = agent_id.to_string();
                    let from = msg.from.clone();
                    let response = AgentResponse {
                        success: matches!(msg.kind, MessageKind::ChildCompleted),
                        content: msg.payload.clone(),
                        iterations: 0,
                    };
                    move || {
                        if let Some(cb) = cb {
                            cb(&agent_id, &from, &response)
                        }
                    }
                });
            }
        }
        state.received_messages.extend(batch.iter().cloned());
        state.status = AgentStatus::Running;
        Some(batch)
    }

    async fn run_tool(
        &self,
        agent_id: &str,
        name: &str,
        arguments: serde_json::Value,
        tools: &HashMap<String, Arc<dyn AgentTool>>,
        cancel: &CancellationToken,
    ) -> String {
        let Some(tool) = tools.get(name) else {
            return format!("[error] tool '{name}' not found");
        };

        if let Err(reason) = validate_arguments(&tool.parameters_schema(), &arguments) {
            return format!("[error] invalid arguments for '{name}': {reason}");
        }

        let ctx = ToolContext {
            session_id: agent_id.to_string(),
            message_id: uuid::Uuid::new_v4().to_string(),
            call_id: uuid::Uuid::new_v4().to_string(),
            cancel: cancel.child_token(),
            permissions: self.config.permissions.clone(),
            working_dir: std::env::current_dir().unwrap_or_default(),
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            res = tokio::time::timeout(self.config.tool_timeout, tool.execute(arguments, ctx)) => Some(res),
        };

        let (result, is_error) = match outcome {
            None => (ToolResult { error: Some("cancelled".into()), ..Default::default() }, true),
            Some(Err(_elapsed)) => (
                ToolResult {
                    title: name.to_string(),
                    error: Some("tool timed out".into()),
                    ..Default::default()
                },
                true,
            ),
            Some(Ok(Ok(result))) => {
                let is_error = result.error.is_some();
                (result, is_error)
            }
            Some(Ok(Err(err))) => (
                ToolResult {
                    title: name.to_string(),
                    error: Some(err.to_string()),
                    ..Default::default()
                },
                true,
            ),
        };

        self.fire_tool_result(agent_id, name, &result, is_error);
        render_tool_result(&result, self.config.tool_output_max_chars)
    }

    fn fire_llm_request(&self, agent_id: &str, prompt: &str) {
        guarded("on_llm_request", {
            let cb = self.config.callbacks.on_llm_request.clone();
            let agent_id = agent_id.to_string();
            let prompt = prompt.to_string();
            move || {
                if let Some(cb) = cb {
                    cb(&agent_id, &prompt)
                }
            }
        });
    }

    fn fire_llm_response(&self, agent_id: &str, text: &str) {
        guarded("on_llm_response", {
            let cb = self.config.callbacks.on_llm_response.clone();
            let agent_id = agent_id.to_string();
            let text = text.to_string();
            move || {
                if let Some(cb) = cb {
                    cb(&agent_id, &text)
                }
            }
        });
    }

    fn fire_iteration_start(&self, agent_id: &str, iteration: u32) {
        guarded("on_iteration_start", {
            let cb = self.config.callbacks.on_iteration_start.clone();
            let agent_id = agent_id.to_string();
            move || {
                if let Some(cb) = cb {
                    cb(&agent_id, iteration)
                }
            }
        });
    }

    fn fire_iteration_end(&self, agent_id: &str, iteration: u32) {
        guarded("on_iteration_end", {
            let cb = self.config.callbacks.on_iteration_end.clone();
            let agent_id = agent_id.to_string();
            move || {
                if let Some(cb) = cb {
                    cb(&agent_id, iteration)
                }
            }
        });
    }

    fn fire_parse_success(&self, agent_id: &str, action: &Action) {
        guarded("on_parse_success", {
            let cb = self.config.callbacks.on_parse_success.clone();
            let agent_id = agent_id.to_string();
            let action = action.clone();
            move || {
                if let Some(cb) = cb {
                    cb(&agent_id, &action)
                }
            }
        });
    }

    fn fire_parse_error(&self, agent_id: &str, err: &ParseError, attempt: u32) {
        tracing::warn!(agent_id, attempt, error = %err, "on_parse_error");
        if let Some(cb) = self.config.callbacks.on_parse_error.clone() {
            guarded("on_parse_error", || cb(agent_id, err, attempt));
        }
    }

    fn fire_tool_call(&self, agent_id: &str, name: &str, arguments: &serde_json::Value) {
        guarded("on_tool_call", {
            let cb = self.config.callbacks.on_tool_call.clone();
            let agent_id = agent_id.to_string();
            let name = name.to_string();
            let arguments = arguments.clone();
            move || {
                if let Some(cb) = cb {
                    cb(&agent_id, &name, &arguments)
                }
            }
        });
    }

    fn fire_tool_result(&self, agent_id: &str, name: &str, result: &ToolResult, is_error: bool) {
        guarded("on_tool_result", {
            let cb = self.config.callbacks.on_tool_result.clone();
            let agent_id = agent_id.to_string();
            let name = name.to_string();
            let result = result.clone();
            move || {
                if let Some(cb) = cb {
                    cb(&agent_id, &name, &result, is_error)
                }
            }
        });
    }

    fn fire_subagent_call(&self, agent_id: &str, specs: &[LaunchSpec]) {
        guarded("on_subagent_call", {
            let cb = self.config.callbacks.on_subagent_call.clone();
            let agent_id = agent_id.to_string();
            let specs = specs.to_vec();
            move || {
                if let Some(cb) = cb {
                    cb(&agent_id, &specs)
                }
            }
        });
    }
}

fn validate_arguments(schema: &serde_json::Value, arguments: &serde_json::Value) -> Result<(), String> {
    let Some(required) = schema.get("required").and_then(|v| v.as_array()) else {
        return Ok(());
    };
    let obj = arguments.as_object();
    for req in required {
        let Some(name) = req.as_str() else { continue };
        let present = obj.map(|o| o.contains_key(name)).unwrap_or(false);
        if !present {
            return Err(format!("missing required argument '{name}'"));
        }
    }
    Ok(())
}

fn render_tool_result(result: &ToolResult, max_chars: usize) -> String {
    let mut out = String::new();
    if !result.title.is_empty() {
        out.push_str(&result.title);
        out.push('\n');
    }
    out.push_str(&result.output);
    if let Some(err) = &result.error {
        out.push_str(&format!("\n[error] {err}"));
    }
    truncate(&out, max_chars)
}

fn truncate(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    if count <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{truncated}\n[output truncated, {} of {count} chars shown]", max_chars)
}
