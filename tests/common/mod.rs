//! Shared scaffolding for the integration tests: a minimal `AgentLoop` +
//! `Orchestrator` harness wired to scripted `MockModelClient`s, the same
//! "build a tiny real stack, drive it with canned responses" approach the
//! teacher's own integration tests use against `MockProvider`.

use agentcore::agent_loop::{AgentLoop, AgentLoopConfig, AgentRunSpec, SubagentTemplate};
use agentcore::model_client::mock::MockModelClient;
use agentcore::model_client::ModelClient;
use agentcore::orchestrator::Orchestrator;
use agentcore::tools::EchoTool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Initializes `tracing`'s output once per test binary so a failing test
/// shows its `tracing::warn!`/`error!` lines (e.g. a guarded callback panic)
/// instead of swallowing them silently; safe to call from every test.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

pub fn orchestrator() -> Arc<Orchestrator> {
    init_tracing();
    Arc::new(Orchestrator::new(32, Duration::from_secs(2), Duration::from_secs(2)))
}

/// A config whose tool registry has just `echo`, subagent catalog empty
/// unless populated by the caller, and whose `model_client_factory` hands
/// out an empty-script mock (only safe for agents that always `Finish` on
/// their first turn; override per-test when a child needs canned replies).
pub fn base_config() -> AgentLoopConfig {
    let mut tools: std::collections::HashMap<String, Arc<dyn agentcore::AgentTool>> =
        std::collections::HashMap::new();
    tools.insert("echo".to_string(), Arc::new(EchoTool));

    AgentLoopConfig {
        model: "test-model".to_string(),
        tools,
        subagents: std::collections::HashMap::new(),
        ..AgentLoopConfig::default()
    }
}

pub fn run_spec(agent_id: &str, task: &str, system_prompt: &str, client: Box<dyn ModelClient>) -> AgentRunSpec {
    AgentRunSpec {
        agent_id: agent_id.to_string(),
        task: task.to_string(),
        system_prompt: system_prompt.to_string(),
        max_iterations: 10,
        tool_names: None,
        client,
        cancel: CancellationToken::new(),
    }
}

pub fn subagent_template(system_prompt: &str) -> SubagentTemplate {
    SubagentTemplate {
        system_prompt: system_prompt.to_string(),
        tool_names: Vec::new(),
        max_iterations: 10,
    }
}

pub fn mock(texts: impl IntoIterator<Item = &'static str>) -> Box<dyn ModelClient> {
    Box::new(MockModelClient::texts(texts))
}

pub fn loop_with(config: AgentLoopConfig, orch: Arc<Orchestrator>) -> Arc<AgentLoop> {
    AgentLoop::new(config, orch)
}
