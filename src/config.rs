//! Aggregates every runtime knob named in spec.md §6 into one struct with
//! the stated defaults, the same "one config struct per concern, `Default`
//! carries the documented numbers" shape the teacher uses for its own
//! `ContextConfig`/`ExecutionLimits`.

use crate::compaction::CompactionConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    pub capacity: usize,
    pub send_timeout: Duration,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            send_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseConfig {
    pub max_retries: u32,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub default_timeout: Duration,
    pub output_max_chars: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(120),
            output_max_chars: 4000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    pub grace: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
        }
    }
}

/// Every tunable knob in the crate, gathered in one place so an embedder
/// has a single struct to construct, override, and pass down instead of
/// threading a dozen primitives through constructors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Seeds each root/subagent run's `max_iterations`, not consumed by
    /// `AgentLoopConfig` itself — see `AgentLoopConfig::from_runtime`.
    pub max_iterations: MaxIterations,
    pub compaction: CompactionConfig,
    pub mailbox: MailboxConfig,
    pub parse: ParseConfig,
    pub tool: ToolConfig,
    pub shutdown: ShutdownConfig,
}

/// Newtype so the default (15) has one obvious home instead of being a
/// bare `u32` default of `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxIterations(pub u32);

impl Default for MaxIterations {
    fn default() -> Self {
        Self(15)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.max_iterations.0, 15);
        assert_eq!(cfg.parse.max_retries, 3);
        assert_eq!(cfg.mailbox.capacity, 32);
        assert!(cfg.compaction.enabled);
        assert_eq!(cfg.compaction.threshold, 0.75);
    }

    #[test]
    fn serializes_round_trip_through_json() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).expect("RuntimeConfig should serialize");
        let back: RuntimeConfig = serde_json::from_str(&json).expect("RuntimeConfig should deserialize");
        assert_eq!(back.max_iterations.0, cfg.max_iterations.0);
        assert_eq!(back.mailbox.capacity, cfg.mailbox.capacity);
    }

    #[test]
    fn agent_loop_config_from_runtime_carries_overridden_knobs() {
        let mut runtime = RuntimeConfig::default();
        runtime.parse.max_retries = 7;
        runtime.tool.output_max_chars = 999;
        runtime.tool.default_timeout = Duration::from_secs(42);
        runtime.compaction.threshold = 0.42;

        let loop_cfg = crate::agent_loop::AgentLoopConfig::from_runtime(&runtime);
        assert_eq!(loop_cfg.parse_max_retries, 7);
        assert_eq!(loop_cfg.tool_output_max_chars, 999);
        assert_eq!(loop_cfg.tool_timeout, Duration::from_secs(42));
        assert_eq!(loop_cfg.compaction.threshold, 0.42);
    }

    #[test]
    fn orchestrator_from_runtime_carries_mailbox_and_shutdown_knobs() {
        let mut runtime = RuntimeConfig::default();
        runtime.mailbox.capacity = 7;
        runtime.shutdown.grace = Duration::from_secs(1);

        let orch = crate::orchestrator::Orchestrator::from_runtime(&runtime);
        assert_eq!(orch.shutdown_grace(), Duration::from_secs(1));
    }
}
