//! Tool adapter layer. The core ships no concrete tools (filesystem,
//! shell, search) the way the teacher does — those are host-application
//! concerns (spec.md §3 Non-goals). Instead it ships the seam: a generic
//! adapter that turns any `async fn(Value, ToolContext) -> Result<ToolResult,
//! ToolError>` into an [`AgentTool`], the same wrapping shape the teacher's
//! own tool modules use around their individual `execute` bodies.

use crate::types::{AgentTool, ToolContext, ToolError, ToolResult};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Wraps a plain async closure as an [`AgentTool`], so embedders can
/// register host-specific tools without implementing the trait by hand.
pub struct FnTool {
    name: String,
    description: String,
    parameters_schema: serde_json::Value,
    #[allow(clippy::type_complexity)]
    handler: Arc<
        dyn for<'a> Fn(serde_json::Value, ToolContext) -> BoxFuture<'a, Result<ToolResult, ToolError>>
            + Send
            + Sync,
    >,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters_schema,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

#[async_trait]
impl AgentTool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.parameters_schema.clone()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolResult, ToolError> {
        (self.handler)(arguments, ctx).await
    }
}

/// Trivial tool kept registered by default so a fresh [`AgentLoopConfig`]
/// (crate::agent_loop) always has at least one working tool to exercise in
/// tests and examples, without the core having to ship anything that
/// touches the filesystem or a shell.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoTool;

#[async_trait]
impl AgentTool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the `text` argument. Useful for smoke-testing the tool-dispatch path."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"],
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let text = arguments
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing 'text'".to_string()))?;
        Ok(ToolResult::ok("echo", text))
    }
}
