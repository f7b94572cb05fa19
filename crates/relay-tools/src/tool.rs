// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::GatewayRef;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
///
/// Tools report failures as a result string with `is_error` set rather than
/// returning `Err` — the loop always continues so the model can react.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: content.into(), is_error: false }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: msg.into(), is_error: true }
    }
}

/// Per-call execution context.
///
/// Carries the identity of the session the tool runs on behalf of, plus the
/// gateway capability surface for tools that deliver messages or trigger
/// agent turns.
#[derive(Clone)]
pub struct ToolContext {
    pub session_key: String,
    pub channel: String,
    /// Delivery target on the channel (peer id, chat id), when known.
    pub to: Option<String>,
    pub agent_id: String,
    pub gateway: Arc<dyn GatewayRef>,
}

/// Trait every tool must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// Whether this tool is offered to subagent runners.
    ///
    /// The subagent spawn tool returns `false` here, which is what enforces
    /// the no-nesting rule: a subagent never sees the schema, and a direct
    /// call is rejected as an unknown tool.
    fn available_to_subagents(&self) -> bool {
        true
    }
    /// Execute the tool.  Failures should be wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TriggerOutcome;

    struct NullGateway;

    #[async_trait]
    impl GatewayRef for NullGateway {
        async fn send_to_session(&self, _: &str, _: &str, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn trigger_agent(&self, _: &str, _: &str, _: &str) -> TriggerOutcome {
            TriggerOutcome::Failed
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            session_key: "test:1".into(),
            channel: "test".into(),
            to: None,
            agent_id: "default".into(),
            gateway: Arc::new(NullGateway),
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({ "type": "object" })
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
            ToolOutput::ok(&call.id, format!("echo:{}", call.args))
        }
    }

    #[test]
    fn tool_output_constructors() {
        let ok = ToolOutput::ok("1", "fine");
        assert!(!ok.is_error);
        let err = ToolOutput::err("1", "broke");
        assert!(err.is_error);
        assert_eq!(err.content, "broke");
    }

    #[test]
    fn tools_default_to_subagent_available() {
        assert!(EchoTool.available_to_subagents());
    }

    #[tokio::test]
    async fn execute_receives_call_and_context() {
        let call = ToolCall { id: "c1".into(), name: "echo".into(), args: serde_json::json!({"x": 1}) };
        let out = EchoTool.execute(&call, &ctx()).await;
        assert_eq!(out.call_id, "c1");
        assert!(out.content.contains("\"x\":1"));
    }
}
