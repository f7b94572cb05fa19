// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};

use relay_tools::{Tool, ToolCall, ToolContext, ToolOutput};

use crate::gateway::Gateway;
use crate::SubagentCleanup;

/// Late-bound reference to the gateway, set once after construction.
///
/// The spawn tool is registered while the gateway is still being built, so
/// it cannot hold the `Arc` directly; it holds this slot instead and
/// upgrades at call time.
#[derive(Default)]
pub(crate) struct GatewaySlot(OnceLock<Weak<Gateway>>);

impl GatewaySlot {
    pub(crate) fn bind(&self, gateway: &Arc<Gateway>) {
        let _ = self.0.set(Arc::downgrade(gateway));
    }

    fn get(&self) -> Option<Arc<Gateway>> {
        self.0.get().and_then(Weak::upgrade)
    }
}

/// Fan out a focused background task to a fresh subagent session.
///
/// Not offered to subagent runners — that absence is the nesting guard.
pub struct SpawnSubagentTool {
    slot: Arc<GatewaySlot>,
}

impl SpawnSubagentTool {
    pub(crate) fn new(slot: Arc<GatewaySlot>) -> Self {
        Self { slot }
    }
}

#[async_trait]
impl Tool for SpawnSubagentTool {
    fn name(&self) -> &str {
        "spawn_subagent"
    }

    fn description(&self) -> &str {
        "Spawn a background agent to work on a focused task while you keep talking. \
         The result is announced back into this conversation when the task finishes."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task description for the background agent"
                },
                "label": {
                    "type": "string",
                    "description": "Short label used when the result is reported"
                },
                "cleanup": {
                    "type": "string",
                    "enum": ["delete", "keep"],
                    "description": "Whether to delete the background session after the result is announced (default: delete)"
                }
            },
            "required": ["task"]
        })
    }

    fn available_to_subagents(&self) -> bool {
        false
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(task) = call.args.get("task").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'task'");
        };
        let label = call
            .args
            .get("label")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let cleanup = match call.args.get("cleanup").and_then(|v| v.as_str()) {
            Some("keep") => SubagentCleanup::Keep,
            Some("delete") | None => SubagentCleanup::Delete,
            Some(other) => {
                return ToolOutput::err(&call.id, format!("unknown cleanup mode: {other}"));
            }
        };

        let Some(gateway) = self.slot.get() else {
            return ToolOutput::err(&call.id, "gateway unavailable");
        };
        match gateway.spawn_subagent(task, label.clone(), cleanup, ctx).await {
            Ok(run_id) => ToolOutput::ok(
                &call.id,
                format!(
                    "Started background task {run_id}{}. The result will be announced here when it completes.",
                    label.map(|l| format!(" (\"{l}\")")).unwrap_or_default()
                ),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("spawn failed: {e}")),
        }
    }
}

/// Deliver a message to an arbitrary session without re-triggering its agent.
pub struct SessionSendTool;

#[async_trait]
impl Tool for SessionSendTool {
    fn name(&self) -> &str {
        "session_send"
    }

    fn description(&self) -> &str {
        "Send a message to a session's conversation and its transport. \
         Defaults to the current session when session_key is omitted."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_key": {
                    "type": "string",
                    "description": "Target session key, e.g. \"telegram:123\" (default: this session)"
                },
                "message": {
                    "type": "string",
                    "description": "The message text to deliver"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(message) = call.args.get("message").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'message'");
        };
        let session_key = call
            .args
            .get("session_key")
            .and_then(|v| v.as_str())
            .unwrap_or(&ctx.session_key)
            .to_string();
        // The channel is the session-key prefix by convention.
        let channel = session_key
            .split_once(':')
            .map(|(c, _)| c.to_string())
            .unwrap_or_else(|| ctx.channel.clone());
        match ctx.gateway.send_to_session(&session_key, &channel, message).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("Message sent to {session_key}.")),
            Err(e) => ToolOutput::err(&call.id, format!("send failed: {e}")),
        }
    }
}

/// Deliver a message to a telegram chat.
pub struct TelegramSendTool;

#[async_trait]
impl Tool for TelegramSendTool {
    fn name(&self) -> &str {
        "telegram_send"
    }

    fn description(&self) -> &str {
        "Send a message to a telegram chat by id."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to": {
                    "type": "string",
                    "description": "Telegram chat id"
                },
                "message": {
                    "type": "string",
                    "description": "The message text to deliver"
                }
            },
            "required": ["to", "message"]
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(to) = call.args.get("to").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'to'");
        };
        let Some(message) = call.args.get("message").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'message'");
        };
        let session_key = format!("telegram:{to}");
        match ctx.gateway.send_to_session(&session_key, "telegram", message).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("Message sent to telegram chat {to}.")),
            Err(e) => ToolOutput::err(&call.id, format!("send failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use relay_tools::{GatewayRef, TriggerOutcome};

    #[derive(Default)]
    struct RecordingGateway {
        sends: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl GatewayRef for RecordingGateway {
        async fn send_to_session(
            &self,
            session_key: &str,
            channel: &str,
            text: &str,
        ) -> anyhow::Result<()> {
            self.sends.lock().unwrap().push((
                session_key.to_string(),
                channel.to_string(),
                text.to_string(),
            ));
            Ok(())
        }
        async fn trigger_agent(&self, _: &str, _: &str, _: &str) -> TriggerOutcome {
            TriggerOutcome::Failed
        }
    }

    fn ctx(gateway: Arc<RecordingGateway>) -> ToolContext {
        ToolContext {
            session_key: "term:alice".into(),
            channel: "term".into(),
            to: Some("alice".into()),
            agent_id: "default".into(),
            gateway,
        }
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall { id: "c1".into(), name: name.into(), args }
    }

    #[tokio::test]
    async fn session_send_defaults_to_current_session() {
        let gw = Arc::new(RecordingGateway::default());
        let out = SessionSendTool
            .execute(&call("session_send", json!({ "message": "hi" })), &ctx(gw.clone()))
            .await;
        assert!(!out.is_error);
        let sends = gw.sends.lock().unwrap();
        assert_eq!(sends[0], ("term:alice".into(), "term".into(), "hi".into()));
    }

    #[tokio::test]
    async fn session_send_derives_channel_from_explicit_key() {
        let gw = Arc::new(RecordingGateway::default());
        SessionSendTool
            .execute(
                &call("session_send", json!({ "session_key": "irc:#ops", "message": "hi" })),
                &ctx(gw.clone()),
            )
            .await;
        let sends = gw.sends.lock().unwrap();
        assert_eq!(sends[0].0, "irc:#ops");
        assert_eq!(sends[0].1, "irc");
    }

    #[tokio::test]
    async fn session_send_requires_message() {
        let gw = Arc::new(RecordingGateway::default());
        let out = SessionSendTool
            .execute(&call("session_send", json!({})), &ctx(gw.clone()))
            .await;
        assert!(out.is_error);
        assert!(gw.sends.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn telegram_send_builds_conventional_key() {
        let gw = Arc::new(RecordingGateway::default());
        let out = TelegramSendTool
            .execute(
                &call("telegram_send", json!({ "to": "123", "message": "report" })),
                &ctx(gw.clone()),
            )
            .await;
        assert!(!out.is_error);
        let sends = gw.sends.lock().unwrap();
        assert_eq!(sends[0], ("telegram:123".into(), "telegram".into(), "report".into()));
    }

    #[tokio::test]
    async fn spawn_tool_hidden_from_subagents() {
        let tool = SpawnSubagentTool::new(Arc::new(GatewaySlot::default()));
        assert!(!tool.available_to_subagents());
    }

    #[tokio::test]
    async fn spawn_tool_without_gateway_reports_error() {
        let tool = SpawnSubagentTool::new(Arc::new(GatewaySlot::default()));
        let gw = Arc::new(RecordingGateway::default());
        let out = tool
            .execute(&call("spawn_subagent", json!({ "task": "x" })), &ctx(gw))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("gateway unavailable"));
    }
}
