// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Dialect A: the messages-API wire format.
//!
//! Distinguishing traits, versus dialect B:
//! - the system prompt travels as a top-level `system` field, not a message;
//! - tool schemas are flat `{name, description, input_schema}` objects;
//! - assistant tool calls are `tool_use` content blocks and tool results go
//!   back as user-role `tool_result` blocks;
//! - streaming deltas are typed SSE events (`content_block_start`,
//!   `content_block_delta`, `message_stop`) rather than chunked choices.

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::{dialect::ResponseStream, ChatRequest, Message, MessageContent, ResponseEvent, Role};

/// Output-token ceiling requested on every turn.  The messages API makes the
/// field mandatory.
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct DialectA {
    model: String,
    credential: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl DialectA {
    pub fn new(model: String, credential: Option<String>, base_url: String) -> Self {
        Self {
            model,
            credential,
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelDialect for DialectA {
    fn name(&self) -> &str {
        "dialect-a"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: ChatRequest) -> anyhow::Result<ResponseStream> {
        let key = self
            .credential
            .as_deref()
            .context("no credential configured for dialect-a provider")?;

        let (system_text, messages) = build_dialect_a_messages(&req.messages);

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": DEFAULT_MAX_TOKENS,
            "stream": true,
        });
        if !system_text.is_empty() {
            body["system"] = json!(system_text);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .context("dialect-a request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("dialect-a error {status}: {text}");
        }

        let byte_stream = resp.bytes_stream();
        // SSE lines can be split across TCP chunks, so we carry a remainder
        // buffer forward.  Only complete lines (terminated by '\n') are parsed;
        // anything left over is prepended to the next chunk.
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let text = match chunk {
                    Ok(b) => String::from_utf8_lossy(&b).to_string(),
                    Err(e) => {
                        return futures::future::ready(Some(vec![Err(anyhow::anyhow!(e))]));
                    }
                };
                buf.push_str(&text);
                let mut events = Vec::new();
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim_end_matches('\r').to_string();
                    buf.drain(..=pos);
                    if let Some(data) = line.strip_prefix("data: ") {
                        let data = data.trim();
                        if let Ok(v) = serde_json::from_str::<Value>(data) {
                            events.push(Ok(parse_dialect_a_event(&v)));
                        }
                    }
                }
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

pub(crate) fn parse_dialect_a_event(v: &Value) -> ResponseEvent {
    let event_type = v["type"].as_str().unwrap_or("");
    match event_type {
        "content_block_delta" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    ResponseEvent::TextDelta(delta["text"].as_str().unwrap_or("").to_string())
                }
                "input_json_delta" => ResponseEvent::ToolCall {
                    index,
                    id: String::new(),
                    name: String::new(),
                    arguments: delta["partial_json"].as_str().unwrap_or("").to_string(),
                },
                _ => ResponseEvent::TextDelta(String::new()),
            }
        }
        "content_block_start" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                ResponseEvent::ToolCall {
                    index,
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    arguments: String::new(),
                }
            } else {
                ResponseEvent::TextDelta(String::new())
            }
        }
        "message_delta" => {
            // The final stop_reason arrives in delta.stop_reason; max_tokens
            // means any in-flight tool-call arguments were truncated.
            if v["delta"]["stop_reason"].as_str() == Some("max_tokens") {
                ResponseEvent::MaxTokens
            } else {
                ResponseEvent::TextDelta(String::new())
            }
        }
        "message_stop" => ResponseEvent::Done,
        "error" => ResponseEvent::Error(
            v["error"]["message"].as_str().unwrap_or("stream error").to_string(),
        ),
        _ => ResponseEvent::TextDelta(String::new()),
    }
}

/// Convert a slice of [`Message`]s into the dialect-A wire format.
///
/// Returns `(system_text, conversation_messages)`.  The system message is
/// separated out because this dialect expects it as a top-level `system`
/// field, not as a conversation turn.
pub(crate) fn build_dialect_a_messages(messages: &[Message]) -> (String, Vec<Value>) {
    let mut system_text = String::new();
    let mut out: Vec<Value> = Vec::new();

    for m in messages {
        if m.role == Role::System {
            if let Some(t) = m.as_text() {
                system_text = t.to_string();
            }
            continue;
        }
        match &m.content {
            MessageContent::Text(t) => {
                let role = match m.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                };
                out.push(json!({ "role": role, "content": t }));
            }
            MessageContent::ToolCall { tool_call_id, function } => {
                out.push(json!({
                    "role": "assistant",
                    "content": [{
                        "type": "tool_use",
                        "id": tool_call_id,
                        "name": function.name,
                        "input": serde_json::from_str::<Value>(&function.arguments)
                            .unwrap_or(json!({})),
                    }]
                }));
            }
            MessageContent::ToolResult { tool_call_id, content } => {
                out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_call_id,
                        "content": content,
                    }]
                }));
            }
        }
    }
    (system_text, out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── parse_dialect_a_event ─────────────────────────────────────────────────

    #[test]
    fn content_block_start_tool_use_emits_tool_call() {
        let v = serde_json::json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": { "type": "tool_use", "id": "toolu_01", "name": "bash" }
        });
        let ev = parse_dialect_a_event(&v);
        assert!(
            matches!(&ev, ResponseEvent::ToolCall { index, id, name, arguments }
                if *index == 0 && id == "toolu_01" && name == "bash" && arguments.is_empty()),
            "unexpected: {ev:?}"
        );
    }

    #[test]
    fn content_block_start_preserves_index() {
        let v = serde_json::json!({
            "type": "content_block_start",
            "index": 2,
            "content_block": { "type": "tool_use", "id": "toolu_02", "name": "fetch" }
        });
        let ev = parse_dialect_a_event(&v);
        assert!(matches!(&ev, ResponseEvent::ToolCall { index, .. } if *index == 2));
    }

    #[test]
    fn content_block_delta_text_delta() {
        let v = serde_json::json!({
            "type": "content_block_delta",
            "delta": { "type": "text_delta", "text": "world" }
        });
        let ev = parse_dialect_a_event(&v);
        assert!(matches!(ev, ResponseEvent::TextDelta(t) if t == "world"));
    }

    #[test]
    fn content_block_delta_input_json_delta() {
        let v = serde_json::json!({
            "type": "content_block_delta",
            "index": 1,
            "delta": { "type": "input_json_delta", "partial_json": "{\"key\":" }
        });
        let ev = parse_dialect_a_event(&v);
        assert!(
            matches!(&ev, ResponseEvent::ToolCall { index, arguments, .. }
                if *index == 1 && arguments == "{\"key\":"),
            "unexpected: {ev:?}"
        );
    }

    #[test]
    fn message_delta_max_tokens_stop_reason() {
        let v = serde_json::json!({
            "type": "message_delta",
            "delta": { "stop_reason": "max_tokens" }
        });
        assert!(matches!(parse_dialect_a_event(&v), ResponseEvent::MaxTokens));
    }

    #[test]
    fn message_stop_yields_done() {
        let v = serde_json::json!({ "type": "message_stop" });
        assert!(matches!(parse_dialect_a_event(&v), ResponseEvent::Done));
    }

    #[test]
    fn unknown_event_type_is_empty_delta() {
        let v = serde_json::json!({ "type": "ping" });
        assert!(matches!(parse_dialect_a_event(&v), ResponseEvent::TextDelta(t) if t.is_empty()));
    }

    // ── Message serialization ─────────────────────────────────────────────────

    #[test]
    fn plain_text_message_serialized_correctly() {
        let (sys, msgs) = build_dialect_a_messages(&[Message::user("hello")]);
        assert!(sys.is_empty());
        assert_eq!(msgs[0]["role"], "user");
        assert_eq!(msgs[0]["content"], "hello");
    }

    #[test]
    fn system_message_extracted_to_system_text() {
        let (sys, msgs) =
            build_dialect_a_messages(&[Message::system("be helpful"), Message::user("hi")]);
        assert_eq!(sys, "be helpful");
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn tool_call_becomes_tool_use_block() {
        let msg = Message::tool_call("tc-42", "bash", r#"{"command":"ls"}"#);
        let (_, msgs) = build_dialect_a_messages(&[msg]);
        let block = &msgs[0]["content"][0];
        assert_eq!(msgs[0]["role"], "assistant");
        assert_eq!(block["type"], "tool_use");
        assert_eq!(block["id"], "tc-42");
        assert_eq!(block["name"], "bash");
        assert_eq!(block["input"]["command"], "ls");
    }

    #[test]
    fn tool_result_becomes_user_role_block() {
        let msg = Message::tool_result("tc-42", "a.txt\nb.txt");
        let (_, msgs) = build_dialect_a_messages(&[msg]);
        assert_eq!(msgs[0]["role"], "user");
        let block = &msgs[0]["content"][0];
        assert_eq!(block["type"], "tool_result");
        assert_eq!(block["tool_use_id"], "tc-42");
    }

    #[test]
    fn unparseable_tool_arguments_fall_back_to_empty_object() {
        let msg = Message::tool_call("tc-1", "bash", "{not json");
        let (_, msgs) = build_dialect_a_messages(&[msg]);
        assert!(msgs[0]["content"][0]["input"].is_object());
    }
}
