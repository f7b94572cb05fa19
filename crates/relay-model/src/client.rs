// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    ChatOutcome, ChatRequest, FinishReason, ModelDialect, ResponseEvent, ToolInvocation,
};

/// Callbacks invoked while a turn streams.
///
/// `on_chunk` fires for every appended text fragment; `on_tool_call` fires
/// once per tool call, after its argument JSON has been fully assembled.
#[derive(Default)]
pub struct ChatCallbacks {
    pub on_chunk: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub on_tool_call: Option<Box<dyn Fn(&ToolInvocation) + Send + Sync>>,
}

impl ChatCallbacks {
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The caller aborted the turn; reported distinctly from transport faults.
    #[error("chat cancelled")]
    Cancelled,
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Streams one turn of chat+tools against a model endpoint and aggregates
/// the dialect's delta events into a [`ChatOutcome`].
///
/// The two wire dialects differ in framing only; the reassembly rules here
/// apply identically to both: tool calls arriving as indexed partials are
/// joined by index, the name is set once, and arguments are concatenated as
/// raw JSON text and parsed on completion.
pub struct ModelClient {
    dialect: Box<dyn ModelDialect>,
}

impl ModelClient {
    pub fn new(dialect: Box<dyn ModelDialect>) -> Self {
        Self { dialect }
    }

    pub fn model_name(&self) -> &str {
        self.dialect.model_name()
    }

    pub fn dialect_name(&self) -> &str {
        self.dialect.name()
    }

    /// Run one streaming turn.  Returns the aggregated outcome, or
    /// [`ChatError::Cancelled`] when `cancel` fires mid-stream.
    pub async fn chat(
        &self,
        req: ChatRequest,
        callbacks: &ChatCallbacks,
        cancel: &CancellationToken,
    ) -> Result<ChatOutcome, ChatError> {
        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            s = self.dialect.complete(req) => s?,
        };

        let mut content = String::new();
        // Keyed by the parallel-tool-call index from the provider.  Dialect B
        // interleaves chunks for different tool calls by index; dialect A uses
        // the content-block index.
        let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();
        let mut finish_reason = FinishReason::Stop;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChatError::Cancelled),
                ev = stream.next() => ev,
            };
            let Some(event) = event else { break };
            match event? {
                ResponseEvent::TextDelta(delta) if !delta.is_empty() => {
                    if let Some(cb) = &callbacks.on_chunk {
                        cb(&delta);
                    }
                    content.push_str(&delta);
                }
                ResponseEvent::TextDelta(_) => {}
                ResponseEvent::ToolCall { index, id, name, arguments } => {
                    let ptc = pending.entry(index).or_insert_with(PendingToolCall::default);
                    if !id.is_empty() {
                        ptc.id = id;
                    }
                    if !name.is_empty() {
                        ptc.name = name;
                    }
                    ptc.args_buf.push_str(&arguments);
                }
                ResponseEvent::MaxTokens => {
                    finish_reason = FinishReason::MaxTokens;
                }
                ResponseEvent::Done => break,
                ResponseEvent::Error(e) => {
                    warn!("model stream error: {e}");
                }
            }
        }

        // Flush accumulated parallel tool calls, ordered by index.  Calls
        // with an empty name cannot be dispatched; calls whose arguments do
        // not parse as JSON are dropped rather than crashing the turn.
        let mut pending_sorted: Vec<(u32, PendingToolCall)> = pending.into_iter().collect();
        pending_sorted.sort_by_key(|(idx, _)| *idx);

        let mut tool_calls = Vec::new();
        for (i, (_, ptc)) in pending_sorted.into_iter().enumerate() {
            match ptc.finish(i) {
                Some(tc) => {
                    if let Some(cb) = &callbacks.on_tool_call {
                        cb(&tc);
                    }
                    tool_calls.push(tc);
                }
                None => continue,
            }
        }

        if !tool_calls.is_empty() && finish_reason == FinishReason::Stop {
            finish_reason = FinishReason::ToolCalls;
        }

        Ok(ChatOutcome { content, tool_calls, finish_reason })
    }
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    /// Resolve the accumulated partials into a dispatchable invocation.
    ///
    /// Returns `None` when the call is undispatchable: no name, or argument
    /// text that is not valid JSON.  An empty argument buffer resolves to
    /// `{}` (providers treat absent arguments as the empty object).  An
    /// empty id gets a synthetic fallback so the turn can still complete.
    fn finish(self, position: usize) -> Option<ToolInvocation> {
        if self.name.is_empty() {
            warn!(tool_call_id = %self.id, "dropping tool call with empty name from model");
            return None;
        }
        let arguments = if self.args_buf.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            match serde_json::from_str(&self.args_buf) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        tool_name = %self.name,
                        tool_call_id = %self.id,
                        error = %e,
                        "dropping tool call with malformed JSON arguments"
                    );
                    return None;
                }
            }
        };
        let id = if self.id.is_empty() {
            warn!(tool_name = %self.name, "tool call had empty id; generating synthetic id");
            format!("tc_synthetic_{position}")
        } else {
            self.id
        };
        Some(ToolInvocation { id, name: self.name, arguments })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
