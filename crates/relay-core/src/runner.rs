// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use relay_model::{
    ChatCallbacks, ChatError, ChatRequest, Message, ModelClient, ToolSchema as ModelToolSchema,
};
use relay_store::{
    EntryRole, SessionManager, StoreError, TranscriptEntry, TranscriptToolCall,
};
use relay_tools::{ToolCall, ToolContext, ToolRegistry};

use crate::RunnerEvent;

/// Upper bound on model calls per turn, shared between the main loop and the
/// injection-drain phase.
pub const MAX_ITERATIONS: u32 = 10;

const MAX_EMPTY_RETRIES: u32 = 2;

/// Whole-reply sentinel: the agent chose to deliver via a send-tool instead.
pub const NO_REPLY: &str = "NO_REPLY";
/// Fallback reply when the loop ended with no content.
pub const DONE_SENTINEL: &str = "(done)";
/// Reply when the turn was aborted mid-flight.
pub const ABORTED_SENTINEL: &str = "(aborted)";

/// What kind of arrival started this run; controls the input framing so the
/// model can tell spontaneous task firings apart from user turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSource {
    User,
    Cron,
    SubagentAnnounce,
}

pub struct RunnerParams {
    pub session_id: String,
    pub session_key: String,
    pub agent_id: String,
    pub channel: String,
    pub system_prompt: String,
    pub is_subagent: bool,
    pub store: Arc<SessionManager>,
    pub model: Arc<ModelClient>,
    pub tools: Arc<ToolRegistry>,
    pub tool_ctx: ToolContext,
}

struct RunnerState {
    /// In-memory view of the transcript.  Survives external session deletion
    /// so an in-flight turn can complete against what it has already seen.
    entries: Vec<TranscriptEntry>,
    /// How many on-disk entries have been mirrored into `entries`.
    synced: usize,
}

/// Executes the bounded tool-calling loop for one session.
///
/// A runner is bound to exactly one session and is serialised per session:
/// the run lock guarantees at most one loop iteration executes at a time,
/// while `inject` and `abort` stay callable from other tasks mid-run.
pub struct AgentRunner {
    session_id: String,
    session_key: String,
    agent_id: String,
    channel: String,
    system_prompt: String,
    is_subagent: bool,
    store: Arc<SessionManager>,
    model: Arc<ModelClient>,
    tools: Arc<ToolRegistry>,
    tool_ctx: ToolContext,
    injected: StdMutex<VecDeque<String>>,
    running: Arc<AtomicBool>,
    cancel: StdMutex<CancellationToken>,
    run_lock: Mutex<RunnerState>,
}

impl AgentRunner {
    pub fn new(params: RunnerParams) -> Self {
        Self {
            session_id: params.session_id,
            session_key: params.session_key,
            agent_id: params.agent_id,
            channel: params.channel,
            system_prompt: params.system_prompt,
            is_subagent: params.is_subagent,
            store: params.store,
            model: params.model,
            tools: params.tools,
            tool_ctx: params.tool_ctx,
            injected: StdMutex::new(VecDeque::new()),
            running: Arc::new(AtomicBool::new(false)),
            cancel: StdMutex::new(CancellationToken::new()),
            run_lock: Mutex::new(RunnerState { entries: Vec::new(), synced: 0 }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue a message into the running loop; the next model call sees it as
    /// the final user entry, prefixed with `[INTERRUPT]`.
    pub fn inject(&self, text: impl Into<String>) {
        self.injected.lock().unwrap().push_back(text.into());
    }

    /// Abort the in-flight model call and all subsequent iterations.
    pub fn abort(&self) {
        self.cancel.lock().unwrap().cancel();
    }

    fn has_injected(&self) -> bool {
        !self.injected.lock().unwrap().is_empty()
    }

    fn pop_injected(&self) -> Option<String> {
        self.injected.lock().unwrap().pop_front()
    }

    /// Run one turn.  Returns the final reply text, which may be one of the
    /// suppression sentinels ([`NO_REPLY`], [`DONE_SENTINEL`],
    /// [`ABORTED_SENTINEL`]) or an `Error: …` message on transport failure.
    pub async fn run(
        &self,
        input: &str,
        source: RunSource,
        events: &mpsc::UnboundedSender<RunnerEvent>,
    ) -> String {
        let mut state = self.run_lock.lock().await;

        let cancel = {
            let mut slot = self.cancel.lock().unwrap();
            *slot = CancellationToken::new();
            slot.clone()
        };

        self.running.store(true, Ordering::SeqCst);
        let _guard = RunningGuard(self.running.clone());

        self.sync_from_store(&mut state).await;
        if state.entries.is_empty() {
            self.append(&mut state, TranscriptEntry::system(self.system_prompt.clone()))
                .await;
        }

        let framed = match source {
            RunSource::User => input.to_string(),
            RunSource::Cron => format!(
                "[SCHEDULED TASK] Execute the following scheduled task and send the result to the user: {input}"
            ),
            RunSource::SubagentAnnounce => format!("[SUBAGENT RESULT] {input}"),
        };
        self.append(&mut state, TranscriptEntry::user(framed)).await;

        let final_text = self.agentic_loop(&mut state, events, &cancel).await;

        let _ = events.send(RunnerEvent::Completed { text: final_text.clone() });
        final_text
    }

    /// The loop: model call → optional tool calls → repeat, with one queued
    /// injection drained per iteration.  Exits on a pure-text response with
    /// nothing pending, on the iteration bound, or on abort.
    async fn agentic_loop(
        &self,
        state: &mut RunnerState,
        events: &mpsc::UnboundedSender<RunnerEvent>,
        cancel: &CancellationToken,
    ) -> String {
        let mut iterations = 0u32;
        let mut empty_retries = 0u32;
        let mut final_response: Option<String> = None;

        while iterations < MAX_ITERATIONS {
            iterations += 1;

            // Pick up entries appended since the last iteration — delivery
            // tools may have side-written to this session's transcript, and
            // the model must see those on its next call.
            self.sync_from_store(state).await;

            if let Some(text) = self.pop_injected() {
                self.append(
                    state,
                    TranscriptEntry::user(format!("[INTERRUPT] New message from user: {text}")),
                )
                .await;
            }

            let req = ChatRequest {
                messages: entries_to_messages(&state.entries),
                tools: self.schemas(),
            };

            let chunk_events = events.clone();
            let callbacks = ChatCallbacks {
                on_chunk: Some(Box::new(move |chunk: &str| {
                    let _ = chunk_events.send(RunnerEvent::Chunk(chunk.to_string()));
                })),
                on_tool_call: None,
            };

            let outcome = match self.model.chat(req, &callbacks, cancel).await {
                Ok(o) => o,
                Err(ChatError::Cancelled) => {
                    debug!(session_key = %self.session_key, "turn aborted");
                    return ABORTED_SENTINEL.to_string();
                }
                Err(ChatError::Transport(e)) => {
                    warn!(session_key = %self.session_key, error = %e, "model call failed");
                    let text = format!("Error: {e}");
                    let _ = events.send(RunnerEvent::Error(text.clone()));
                    self.append(state, TranscriptEntry::assistant(text.clone())).await;
                    return text;
                }
            };

            if !outcome.tool_calls.is_empty() {
                empty_retries = 0;
                let declared: Vec<TranscriptToolCall> = outcome
                    .tool_calls
                    .iter()
                    .map(|tc| TranscriptToolCall {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        arguments: tc.arguments.to_string(),
                    })
                    .collect();
                self.append(
                    state,
                    TranscriptEntry::assistant_with_calls(outcome.content.clone(), declared),
                )
                .await;

                for tc in &outcome.tool_calls {
                    let _ = events.send(RunnerEvent::ToolCallStarted {
                        call_id: tc.id.clone(),
                        tool_name: tc.name.clone(),
                        args: tc.arguments.clone(),
                    });
                    let call = ToolCall {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        args: tc.arguments.clone(),
                    };
                    let output = self.tools.execute(&call, &self.tool_ctx).await;
                    self.append(state, TranscriptEntry::tool(&tc.id, output.content.clone()))
                        .await;
                    let _ = events.send(RunnerEvent::ToolCallFinished {
                        call_id: tc.id.clone(),
                        tool_name: tc.name.clone(),
                        output: output.content,
                        is_error: output.is_error,
                    });
                }
                continue;
            }

            if !outcome.content.is_empty() {
                self.append(state, TranscriptEntry::assistant(outcome.content.clone()))
                    .await;
                final_response = Some(outcome.content);
                if self.has_injected() {
                    // Drain phase: injections that arrived too late for this
                    // response still get a model turn, under the same budget.
                    continue;
                }
                break;
            }

            // Empty response: neither text nor tool calls.
            if empty_retries < MAX_EMPTY_RETRIES {
                empty_retries += 1;
                continue;
            }
            if self.has_injected() {
                continue;
            }
            break;
        }

        final_response.unwrap_or_else(|| DONE_SENTINEL.to_string())
    }

    fn schemas(&self) -> Vec<ModelToolSchema> {
        self.tools
            .schemas_for(self.is_subagent)
            .into_iter()
            .map(|s| ModelToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect()
    }

    /// Mirror any on-disk entries not yet seen into the in-memory view.
    async fn sync_from_store(&self, state: &mut RunnerState) {
        match self.store.load_transcript(&self.session_id).await {
            Ok(disk) => {
                if disk.len() > state.synced {
                    state.entries.extend(disk[state.synced..].iter().cloned());
                    state.synced = disk.len();
                }
            }
            Err(StoreError::SessionNotFound(_)) => {
                debug!(session_key = %self.session_key, "session deleted; running on in-memory view");
            }
            Err(e) => {
                warn!(session_key = %self.session_key, error = %e, "transcript sync failed");
            }
        }
    }

    /// Append to the transcript and the in-memory view.  A session deleted
    /// externally mid-run makes the disk write fail; the turn continues on
    /// the in-memory view and the failure stays silent.
    async fn append(&self, state: &mut RunnerState, entry: TranscriptEntry) {
        match self.store.append(&self.session_id, &entry).await {
            Ok(()) => state.synced += 1,
            Err(StoreError::SessionNotFound(_)) => {
                debug!(session_key = %self.session_key, "append after session deletion; kept in memory");
            }
            Err(e) => {
                warn!(session_key = %self.session_key, error = %e, "transcript append failed");
            }
        }
        state.entries.push(entry);
    }
}

struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Expand transcript entries into the model-facing message array.
///
/// An assistant entry that declared tool calls becomes one text message
/// (when it carried any) plus one `ToolCall` message per declared call —
/// the dialect layer re-coalesces them as its wire format requires.
fn entries_to_messages(entries: &[TranscriptEntry]) -> Vec<Message> {
    let mut out = Vec::with_capacity(entries.len());
    for e in entries {
        match e.role {
            EntryRole::System => out.push(Message::system(&e.content)),
            EntryRole::User => out.push(Message::user(&e.content)),
            EntryRole::Assistant => {
                match &e.tool_calls {
                    Some(calls) => {
                        if !e.content.is_empty() {
                            out.push(Message::assistant(&e.content));
                        }
                        for c in calls {
                            out.push(Message::tool_call(&c.id, &c.name, &c.arguments));
                        }
                    }
                    None => out.push(Message::assistant(&e.content)),
                }
            }
            EntryRole::Tool => {
                let id = e.tool_call_id.as_deref().unwrap_or_default();
                out.push(Message::tool_result(id, &e.content));
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn entries_expand_tool_calls_into_separate_messages() {
        let entries = vec![
            TranscriptEntry::system("sys"),
            TranscriptEntry::user("hi"),
            TranscriptEntry::assistant_with_calls(
                "",
                vec![
                    TranscriptToolCall { id: "a".into(), name: "x".into(), arguments: "{}".into() },
                    TranscriptToolCall { id: "b".into(), name: "y".into(), arguments: "{}".into() },
                ],
            ),
            TranscriptEntry::tool("a", "out-a"),
        ];
        let msgs = entries_to_messages(&entries);
        assert_eq!(msgs.len(), 5);
        assert!(matches!(
            &msgs[2].content,
            relay_model::MessageContent::ToolCall { tool_call_id, .. } if tool_call_id == "a"
        ));
        assert!(matches!(
            &msgs[4].content,
            relay_model::MessageContent::ToolResult { tool_call_id, .. } if tool_call_id == "a"
        ));
    }

    #[test]
    fn assistant_text_alongside_tool_calls_is_preserved() {
        let entries = vec![TranscriptEntry::assistant_with_calls(
            "thinking out loud",
            vec![TranscriptToolCall { id: "a".into(), name: "x".into(), arguments: "{}".into() }],
        )];
        let msgs = entries_to_messages(&entries);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].as_text(), Some("thinking out loud"));
    }
}
