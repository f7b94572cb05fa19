// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Debounce + collect pipeline for subagent completions.
//!
//! Completions for the same requester that land within the debounce window
//! are merged into a single trigger so a parent that fanned out several
//! subagents in one turn gets one combined announcement instead of a burst.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use relay_store::{EntryRole, SessionManager};
use relay_tools::{GatewayRef, TriggerOutcome};

use crate::{SubagentOutcome, SubagentRun};

/// Debounce window.  Wide enough that parallel spawns launched in one model
/// turn arrive together, short enough that a lone completion is still
/// reported promptly.
pub const ANNOUNCE_DEBOUNCE_MS: u64 = 2000;

struct AnnounceItem {
    run: SubagentRun,
    findings: String,
    error: Option<String>,
    /// Resolves with `did_announce` once this item's batch has been drained.
    done: Option<oneshot::Sender<bool>>,
}

#[derive(Default)]
struct QueueState {
    items: Vec<AnnounceItem>,
    /// Bumped on every enqueue; a pending timer only drains when its
    /// generation still matches, which is what "resetting" the debounce
    /// timer means here.
    generation: u64,
    draining: bool,
}

pub struct AnnouncePipeline {
    sessions: Arc<SessionManager>,
    queues: StdMutex<HashMap<String, QueueState>>,
}

impl AnnouncePipeline {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            queues: StdMutex::new(HashMap::new()),
        }
    }

    /// Announce one finished run to its requester.
    ///
    /// Loads the subagent's findings, queues them for the requester, and
    /// (re)arms the debounce timer.  The returned receiver resolves once the
    /// batch containing this item has been drained, with whether the trigger
    /// reached the parent.
    pub async fn run_announce_flow(
        self: &Arc<Self>,
        run: SubagentRun,
        error: Option<String>,
        sink: Arc<dyn GatewayRef>,
    ) -> oneshot::Receiver<bool> {
        let findings = self.load_findings(&run.child_session_key).await;
        let (done_tx, done_rx) = oneshot::channel();
        let requester = run.requester_session_key.clone();

        let generation = {
            let mut queues = self.queues.lock().unwrap();
            let state = queues.entry(requester.clone()).or_default();
            state.items.push(AnnounceItem {
                run,
                findings,
                error,
                done: Some(done_tx),
            });
            state.generation += 1;
            state.generation
        };
        self.arm_timer(requester, generation, sink);
        done_rx
    }

    /// The subagent's last assistant transcript entry; empty on error or
    /// when the child session has already vanished.
    async fn load_findings(&self, child_session_key: &str) -> String {
        let Some(session) = self.sessions.find_by_key(child_session_key).await else {
            return String::new();
        };
        match self.sessions.load_transcript(&session.session_id).await {
            Ok(entries) => entries
                .iter()
                .rev()
                .find(|e| e.role == EntryRole::Assistant)
                .map(|e| e.content.clone())
                .unwrap_or_default(),
            Err(e) => {
                debug!(child_session_key, error = %e, "no findings transcript");
                String::new()
            }
        }
    }

    fn arm_timer(self: &Arc<Self>, session_key: String, generation: u64, sink: Arc<dyn GatewayRef>) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ANNOUNCE_DEBOUNCE_MS)).await;
            pipeline.drain(&session_key, generation, sink).await;
        });
    }

    /// Drain the requester's queue into a single `trigger_agent` call.
    ///
    /// A timer whose generation no longer matches was reset by a later
    /// enqueue and does nothing.  Concurrent drains on the same key are
    /// forbidden; items enqueued while a drain is in flight are picked up by
    /// the timer re-armed on completion.
    async fn drain(self: &Arc<Self>, session_key: &str, generation: u64, sink: Arc<dyn GatewayRef>) {
        let mut batch = {
            let mut queues = self.queues.lock().unwrap();
            let Some(state) = queues.get_mut(session_key) else {
                return;
            };
            if state.generation != generation || state.draining {
                return;
            }
            if state.items.is_empty() {
                queues.remove(session_key);
                return;
            }
            state.draining = true;
            std::mem::take(&mut state.items)
        };

        let channel = batch[0].run.requester_channel.clone();
        let message = if batch.len() == 1 {
            compose_single(&batch[0])
        } else {
            compose_collected(&batch)
        };

        let outcome = sink.trigger_agent(session_key, &channel, &message).await;
        let did_announce = outcome != TriggerOutcome::Failed;
        if !did_announce {
            warn!(session_key, "announce trigger failed");
        }
        for item in &mut batch {
            if let Some(tx) = item.done.take() {
                let _ = tx.send(did_announce);
            }
        }

        let rearm = {
            let mut queues = self.queues.lock().unwrap();
            match queues.get_mut(session_key) {
                Some(state) => {
                    state.draining = false;
                    if state.items.is_empty() {
                        queues.remove(session_key);
                        None
                    } else {
                        Some(state.generation)
                    }
                }
                None => None,
            }
        };
        if let Some(generation) = rearm {
            self.arm_timer(session_key.to_string(), generation, sink);
        }
    }
}

fn status_phrase(item: &AnnounceItem) -> String {
    match item.run.outcome {
        Some(SubagentOutcome::Ok) => "completed successfully".to_string(),
        Some(SubagentOutcome::Error) => format!(
            "failed: {}",
            item.error.as_deref().unwrap_or("unknown error")
        ),
        Some(SubagentOutcome::Timeout) => "failed: timed out".to_string(),
        Some(SubagentOutcome::Interrupted) | None => "finished with unknown status".to_string(),
    }
}

fn status_word(outcome: Option<SubagentOutcome>) -> &'static str {
    match outcome {
        Some(SubagentOutcome::Ok) => "ok",
        Some(SubagentOutcome::Error) => "error",
        Some(SubagentOutcome::Timeout) => "timeout",
        Some(SubagentOutcome::Interrupted) => "interrupted",
        None => "unknown",
    }
}

fn format_duration(d: Option<chrono::Duration>) -> String {
    let Some(d) = d else { return "unknown time".to_string() };
    let ms = d.num_milliseconds().max(0);
    if ms < 1000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}m{}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}

fn compose_single(item: &AnnounceItem) -> String {
    let findings = if item.findings.is_empty() {
        "(no findings)"
    } else {
        item.findings.as_str()
    };
    format!(
        "Background task \"{label}\" {status}.\n\n{findings}\n\n(took {duration})\n\n\
         Summarize this naturally for the user. Keep it brief (1-2 sentences). \
         You can respond with NO_REPLY if no announcement is needed.",
        label = item.run.display_label(),
        status = status_phrase(item),
        duration = format_duration(item.run.duration()),
    )
}

fn compose_collected(items: &[AnnounceItem]) -> String {
    let mut out = format!("[{} background tasks completed]\n", items.len());
    for (i, item) in items.iter().enumerate() {
        out.push_str(&format!(
            "\n--- Task {n}: \"{label}\" ({status}) ---\n{findings}\n",
            n = i + 1,
            label = item.run.display_label(),
            status = status_word(item.run.outcome),
            findings = if item.findings.is_empty() { "(no findings)" } else { &item.findings },
        ));
    }
    out.push_str(
        "\nSummarize these results together for the user. Keep it brief. \
         You can respond with NO_REPLY if no announcement is needed.",
    );
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
