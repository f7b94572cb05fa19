// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use relay_store::{KeyedStore, SessionManager, StoreError};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubagentOutcome {
    Ok,
    Error,
    Timeout,
    /// Assigned at restart to runs that never recorded an end.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubagentCleanup {
    /// Remove the child session once the announce has gone out.
    Delete,
    /// Keep the child session; archive the registry record later.
    Keep,
}

/// One background run, persisted so restarts can account for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentRun {
    pub run_id: String,
    /// Always `subagent:<uuid>` — the prefix is what identifies subagent
    /// contexts to the tool-schema filter.
    pub child_session_key: String,
    pub requester_session_key: String,
    pub requester_channel: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub cleanup: SubagentCleanup,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SubagentOutcome>,
    /// Epoch millis after which the sweeper removes this record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_at_ms: Option<i64>,
}

impl SubagentRun {
    /// Display label: explicit label, or the task text clipped to 60 chars.
    pub fn display_label(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        self.task.chars().take(60).collect()
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.started_at.unwrap_or(self.created_at);
        self.ended_at.map(|end| end - start)
    }
}

pub struct RegisterParams {
    pub requester_session_key: String,
    pub requester_channel: String,
    pub task: String,
    pub label: Option<String>,
    pub cleanup: SubagentCleanup,
}

/// Tracks background runs, their lifecycle, and archival.
///
/// Persisted as one keyed mapping and restored on process start; the store's
/// own lock serialises every mutation per run id, which is required because
/// the registry is hit from runners, tools, and the sweeper concurrently.
pub struct SubagentRegistry {
    store: KeyedStore<SubagentRun>,
    sessions: Arc<SessionManager>,
    archive_after_minutes: u64,
    waiters: StdMutex<HashMap<String, Vec<oneshot::Sender<SubagentRun>>>>,
}

impl SubagentRegistry {
    pub fn open(
        path: impl Into<PathBuf>,
        sessions: Arc<SessionManager>,
        archive_after_minutes: u64,
    ) -> anyhow::Result<Self> {
        let store = KeyedStore::open(path.into()).context("opening subagent store")?;
        Ok(Self {
            store,
            sessions,
            archive_after_minutes,
            waiters: StdMutex::new(HashMap::new()),
        })
    }

    /// Create a run record with a fresh id and child session key.
    pub fn register(&self, params: RegisterParams) -> anyhow::Result<SubagentRun> {
        let run_id = Uuid::new_v4().to_string();
        let run = SubagentRun {
            run_id: run_id.clone(),
            child_session_key: format!("subagent:{}", Uuid::new_v4()),
            requester_session_key: params.requester_session_key,
            requester_channel: params.requester_channel,
            task: params.task,
            label: params.label,
            cleanup: params.cleanup,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            outcome: None,
            archive_at_ms: None,
        };
        self.store.insert(run_id, run.clone())?;
        debug!(run_id = %run.run_id, child = %run.child_session_key, "registered subagent run");
        Ok(run)
    }

    pub fn mark_started(&self, run_id: &str) -> anyhow::Result<()> {
        let Some(mut run) = self.store.get(run_id) else {
            bail!("no such subagent run: {run_id}");
        };
        run.started_at = Some(Utc::now());
        self.store.insert(run_id.to_string(), run)?;
        Ok(())
    }

    /// Record a terminal outcome and wake completion waiters.
    pub fn mark_completed(
        &self,
        run_id: &str,
        outcome: SubagentOutcome,
    ) -> anyhow::Result<SubagentRun> {
        let Some(mut run) = self.store.get(run_id) else {
            bail!("no such subagent run: {run_id}");
        };
        run.ended_at = Some(Utc::now());
        run.outcome = Some(outcome);
        self.store.insert(run_id.to_string(), run.clone())?;

        if let Some(waiters) = self.waiters.lock().unwrap().remove(run_id) {
            for tx in waiters {
                let _ = tx.send(run.clone());
            }
        }
        Ok(run)
    }

    /// Receive a notification when (or immediately if) the run completes.
    pub fn on_completion(&self, run_id: &str) -> oneshot::Receiver<SubagentRun> {
        let (tx, rx) = oneshot::channel();
        match self.store.get(run_id) {
            Some(run) if run.ended_at.is_some() => {
                let _ = tx.send(run);
            }
            _ => {
                self.waiters
                    .lock()
                    .unwrap()
                    .entry(run_id.to_string())
                    .or_default()
                    .push(tx);
            }
        }
        rx
    }

    /// Apply the run's cleanup policy once the announce has gone out (or
    /// definitively failed).
    pub async fn finalize_cleanup(&self, run_id: &str, did_announce: bool) -> anyhow::Result<()> {
        let Some(run) = self.store.get(run_id) else {
            bail!("no such subagent run: {run_id}");
        };
        match run.cleanup {
            SubagentCleanup::Delete if did_announce => {
                if let Some(child) = self.sessions.find_by_key(&run.child_session_key).await {
                    match self.sessions.delete(&child.session_id).await {
                        Ok(()) | Err(StoreError::SessionNotFound(_)) => {}
                        Err(e) => warn!(run_id, error = %e, "child session cleanup failed"),
                    }
                }
                self.store.remove(run_id)?;
            }
            _ => {
                let mut run = run;
                run.archive_at_ms =
                    Some(Utc::now().timestamp_millis() + self.archive_after_minutes as i64 * 60_000);
                self.store.insert(run_id.to_string(), run)?;
            }
        }
        Ok(())
    }

    pub fn get(&self, run_id: &str) -> Option<SubagentRun> {
        self.store.get(run_id)
    }

    pub fn list_by_requester(&self, requester_session_key: &str) -> Vec<SubagentRun> {
        self.store
            .values()
            .into_iter()
            .filter(|r| r.requester_session_key == requester_session_key)
            .collect()
    }

    pub fn list_active(&self) -> Vec<SubagentRun> {
        self.store
            .values()
            .into_iter()
            .filter(|r| r.ended_at.is_none())
            .collect()
    }

    pub fn delete(&self, run_id: &str) -> anyhow::Result<()> {
        self.store.remove(run_id)?;
        Ok(())
    }

    /// Restart recovery: runs restored without an end time were lost
    /// mid-flight.  Mark them interrupted and return them so the caller can
    /// announce each once.
    pub fn mark_interrupted_on_restore(&self) -> Vec<SubagentRun> {
        let mut interrupted = Vec::new();
        for run in self.store.values() {
            if run.ended_at.is_none() {
                match self.mark_completed(&run.run_id, SubagentOutcome::Interrupted) {
                    Ok(run) => interrupted.push(run),
                    Err(e) => warn!(run_id = %run.run_id, error = %e, "interrupt marking failed"),
                }
            }
        }
        if !interrupted.is_empty() {
            info!(count = interrupted.len(), "marked interrupted subagent runs from previous process");
        }
        interrupted
    }

    /// Remove every finished record whose archive deadline has passed.
    pub fn sweep_once(&self) {
        let now = Utc::now().timestamp_millis();
        for run in self.store.values() {
            if let Some(at) = run.archive_at_ms {
                if at <= now {
                    debug!(run_id = %run.run_id, "archiving subagent record");
                    if let Err(e) = self.store.remove(&run.run_id) {
                        warn!(run_id = %run.run_id, error = %e, "archive failed");
                    }
                }
            }
        }
    }

    /// Background sweeper, once per minute.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(SWEEP_INTERVAL).await;
                registry.sweep_once();
            }
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
