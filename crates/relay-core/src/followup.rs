// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

/// Where steered messages land.
///
/// The gateway's implementation injects into an active runner, or routes the
/// message as a fresh arrival when the runner is idle.
#[async_trait]
pub trait FollowupTarget<M>: Send + Sync {
    async fn deliver(&self, session_key: &str, msg: M);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FollowupMode {
    /// Forward immediately — the real-time "ask mid-tool" path.
    #[default]
    Steer,
    /// Accumulate per session until drained.  Reserved for deterministic
    /// replay; the gateway does not currently drain it.
    Collect,
}

/// Per-session inbox for messages that arrive while a runner is busy.
///
/// Generic over the queued message type so the gateway can queue full
/// inbound messages (routing fields intact) while tests use plain strings.
pub struct FollowupQueue<M> {
    mode: FollowupMode,
    target: Arc<dyn FollowupTarget<M>>,
    collected: Mutex<HashMap<String, Vec<M>>>,
}

impl<M: Send + 'static> FollowupQueue<M> {
    pub fn new(mode: FollowupMode, target: Arc<dyn FollowupTarget<M>>) -> Self {
        Self {
            mode,
            target,
            collected: Mutex::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> FollowupMode {
        self.mode
    }

    pub async fn enqueue(&self, session_key: &str, msg: M) {
        match self.mode {
            FollowupMode::Steer => self.target.deliver(session_key, msg).await,
            FollowupMode::Collect => {
                self.collected
                    .lock()
                    .unwrap()
                    .entry(session_key.to_string())
                    .or_default()
                    .push(msg);
            }
        }
    }

    /// Return and clear everything collected for `session_key`.
    pub fn drain(&self, session_key: &str) -> Vec<M> {
        self.collected
            .lock()
            .unwrap()
            .remove(session_key)
            .unwrap_or_default()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
