// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::{Channel, IngressSender};

/// Wires transport adapters to the gateway's ingress and egress.
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self { channels: HashMap::new() }
    }

    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start every adapter, handing each the shared ingress sender.  A
    /// channel that fails to start is logged and skipped; the rest keep
    /// running.
    pub async fn start_all(&self, ingress: IngressSender) {
        for (name, channel) in &self.channels {
            if let Err(e) = channel.start(ingress.clone()).await {
                warn!(channel = %name, error = %e, "channel failed to start");
            }
        }
    }

    pub async fn stop_all(&self) {
        for (name, channel) in &self.channels {
            if let Err(e) = channel.stop().await {
                warn!(channel = %name, error = %e, "channel failed to stop");
            }
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordingChannel;

    #[test]
    fn register_and_get_by_name() {
        let mut reg = ChannelRegistry::new();
        reg.register(Arc::new(RecordingChannel::new("telegram")));
        assert!(reg.get("telegram").is_some());
        assert!(reg.get("discord").is_none());
    }

    #[test]
    fn names_sorted() {
        let mut reg = ChannelRegistry::new();
        reg.register(Arc::new(RecordingChannel::new("z")));
        reg.register(Arc::new(RecordingChannel::new("a")));
        assert_eq!(reg.names(), vec!["a", "z"]);
    }

    #[tokio::test]
    async fn start_all_hands_out_ingress() {
        let mut reg = ChannelRegistry::new();
        let ch = Arc::new(RecordingChannel::new("test"));
        reg.register(ch.clone());
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        reg.start_all(tx).await;
        ch.push_incoming("alice", "hello").await;
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "test");
        assert_eq!(msg.text, "hello");
    }
}
