// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Channel, IncomingMessage, IngressSender, OutgoingMessage};

/// In-memory channel double that records everything sent through it and
/// lets tests push inbound messages.  Deterministic and network-free.
pub struct RecordingChannel {
    name: String,
    ingress: Mutex<Option<IngressSender>>,
    /// `(session_key, text)` pairs in send order.
    pub sent: Mutex<Vec<(String, String)>>,
    /// Session keys that received a typing signal.
    pub typing: Mutex<Vec<String>>,
    /// `(session_key, chunk)` pairs in stream order.
    pub chunks: Mutex<Vec<(String, String)>>,
}

impl RecordingChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ingress: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            typing: Mutex::new(Vec::new()),
            chunks: Mutex::new(Vec::new()),
        }
    }

    /// Deliver an inbound message as if the transport received it from
    /// `from`.  The session key follows the `<channel>:<peer>` convention.
    pub async fn push_incoming(&self, from: &str, text: &str) {
        let msg = IncomingMessage {
            channel: self.name.clone(),
            from: from.to_string(),
            text: text.to_string(),
            session_key: format!("{}:{}", self.name, from),
            peer: None,
            account_id: None,
            guild_id: None,
            team_id: None,
        };
        self.push_incoming_message(msg).await;
    }

    /// Deliver a fully specified inbound message.
    pub async fn push_incoming_message(&self, msg: IncomingMessage) {
        let tx = self
            .ingress
            .lock()
            .unwrap()
            .clone()
            .expect("channel not started");
        tx.send(msg).await.expect("gateway ingress closed");
    }

    /// All texts sent to `session_key`, in order.
    pub fn sent_to(&self, session_key: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == session_key)
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, ingress: mpsc::Sender<IncomingMessage>) -> anyhow::Result<()> {
        *self.ingress.lock().unwrap() = Some(ingress);
        Ok(())
    }

    async fn send(&self, session_key: &str, msg: &OutgoingMessage) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((session_key.to_string(), msg.text.clone()));
        Ok(())
    }

    async fn send_typing(&self, session_key: &str) -> anyhow::Result<()> {
        self.typing.lock().unwrap().push(session_key.to_string());
        Ok(())
    }

    async fn send_chunk(&self, session_key: &str, text: &str) -> anyhow::Result<()> {
        self.chunks
            .lock()
            .unwrap()
            .push((session_key.to_string(), text.to_string()));
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
