// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Identity of the remote peer on a channel, used by routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerId {
    /// Peer kind as the transport reports it, e.g. `user`, `group`.
    pub kind: String,
    pub id: String,
}

/// A normalised inbound event, ready for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub channel: String,
    /// Sender identity as the transport reports it.  The synthetic value
    /// `subagent-announce` marks gateway-internal re-entry.
    pub from: String,
    pub text: String,
    /// Stable conversation address, `<channel>:<peer>` for ordinary
    /// transports.
    pub session_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

/// An outbound reply.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub text: String,
    /// One-line recap of tool activity, for transports that render it.
    pub tool_calls_summary: Option<String>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), tool_calls_summary: None }
    }
}

/// Where channels deliver normalised inbound messages.
pub type IngressSender = mpsc::Sender<IncomingMessage>;

/// A transport adapter.
///
/// The gateway hands every channel one ingress sender at startup; beyond
/// that it never looks inside channel-specific state.  The streaming helpers
/// default to no-ops — only interactive transports (terminal sockets)
/// render per-chunk output.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Begin receiving.  Inbound events go to `ingress` as
    /// [`IncomingMessage`]s.
    async fn start(&self, ingress: IngressSender) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Ship a final reply for `session_key`.
    async fn send(&self, session_key: &str, msg: &OutgoingMessage) -> anyhow::Result<()>;

    async fn send_typing(&self, _session_key: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_chunk(&self, _session_key: &str, _text: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_tool_call(
        &self,
        _session_key: &str,
        _name: &str,
        _args: &serde_json::Value,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_tool_result(
        &self,
        _session_key: &str,
        _name: &str,
        _output: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
