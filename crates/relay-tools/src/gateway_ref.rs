// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;

/// How a [`GatewayRef::trigger_agent`] call was absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Injected into a runner that was already mid-loop.
    Steered,
    /// No active runner; a fresh run was kicked off.
    Invoked,
    Failed,
}

/// The slice of the gateway that tools are allowed to re-enter.
///
/// Tools receive this via [`crate::ToolContext`] instead of importing the
/// gateway crate, which keeps the dependency edge pointing one way.
#[async_trait]
pub trait GatewayRef: Send + Sync {
    /// Append an assistant entry to the session's transcript AND push it out
    /// on the channel, without re-triggering the agent.
    async fn send_to_session(
        &self,
        session_key: &str,
        channel: &str,
        text: &str,
    ) -> anyhow::Result<()>;

    /// Hand `message` to the session's agent: injected when a runner is
    /// active, otherwise routed as a fresh arrival.
    async fn trigger_agent(
        &self,
        session_key: &str,
        channel: &str,
        message: &str,
    ) -> TriggerOutcome;
}
