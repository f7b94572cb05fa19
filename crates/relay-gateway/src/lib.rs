// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agents;
mod announce;
mod gateway;
mod router;
mod subagent;
mod tools;

pub use agents::{AgentConfig, AgentStore};
pub use announce::{AnnouncePipeline, ANNOUNCE_DEBOUNCE_MS};
pub use gateway::{Gateway, GatewayBuilder, ModelFactory};
pub use router::{Binding, BindingMatch, MatchedBy, RouteInput, RouteResolution, Router};
pub use subagent::{
    RegisterParams, SubagentCleanup, SubagentOutcome, SubagentRegistry, SubagentRun,
};
pub use tools::{SessionSendTool, SpawnSubagentTool, TelegramSendTool};
