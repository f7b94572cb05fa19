// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod events;
mod followup;
mod prompts;
mod runner;

pub use events::RunnerEvent;
pub use followup::{FollowupMode, FollowupQueue, FollowupTarget};
pub use prompts::{compose_system_prompt, DEFAULT_SYSTEM_PROMPT};
pub use runner::{
    AgentRunner, RunSource, RunnerParams, ABORTED_SENTINEL, DONE_SENTINEL, MAX_ITERATIONS,
    NO_REPLY,
};
