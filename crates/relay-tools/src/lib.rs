// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod gateway_ref;
pub mod registry;
pub mod tool;

pub use gateway_ref::{GatewayRef, TriggerOutcome};
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{Tool, ToolCall, ToolContext, ToolOutput};
