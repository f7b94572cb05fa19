// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

/// Events emitted by a runner during a single turn.
/// The gateway subscribes and forwards them to the originating channel.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    /// A text chunk streamed from the model
    Chunk(String),
    /// The model has requested a tool call
    ToolCallStarted {
        call_id: String,
        tool_name: String,
        args: Value,
    },
    /// A tool call finished
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// The turn is over; `text` may be a suppression sentinel
    Completed { text: String },
    /// A recoverable error occurred
    Error(String),
}
