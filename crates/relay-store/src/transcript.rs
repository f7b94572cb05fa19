// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::StoreError;

/// One saved turn in a session's append-only conversation log.
///
/// Serialised as exactly one self-contained JSON object per line in the
/// session's `.jsonl` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: EntryRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Declared tool calls; present only on assistant entries that requested
    /// tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<TranscriptToolCall>>,
    /// Links a tool entry back to the assistant entry that declared the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object
    pub arguments: String,
}

impl TranscriptEntry {
    fn new(role: EntryRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(EntryRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(EntryRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(EntryRole::Assistant, content)
    }

    pub fn assistant_with_calls(
        content: impl Into<String>,
        calls: Vec<TranscriptToolCall>,
    ) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::new(EntryRole::Assistant, content)
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(EntryRole::Tool, content)
        }
    }
}

/// Append one entry to the transcript file at `path`.
pub(crate) fn append_entry(path: &Path, entry: &TranscriptEntry) -> Result<(), StoreError> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let line = serde_json::to_string(entry)?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// Load every entry from the transcript file at `path`.
///
/// A missing file is an empty transcript.  Corrupt lines are skipped
/// silently (logged at debug level) so one bad write never poisons a
/// session.
pub(crate) fn load_entries(path: &Path) -> Result<Vec<TranscriptEntry>, StoreError> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TranscriptEntry>(line) {
            Ok(e) => entries.push(e),
            Err(e) => {
                debug!(path = %path.display(), line = n + 1, error = %e, "skipping corrupt transcript line");
            }
        }
    }
    Ok(entries)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
