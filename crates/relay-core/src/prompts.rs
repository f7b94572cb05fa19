// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Built-in system prompt, used when the routed agent has none configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a helpful assistant reachable over chat. Keep replies concise and \
conversational. Use the available tools when a task calls for them instead \
of guessing. If a message tells you that you may respond with NO_REPLY, \
reply with exactly NO_REPLY to stay silent.";

/// Compose the system prompt for one run.
///
/// Layout: optional caller-provided `extra` block first (subagent task
/// context, cron delivery contract), then the agent's configured prompt or
/// the built-in default, then the auto-generated skills catalogue.  Composed
/// exactly once per run; on a session's first run the result becomes the
/// first transcript entry.
pub fn compose_system_prompt(
    custom: Option<&str>,
    skills: &[(String, String)],
    extra: Option<&str>,
) -> String {
    let mut out = String::new();
    if let Some(extra) = extra {
        let trimmed = extra.trim();
        if !trimmed.is_empty() {
            out.push_str(trimmed);
            out.push_str("\n\n");
        }
    }
    out.push_str(custom.unwrap_or(DEFAULT_SYSTEM_PROMPT).trim_end());
    if !skills.is_empty() {
        out.push_str("\n\n<available_skills>\n");
        for (name, description) in skills {
            out.push_str(&format!("- {name}: {description}\n"));
        }
        out.push_str("</available_skills>");
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
