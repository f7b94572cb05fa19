// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so enabled-unless-disabled fields need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding all persistent state: the session index, per-session
    /// transcripts, and the keyed stores for agents, providers, bindings,
    /// subagent runs, and cron jobs.
    ///
    /// Defaults to `~/.local/share/relay`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub subagents: SubagentConfig,
}

impl Config {
    /// Resolved state directory (config value or the platform default).
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("relay")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Fallback agent id used when routing resolves nothing and no stored
    /// agent is marked default.
    #[serde(default = "GatewayConfig::default_agent_id")]
    pub default_agent_id: String,
}

impl GatewayConfig {
    fn default_agent_id() -> String {
        "default".into()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_agent_id: Self::default_agent_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    /// Start the cron scheduler with `relay serve`.  Jobs stay stored either
    /// way; disabling only stops the per-job timer tasks.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentConfig {
    /// Minutes a finished `cleanup=keep` subagent run stays in the registry
    /// before the sweeper archives it.
    #[serde(default = "SubagentConfig::default_archive_after_minutes")]
    pub archive_after_minutes: u64,
}

impl SubagentConfig {
    fn default_archive_after_minutes() -> u64 {
        60
    }
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            archive_after_minutes: Self::default_archive_after_minutes(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
