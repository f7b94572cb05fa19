// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use relay_store::KeyedStore;

/// One configured agent: a model plus an optional persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub name: String,
    /// Model name, resolved through the provider registry.
    pub model: String,
    /// Overrides the resolved provider's endpoint for this agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// Persisted agent mapping.  Exactly one agent is the default; the default
/// cannot be deleted.
pub struct AgentStore {
    store: KeyedStore<AgentConfig>,
}

impl AgentStore {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let store = KeyedStore::open(path.into()).context("opening agent store")?;
        Ok(Self { store })
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentConfig> {
        self.store.get(agent_id)
    }

    /// The agent marked default, or the first stored one as a fallback.
    pub fn default_agent(&self) -> Option<AgentConfig> {
        self.store
            .values()
            .into_iter()
            .find(|a| a.is_default)
            .or_else(|| self.store.values().into_iter().next())
    }

    pub fn list(&self) -> Vec<AgentConfig> {
        self.store.values()
    }

    /// Insert or replace an agent.  The first agent ever stored becomes the
    /// default automatically.
    pub fn upsert(&self, mut agent: AgentConfig) -> anyhow::Result<()> {
        if self.store.is_empty() {
            agent.is_default = true;
        }
        self.store.insert(agent.agent_id.clone(), agent)?;
        Ok(())
    }

    /// Mark `agent_id` as the default, clearing the flag everywhere else.
    pub fn set_default(&self, agent_id: &str) -> anyhow::Result<()> {
        if !self.store.contains(agent_id) {
            bail!("no such agent: {agent_id}");
        }
        for (key, mut agent) in self.store.entries() {
            let should_be = key == agent_id;
            if agent.is_default != should_be {
                agent.is_default = should_be;
                self.store.insert(key, agent)?;
            }
        }
        Ok(())
    }

    pub fn delete(&self, agent_id: &str) -> anyhow::Result<()> {
        let Some(agent) = self.store.get(agent_id) else {
            bail!("no such agent: {agent_id}");
        };
        if agent.is_default {
            bail!("cannot delete the default agent");
        }
        self.store.remove(agent_id)?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
