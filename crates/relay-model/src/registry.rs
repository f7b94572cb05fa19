// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider registry: resolves a model name to an endpoint, credential, and
//! wire dialect.
//!
//! Model uniqueness across providers is deliberately NOT enforced — the
//! first provider (in insertion order) listing the model wins, which lets
//! operators shadow a hosted model with a local proxy by listing the proxy
//! first.

use serde::{Deserialize, Serialize};

/// The wire encoding a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    /// Messages-API framing (top-level system field, `tool_use` blocks).
    A,
    /// Chat-completions framing (system-as-message, `tool_calls` array).
    B,
}

/// One configured model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,
    pub base_url: String,
    /// Literal API credential.  Prefer `credential_env` in stored configs so
    /// secrets stay out of the state directory.
    #[serde(default)]
    pub credential: Option<String>,
    /// Environment variable that holds the credential (read at resolve time).
    #[serde(default)]
    pub credential_env: Option<String>,
    pub dialect: Dialect,
    /// Models this provider serves.
    #[serde(default)]
    pub models: Vec<String>,
    /// Exactly one provider is marked default; it backs models no provider
    /// lists explicitly.
    #[serde(default)]
    pub is_default: bool,
}

impl ProviderConfig {
    fn resolve_credential(&self) -> Option<String> {
        if let Some(c) = &self.credential {
            return Some(c.clone());
        }
        self.credential_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}

/// Everything the gateway needs to build a [`crate::ModelClient`].
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub provider_id: String,
    pub model: String,
    pub base_url: String,
    pub credential: Option<String>,
    pub dialect: Dialect,
}

/// In-memory view over the persisted provider mapping, in insertion order.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        Self { providers }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// The provider marked default, or the first one as a fallback.
    pub fn default_provider(&self) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|p| p.is_default)
            .or_else(|| self.providers.first())
    }

    /// Resolve `model` to an endpoint.  First provider listing the model
    /// wins; a model nobody lists falls back to the default provider.
    pub fn resolve(&self, model: &str) -> Option<ResolvedModel> {
        let provider = self
            .providers
            .iter()
            .find(|p| p.models.iter().any(|m| m == model))
            .or_else(|| self.default_provider())?;
        Some(ResolvedModel {
            provider_id: provider.id.clone(),
            model: model.to_string(),
            base_url: provider.base_url.clone(),
            credential: provider.resolve_credential(),
            dialect: provider.dialect,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(id: &str, dialect: Dialect, models: &[&str], is_default: bool) -> ProviderConfig {
        ProviderConfig {
            id: id.into(),
            name: id.into(),
            base_url: format!("https://{id}.example/v1"),
            credential: Some("key".into()),
            credential_env: None,
            dialect,
            models: models.iter().map(|m| m.to_string()).collect(),
            is_default,
        }
    }

    #[test]
    fn first_match_wins_when_model_listed_twice() {
        let reg = ProviderRegistry::new(vec![
            provider("one", Dialect::A, &["shared-model"], false),
            provider("two", Dialect::B, &["shared-model"], true),
        ]);
        let r = reg.resolve("shared-model").unwrap();
        assert_eq!(r.provider_id, "one");
        assert_eq!(r.dialect, Dialect::A);
    }

    #[test]
    fn unlisted_model_falls_back_to_default_provider() {
        let reg = ProviderRegistry::new(vec![
            provider("one", Dialect::A, &["model-a"], false),
            provider("two", Dialect::B, &["model-b"], true),
        ]);
        let r = reg.resolve("mystery-model").unwrap();
        assert_eq!(r.provider_id, "two");
        assert_eq!(r.model, "mystery-model");
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let reg = ProviderRegistry::default();
        assert!(reg.resolve("anything").is_none());
    }

    #[test]
    fn default_provider_falls_back_to_first_when_none_marked() {
        let reg = ProviderRegistry::new(vec![
            provider("one", Dialect::A, &[], false),
            provider("two", Dialect::B, &[], false),
        ]);
        assert_eq!(reg.default_provider().unwrap().id, "one");
    }

    #[test]
    fn credential_env_resolves_from_environment() {
        std::env::set_var("RELAY_TEST_PROVIDER_KEY", "from-env");
        let mut p = provider("envy", Dialect::B, &["m"], true);
        p.credential = None;
        p.credential_env = Some("RELAY_TEST_PROVIDER_KEY".into());
        let reg = ProviderRegistry::new(vec![p]);
        let r = reg.resolve("m").unwrap();
        assert_eq!(r.credential.as_deref(), Some("from-env"));
    }

    #[test]
    fn dialect_serialises_as_bare_letter() {
        let json = serde_json::to_string(&Dialect::A).unwrap();
        assert_eq!(json, "\"A\"");
        let back: Dialect = serde_json::from_str("\"B\"").unwrap();
        assert_eq!(back, Dialect::B);
    }
}
