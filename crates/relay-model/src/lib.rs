// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod client;
mod dialect;
mod dialect_a;
mod dialect_b;
mod mock;
mod registry;
mod types;

pub use client::{ChatCallbacks, ChatError, ModelClient};
pub use dialect::{ModelDialect, ResponseStream};
pub use dialect_a::DialectA;
pub use dialect_b::DialectB;
pub use mock::ScriptedMockDialect;
pub use registry::{Dialect, ProviderConfig, ProviderRegistry, ResolvedModel};
pub use types::*;

/// Construct a [`ModelClient`] for a resolved provider/model pair.
///
/// Selects the wire dialect from the provider configuration; everything the
/// rest of the system sees is the uniform [`ModelClient`] callback surface.
pub fn client_for(resolved: &ResolvedModel) -> ModelClient {
    match resolved.dialect {
        Dialect::A => ModelClient::new(Box::new(DialectA::new(
            resolved.model.clone(),
            resolved.credential.clone(),
            resolved.base_url.clone(),
        ))),
        Dialect::B => ModelClient::new(Box::new(DialectB::new(
            resolved.model.clone(),
            resolved.credential.clone(),
            resolved.base_url.clone(),
        ))),
    }
}
