// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{ChatRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// One wire encoding of a chat+tools request/stream against a model endpoint.
///
/// A dialect is only responsible for serialising the request and lifting the
/// provider's delta framing into [`ResponseEvent`]s; reassembly of fragmented
/// tool calls happens in [`crate::ModelClient`], identically for every
/// dialect.
#[async_trait]
pub trait ModelDialect: Send + Sync {
    /// Stable dialect name for logs and status display.
    fn name(&self) -> &str;

    /// Model identifier forwarded to the endpoint.
    fn model_name(&self) -> &str;

    /// Send one streaming completion request.
    async fn complete(&self, req: ChatRequest) -> anyhow::Result<ResponseStream>;
}
