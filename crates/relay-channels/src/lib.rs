// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod channel;
mod mock;
mod registry;

pub use channel::{Channel, IncomingMessage, IngressSender, OutgoingMessage, PeerId};
pub use mock::RecordingChannel;
pub use registry::ChannelRegistry;
