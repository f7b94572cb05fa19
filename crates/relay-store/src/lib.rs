// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod error;
mod kv;
mod session;
mod transcript;

pub use error::StoreError;
pub use kv::{atomic_write_json, KeyedStore};
pub use session::{SessionEntry, SessionManager};
pub use transcript::{EntryRole, TranscriptEntry, TranscriptToolCall};
