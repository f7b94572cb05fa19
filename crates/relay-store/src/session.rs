// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::transcript::{append_entry, load_entries};
use crate::{atomic_write_json, EntryRole, StoreError, TranscriptEntry};

/// Session metadata held in the index file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_id: String,
    /// Stable routing address, e.g. `telegram:123`, `subagent:<uuid>`,
    /// `cron:<job_id>`.  At most one session exists per key.
    pub session_key: String,
    pub agent_id: String,
    pub channel: String,
    /// Explicit operator-set title; wins over every derived form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: u64,
}

/// Owns the session index and the per-session transcript files.
///
/// The index is one keyed mapping (`sessions.json`, written atomically);
/// transcripts are per-session append-only JSONL files under
/// `transcripts/`.  All mutation goes through one async lock, which is what
/// makes `get_or_create` race-free and appends atomic with respect to
/// concurrent readers of the same session.
pub struct SessionManager {
    transcripts_dir: PathBuf,
    index_path: PathBuf,
    index: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionManager {
    pub fn open(state_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let state_dir = state_dir.into();
        let transcripts_dir = state_dir.join("transcripts");
        std::fs::create_dir_all(&transcripts_dir)?;
        let index_path = state_dir.join("sessions.json");
        let index: HashMap<String, SessionEntry> = if index_path.is_file() {
            let text = std::fs::read_to_string(&index_path)?;
            serde_json::from_str(&text)?
        } else {
            HashMap::new()
        };
        debug!(sessions = index.len(), "opened session index");
        Ok(Self {
            transcripts_dir,
            index_path,
            index: Mutex::new(index),
        })
    }

    fn transcript_path(&self, session_id: &str) -> PathBuf {
        self.transcripts_dir.join(format!("{session_id}.jsonl"))
    }

    fn persist(&self, index: &HashMap<String, SessionEntry>) -> Result<(), StoreError> {
        atomic_write_json(&self.index_path, index)
    }

    /// The unique session for `session_key`, or none.
    pub async fn find_by_key(&self, session_key: &str) -> Option<SessionEntry> {
        self.index
            .lock()
            .await
            .values()
            .find(|s| s.session_key == session_key)
            .cloned()
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.index.lock().await.get(session_id).cloned()
    }

    /// Look up the session for `session_key`, creating it when absent.
    /// Concurrent callers with the same key all observe the same session.
    pub async fn get_or_create(
        &self,
        session_key: &str,
        agent_id: &str,
        channel: &str,
    ) -> Result<SessionEntry, StoreError> {
        let mut index = self.index.lock().await;
        if let Some(existing) = index.values().find(|s| s.session_key == session_key) {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let entry = SessionEntry {
            session_id: Uuid::new_v4().to_string(),
            session_key: session_key.to_string(),
            agent_id: agent_id.to_string(),
            channel: channel.to_string(),
            display_name: None,
            subject: None,
            created_at: now,
            updated_at: now,
            message_count: 0,
        };
        index.insert(entry.session_id.clone(), entry.clone());
        self.persist(&index)?;
        debug!(session_key, session_id = %entry.session_id, "created session");
        Ok(entry)
    }

    /// Create a session unconditionally (the key must not already exist).
    pub async fn create(
        &self,
        session_key: &str,
        agent_id: &str,
        channel: &str,
        display_name: Option<String>,
    ) -> Result<SessionEntry, StoreError> {
        let mut entry = self.get_or_create(session_key, agent_id, channel).await?;
        if display_name.is_some() {
            let mut index = self.index.lock().await;
            if let Some(stored) = index.get_mut(&entry.session_id) {
                stored.display_name = display_name.clone();
                entry = stored.clone();
            }
            self.persist(&index)?;
        }
        Ok(entry)
    }

    /// Append one entry to the session's transcript and touch its metadata.
    pub async fn append(
        &self,
        session_id: &str,
        entry: &TranscriptEntry,
    ) -> Result<(), StoreError> {
        let mut index = self.index.lock().await;
        let session = index
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        append_entry(&self.transcript_path(session_id), entry)?;
        session.updated_at = Utc::now();
        session.message_count += 1;
        self.persist(&index)
    }

    pub async fn load_transcript(
        &self,
        session_id: &str,
    ) -> Result<Vec<TranscriptEntry>, StoreError> {
        {
            let index = self.index.lock().await;
            if !index.contains_key(session_id) {
                return Err(StoreError::SessionNotFound(session_id.to_string()));
            }
        }
        load_entries(&self.transcript_path(session_id))
    }

    /// Delete the session's metadata and its transcript file.
    pub async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let mut index = self.index.lock().await;
        if index.remove(session_id).is_none() {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }
        self.persist(&index)?;
        let path = self.transcript_path(session_id);
        if path.is_file() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Sessions sorted by `updated_at` descending, optionally filtered by
    /// channel.
    pub async fn list(&self, channel: Option<&str>) -> Vec<SessionEntry> {
        let index = self.index.lock().await;
        let mut sessions: Vec<SessionEntry> = index
            .values()
            .filter(|s| channel.map_or(true, |c| s.channel == c))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    /// Human-readable title for a session.
    ///
    /// Derivation order: explicit `display_name`, then `subject`, then the
    /// first user transcript entry truncated at ≤60 characters on a word
    /// boundary, then an 8-char id prefix plus creation date.
    pub async fn title_for(&self, session: &SessionEntry) -> String {
        if let Some(name) = &session.display_name {
            return name.clone();
        }
        if let Some(subject) = &session.subject {
            return subject.clone();
        }
        if let Ok(entries) = self.load_transcript(&session.session_id).await {
            if let Some(first_user) = entries.iter().find(|e| e.role == EntryRole::User) {
                let text = first_user.content.trim();
                if !text.is_empty() {
                    return truncate_on_word_boundary(text, 60);
                }
            }
        }
        let prefix: String = session.session_id.chars().take(8).collect();
        format!("{prefix} · {}", session.created_at.format("%Y-%m-%d"))
    }
}

/// Truncate `text` to at most `max` characters, cutting on a word boundary
/// and appending an ellipsis when anything was removed.
fn truncate_on_word_boundary(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max).collect();
    let cut = match clipped.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => &clipped[..pos],
        _ => clipped.as_str(),
    };
    format!("{}…", cut.trim_end())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn manager() -> (tempfile::TempDir, SessionManager) {
        let dir = tempfile::tempdir().unwrap();
        let m = SessionManager::open(dir.path()).unwrap();
        (dir, m)
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_per_key() {
        let (_dir, m) = manager();
        let a = m.get_or_create("tg:1", "default", "telegram").await.unwrap();
        let b = m.get_or_create("tg:1", "default", "telegram").await.unwrap();
        assert_eq!(a.session_id, b.session_id);
    }

    #[tokio::test]
    async fn concurrent_get_or_create_yields_one_session() {
        let dir = tempfile::tempdir().unwrap();
        let m = Arc::new(SessionManager::open(dir.path()).unwrap());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let m = m.clone();
            handles.push(tokio::spawn(async move {
                m.get_or_create("race:key", "default", "test").await.unwrap().session_id
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1, "all concurrent callers must see the same session");
        assert_eq!(m.list(None).await.len(), 1);
    }

    #[tokio::test]
    async fn append_touches_metadata() {
        let (_dir, m) = manager();
        let s = m.get_or_create("k", "default", "test").await.unwrap();
        m.append(&s.session_id, &TranscriptEntry::system("sys")).await.unwrap();
        m.append(&s.session_id, &TranscriptEntry::user("hi")).await.unwrap();
        let reloaded = m.get(&s.session_id).await.unwrap();
        assert_eq!(reloaded.message_count, 2);
        assert!(reloaded.updated_at >= s.updated_at);
    }

    #[tokio::test]
    async fn append_to_deleted_session_is_session_not_found() {
        let (_dir, m) = manager();
        let s = m.get_or_create("k", "default", "test").await.unwrap();
        m.delete(&s.session_id).await.unwrap();
        let err = m.append(&s.session_id, &TranscriptEntry::user("x")).await.unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn delete_removes_transcript_file() {
        let (dir, m) = manager();
        let s = m.get_or_create("k", "default", "test").await.unwrap();
        m.append(&s.session_id, &TranscriptEntry::user("x")).await.unwrap();
        let path = dir.path().join("transcripts").join(format!("{}.jsonl", s.session_id));
        assert!(path.is_file());
        m.delete(&s.session_id).await.unwrap();
        assert!(!path.is_file());
        assert!(m.find_by_key("k").await.is_none());
    }

    #[tokio::test]
    async fn index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let m = SessionManager::open(dir.path()).unwrap();
            let s = m.get_or_create("persist:1", "default", "test").await.unwrap();
            m.append(&s.session_id, &TranscriptEntry::user("hello")).await.unwrap();
            s.session_id
        };
        let m = SessionManager::open(dir.path()).unwrap();
        let s = m.find_by_key("persist:1").await.unwrap();
        assert_eq!(s.session_id, id);
        let transcript = m.load_transcript(&id).await.unwrap();
        assert_eq!(transcript.len(), 1);
    }

    #[tokio::test]
    async fn list_sorted_by_updated_at_descending() {
        let (_dir, m) = manager();
        let a = m.get_or_create("a", "default", "test").await.unwrap();
        let b = m.get_or_create("b", "default", "test").await.unwrap();
        // Touch `a` last so it sorts first.
        m.append(&b.session_id, &TranscriptEntry::user("x")).await.unwrap();
        m.append(&a.session_id, &TranscriptEntry::user("y")).await.unwrap();
        let listed = m.list(None).await;
        assert_eq!(listed[0].session_key, "a");
        assert_eq!(listed[1].session_key, "b");
    }

    #[tokio::test]
    async fn list_filters_by_channel() {
        let (_dir, m) = manager();
        m.get_or_create("a", "default", "telegram").await.unwrap();
        m.get_or_create("b", "default", "cron").await.unwrap();
        assert_eq!(m.list(Some("cron")).await.len(), 1);
        assert_eq!(m.list(None).await.len(), 2);
    }

    // ── Title derivation ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn title_prefers_display_name() {
        let (_dir, m) = manager();
        let s = m
            .create("k", "default", "test", Some("My Chat".into()))
            .await
            .unwrap();
        assert_eq!(m.title_for(&s).await, "My Chat");
    }

    #[tokio::test]
    async fn title_falls_back_to_first_user_entry() {
        let (_dir, m) = manager();
        let s = m.get_or_create("k", "default", "test").await.unwrap();
        m.append(&s.session_id, &TranscriptEntry::system("sys")).await.unwrap();
        m.append(&s.session_id, &TranscriptEntry::user("short question")).await.unwrap();
        assert_eq!(m.title_for(&s).await, "short question");
    }

    #[tokio::test]
    async fn title_truncates_long_user_entry_on_word_boundary() {
        let (_dir, m) = manager();
        let s = m.get_or_create("k", "default", "test").await.unwrap();
        let long = "this is a rather long first user message that certainly exceeds the sixty character budget";
        m.append(&s.session_id, &TranscriptEntry::user(long)).await.unwrap();
        let title = m.title_for(&s).await;
        assert!(title.ends_with('…'));
        assert!(title.chars().count() <= 61);
        assert!(!title.trim_end_matches('…').ends_with(' '));
    }

    #[tokio::test]
    async fn title_falls_back_to_id_prefix_and_date() {
        let (_dir, m) = manager();
        let s = m.get_or_create("k", "default", "test").await.unwrap();
        let title = m.title_for(&s).await;
        assert!(title.starts_with(&s.session_id[..8]));
        assert!(title.contains('·'));
    }

    #[test]
    fn truncate_noop_when_short() {
        assert_eq!(truncate_on_word_boundary("hello", 60), "hello");
    }
}
