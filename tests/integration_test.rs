// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Integration tests driving the full gateway stack with the scripted mock
/// dialect: channel ingress, routing, the runner loop, persistence, and
/// egress, with no network access.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use relay_channels::{IncomingMessage, RecordingChannel};
use relay_gateway::{AgentConfig, GatewayBuilder, ModelFactory};
use relay_model::{Dialect, ModelClient, ProviderConfig, ResponseEvent, ScriptedMockDialect};
use relay_store::{EntryRole, KeyedStore};

fn scripted_factory(scripts: Vec<Vec<Vec<ResponseEvent>>>) -> ModelFactory {
    let queue: Arc<Mutex<VecDeque<Vec<Vec<ResponseEvent>>>>> =
        Arc::new(Mutex::new(scripts.into()));
    Box::new(move |_resolved| {
        let script = queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![vec![ResponseEvent::Done]]);
        ModelClient::new(Box::new(ScriptedMockDialect::new(script)))
    })
}

fn seed_stores(dir: &std::path::Path) {
    let agents: KeyedStore<AgentConfig> = KeyedStore::open(dir.join("agents.json")).unwrap();
    agents
        .insert(
            "default",
            AgentConfig {
                agent_id: "default".into(),
                name: "Default".into(),
                model: "test-model".into(),
                base_url: None,
                system_prompt: None,
                is_default: true,
            },
        )
        .unwrap();
    let providers: KeyedStore<ProviderConfig> =
        KeyedStore::open(dir.join("providers.json")).unwrap();
    providers
        .insert(
            "p1",
            ProviderConfig {
                id: "p1".into(),
                name: "Test".into(),
                base_url: "http://localhost/v1".into(),
                credential: Some("k".into()),
                credential_env: None,
                dialect: Dialect::B,
                models: vec!["test-model".into()],
                is_default: true,
            },
        )
        .unwrap();
}

fn incoming(from: &str, text: &str) -> IncomingMessage {
    IncomingMessage {
        channel: "term".into(),
        from: from.into(),
        text: text.into(),
        session_key: format!("term:{from}"),
        peer: None,
        account_id: None,
        guild_id: None,
        team_id: None,
    }
}

#[tokio::test]
async fn message_round_trip_through_the_gateway() {
    let dir = tempfile::tempdir().unwrap();
    seed_stores(dir.path());
    let channel = Arc::new(RecordingChannel::new("term"));
    let gateway = GatewayBuilder::new(dir.path())
        .channel(channel.clone())
        .model_factory(scripted_factory(vec![vec![vec![
            ResponseEvent::TextDelta("pong".into()),
            ResponseEvent::Done,
        ]]]))
        .build()
        .unwrap();

    gateway.handle_incoming(incoming("alice", "ping")).await;

    assert_eq!(channel.sent_to("term:alice"), vec!["pong"]);
    let session = gateway.sessions().find_by_key("term:alice").await.unwrap();
    let transcript = gateway
        .sessions()
        .load_transcript(&session.session_id)
        .await
        .unwrap();
    let roles: Vec<EntryRole> = transcript.iter().map(|e| e.role).collect();
    assert_eq!(roles, vec![EntryRole::System, EntryRole::User, EntryRole::Assistant]);
}

#[tokio::test]
async fn conversations_resume_across_gateway_restarts() {
    let dir = tempfile::tempdir().unwrap();
    seed_stores(dir.path());

    let session_id = {
        let channel = Arc::new(RecordingChannel::new("term"));
        let gateway = GatewayBuilder::new(dir.path())
            .channel(channel.clone())
            .model_factory(scripted_factory(vec![vec![vec![
                ResponseEvent::TextDelta("first answer".into()),
                ResponseEvent::Done,
            ]]]))
            .build()
            .unwrap();
        gateway.handle_incoming(incoming("bob", "first question")).await;
        gateway.sessions().find_by_key("term:bob").await.unwrap().session_id
    };

    // A new process: same state dir, fresh gateway.
    let channel = Arc::new(RecordingChannel::new("term"));
    let gateway = GatewayBuilder::new(dir.path())
        .channel(channel.clone())
        .model_factory(scripted_factory(vec![vec![vec![
            ResponseEvent::TextDelta("second answer".into()),
            ResponseEvent::Done,
        ]]]))
        .build()
        .unwrap();
    gateway.handle_incoming(incoming("bob", "second question")).await;

    let session = gateway.sessions().find_by_key("term:bob").await.unwrap();
    assert_eq!(session.session_id, session_id, "same key resumes the same session");
    let transcript = gateway
        .sessions()
        .load_transcript(&session.session_id)
        .await
        .unwrap();
    // One system entry, then two full user/assistant exchanges.
    let roles: Vec<EntryRole> = transcript.iter().map(|e| e.role).collect();
    assert_eq!(
        roles,
        vec![
            EntryRole::System,
            EntryRole::User,
            EntryRole::Assistant,
            EntryRole::User,
            EntryRole::Assistant
        ]
    );
    assert_eq!(transcript[4].content, "second answer");
}

#[tokio::test]
async fn sessions_on_different_channels_stay_independent() {
    let dir = tempfile::tempdir().unwrap();
    seed_stores(dir.path());
    let term = Arc::new(RecordingChannel::new("term"));
    let telegram = Arc::new(RecordingChannel::new("telegram"));
    let gateway = GatewayBuilder::new(dir.path())
        .channel(term.clone())
        .channel(telegram.clone())
        .model_factory(scripted_factory(vec![
            vec![vec![ResponseEvent::TextDelta("for term".into()), ResponseEvent::Done]],
            vec![vec![ResponseEvent::TextDelta("for telegram".into()), ResponseEvent::Done]],
        ]))
        .build()
        .unwrap();

    gateway.handle_incoming(incoming("alice", "hi")).await;
    gateway
        .handle_incoming(IncomingMessage {
            channel: "telegram".into(),
            from: "99".into(),
            text: "hello".into(),
            session_key: "telegram:99".into(),
            peer: None,
            account_id: None,
            guild_id: None,
            team_id: None,
        })
        .await;

    assert_eq!(term.sent_to("term:alice"), vec!["for term"]);
    assert_eq!(telegram.sent_to("telegram:99"), vec!["for telegram"]);
    assert_eq!(gateway.sessions().list(None).await.len(), 2);
    assert_eq!(gateway.sessions().list(Some("telegram")).await.len(), 1);
}
