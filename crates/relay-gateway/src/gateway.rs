// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Gateway composition — wires channels, routing, sessions, runners,
//! subagents, announce, and cron execution into one control plane.
//!
//! # Message path
//!
//! ```text
//! channel → IncomingMessage → handle_incoming
//!     ├─ runner active for session_key → FollowupQueue (steer → inject)
//!     └─ otherwise → process_message:
//!            route → agent → provider → runner (cached per session_key)
//!            → run loop → stream events to channel → final send
//! ```
//!
//! # Re-entry paths for tools
//!
//! Tools receive the gateway as a capability trait (`GatewayRef`), not as a
//! module import: `send_to_session` delivers without re-triggering the
//! agent; `trigger_agent` is the mechanism the announce pipeline and cron
//! service ride back in on.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, OnceLock, Weak};

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use relay_channels::{Channel, ChannelRegistry, IncomingMessage, OutgoingMessage};
use relay_core::{
    compose_system_prompt, AgentRunner, FollowupMode, FollowupQueue, FollowupTarget, RunSource,
    RunnerEvent, RunnerParams, ABORTED_SENTINEL, DONE_SENTINEL, NO_REPLY,
};
use relay_model::{ModelClient, ProviderConfig, ProviderRegistry, ResolvedModel};
use relay_scheduler::{cron_delivery_prompt, CronExecutor, CronJob};
use relay_store::{KeyedStore, SessionEntry, SessionManager, TranscriptEntry};
use relay_tools::{GatewayRef, Tool, ToolContext, ToolRegistry, TriggerOutcome};

use crate::tools::{GatewaySlot, SessionSendTool, SpawnSubagentTool, TelegramSendTool};
use crate::{
    AgentConfig, AgentStore, AnnouncePipeline, Binding, RegisterParams, RouteInput, Router,
    SubagentCleanup, SubagentOutcome, SubagentRegistry, SubagentRun,
};

/// Builds one model client per runner from the resolved provider entry.
/// Swappable so tests can hand out scripted dialects.
pub type ModelFactory = Box<dyn Fn(&ResolvedModel) -> ModelClient + Send + Sync>;

pub struct GatewayBuilder {
    state_dir: PathBuf,
    default_agent_id: String,
    archive_after_minutes: u64,
    channels: ChannelRegistry,
    extra_tools: Vec<Arc<dyn Tool>>,
    model_factory: ModelFactory,
}

impl GatewayBuilder {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            default_agent_id: "default".into(),
            archive_after_minutes: 60,
            channels: ChannelRegistry::new(),
            extra_tools: Vec::new(),
            model_factory: Box::new(relay_model::client_for),
        }
    }

    pub fn default_agent_id(mut self, id: impl Into<String>) -> Self {
        self.default_agent_id = id.into();
        self
    }

    pub fn archive_after_minutes(mut self, minutes: u64) -> Self {
        self.archive_after_minutes = minutes;
        self
    }

    pub fn channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channels.register(channel);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra_tools.push(tool);
        self
    }

    pub fn model_factory(mut self, factory: ModelFactory) -> Self {
        self.model_factory = factory;
        self
    }

    pub fn build(self) -> anyhow::Result<Arc<Gateway>> {
        std::fs::create_dir_all(&self.state_dir)?;
        let sessions = Arc::new(SessionManager::open(&self.state_dir)?);
        let agents = AgentStore::open(self.state_dir.join("agents.json"))?;
        let provider_store: KeyedStore<ProviderConfig> =
            KeyedStore::open(self.state_dir.join("providers.json"))?;
        let providers = ProviderRegistry::new(provider_store.values());
        let binding_store: KeyedStore<Binding> =
            KeyedStore::open(self.state_dir.join("bindings.json"))?;
        let router = Router::new(binding_store.values());
        let subagents = Arc::new(SubagentRegistry::open(
            self.state_dir.join("subagents.json"),
            sessions.clone(),
            self.archive_after_minutes,
        )?);
        let announce = Arc::new(AnnouncePipeline::new(sessions.clone()));

        let slot = Arc::new(GatewaySlot::default());
        let mut tools = ToolRegistry::new();
        tools.register(SpawnSubagentTool::new(slot.clone()));
        tools.register(SessionSendTool);
        tools.register(TelegramSendTool);
        for tool in self.extra_tools {
            tools.register_arc(tool);
        }

        let (ingress_tx, ingress_rx) = mpsc::channel(256);

        let gateway = Arc::new(Gateway {
            sessions,
            agents,
            provider_store,
            providers,
            binding_store,
            router,
            channels: self.channels,
            tools: Arc::new(tools),
            runners: Mutex::new(HashMap::new()),
            subagents,
            announce,
            followup: OnceLock::new(),
            default_agent_id: self.default_agent_id,
            model_factory: self.model_factory,
            ingress_tx,
            ingress_rx: StdMutex::new(Some(ingress_rx)),
            self_ref: OnceLock::new(),
        });
        let _ = gateway.self_ref.set(Arc::downgrade(&gateway));
        slot.bind(&gateway);
        let _ = gateway
            .followup
            .set(FollowupQueue::new(FollowupMode::Steer, gateway.clone()));
        Ok(gateway)
    }
}

pub struct Gateway {
    sessions: Arc<SessionManager>,
    agents: AgentStore,
    provider_store: KeyedStore<ProviderConfig>,
    providers: ProviderRegistry,
    binding_store: KeyedStore<Binding>,
    router: Router,
    channels: ChannelRegistry,
    tools: Arc<ToolRegistry>,
    /// session_key → runner; dropped when the bound session disappears.
    runners: Mutex<HashMap<String, Arc<AgentRunner>>>,
    subagents: Arc<SubagentRegistry>,
    announce: Arc<AnnouncePipeline>,
    followup: OnceLock<FollowupQueue<IncomingMessage>>,
    default_agent_id: String,
    model_factory: ModelFactory,
    ingress_tx: mpsc::Sender<IncomingMessage>,
    ingress_rx: StdMutex<Option<mpsc::Receiver<IncomingMessage>>>,
    self_ref: OnceLock<Weak<Gateway>>,
}

impl Gateway {
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn agents(&self) -> &AgentStore {
        &self.agents
    }

    pub fn provider_store(&self) -> &KeyedStore<ProviderConfig> {
        &self.provider_store
    }

    pub fn binding_store(&self) -> &KeyedStore<Binding> {
        &self.binding_store
    }

    pub fn subagents(&self) -> &Arc<SubagentRegistry> {
        &self.subagents
    }

    fn arc(&self) -> Option<Arc<Gateway>> {
        self.self_ref.get().and_then(Weak::upgrade)
    }

    /// Start ingress: channels begin delivering, the dispatch loop fans
    /// messages out one task per message, the subagent sweeper runs, and
    /// runs interrupted by the previous process get their one announce.
    pub async fn start(self: &Arc<Self>) {
        if let Some(mut rx) = self.ingress_rx.lock().unwrap().take() {
            let gateway = self.clone();
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    let gateway = gateway.clone();
                    tokio::spawn(async move {
                        gateway.handle_incoming(msg).await;
                    });
                }
            });
        }
        self.channels.start_all(self.ingress_tx.clone()).await;
        self.subagents.spawn_sweeper();

        for run in self.subagents.mark_interrupted_on_restore() {
            let gateway = self.clone();
            tokio::spawn(async move {
                gateway
                    .announce_and_finalize(run, Some("interrupted by restart".into()))
                    .await;
            });
        }
        info!(channels = ?self.channels.names(), "gateway started");
    }

    /// Ingress dispatch: steer into a live runner, or process fresh.
    pub async fn handle_incoming(self: &Arc<Self>, msg: IncomingMessage) {
        let active = {
            let runners = self.runners.lock().await;
            runners
                .get(&msg.session_key)
                .map(|r| r.is_active())
                .unwrap_or(false)
        };
        if active {
            if let Some(queue) = self.followup.get() {
                let key = msg.session_key.clone();
                queue.enqueue(&key, msg).await;
                return;
            }
        }
        if let Err(e) = self.process_message(msg, RunSource::User).await {
            warn!(error = %e, "message processing failed");
        }
    }

    /// Full path for one message: route → agent → provider → runner → run
    /// → stream → final send.  Returns the final reply text (possibly a
    /// suppression sentinel).
    pub async fn process_message(
        self: &Arc<Self>,
        msg: IncomingMessage,
        source: RunSource,
    ) -> anyhow::Result<String> {
        let route = self.router.resolve(&RouteInput::from(&msg), &self.default_agent_id);
        let agent = self
            .agents
            .get(&route.agent_id)
            .or_else(|| self.agents.default_agent());
        let Some(agent) = agent else {
            self.channel_send(&msg.channel, &msg.session_key, "Error: no agent configured")
                .await;
            bail!("no agent configured (route wanted {})", route.agent_id);
        };
        debug!(
            session_key = %msg.session_key,
            agent_id = %agent.agent_id,
            matched_by = ?route.matched_by,
            "routed message"
        );

        let session = self
            .sessions
            .get_or_create(&msg.session_key, &agent.agent_id, &msg.channel)
            .await?;

        let runner = match self.runner_for(&session, &agent, &msg).await {
            Ok(runner) => runner,
            Err(e) => {
                self.channel_send(&msg.channel, &msg.session_key, &format!("Error: {e}"))
                    .await;
                return Err(e);
            }
        };

        let channel = self.channels.get(&msg.channel);
        if let Some(ch) = &channel {
            let _ = ch.send_typing(&msg.session_key).await;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        spawn_event_forwarder(channel.clone(), msg.session_key.clone(), events_rx);

        let final_text = runner.run(&msg.text, source, &events_tx).await;

        if !is_suppressed(&final_text) {
            if let Some(ch) = &channel {
                if let Err(e) = ch
                    .send(&msg.session_key, &OutgoingMessage::text(final_text.clone()))
                    .await
                {
                    warn!(session_key = %msg.session_key, error = %e, "final send failed");
                }
            }
        }
        Ok(final_text)
    }

    /// Cached runner for the session, rebuilt when the cached one is bound
    /// to a session that no longer exists (deleted externally and possibly
    /// recreated under the same key).
    async fn runner_for(
        self: &Arc<Self>,
        session: &SessionEntry,
        agent: &AgentConfig,
        msg: &IncomingMessage,
    ) -> anyhow::Result<Arc<AgentRunner>> {
        let mut runners = self.runners.lock().await;
        if let Some(existing) = runners.get(&session.session_key) {
            if existing.session_id() == session.session_id {
                return Ok(existing.clone());
            }
            debug!(session_key = %session.session_key, "dropping runner bound to deleted session");
            runners.remove(&session.session_key);
        }
        let runner = self.build_runner(session, agent, None, Some(msg.from.clone()))?;
        runners.insert(session.session_key.clone(), runner.clone());
        Ok(runner)
    }

    /// Construct an (uncached) runner for `session`.
    fn build_runner(
        self: &Arc<Self>,
        session: &SessionEntry,
        agent: &AgentConfig,
        extra_system_prompt: Option<&str>,
        to: Option<String>,
    ) -> anyhow::Result<Arc<AgentRunner>> {
        let mut resolved = self
            .providers
            .resolve(&agent.model)
            .with_context(|| format!("no provider serves model {}", agent.model))?;
        if let Some(base_url) = &agent.base_url {
            resolved.base_url = base_url.clone();
        }
        let model = Arc::new((self.model_factory)(&resolved));

        let is_subagent = session.session_key.starts_with("subagent:");
        let skills: Vec<(String, String)> = self
            .tools
            .schemas_for(is_subagent)
            .into_iter()
            .map(|s| (s.name, s.description))
            .collect();
        let system_prompt =
            compose_system_prompt(agent.system_prompt.as_deref(), &skills, extra_system_prompt);

        let tool_ctx = ToolContext {
            session_key: session.session_key.clone(),
            channel: session.channel.clone(),
            to,
            agent_id: agent.agent_id.clone(),
            gateway: self.clone(),
        };

        Ok(Arc::new(AgentRunner::new(RunnerParams {
            session_id: session.session_id.clone(),
            session_key: session.session_key.clone(),
            agent_id: agent.agent_id.clone(),
            channel: session.channel.clone(),
            system_prompt,
            is_subagent,
            store: self.sessions.clone(),
            model,
            tools: self.tools.clone(),
            tool_ctx,
        })))
    }

    /// Register and launch one background run on behalf of `ctx`'s session.
    pub(crate) async fn spawn_subagent(
        self: &Arc<Self>,
        task: &str,
        label: Option<String>,
        cleanup: SubagentCleanup,
        ctx: &ToolContext,
    ) -> anyhow::Result<String> {
        let run = self.subagents.register(RegisterParams {
            requester_session_key: ctx.session_key.clone(),
            requester_channel: ctx.channel.clone(),
            task: task.to_string(),
            label,
            cleanup,
        })?;
        let agent = self
            .agents
            .get(&ctx.agent_id)
            .or_else(|| self.agents.default_agent())
            .context("no agent available for subagent run")?;
        let session = self
            .sessions
            .get_or_create(&run.child_session_key, &agent.agent_id, "subagent")
            .await?;
        self.subagents.mark_started(&run.run_id)?;

        let gateway = self.clone();
        let run_id = run.run_id.clone();
        tokio::spawn(async move {
            gateway.run_subagent(run, agent, session).await;
        });
        Ok(run_id)
    }

    async fn run_subagent(
        self: Arc<Self>,
        run: SubagentRun,
        agent: AgentConfig,
        session: SessionEntry,
    ) {
        const SUBAGENT_CONTEXT: &str = "You are a background agent working on one focused task \
            for another conversation. Complete the task and finish with a final message \
            containing your findings; it will be reported back to the requesting conversation.";

        let runner = match self.build_runner(&session, &agent, Some(SUBAGENT_CONTEXT), None) {
            Ok(runner) => runner,
            Err(e) => {
                warn!(run_id = %run.run_id, error = %e, "subagent runner construction failed");
                if let Ok(completed) =
                    self.subagents.mark_completed(&run.run_id, SubagentOutcome::Error)
                {
                    self.announce_and_finalize(completed, Some(e.to_string())).await;
                }
                return;
            }
        };
        self.runners
            .lock()
            .await
            .insert(session.session_key.clone(), runner.clone());

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let final_text = runner.run(&run.task, RunSource::User, &events_tx).await;

        let (outcome, error) = if final_text == ABORTED_SENTINEL {
            (SubagentOutcome::Error, Some("aborted".to_string()))
        } else if final_text.starts_with("Error:") {
            (SubagentOutcome::Error, Some(final_text.clone()))
        } else {
            (SubagentOutcome::Ok, None)
        };

        self.runners.lock().await.remove(&session.session_key);

        match self.subagents.mark_completed(&run.run_id, outcome) {
            Ok(completed) => self.announce_and_finalize(completed, error).await,
            Err(e) => warn!(run_id = %run.run_id, error = %e, "completion marking failed"),
        }
    }

    /// Announce a finished run to its requester, then apply its cleanup
    /// policy once the (debounced) announce has actually gone out.
    async fn announce_and_finalize(self: &Arc<Self>, run: SubagentRun, error: Option<String>) {
        let run_id = run.run_id.clone();
        let sink: Arc<dyn GatewayRef> = self.clone();
        let done = self.announce.run_announce_flow(run, error, sink).await;
        let did_announce = done.await.unwrap_or(false);
        if let Err(e) = self.subagents.finalize_cleanup(&run_id, did_announce).await {
            warn!(run_id = %run_id, error = %e, "cleanup finalization failed");
        }
    }

    async fn channel_send(&self, channel: &str, session_key: &str, text: &str) {
        if let Some(ch) = self.channels.get(channel) {
            if let Err(e) = ch.send(session_key, &OutgoingMessage::text(text)).await {
                warn!(session_key, error = %e, "channel send failed");
            }
        }
    }
}

/// Suppression sentinels never reach the channel; the transcript keeps them.
fn is_suppressed(text: &str) -> bool {
    text == NO_REPLY || text == DONE_SENTINEL || text == ABORTED_SENTINEL
}

fn spawn_event_forwarder(
    channel: Option<Arc<dyn Channel>>,
    session_key: String,
    mut events: mpsc::UnboundedReceiver<RunnerEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(ch) = &channel else { continue };
            let result = match &event {
                RunnerEvent::Chunk(text) => ch.send_chunk(&session_key, text).await,
                RunnerEvent::ToolCallStarted { tool_name, args, .. } => {
                    ch.send_tool_call(&session_key, tool_name, args).await
                }
                RunnerEvent::ToolCallFinished { tool_name, output, .. } => {
                    ch.send_tool_result(&session_key, tool_name, output).await
                }
                RunnerEvent::Completed { .. } | RunnerEvent::Error(_) => Ok(()),
            };
            if let Err(e) = result {
                debug!(session_key = %session_key, error = %e, "stream event delivery failed");
            }
        }
    });
}

// ─── Capability surface handed to tools ──────────────────────────────────────

#[async_trait]
impl GatewayRef for Gateway {
    async fn send_to_session(
        &self,
        session_key: &str,
        channel: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        let agent_id = self
            .agents
            .default_agent()
            .map(|a| a.agent_id)
            .unwrap_or_else(|| self.default_agent_id.clone());
        let session = self
            .sessions
            .get_or_create(session_key, &agent_id, channel)
            .await?;
        self.sessions
            .append(&session.session_id, &TranscriptEntry::assistant(text))
            .await?;
        if let Some(ch) = self.channels.get(channel) {
            ch.send(session_key, &OutgoingMessage::text(text)).await?;
        }
        Ok(())
    }

    async fn trigger_agent(
        &self,
        session_key: &str,
        channel: &str,
        message: &str,
    ) -> TriggerOutcome {
        let Some(gateway) = self.arc() else {
            return TriggerOutcome::Failed;
        };
        {
            let runners = gateway.runners.lock().await;
            if let Some(runner) = runners.get(session_key) {
                if runner.is_active() {
                    runner.inject(message);
                    return TriggerOutcome::Steered;
                }
            }
        }
        let msg = IncomingMessage {
            channel: channel.to_string(),
            from: "subagent-announce".to_string(),
            text: message.to_string(),
            session_key: session_key.to_string(),
            peer: None,
            account_id: None,
            guild_id: None,
            team_id: None,
        };
        match gateway.process_message(msg, RunSource::SubagentAnnounce).await {
            Ok(_) => TriggerOutcome::Invoked,
            Err(e) => {
                warn!(session_key, error = %e, "trigger invocation failed");
                TriggerOutcome::Failed
            }
        }
    }
}

// ─── Followup steer target ───────────────────────────────────────────────────

#[async_trait]
impl FollowupTarget<IncomingMessage> for Gateway {
    async fn deliver(&self, session_key: &str, msg: IncomingMessage) {
        let Some(gateway) = self.arc() else { return };
        {
            let runners = gateway.runners.lock().await;
            if let Some(runner) = runners.get(session_key) {
                if runner.is_active() {
                    runner.inject(msg.text);
                    return;
                }
            }
        }
        if let Err(e) = gateway.process_message(msg, RunSource::User).await {
            warn!(session_key, error = %e, "steered message processing failed");
        }
    }
}

// ─── Cron execution ──────────────────────────────────────────────────────────

#[async_trait]
impl CronExecutor for Gateway {
    /// One isolated headless turn: a fresh `cron:<job_id>` session, a fresh
    /// runner carrying the delivery-contract prompt, nothing cached, nothing
    /// reused.
    async fn fire(&self, job: &CronJob) -> anyhow::Result<()> {
        let gateway = self.arc().context("gateway shut down")?;
        let agent = job
            .agent_id
            .as_deref()
            .and_then(|id| gateway.agents.get(id))
            .or_else(|| gateway.agents.default_agent())
            .context("no agent available for cron job")?;

        let session_key = job.session_key();
        if let Some(stale) = gateway.sessions.find_by_key(&session_key).await {
            let _ = gateway.sessions.delete(&stale.session_id).await;
        }
        gateway.runners.lock().await.remove(&session_key);

        let session = gateway
            .sessions
            .create(&session_key, &agent.agent_id, "cron", Some(job.session_title()))
            .await?;

        let extra = cron_delivery_prompt(job.delivery.as_ref());
        let runner = gateway.build_runner(
            &session,
            &agent,
            Some(&extra),
            job.delivery.as_ref().map(|d| d.to.clone()),
        )?;

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let final_text = runner.run(&job.message, RunSource::Cron, &events_tx).await;
        debug!(job_id = %job.job_id, final_text = %final_text, "cron turn finished");
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
