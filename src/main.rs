// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{AgentCommands, BindingCommands, Cli, Commands, CronCommands, ProviderCommands};
use relay_config::Config;
use relay_gateway::{AgentConfig, AgentStore, Binding, BindingMatch, GatewayBuilder};
use relay_model::{Dialect, ProviderConfig};
use relay_scheduler::{CronDelivery, CronExecutor, CronJob, CronJobOptions, CronService};
use relay_store::{KeyedStore, SessionManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = relay_config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::Sessions { limit, channel } => list_sessions(&config, limit, channel).await,
        Commands::Cron { command } => cron_command(&config, command).await,
        Commands::Agents { command } => agent_command(&config, command),
        Commands::Bindings { command } => binding_command(&config, command),
        Commands::Providers { command } => provider_command(&config, command),
    }
}

/// Logging goes to stderr; the default filter shows relay at info level and
/// silences dependency noise.  RELAY_LOG takes precedence over --verbose.
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "relay=debug,info" } else { "relay=info,warn" };
    let filter = EnvFilter::try_from_env("RELAY_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn serve(config: Config) -> anyhow::Result<()> {
    // reqwest's rustls backend needs a process-wide crypto provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let state_dir = config.state_dir();
    let gateway = GatewayBuilder::new(&state_dir)
        .default_agent_id(&config.gateway.default_agent_id)
        .archive_after_minutes(config.subagents.archive_after_minutes)
        .build()
        .context("building gateway")?;
    gateway.start().await;

    let cron = CronService::open(state_dir.join("cron.json"), gateway.clone())
        .context("opening cron service")?;
    let cron = Arc::new(cron);
    if config.cron.enabled {
        cron.start();
    }

    tracing::info!(state_dir = %state_dir.display(), "relay serving; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    cron.shutdown();
    Ok(())
}

async fn list_sessions(
    config: &Config,
    limit: Option<usize>,
    channel: Option<String>,
) -> anyhow::Result<()> {
    let sessions = SessionManager::open(config.state_dir())?;
    let mut listed = sessions.list(channel.as_deref()).await;
    if let Some(limit) = limit {
        listed.truncate(limit);
    }
    if listed.is_empty() {
        println!("no sessions");
        return Ok(());
    }
    for entry in listed {
        let title = sessions.title_for(&entry).await;
        let age = (chrono::Utc::now() - entry.updated_at)
            .to_std()
            .map(|d| humantime::format_duration(round_to_seconds(d)).to_string())
            .unwrap_or_else(|_| "now".into());
        println!(
            "{:<38} {:<12} {:>4} msgs  {:>12} ago  {}",
            entry.session_key, entry.channel, entry.message_count, age, title
        );
    }
    Ok(())
}

fn round_to_seconds(d: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_secs(d.as_secs())
}

/// CLI cron commands only mutate the store; the running `serve` process
/// picks jobs up on its next start.
struct NoopExecutor;

#[async_trait]
impl CronExecutor for NoopExecutor {
    async fn fire(&self, _job: &CronJob) -> anyhow::Result<()> {
        Ok(())
    }
}

async fn cron_command(config: &Config, command: CronCommands) -> anyhow::Result<()> {
    let service = Arc::new(CronService::open(
        config.state_dir().join("cron.json"),
        Arc::new(NoopExecutor),
    )?);
    match command {
        CronCommands::List => {
            let jobs = service.list();
            if jobs.is_empty() {
                println!("no cron jobs");
            }
            for job in jobs {
                println!(
                    "{:<38} {:<16} {:<9} {}",
                    job.job_id,
                    job.schedule,
                    if job.enabled { "enabled" } else { "disabled" },
                    job.session_title(),
                );
            }
        }
        CronCommands::Add { schedule, message, name, channel, to, agent } => {
            let delivery = match (channel, to) {
                (Some(channel), Some(to)) => Some(CronDelivery { channel, to }),
                _ => None,
            };
            let job = service.add(
                &schedule,
                &message,
                CronJobOptions { name, delivery, agent_id: agent },
            )?;
            println!("added job {}", job.job_id);
        }
        CronCommands::Enable { job_id } => {
            service.set_enabled(&job_id, true)?;
            println!("enabled {job_id}");
        }
        CronCommands::Disable { job_id } => {
            service.set_enabled(&job_id, false)?;
            println!("disabled {job_id}");
        }
        CronCommands::Remove { job_id } => {
            service.remove(&job_id)?;
            println!("removed {job_id}");
        }
    }
    service.shutdown();
    Ok(())
}

fn agent_command(config: &Config, command: AgentCommands) -> anyhow::Result<()> {
    let store = AgentStore::open(config.state_dir().join("agents.json"))?;
    match command {
        AgentCommands::List => {
            let agents = store.list();
            if agents.is_empty() {
                println!("no agents configured");
            }
            for agent in agents {
                println!(
                    "{:<24} {:<28} {}{}",
                    agent.agent_id,
                    agent.model,
                    agent.name,
                    if agent.is_default { "  (default)" } else { "" },
                );
            }
        }
        AgentCommands::Add { id, model, name, system_prompt } => {
            store.upsert(AgentConfig {
                agent_id: id.clone(),
                name: name.unwrap_or_else(|| id.clone()),
                model,
                base_url: None,
                system_prompt,
                is_default: false,
            })?;
            println!("added agent {id}");
        }
        AgentCommands::SetDefault { id } => {
            store.set_default(&id)?;
            println!("{id} is now the default agent");
        }
        AgentCommands::Remove { id } => {
            store.delete(&id)?;
            println!("removed agent {id}");
        }
    }
    Ok(())
}

fn binding_command(config: &Config, command: BindingCommands) -> anyhow::Result<()> {
    let store: KeyedStore<Binding> =
        KeyedStore::open(config.state_dir().join("bindings.json"))?;
    match command {
        BindingCommands::List => {
            let mut bindings = store.values();
            bindings.sort_by_key(|b| b.priority);
            if bindings.is_empty() {
                println!("no bindings");
            }
            for b in bindings {
                let m = &b.match_spec;
                let constraint = if let Some(p) = &m.peer {
                    format!("peer {}:{}", p.kind, p.id)
                } else if let Some(g) = &m.guild_id {
                    format!("guild {g}")
                } else if let Some(t) = &m.team_id {
                    format!("team {t}")
                } else if let Some(a) = &m.account_id {
                    format!("account {a}")
                } else {
                    "channel default".to_string()
                };
                println!(
                    "{:<38} {:<12} prio {:<4} {:<24} → {}",
                    b.binding_id, m.channel, b.priority, constraint, b.agent_id
                );
            }
        }
        BindingCommands::Add { channel, agent_id, peer, account, guild, team, priority } => {
            let peer = peer
                .map(|p| {
                    p.split_once(':')
                        .map(|(kind, id)| relay_channels::PeerId {
                            kind: kind.to_string(),
                            id: id.to_string(),
                        })
                        .context("peer must be kind:id, e.g. user:42")
                })
                .transpose()?;
            let binding = Binding {
                binding_id: uuid::Uuid::new_v4().to_string(),
                agent_id,
                match_spec: BindingMatch {
                    channel,
                    account_id: account,
                    peer,
                    guild_id: guild,
                    team_id: team,
                },
                priority,
            };
            store.insert(binding.binding_id.clone(), binding.clone())?;
            println!("added binding {}", binding.binding_id);
        }
        BindingCommands::Remove { binding_id } => {
            if store.remove(&binding_id)?.is_none() {
                anyhow::bail!("no such binding: {binding_id}");
            }
            println!("removed binding {binding_id}");
        }
    }
    Ok(())
}

fn provider_command(config: &Config, command: ProviderCommands) -> anyhow::Result<()> {
    let store: KeyedStore<ProviderConfig> =
        KeyedStore::open(config.state_dir().join("providers.json"))?;
    match command {
        ProviderCommands::List => {
            let providers = store.values();
            if providers.is_empty() {
                println!("no providers configured");
            }
            for p in providers {
                println!(
                    "{:<16} dialect {:?}  {:<40} {} model(s){}",
                    p.id,
                    p.dialect,
                    p.base_url,
                    p.models.len(),
                    if p.is_default { "  (default)" } else { "" },
                );
            }
        }
        ProviderCommands::Add { id, base_url, dialect, credential_env, models, default } => {
            let dialect = match dialect.to_ascii_lowercase().as_str() {
                "a" => Dialect::A,
                "b" => Dialect::B,
                other => anyhow::bail!("unknown dialect {other:?}; expected \"a\" or \"b\""),
            };
            let provider = ProviderConfig {
                id: id.clone(),
                name: id.clone(),
                base_url,
                credential: None,
                credential_env,
                dialect,
                models,
                is_default: default,
            };
            store.insert(id.clone(), provider)?;
            println!("added provider {id}");
        }
        ProviderCommands::Remove { id } => {
            if store.remove(&id)?.is_none() {
                anyhow::bail!("no such provider: {id}");
            }
            println!("removed provider {id}");
        }
    }
    Ok(())
}
