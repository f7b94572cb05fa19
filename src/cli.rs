// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "relay",
    version,
    about = "Multi-channel AI assistant control plane",
    propagate_version = true
)]
pub struct Cli {
    /// Explicit config file (merged over the standard search paths)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr at debug level (RELAY_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway: channels, cron scheduler, subagent sweeper
    Serve,
    /// Print the merged configuration as YAML
    ShowConfig,
    /// List stored sessions, most recently updated first
    Sessions {
        /// Show at most this many sessions
        #[arg(short, long)]
        limit: Option<usize>,
        /// Only sessions on this channel
        #[arg(long)]
        channel: Option<String>,
    },
    /// Manage scheduled jobs
    Cron {
        #[command(subcommand)]
        command: CronCommands,
    },
    /// Manage configured agents
    Agents {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Manage routing bindings
    Bindings {
        #[command(subcommand)]
        command: BindingCommands,
    },
    /// Manage model providers
    Providers {
        #[command(subcommand)]
        command: ProviderCommands,
    },
}

#[derive(Subcommand)]
pub enum CronCommands {
    /// List stored jobs
    List,
    /// Add a job; the message is the task text handed to the agent
    Add {
        /// Cron expression, e.g. "0 9 * * *"
        schedule: String,
        /// Task text
        message: String,
        /// Human-readable job name
        #[arg(long)]
        name: Option<String>,
        /// Delivery channel (e.g. telegram); requires --to
        #[arg(long, requires = "to")]
        channel: Option<String>,
        /// Delivery target on the channel
        #[arg(long)]
        to: Option<String>,
        /// Run with a specific agent instead of the default
        #[arg(long)]
        agent: Option<String>,
    },
    /// Re-enable a disabled job
    Enable { job_id: String },
    /// Disable a job without deleting it
    Disable { job_id: String },
    /// Delete a job
    Remove { job_id: String },
}

#[derive(Subcommand)]
pub enum BindingCommands {
    /// List routing bindings in evaluation order
    List,
    /// Add a binding routing (channel, identity) to an agent
    Add {
        /// Channel the binding applies to
        channel: String,
        /// Agent to route matching messages to
        agent_id: String,
        /// Peer constraint as kind:id, e.g. user:42
        #[arg(long)]
        peer: Option<String>,
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        guild: Option<String>,
        #[arg(long)]
        team: Option<String>,
        /// Lower numbers win within a tier
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },
    /// Delete a binding
    Remove { binding_id: String },
}

#[derive(Subcommand)]
pub enum ProviderCommands {
    /// List configured providers
    List,
    /// Add or replace a provider endpoint
    Add {
        /// Provider id
        id: String,
        /// Endpoint base URL
        #[arg(long)]
        base_url: String,
        /// Wire dialect: "a" (messages API) or "b" (chat completions)
        #[arg(long)]
        dialect: String,
        /// Environment variable holding the credential
        #[arg(long)]
        credential_env: Option<String>,
        /// Models this provider serves (repeatable)
        #[arg(long = "model")]
        models: Vec<String>,
        /// Mark as the default provider
        #[arg(long)]
        default: bool,
    },
    /// Delete a provider
    Remove { id: String },
}

#[derive(Subcommand)]
pub enum AgentCommands {
    /// List configured agents
    List,
    /// Add or replace an agent
    Add {
        /// Agent id used by routing bindings
        id: String,
        /// Model name, resolved through the provider registry
        #[arg(long)]
        model: String,
        /// Display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,
        /// System prompt override
        #[arg(long)]
        system_prompt: Option<String>,
    },
    /// Mark an agent as the default
    SetDefault { id: String },
    /// Delete an agent (the default cannot be deleted)
    Remove { id: String },
}
