// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use relay_store::KeyedStore;

use crate::{CronJob, CronJobOptions};

/// Fires one isolated headless agent turn for a job.  Implemented by the
/// gateway.
#[async_trait]
pub trait CronExecutor: Send + Sync {
    async fn fire(&self, job: &CronJob) -> anyhow::Result<()>;
}

/// Persistent schedule store with one scheduler task per enabled job.
///
/// Fires never overlap per job: each job has a single timer task that
/// sleeps to the next tick, advances `last_run_at`, runs the handler to
/// completion, and only then sleeps again.  `last_run_at` is persisted
/// *before* the handler runs so a crash mid-run still advances the job
/// (at-most-once over duplicated side effects).
pub struct CronService {
    store: KeyedStore<CronJob>,
    executor: Arc<dyn CronExecutor>,
    tasks: StdMutex<HashMap<String, JoinHandle<()>>>,
}

impl CronService {
    pub fn open(
        path: impl Into<PathBuf>,
        executor: Arc<dyn CronExecutor>,
    ) -> anyhow::Result<Self> {
        let store = KeyedStore::open(path.into()).context("opening cron job store")?;
        Ok(Self {
            store,
            executor,
            tasks: StdMutex::new(HashMap::new()),
        })
    }

    /// Start scheduler tasks for every enabled stored job.
    pub fn start(self: &Arc<Self>) {
        for job in self.store.values() {
            if job.enabled {
                self.spawn_job(&job.job_id);
            }
        }
        info!(jobs = self.store.len(), "cron service started");
    }

    /// Validate, store, and start a new job.
    pub fn add(
        self: &Arc<Self>,
        schedule: &str,
        message: &str,
        opts: CronJobOptions,
    ) -> anyhow::Result<CronJob> {
        parse_schedule(schedule)?;
        let job = CronJob {
            job_id: Uuid::new_v4().to_string(),
            name: opts.name,
            schedule: schedule.to_string(),
            message: message.to_string(),
            enabled: true,
            created_at: Utc::now(),
            last_run_at: None,
            delivery: opts.delivery,
            agent_id: opts.agent_id,
        };
        self.store.insert(job.job_id.clone(), job.clone())?;
        self.spawn_job(&job.job_id);
        info!(job_id = %job.job_id, schedule = %job.schedule, "cron job added");
        Ok(job)
    }

    pub fn get(&self, job_id: &str) -> Option<CronJob> {
        self.store.get(job_id)
    }

    pub fn list(&self) -> Vec<CronJob> {
        self.store.values()
    }

    /// Enable or disable a job, preserving it either way.
    pub fn set_enabled(self: &Arc<Self>, job_id: &str, enabled: bool) -> anyhow::Result<()> {
        let Some(mut job) = self.store.get(job_id) else {
            bail!("no such cron job: {job_id}");
        };
        job.enabled = enabled;
        self.store.insert(job_id.to_string(), job)?;
        if enabled {
            self.spawn_job(job_id);
        } else {
            self.stop_task(job_id);
        }
        Ok(())
    }

    /// Remove a job.  The scheduler task is stopped first so no fire can
    /// race the deletion.
    pub fn remove(&self, job_id: &str) -> anyhow::Result<()> {
        self.stop_task(job_id);
        if self.store.remove(job_id)?.is_none() {
            bail!("no such cron job: {job_id}");
        }
        Ok(())
    }

    /// Stop every scheduler task (jobs stay stored).
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    fn stop_task(&self, job_id: &str) {
        if let Some(handle) = self.tasks.lock().unwrap().remove(job_id) {
            handle.abort();
        }
    }

    fn spawn_job(self: &Arc<Self>, job_id: &str) {
        self.stop_task(job_id);
        let service = Arc::clone(self);
        let task_job_id = job_id.to_string();
        let handle = tokio::spawn(async move {
            service.run_job(&task_job_id).await;
        });
        self.tasks.lock().unwrap().insert(job_id.to_string(), handle);
    }

    async fn run_job(self: Arc<Self>, job_id: &str) {
        loop {
            let Some(job) = self.store.get(job_id) else { return };
            if !job.enabled {
                return;
            }
            let schedule = match parse_schedule(&job.schedule) {
                Ok(s) => s,
                Err(e) => {
                    warn!(job_id, error = %e, "stored cron expression no longer parses");
                    return;
                }
            };
            let Some(next) = schedule.upcoming(Utc).next() else {
                debug!(job_id, "schedule has no future fires");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            // Re-fetch: the job may have been disabled or deleted while we
            // slept.
            let Some(mut job) = self.store.get(job_id) else { return };
            if !job.enabled {
                return;
            }

            // Advance last_run_at before running the handler.
            job.last_run_at = Some(Utc::now());
            if let Err(e) = self.store.insert(job_id.to_string(), job.clone()) {
                warn!(job_id, error = %e, "failed to persist last_run_at");
            }

            debug!(job_id, "cron fire");
            if let Err(e) = self.executor.fire(&job).await {
                warn!(job_id, error = %e, "cron fire failed");
            }
        }
    }
}

/// Parse a cron expression, accepting both the 5-field form and the
/// 6/7-field form with seconds.  Five-field expressions fire at second 0.
fn parse_schedule(expr: &str) -> anyhow::Result<Schedule> {
    let fields = expr.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized).with_context(|| format!("invalid cron expression: {expr}"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
