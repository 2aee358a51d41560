//! Periodic crawl scheduling and the shared run path.
//!
//! `Monitor` owns the catalog, the stores, and the concurrency gates; the
//! cron layer registers one job per enabled source plus the daily pipeline.
//! Every run path (scheduled, manual trigger, CLI one-shot) goes through
//! `execute_crawl`, so state, logs, and artifacts stay consistent.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use metrics::gauge;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::catalog::{load_catalog, Schedule, SourceDefinition};
use crate::config::Settings;
use crate::crawler::{self, CrawlContext, CrawlResult, CrawlStatus};
use crate::fetch::BrowserPool;
use crate::registry::build_fetcher;
use crate::storage::raw_store::RawStore;
use crate::storage::run_log::{RunLogEntry, RunLogStore};
use crate::storage::snapshot_store::SnapshotStore;
use crate::storage::state::StateStore;

/// Jitter ceiling applied to every scheduled task, seconds.
const SCHEDULE_JITTER_SECS: u64 = 300;
/// How long `stop()` waits for in-flight crawls.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Resolved trigger for a symbolic schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Interval(Duration),
    /// Six-field cron expression (sec min hour dom month dow), UTC.
    Cron(String),
}

pub fn resolve_schedule(schedule: Schedule) -> Trigger {
    match schedule {
        Schedule::TwoHourly => Trigger::Interval(Duration::from_secs(2 * 3600)),
        Schedule::FourHourly => Trigger::Interval(Duration::from_secs(4 * 3600)),
        Schedule::Daily => Trigger::Cron("0 0 6 * * *".to_string()),
        Schedule::Weekly => Trigger::Cron("0 0 3 * * Mon".to_string()),
        Schedule::Monthly => Trigger::Cron("0 0 2 1 * *".to_string()),
    }
}

/// Process-wide handle over catalog, stores, and concurrency gates.
pub struct Monitor {
    pub settings: Settings,
    pub catalog: Vec<SourceDefinition>,
    pub raw: RawStore,
    pub state: StateStore,
    pub run_logs: RunLogStore,
    pub ctx: CrawlContext,
    global: Arc<Semaphore>,
    in_flight: Mutex<HashSet<String>>,
    sched: tokio::sync::Mutex<Option<JobScheduler>>,
}

impl Monitor {
    pub fn new(settings: Settings) -> Result<Self> {
        let catalog = load_catalog(&settings.sources_dir)?;
        let snapshots = Arc::new(SnapshotStore::new(settings.state_dir()));
        Ok(Self {
            raw: RawStore::new(settings.raw_dir()),
            state: StateStore::new(settings.state_dir()),
            run_logs: RunLogStore::new(settings.logs_dir()),
            ctx: CrawlContext {
                browser: Arc::new(BrowserPool::from_settings(&settings)),
                snapshots,
            },
            global: Arc::new(Semaphore::new(settings.max_concurrent_crawls)),
            in_flight: Mutex::new(HashSet::new()),
            sched: tokio::sync::Mutex::new(None),
            catalog,
            settings,
        })
    }

    pub fn source(&self, source_id: &str) -> Option<&SourceDefinition> {
        self.catalog.iter().find(|s| s.id == source_id)
    }

    /// Catalog `enabled` with the state-file override applied.
    pub fn is_source_enabled(&self, def: &SourceDefinition) -> bool {
        self.state.is_enabled(&def.id, def.enabled)
    }

    fn try_begin(&self, source_id: &str) -> bool {
        self.in_flight
            .lock()
            .expect("in-flight set poisoned")
            .insert(source_id.to_string())
    }

    fn finish(&self, source_id: &str) {
        self.in_flight
            .lock()
            .expect("in-flight set poisoned")
            .remove(source_id);
    }

    fn in_flight_count(&self) -> usize {
        self.in_flight.lock().expect("in-flight set poisoned").len()
    }

    /// The single run path: crawl, persist the artifact, update state,
    /// append the run log. Returns `None` when the source is already
    /// running (per-source max_instances = 1).
    pub async fn execute_crawl(&self, def: &SourceDefinition) -> Option<CrawlResult> {
        if !self.try_begin(&def.id) {
            warn!(source_id = %def.id, "crawl already in flight, trigger rejected");
            return None;
        }

        let result = async {
            let _permit = self.global.acquire().await.expect("global semaphore closed");
            gauge!("crawls_in_flight").set(self.in_flight_count() as f64);

            let fetcher = match build_fetcher(def) {
                Ok(f) => f,
                Err(e) => {
                    // Configuration errors still produce a FAILED record.
                    let now = Utc::now();
                    return CrawlResult {
                        source_id: def.id.clone(),
                        status: CrawlStatus::Failed,
                        items_total: 0,
                        items_new: 0,
                        started_at: now,
                        ended_at: now,
                        duration_seconds: 0.0,
                        error_message: Some(e.to_string()),
                        items: Vec::new(),
                    };
                }
            };

            let prior = self.raw.previous_hashes(def);
            crawler::run(def, fetcher.as_ref(), &self.ctx, &prior).await
        }
        .await;

        // A failed run keeps the last-good artifact on disk.
        if result.status != CrawlStatus::Failed {
            if let Err(e) = self.raw.save(def, &result.items, result.ended_at) {
                error!(source_id = %def.id, error = %e, "artifact write failed");
            }
        }

        let succeeded = result.status != CrawlStatus::Failed;
        if let Err(e) = self.state.record_run(&def.id, succeeded, result.ended_at) {
            error!(source_id = %def.id, error = %e, "state update failed");
        }
        if let Err(e) = self.run_logs.append(RunLogEntry::from(&result)) {
            error!(source_id = %def.id, error = %e, "run log append failed");
        }

        self.finish(&def.id);
        gauge!("crawls_in_flight").set(self.in_flight_count() as f64);
        Some(result)
    }

    /// One-shot crawl for the CLI and the manual-trigger endpoint.
    pub async fn run_single(&self, source_id: &str) -> Result<CrawlResult> {
        let def = self
            .source(source_id)
            .with_context(|| format!("source not found: {source_id}"))?
            .clone();
        self.execute_crawl(&def)
            .await
            .with_context(|| format!("source already running: {source_id}"))
    }

    /// Fire-and-forget trigger used by the read API.
    pub fn trigger(self: Arc<Self>, source_id: &str) -> Result<()> {
        let def = self
            .source(source_id)
            .with_context(|| format!("source not found: {source_id}"))?
            .clone();
        tokio::spawn(async move {
            self.execute_crawl(&def).await;
        });
        Ok(())
    }

    /// Crawl every enabled source (optionally one dimension), bounded by the
    /// global cap. Returns (succeeded, failed) counts.
    pub async fn run_all(self: Arc<Self>, dimension: Option<&str>) -> (usize, usize) {
        let targets: Vec<SourceDefinition> = self
            .catalog
            .iter()
            .filter(|def| self.is_source_enabled(def))
            .filter(|def| dimension.map(|d| def.dimension == d).unwrap_or(true))
            .cloned()
            .collect();

        info!(count = targets.len(), "running crawl sweep");
        let mut handles = Vec::new();
        for def in targets {
            let monitor = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                monitor
                    .execute_crawl(&def)
                    .await
                    .map(|r| r.status != CrawlStatus::Failed)
                    .unwrap_or(false)
            }));
        }

        let mut ok = 0;
        let mut failed = 0;
        for handle in handles {
            match handle.await {
                Ok(true) => ok += 1,
                _ => failed += 1,
            }
        }
        info!(ok, failed, "crawl sweep finished");
        (ok, failed)
    }

    /// Register all periodic jobs and start the cron loop.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let sched = JobScheduler::new().await?;

        let mut registered = 0usize;
        for def in &self.catalog {
            if !self.is_source_enabled(def) {
                continue;
            }
            let trigger = resolve_schedule(def.schedule);
            // Fixed per-task jitter smears the daily stampede.
            let jitter = rand::thread_rng().gen_range(0..=SCHEDULE_JITTER_SECS);
            let monitor = Arc::clone(&self);
            let def = def.clone();

            let run = move || {
                let monitor = Arc::clone(&monitor);
                let def = def.clone();
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(jitter)).await;
                    monitor.execute_crawl(&def).await;
                })
                    as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            };

            let job = match trigger {
                Trigger::Interval(period) => {
                    Job::new_repeated_async(period, move |_id, _sched| run())?
                }
                Trigger::Cron(expr) => Job::new_async(expr.as_str(), move |_id, _sched| run())?,
            };
            sched.add(job).await?;
            registered += 1;
        }

        // Daily pipeline job.
        let pipeline_cron = format!(
            "0 {} {} * * *",
            self.settings.pipeline_cron_minute, self.settings.pipeline_cron_hour
        );
        let monitor = Arc::clone(&self);
        sched
            .add(Job::new_async(pipeline_cron.as_str(), move |_id, _sched| {
                let monitor = Arc::clone(&monitor);
                Box::pin(async move {
                    crate::pipeline::run_daily_pipeline(&monitor).await;
                })
            })?)
            .await?;

        sched.start().await?;
        *self.sched.lock().await = Some(sched);
        info!(
            sources = registered,
            pipeline_at = format!(
                "{:02}:{:02}Z",
                self.settings.pipeline_cron_hour, self.settings.pipeline_cron_minute
            ),
            "scheduler started"
        );

        // First-run priming: an empty raw store means nothing for the API to
        // serve, so run the pipeline once in the background.
        if self.raw.is_empty() {
            info!("raw store empty, priming with a full pipeline run");
            let monitor = Arc::clone(&self);
            tokio::spawn(async move {
                crate::pipeline::run_daily_pipeline(&monitor).await;
            });
        }

        Ok(())
    }

    /// Quiesce: stop firing jobs, wait for in-flight crawls, close the
    /// browser.
    pub async fn stop(&self) {
        if let Some(mut sched) = self.sched.lock().await.take() {
            if let Err(e) = sched.shutdown().await {
                warn!(error = %e, "cron shutdown error");
            }
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while self.in_flight_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        let remaining = self.in_flight_count();
        if remaining > 0 {
            warn!(remaining, "shutdown grace expired with crawls still running");
        }

        self.ctx.browser.shutdown().await;
        info!("scheduler stopped");
    }
}
