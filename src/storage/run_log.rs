//! Per-source run logs: `data/logs/{source_id}/crawl_logs.json`, a JSON
//! array capped at the last 100 entries, newest last.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::crawler::{CrawlResult, CrawlStatus};
use crate::storage::{read_json, write_json_atomic};

pub const MAX_LOGS_PER_SOURCE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub source_id: String,
    pub status: CrawlStatus,
    pub items_total: usize,
    pub items_new: usize,
    #[serde(default)]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl From<&CrawlResult> for RunLogEntry {
    fn from(result: &CrawlResult) -> Self {
        Self {
            source_id: result.source_id.clone(),
            status: result.status,
            items_total: result.items_total,
            items_new: result.items_new,
            error_message: result.error_message.clone(),
            started_at: result.started_at,
            ended_at: result.ended_at,
            duration_seconds: result.duration_seconds,
        }
    }
}

pub struct RunLogStore {
    base_dir: PathBuf,
    // Appends are serialized per process; per-source locking would only
    // matter with multiple writers, which the scheduler already prevents.
    lock: Mutex<()>,
}

impl RunLogStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn log_path(&self, source_id: &str) -> PathBuf {
        self.base_dir.join(source_id).join("crawl_logs.json")
    }

    pub fn load(&self, source_id: &str) -> Vec<RunLogEntry> {
        read_json(&self.log_path(source_id))
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    pub fn append(&self, entry: RunLogEntry) -> Result<()> {
        let _guard = self.lock.lock().expect("run log mutex poisoned");
        let source_id = entry.source_id.clone();
        let mut logs = self.load(&source_id);
        logs.push(entry);
        if logs.len() > MAX_LOGS_PER_SOURCE {
            let excess = logs.len() - MAX_LOGS_PER_SOURCE;
            logs.drain(0..excess);
        }
        write_json_atomic(&self.log_path(&source_id), &logs)
    }

    /// Most recent entries first, across one source.
    pub fn recent(&self, source_id: &str, limit: usize) -> Vec<RunLogEntry> {
        let mut logs = self.load(source_id);
        logs.reverse();
        logs.truncate(limit);
        logs
    }

    /// Aggregate counts over the trailing window, for the health endpoint.
    pub fn recent_stats(&self, hours: i64) -> HashMap<String, u64> {
        let cutoff = Utc::now() - Duration::hours(hours);
        let mut crawls = 0u64;
        let mut new_articles = 0u64;

        if let Ok(entries) = std::fs::read_dir(&self.base_dir) {
            for entry in entries.filter_map(|e| e.ok()) {
                if !entry.path().is_dir() {
                    continue;
                }
                let source_id = entry.file_name().to_string_lossy().into_owned();
                for log in self.load(&source_id) {
                    if log.started_at >= cutoff {
                        crawls += 1;
                        new_articles += log.items_new as u64;
                    }
                }
            }
        }

        HashMap::from([
            ("crawls".to_string(), crawls),
            ("new_articles".to_string(), new_articles),
        ])
    }
}
