//! Per-source runtime state: the one process-wide mutable file.
//!
//! `source_state.json` is a map `source_id → SourceState`, read-modify-
//! written under an in-process mutex with atomic replacement. The catalog
//! stays immutable; everything that changes between crawls lives here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::{read_json, write_json_atomic};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceState {
    #[serde(default)]
    pub last_crawl_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    /// API-set override of the catalog's `enabled` flag.
    #[serde(default)]
    pub is_enabled_override: Option<bool>,
}

pub struct StateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: state_dir.into().join("source_state.json"),
            lock: Mutex::new(()),
        }
    }

    fn load_map(&self) -> HashMap<String, SourceState> {
        match read_json(&self.path) {
            Ok(Some(map)) => map,
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(error = %e, "corrupted source_state.json, starting fresh");
                HashMap::new()
            }
        }
    }

    pub fn get(&self, source_id: &str) -> SourceState {
        self.load_map().get(source_id).cloned().unwrap_or_default()
    }

    pub fn all(&self) -> HashMap<String, SourceState> {
        self.load_map()
    }

    /// Read-modify-write one entry under the store mutex.
    pub fn update<F>(&self, source_id: &str, mutate: F) -> Result<SourceState>
    where
        F: FnOnce(&mut SourceState),
    {
        let _guard = self.lock.lock().expect("state mutex poisoned");
        let mut map = self.load_map();
        let entry = map.entry(source_id.to_string()).or_default();
        mutate(entry);
        let updated = entry.clone();
        write_json_atomic(&self.path, &map)?;
        Ok(updated)
    }

    /// Record a finished run: stamps `last_crawl_at`, and either resets the
    /// failure counter (success-ish outcomes) or increments it.
    pub fn record_run(&self, source_id: &str, succeeded: bool, at: DateTime<Utc>) -> Result<SourceState> {
        self.update(source_id, |state| {
            state.last_crawl_at = Some(at);
            if succeeded {
                state.last_success_at = Some(at);
                state.consecutive_failures = 0;
            } else {
                state.consecutive_failures += 1;
            }
        })
    }

    pub fn set_enabled_override(&self, source_id: &str, enabled: bool) -> Result<SourceState> {
        self.update(source_id, |state| {
            state.is_enabled_override = Some(enabled);
        })
    }

    /// Effective enabled flag: override wins over the catalog value.
    pub fn is_enabled(&self, source_id: &str, catalog_enabled: bool) -> bool {
        self.get(source_id)
            .is_enabled_override
            .unwrap_or(catalog_enabled)
    }
}
