//! Snapshot records for change-detection sources:
//! `data/state/snapshots/{source_id}.json`, an ordered list (oldest first).

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{read_json, write_json_atomic};

/// Keep a bounded history; the diff only ever needs the latest entry, the
/// rest is for operators inspecting when a page changed.
const MAX_SNAPSHOTS_PER_SOURCE: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub captured_at: DateTime<Utc>,
    pub content_hash: String,
    pub content_length: usize,
    #[serde(default)]
    pub diff_summary: Option<String>,
    /// Full text kept so the next change can be diffed line-by-line.
    #[serde(default)]
    pub content_text: Option<String>,
}

pub struct SnapshotStore {
    base_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: state_dir.into().join("snapshots"),
        }
    }

    fn path(&self, source_id: &str) -> PathBuf {
        self.base_dir.join(format!("{source_id}.json"))
    }

    pub fn load(&self, source_id: &str) -> Vec<SnapshotRecord> {
        read_json(&self.path(source_id))
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    pub fn last(&self, source_id: &str) -> Option<SnapshotRecord> {
        self.load(source_id).into_iter().last()
    }

    pub fn append(&self, source_id: &str, record: SnapshotRecord) -> Result<()> {
        let mut records = self.load(source_id);
        records.push(record);
        if records.len() > MAX_SNAPSHOTS_PER_SOURCE {
            let excess = records.len() - MAX_SNAPSHOTS_PER_SOURCE;
            records.drain(0..excess);
        }
        // Old entries no longer need the full text; the latest one does.
        let last_idx = records.len() - 1;
        for (i, rec) in records.iter_mut().enumerate() {
            if i != last_idx {
                rec.content_text = None;
            }
        }
        write_json_atomic(&self.path(source_id), &records)
    }
}
