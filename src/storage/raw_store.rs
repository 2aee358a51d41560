//! Raw artifact storage: one `latest.json` per source, overwritten each run
//! with an `is_new` delta against the previous artifact.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::SourceDefinition;
use crate::crawler::CrawledItem;
use crate::storage::{read_json, write_json_atomic};

/// On-disk shape of `latest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArtifact {
    pub source_id: String,
    pub dimension: String,
    #[serde(default)]
    pub group: Option<String>,
    pub source_name: String,
    pub crawled_at: DateTime<Utc>,
    #[serde(default)]
    pub previous_crawled_at: Option<DateTime<Utc>>,
    pub item_count: usize,
    pub new_item_count: usize,
    pub items: Vec<CrawledItem>,
}

#[derive(Debug, Clone)]
pub struct RawStore {
    base_dir: PathBuf,
}

impl RawStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// `data/raw/{dimension}/[{group}/]{source_id}/latest.json`
    pub fn artifact_path(&self, def: &SourceDefinition) -> PathBuf {
        let mut dir = self.base_dir.join(&def.dimension);
        if let Some(group) = &def.group {
            dir = dir.join(group);
        }
        dir.join(&def.id).join("latest.json")
    }

    pub fn load(&self, def: &SourceDefinition) -> Result<Option<RawArtifact>> {
        match read_json(&self.artifact_path(def)) {
            Ok(v) => Ok(v),
            Err(e) => {
                // A corrupted artifact must not wedge the source forever.
                warn!(source_id = %def.id, error = %e, "unreadable artifact, treating as absent");
                Ok(None)
            }
        }
    }

    /// Hash set of the previous run's items; empty when no prior artifact.
    pub fn previous_hashes(&self, def: &SourceDefinition) -> HashSet<String> {
        self.load(def)
            .ok()
            .flatten()
            .map(|artifact| artifact.items.into_iter().map(|i| i.url_hash).collect())
            .unwrap_or_default()
    }

    /// Overwrite the artifact with the current run's items. Items must
    /// already carry their `is_new` flags (the crawler run computes them
    /// against `previous_hashes`). Returns the written artifact.
    pub fn save(
        &self,
        def: &SourceDefinition,
        items: &[CrawledItem],
        crawled_at: DateTime<Utc>,
    ) -> Result<RawArtifact> {
        let previous_crawled_at = self.load(def)?.map(|prev| prev.crawled_at);

        let artifact = RawArtifact {
            source_id: def.id.clone(),
            dimension: def.dimension.clone(),
            group: def.group.clone(),
            source_name: def.name.clone(),
            crawled_at,
            previous_crawled_at,
            item_count: items.len(),
            new_item_count: items.iter().filter(|i| i.is_new).count(),
            items: items.to_vec(),
        };

        let path = self.artifact_path(def);
        write_json_atomic(&path, &artifact)?;
        info!(
            source_id = %def.id,
            items = artifact.item_count,
            new = artifact.new_item_count,
            path = %path.display(),
            "artifact written"
        );
        Ok(artifact)
    }

    /// All artifacts under one dimension (any group), newest-write order not
    /// guaranteed. Used by the analytical pipeline and the read API.
    pub fn load_dimension(&self, dimension: &str) -> Vec<RawArtifact> {
        let mut artifacts = Vec::new();
        collect_artifacts(&self.base_dir.join(dimension), &mut artifacts);
        artifacts
    }

    /// Every artifact in the store.
    pub fn load_all(&self) -> Vec<RawArtifact> {
        let mut artifacts = Vec::new();
        collect_artifacts(&self.base_dir, &mut artifacts);
        artifacts
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// True when no artifact has ever been written (first-run priming check).
    pub fn is_empty(&self) -> bool {
        self.load_all().is_empty()
    }
}

fn collect_artifacts(dir: &Path, out: &mut Vec<RawArtifact>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            collect_artifacts(&path, out);
        } else if path.file_name().map(|n| n == "latest.json").unwrap_or(false) {
            match read_json::<RawArtifact>(&path) {
                Ok(Some(artifact)) => out.push(artifact),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable artifact"),
            }
        }
    }
}
