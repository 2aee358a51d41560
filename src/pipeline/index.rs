//! `data/index.json`: per-dimension counts and freshness, the read API's
//! cheap overview document.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::scheduler::Monitor;
use crate::storage::write_json_atomic;

pub fn generate_index(monitor: &Monitor) -> Result<Value> {
    let artifacts = monitor.raw.load_all();

    #[derive(Default)]
    struct DimStats {
        sources: u64,
        articles: u64,
        new_articles: u64,
        last_crawled_at: Option<DateTime<Utc>>,
    }

    let mut dims: BTreeMap<String, DimStats> = BTreeMap::new();
    for artifact in &artifacts {
        let stats = dims.entry(artifact.dimension.clone()).or_default();
        stats.sources += 1;
        stats.articles += artifact.item_count as u64;
        stats.new_articles += artifact.new_item_count as u64;
        stats.last_crawled_at = match stats.last_crawled_at {
            Some(prev) if prev >= artifact.crawled_at => Some(prev),
            _ => Some(artifact.crawled_at),
        };
    }

    let total_articles: u64 = dims.values().map(|d| d.articles).sum();
    let total_enabled = monitor
        .catalog
        .iter()
        .filter(|def| monitor.is_source_enabled(def))
        .count();

    let index = json!({
        "generated_at": Utc::now(),
        "total_sources": monitor.catalog.len(),
        "total_enabled": total_enabled,
        "total_articles": total_articles,
        "dimensions": dims
            .iter()
            .map(|(name, s)| json!({
                "dimension": name,
                "sources": s.sources,
                "articles": s.articles,
                "new_articles": s.new_articles,
                "last_crawled_at": s.last_crawled_at,
            }))
            .collect::<Vec<_>>(),
    });

    write_json_atomic(&monitor.settings.data_dir.join("index.json"), &index)?;
    Ok(index)
}
