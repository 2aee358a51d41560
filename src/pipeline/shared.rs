//! Shared rule-engine utilities for the domain processors: keyword scoring,
//! regex field extraction, incremental hash tracking, and output writing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::crawler::CrawledItem;
use crate::extract::list::extract_date_from_url;
use crate::storage::{read_json, write_json_atomic};

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Accumulate weights for every keyword found in `text` (case-insensitive).
pub fn keyword_score(text: &str, keywords: &[(&str, i32)]) -> i32 {
    let lower = text.to_lowercase();
    keywords
        .iter()
        .filter(|(kw, _)| lower.contains(&kw.to_lowercase()))
        .map(|(_, w)| w)
        .sum()
}

pub fn clamp_score(score: i32) -> i32 {
    score.clamp(0, 100)
}

/// Importance bands. Ordered so `High > Medium` comparisons read naturally.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    Medium,
    High,
    Urgent,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Urgent => "urgent",
            Importance::High => "high",
            Importance::Medium => "medium",
            Importance::Low => "low",
        }
    }
}

/// Band a match score, with a deadline-proximity escalation and a title
/// keyword override.
pub fn compute_importance(
    match_score: i32,
    deadline: Option<&str>,
    title: &str,
    high_keywords: &[&str],
) -> Importance {
    if let Some(days) = days_left(deadline) {
        if days > 0 && days <= 14 {
            return Importance::Urgent;
        }
    }
    if match_score >= 70 {
        return Importance::High;
    }
    if high_keywords.iter().any(|kw| title.contains(kw)) {
        return Importance::High;
    }
    if match_score >= 40 {
        return Importance::Medium;
    }
    Importance::Low
}

// ---------------------------------------------------------------------------
// Regex extraction
// ---------------------------------------------------------------------------

static FUNDING_WAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:不超过|最高|最多|上限)?\s*(\d+(?:\.\d+)?(?:\s*[-~至到]\s*\d+(?:\.\d+)?)?)\s*万(?:元)?",
    )
    .unwrap()
});
static FUNDING_YI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*亿(?:元)?").unwrap());

/// Extract a funding amount, normalized to `<number>万元` / `<number>亿元`.
pub fn extract_funding(text: &str) -> Option<String> {
    if let Some(c) = FUNDING_WAN.captures(text) {
        return Some(format!("{}万元", c[1].replace(char::is_whitespace, "")));
    }
    if let Some(c) = FUNDING_YI.captures(text) {
        return Some(format!("{}亿元", &c[1]));
    }
    None
}

static DEADLINE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"截止[日时]?[期间]?[为：:\s]*(\d{4})\s*年\s*(\d{1,2})\s*月\s*(\d{1,2})\s*日")
            .unwrap(),
        Regex::new(r"(\d{4})\s*年\s*(\d{1,2})\s*月\s*(\d{1,2})\s*日\s*[前止]").unwrap(),
        Regex::new(r"截止[日时]?[期间]?[为：:\s]*(\d{4})[/-](\d{1,2})[/-](\d{1,2})").unwrap(),
    ]
});

/// Extract a submission deadline as `YYYY-MM-DD`.
pub fn extract_deadline(text: &str) -> Option<String> {
    for pattern in DEADLINE_PATTERNS.iter() {
        if let Some(c) = pattern.captures(text) {
            let (y, m, d) = (
                c[1].parse::<i32>().ok()?,
                c[2].parse::<u32>().ok()?,
                c[3].parse::<u32>().ok()?,
            );
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                return Some(date.format("%Y-%m-%d").to_string());
            }
        }
    }
    None
}

const LEADER_TITLES: &str = "总理|副总理|部长|副部长|主任|副主任|书记|副书记\
|院长|副院长|局长|副局长|委员|主席|副主席\
|市长|副市长|区长|副区长|司长|副司长";

static LEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?:{LEADER_TITLES})\s*([\p{{Han}}]{{2,4}})|([\p{{Han}}]{{2,4}})\s*(?:{LEADER_TITLES})"
    ))
    .unwrap()
});

/// Extract a leader name adjacent to a title keyword.
pub fn extract_leader(text: &str) -> Option<String> {
    LEADER_RE.captures(text).and_then(|c| {
        c.get(1)
            .or_else(|| c.get(2))
            .map(|m| m.as_str().to_string())
    })
}

pub fn days_left(deadline: Option<&str>) -> Option<i64> {
    let deadline = deadline?;
    let date = NaiveDate::parse_from_str(deadline, "%Y-%m-%d").ok()?;
    Some((date - Utc::now().date_naive()).num_days().max(0))
}

/// Best-effort article date: published timestamp, then URL patterns, then
/// today.
pub fn article_date(item: &CrawledItem) -> String {
    if let Some(dt) = &item.published_at {
        return dt.format("%Y-%m-%d").to_string();
    }
    if let Some(d) = extract_date_from_url(&item.url) {
        return d.format("%Y-%m-%d").to_string();
    }
    Utc::now().format("%Y-%m-%d").to_string()
}

// ---------------------------------------------------------------------------
// Incremental processing tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrackerFile {
    #[serde(default)]
    hashes: HashMap<String, Option<String>>,
    #[serde(default)]
    last_run: Option<DateTime<Utc>>,
}

/// Tracks which raw items a processor has already handled.
///
/// Keyed by `url_hash`, storing the `content_hash` seen at processing time:
/// an item is new-or-changed when its current content hash differs from the
/// stored one (or it was never seen).
pub struct HashTracker {
    path: PathBuf,
    hashes: HashMap<String, Option<String>>,
}

impl HashTracker {
    pub fn load(processed_dir: &Path) -> Self {
        let path = processed_dir.join("_processed_hashes.json");
        let hashes = read_json::<TrackerFile>(&path)
            .ok()
            .flatten()
            .map(|f| f.hashes)
            .unwrap_or_default();
        Self { path, hashes }
    }

    pub fn is_new_or_changed(&self, item: &CrawledItem) -> bool {
        match self.hashes.get(&item.url_hash) {
            None => true,
            Some(stored) => stored != &item.content_hash,
        }
    }

    pub fn mark(&mut self, item: &CrawledItem) {
        self.hashes
            .insert(item.url_hash.clone(), item.content_hash.clone());
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn save(&self) -> Result<()> {
        write_json_atomic(
            &self.path,
            &TrackerFile {
                hashes: self.hashes.clone(),
                last_run: Some(Utc::now()),
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Output writing
// ---------------------------------------------------------------------------

/// Standard processed-feed envelope: `generated_at`, `item_count`, `items`,
/// plus module extras. Written atomically.
pub fn save_output_json(
    processed_dir: &Path,
    filename: &str,
    items: Vec<serde_json::Value>,
    extra: Option<serde_json::Map<String, serde_json::Value>>,
) -> Result<()> {
    let mut payload = serde_json::Map::new();
    payload.insert("generated_at".to_string(), serde_json::json!(Utc::now()));
    payload.insert("item_count".to_string(), serde_json::json!(items.len()));
    payload.insert("items".to_string(), serde_json::Value::Array(items));
    if let Some(extra) = extra {
        payload.extend(extra);
    }
    write_json_atomic(
        &processed_dir.join(filename),
        &serde_json::Value::Object(payload),
    )
}

/// Collect raw items from a set of artifacts, deduplicated by `url_hash`.
pub fn collect_unique_items(
    artifacts: Vec<crate::storage::raw_store::RawArtifact>,
) -> Vec<CrawledItem> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for artifact in artifacts {
        for item in artifact.items {
            if seen.insert(item.url_hash.clone()) {
                out.push(item);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_score_sums_case_insensitive_hits() {
        let score = keyword_score(
            "新一代人工智能与AI芯片",
            &[("人工智能", 20), ("ai", 15), ("区块链", 10)],
        );
        assert_eq!(score, 35);
    }

    #[test]
    fn funding_normalizes_to_wan_yuan() {
        assert_eq!(
            extract_funding("资助上限 500 万元，另有说明").as_deref(),
            Some("500万元")
        );
        assert_eq!(extract_funding("总投资 2.5 亿元").as_deref(), Some("2.5亿元"));
        assert_eq!(extract_funding("无金额"), None);
    }

    #[test]
    fn deadline_formats_parse() {
        assert_eq!(
            extract_deadline("申报截止 2026-06-30").as_deref(),
            Some("2026-06-30")
        );
        assert_eq!(
            extract_deadline("截止日期为2026年7月15日").as_deref(),
            Some("2026-07-15")
        );
        assert_eq!(
            extract_deadline("请于2026年8月1日前提交").as_deref(),
            Some("2026-08-01")
        );
        assert_eq!(extract_deadline("没有日期"), None);
    }

    #[test]
    fn leader_name_next_to_title() {
        assert_eq!(extract_leader("市长李强出席会议").as_deref(), Some("李强"));
        assert_eq!(extract_leader("会见了王芳副主任").as_deref(), Some("王芳"));
        assert_eq!(extract_leader("没有领导"), None);
    }

    #[test]
    fn importance_banding() {
        assert_eq!(compute_importance(80, None, "x", &[]), Importance::High);
        assert_eq!(compute_importance(50, None, "x", &[]), Importance::Medium);
        assert_eq!(compute_importance(10, None, "x", &[]), Importance::Low);
        assert_eq!(
            compute_importance(10, None, "人工智能专项", &["人工智能"]),
            Importance::High
        );
        // A near deadline escalates regardless of score.
        let soon = (Utc::now().date_naive() + chrono::Duration::days(5))
            .format("%Y-%m-%d")
            .to_string();
        assert_eq!(
            compute_importance(10, Some(&soon), "x", &[]),
            Importance::Urgent
        );
        assert!(Importance::High > Importance::Medium);
    }

    #[test]
    fn tracker_detects_content_changes() {
        let dir = tempfile::tempdir().unwrap();
        let def = crate::crawler::tests::test_source("s1");
        let mut item = crate::crawler::CrawledItem::new("t", "https://x/a", &def);
        item.content_hash = Some("h1".to_string());

        let mut tracker = HashTracker::load(dir.path());
        assert!(tracker.is_new_or_changed(&item));
        tracker.mark(&item);
        tracker.save().unwrap();

        let tracker = HashTracker::load(dir.path());
        assert!(!tracker.is_new_or_changed(&item));
        // Same URL, new content → reprocess.
        item.content_hash = Some("h2".to_string());
        assert!(tracker.is_new_or_changed(&item));
    }

    #[test]
    fn output_envelope_has_standard_fields() {
        let dir = tempfile::tempdir().unwrap();
        save_output_json(
            dir.path(),
            "feed.json",
            vec![serde_json::json!({"id": 1})],
            None,
        )
        .unwrap();
        let v: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("feed.json")).unwrap())
                .unwrap();
        assert_eq!(v["item_count"], 1);
        assert!(v["generated_at"].is_string());
        assert!(v["items"].is_array());
    }
}
