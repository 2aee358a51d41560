//! Policy processor: tiered keyword scoring, opportunity detection, and the
//! `feed.json` / `opportunities.json` outputs, with an optional oracle pass
//! for the highest-scoring articles.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::crawler::CrawledItem;
use crate::oracle::{try_enrich, SharedOracle};
use crate::pipeline::shared::{
    article_date, clamp_score, collect_unique_items, compute_importance, days_left,
    extract_deadline, extract_funding, extract_leader, keyword_score, save_output_json,
    HashTracker, Importance,
};
use crate::pipeline::ProcessorContext;
use crate::storage::{read_json, write_json_atomic};

pub const MODULE_DIR: &str = "policy_intel";
pub const DIMENSIONS: &[&str] = &["national_policy", "beijing_policy"];
/// beijing_policy group that belongs to the personnel pipeline instead.
const PERSONNEL_GROUP: &str = "news_personnel";

pub const ORACLE_SCORE_THRESHOLD: i32 = 40;
pub const ORACLE_TOP_N: usize = 30;

// ---------------------------------------------------------------------------
// Keyword tables: tier A (institute-specific), B (adjacent fields), C
// (general signals). Weights calibrated so a directly-relevant policy lands
// above the high-importance band.
// ---------------------------------------------------------------------------

const KEYWORDS_TIER_A: &[(&str, i32)] = &[
    ("人工智能研究院", 30),
    ("新型研发机构", 25),
    ("具身智能", 25),
    ("人工智能", 30),
    ("大模型", 22),
    ("智能计算", 20),
    ("算力", 18),
    ("中关村", 18),
    ("AI", 15),
    ("海淀", 12),
];

const KEYWORDS_TIER_B: &[(&str, i32)] = &[
    ("实施方案", 15),
    ("科技成果转化", 12),
    ("机器人", 12),
    ("科技人才", 12),
    ("产业", 10),
    ("资助", 10),
    ("自然科学基金", 10),
    ("数字经济", 10),
    ("数据要素", 10),
    ("智能制造", 10),
    ("科研经费", 10),
    ("人才引进", 10),
    ("基础研究", 10),
    ("科技", 8),
    ("创新", 8),
    ("人才", 8),
    ("高新技术", 8),
];

const KEYWORDS_TIER_C: &[(&str, i32)] = &[
    ("专项资金", 8),
    ("申报", 6),
    ("教育", 5),
    ("高校", 5),
    ("科学", 5),
    ("信息化", 5),
    ("知识产权", 5),
    ("补贴", 5),
];

/// Title keywords that force high importance regardless of score.
const HIGH_IMPORTANCE_TITLE_KW: &[&str] = &["人工智能", "AI", "中关村", "大模型"];

/// Sources that are inherently closer to the institute's beat.
const SOURCE_SCORE_BONUS: &[(&str, i32)] = &[
    ("bjkw_policy", 15),
    ("zgc_policy", 15),
    ("ncsti_policy", 10),
    ("most_policy", 10),
    ("nsfc_news", 8),
    ("ndrc_policy", 5),
];

const AGENCY_MAP: &[(&str, &str)] = &[
    ("gov_cn_zhengce", "国务院"),
    ("ndrc_policy", "国家发改委"),
    ("moe_policy", "教育部"),
    ("most_policy", "科技部"),
    ("miit_policy", "工信部"),
    ("nsfc_news", "国家自然科学基金委"),
    ("beijing_zhengce", "北京市政府"),
    ("bjkw_policy", "北京市科委/中关村管委会"),
    ("zgc_policy", "中关村管委会"),
    ("ncsti_policy", "国际科创中心"),
    ("bjhd_policy", "海淀区政府"),
];

// ---------------------------------------------------------------------------
// Rule engine (Tier 1)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEnrichment {
    pub summary: String,
    pub importance: Importance,
    pub match_score: i32,
    pub is_opportunity: bool,
    pub funding: Option<String>,
    pub deadline: Option<String>,
    pub days_left: Option<i64>,
    pub agency: String,
    #[serde(default)]
    pub signals: Vec<String>,
    #[serde(default)]
    pub ai_insight: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    pub leader: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub enrichment_tier: String,
}

pub fn compute_match_score(item: &CrawledItem) -> i32 {
    let content = item.content.as_deref().unwrap_or("");
    let head: String = content.chars().take(3000).collect();
    let text = format!("{}\n{}", item.title, head);

    let mut score = keyword_score(&text, KEYWORDS_TIER_A)
        + keyword_score(&text, KEYWORDS_TIER_B)
        + keyword_score(&text, KEYWORDS_TIER_C);
    score += SOURCE_SCORE_BONUS
        .iter()
        .find(|(id, _)| *id == item.source_id)
        .map(|(_, bonus)| *bonus)
        .unwrap_or(0);
    clamp_score(score)
}

/// A policy is an opportunity when it carries fundable signals: an amount or
/// a submission deadline.
pub fn detect_opportunity(item: &CrawledItem) -> bool {
    let content = item.content.as_deref().unwrap_or("");
    extract_funding(content).is_some() || extract_deadline(content).is_some()
}

fn extract_tags(item: &CrawledItem) -> Vec<String> {
    let content = item.content.as_deref().unwrap_or("");
    let head: String = content.chars().take(2000).collect();
    let text = format!("{}\n{}", item.title, head).to_lowercase();
    let mut tags = Vec::new();
    for (kw, weight) in KEYWORDS_TIER_A.iter().chain(KEYWORDS_TIER_B) {
        if *weight >= 10 && text.contains(&kw.to_lowercase()) && !tags.contains(&kw.to_string()) {
            tags.push(kw.to_string());
        }
    }
    tags.truncate(6);
    tags
}

fn agency_for(item: &CrawledItem) -> String {
    AGENCY_MAP
        .iter()
        .find(|(id, _)| *id == item.source_id)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| item.source_id.clone())
}

/// Full Tier-1 enrichment for one article.
pub fn enrich_by_rules(item: &CrawledItem) -> PolicyEnrichment {
    let content = item.content.as_deref().unwrap_or("");
    let text = format!("{}\n{}", item.title, content);

    let match_score = compute_match_score(item);
    let deadline = extract_deadline(&text);
    let importance = compute_importance(
        match_score,
        deadline.as_deref(),
        &item.title,
        HIGH_IMPORTANCE_TITLE_KW,
    );

    PolicyEnrichment {
        summary: item.title.chars().take(80).collect(),
        importance,
        match_score,
        is_opportunity: detect_opportunity(item),
        funding: extract_funding(&text),
        days_left: days_left(deadline.as_deref()),
        deadline,
        agency: agency_for(item),
        signals: Vec::new(),
        ai_insight: None,
        detail: None,
        leader: extract_leader(&text),
        tags: extract_tags(item),
        enrichment_tier: "rules".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Enriched cache: one file per article under `_enriched/`
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub article: CrawledItem,
    pub enrichment: PolicyEnrichment,
}

fn enriched_dir(processed_dir: &Path) -> PathBuf {
    processed_dir.join("_enriched")
}

fn save_enriched(processed_dir: &Path, record: &EnrichedRecord) -> Result<()> {
    write_json_atomic(
        &enriched_dir(processed_dir).join(format!("{}.json", record.article.url_hash)),
        record,
    )
}

pub fn load_all_enriched(processed_dir: &Path) -> Vec<EnrichedRecord> {
    let dir = enriched_dir(processed_dir);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut records = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        match read_json::<EnrichedRecord>(&entry.path()) {
            Ok(Some(r)) => records.push(r),
            Ok(None) => {}
            Err(e) => warn!(path = %entry.path().display(), error = %e, "skipping bad enriched file"),
        }
    }
    records
}

// ---------------------------------------------------------------------------
// Output builders
// ---------------------------------------------------------------------------

fn feed_item(record: &EnrichedRecord) -> Value {
    let a = &record.article;
    let e = &record.enrichment;
    let category = if e.is_opportunity {
        "政策机会"
    } else if a.dimension == "beijing_policy" {
        "北京政策"
    } else {
        "国家政策"
    };
    json!({
        "id": a.url_hash,
        "title": a.title,
        "summary": e.summary,
        "category": category,
        "importance": e.importance,
        "date": article_date(a),
        "source": a.source_id,
        "source_url": a.url,
        "tags": e.tags,
        "match_score": e.match_score,
        "funding": e.funding,
        "deadline": e.deadline,
        "days_left": e.days_left,
        "leader": e.leader,
        "signals": e.signals,
        "ai_insight": e.ai_insight,
        "detail": e.detail,
    })
}

fn opportunity_status(days: Option<i64>) -> &'static str {
    match days {
        Some(d) if d <= 7 => "urgent",
        Some(d) if d <= 30 => "active",
        _ => "tracking",
    }
}

fn opportunity_item(record: &EnrichedRecord) -> Option<Value> {
    let e = &record.enrichment;
    if !e.is_opportunity {
        return None;
    }
    let a = &record.article;
    Some(json!({
        "id": a.url_hash,
        "name": a.title,
        "agency": e.agency,
        "agency_type": if a.dimension == "national_policy" { "national" } else { "beijing" },
        "match_score": e.match_score,
        "funding": e.funding.clone().unwrap_or_else(|| "待确认".to_string()),
        "deadline": e.deadline.clone().unwrap_or_else(|| "待确认".to_string()),
        "days_left": e.days_left.unwrap_or(999),
        "status": opportunity_status(e.days_left),
        "ai_insight": e.ai_insight,
        "source_url": a.url,
    }))
}

fn rebuild_outputs(processed_dir: &Path) -> Result<(usize, usize)> {
    let records = load_all_enriched(processed_dir);

    let mut feed: Vec<Value> = records.iter().map(feed_item).collect();
    feed.sort_by(|a, b| b["date"].as_str().cmp(&a["date"].as_str()));

    let mut opportunities: Vec<Value> =
        records.iter().filter_map(opportunity_item).collect();
    opportunities.sort_by_key(|o| o["days_left"].as_i64().unwrap_or(999));

    let counts = (feed.len(), opportunities.len());
    save_output_json(processed_dir, "feed.json", feed, None)?;
    save_output_json(processed_dir, "opportunities.json", opportunities, None)?;
    Ok(counts)
}

// ---------------------------------------------------------------------------
// Processor entry points
// ---------------------------------------------------------------------------

fn relevant_items(ctx: &ProcessorContext) -> Vec<CrawledItem> {
    let mut artifacts = Vec::new();
    for dim in DIMENSIONS {
        artifacts.extend(ctx.raw.load_dimension(dim));
    }
    artifacts.retain(|a| {
        !(a.dimension == "beijing_policy" && a.group.as_deref() == Some(PERSONNEL_GROUP))
    });
    collect_unique_items(artifacts)
}

/// Tier 1: score every new-or-changed article and rebuild the outputs.
pub fn process(ctx: &ProcessorContext, dry_run: bool, force: bool) -> Result<Value> {
    let processed_dir = ctx.processed_base.join(MODULE_DIR);
    let items = relevant_items(ctx);

    let mut tracker = HashTracker::load(&processed_dir);
    let pending: Vec<&CrawledItem> = items
        .iter()
        .filter(|item| force || tracker.is_new_or_changed(item))
        .collect();

    info!(
        total = items.len(),
        pending = pending.len(),
        dry_run,
        "policy processing"
    );

    if dry_run {
        return Ok(json!({"total": items.len(), "pending": pending.len(), "dry_run": true}));
    }

    let scored = pending.len();
    for item in pending {
        let record = EnrichedRecord {
            article: item.clone(),
            enrichment: enrich_by_rules(item),
        };
        save_enriched(&processed_dir, &record)?;
        tracker.mark(item);
    }
    tracker.save()?;

    let (feed_count, opp_count) = rebuild_outputs(&processed_dir)?;
    Ok(json!({
        "total": items.len(),
        "scored": scored,
        "feed_items": feed_count,
        "opportunities": opp_count,
    }))
}

/// Tier 2: oracle enrichment for the top candidates above the threshold.
pub async fn enrich_with_oracle(ctx: &ProcessorContext, oracle: &SharedOracle) -> Result<Value> {
    let processed_dir = ctx.processed_base.join(MODULE_DIR);
    let records = load_all_enriched(&processed_dir);
    if records.is_empty() {
        return Ok(json!({"enriched": 0, "reason": "no scored articles"}));
    }

    let mut candidates: Vec<EnrichedRecord> = records
        .into_iter()
        .filter(|r| r.enrichment.enrichment_tier != "oracle")
        .filter(|r| r.enrichment.match_score >= ORACLE_SCORE_THRESHOLD)
        .collect();
    candidates.sort_by_key(|r| -r.enrichment.match_score);
    candidates.truncate(ORACLE_TOP_N);

    let mut enriched = 0usize;
    let mut errors = 0usize;
    for mut record in candidates {
        let content_head: String = record
            .article
            .content
            .as_deref()
            .unwrap_or("")
            .chars()
            .take(2000)
            .collect();
        let user = format!(
            "标题: {}\n正文: {}\n请以JSON返回: {{\"ai_insight\": string, \"category\": string, \"match_score\": number, \"signals\": [string]}}",
            record.article.title, content_head
        );
        let Some(value) = try_enrich(
            oracle.as_ref(),
            "你是科技政策分析助手，评估政策与人工智能研究机构的相关性。只输出JSON。",
            &user,
        )
        .await
        else {
            errors += 1;
            continue;
        };

        if let Some(insight) = value["ai_insight"].as_str() {
            record.enrichment.ai_insight = Some(insight.to_string());
        }
        if let Some(score) = value["match_score"].as_i64() {
            record.enrichment.match_score = clamp_score(score as i32);
        }
        if let Some(signals) = value["signals"].as_array() {
            record.enrichment.signals = signals
                .iter()
                .filter_map(|s| s.as_str().map(String::from))
                .collect();
        }
        record.enrichment.enrichment_tier = "oracle".to_string();
        save_enriched(&processed_dir, &record)?;
        enriched += 1;
    }

    if enriched > 0 {
        rebuild_outputs(&processed_dir)?;
    }
    Ok(json!({"enriched": enriched, "errors": errors}))
}
