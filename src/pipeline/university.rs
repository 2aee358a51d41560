//! University-ecosystem processor: keyword classification of campus news
//! into personnel / research_outputs / events / general, with an influence
//! level for research items. No oracle pass by default.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::crawler::CrawledItem;
use crate::pipeline::shared::{article_date, collect_unique_items, keyword_score, save_output_json};
use crate::pipeline::ProcessorContext;

pub const MODULE_DIR: &str = "university_eco";
pub const DIMENSION: &str = "universities";

const CLASSIFY_THRESHOLD: i32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniCategory {
    Personnel,
    ResearchOutputs,
    Events,
    General,
}

const KEYWORDS_PERSONNEL: &[(&str, i32)] = &[
    ("任命", 30),
    ("聘任", 25),
    ("就任", 25),
    ("校长", 20),
    ("副校长", 20),
    ("院长", 15),
    ("书记", 15),
    ("人才引进", 15),
    ("加盟", 12),
    ("入职", 12),
    ("招聘", 10),
];

const KEYWORDS_RESEARCH: &[(&str, i32)] = &[
    ("论文", 30),
    ("发表", 20),
    ("录用", 25),
    ("nature", 30),
    ("science", 30),
    ("cell", 20),
    ("neurips", 20),
    ("cvpr", 20),
    ("icml", 20),
    ("iclr", 20),
    ("aaai", 20),
    ("顶会", 20),
    ("顶刊", 20),
    ("专利", 25),
    ("成果转化", 20),
    ("获奖", 20),
    ("荣获", 20),
    ("一等奖", 20),
    ("研究成果", 20),
    ("突破", 12),
];

const KEYWORDS_EVENTS: &[(&str, i32)] = &[
    ("论坛", 25),
    ("研讨会", 25),
    ("讲座", 22),
    ("报告会", 22),
    ("会议", 15),
    ("峰会", 20),
    ("大赛", 18),
    ("比赛", 15),
    ("开幕", 12),
    ("举办", 12),
    ("邀请", 8),
];

const KEYWORDS_HIGH_INFLUENCE: &[(&str, i32)] = &[
    ("nature", 40),
    ("science", 40),
    ("cell", 35),
    ("院士", 20),
    ("国家级", 30),
    ("国家奖", 30),
    ("重大突破", 30),
    ("世界首次", 30),
    ("特等奖", 30),
    ("一等奖", 25),
    ("neurips", 20),
    ("icml", 20),
    ("cvpr", 20),
];

pub fn classify(item: &CrawledItem) -> UniCategory {
    let content = item.content.as_deref().unwrap_or("");
    let head: String = content.chars().take(2000).collect();
    let text = format!("{}\n{}", item.title, head);

    let scores = [
        (UniCategory::Personnel, keyword_score(&text, KEYWORDS_PERSONNEL)),
        (
            UniCategory::ResearchOutputs,
            keyword_score(&text, KEYWORDS_RESEARCH),
        ),
        (UniCategory::Events, keyword_score(&text, KEYWORDS_EVENTS)),
    ];
    scores
        .into_iter()
        .filter(|(_, s)| *s >= CLASSIFY_THRESHOLD)
        .max_by_key(|(_, s)| *s)
        .map(|(c, _)| c)
        .unwrap_or(UniCategory::General)
}

pub fn influence_level(item: &CrawledItem) -> &'static str {
    let content = item.content.as_deref().unwrap_or("");
    let text = format!("{}\n{}", item.title, content).to_lowercase();
    let score = keyword_score(&text, KEYWORDS_HIGH_INFLUENCE);
    if score >= 30 {
        "high"
    } else if score >= 15 {
        "medium"
    } else {
        "normal"
    }
}

fn feed_item(item: &CrawledItem, category: UniCategory) -> Value {
    json!({
        "id": item.url_hash,
        "title": item.title,
        "category": category,
        "influence": influence_level(item),
        "date": article_date(item),
        "source": item.source_id,
        "group": item.tags,
        "source_url": item.url,
    })
}

pub fn process(ctx: &ProcessorContext, dry_run: bool, _force: bool) -> Result<Value> {
    let processed_dir = ctx.processed_base.join(MODULE_DIR);
    let items = collect_unique_items(ctx.raw.load_dimension(DIMENSION));
    info!(total = items.len(), "university-eco processing");

    if dry_run {
        return Ok(json!({"total": items.len(), "dry_run": true}));
    }

    let mut feed = Vec::new();
    let mut research = Vec::new();
    let mut counts = std::collections::HashMap::new();
    for item in &items {
        let category = classify(item);
        *counts.entry(format!("{category:?}")).or_insert(0u64) += 1;
        let entry = feed_item(item, category);
        if category == UniCategory::ResearchOutputs {
            research.push(entry.clone());
        }
        feed.push(entry);
    }

    feed.sort_by(|a, b| b["date"].as_str().cmp(&a["date"].as_str()));
    research.sort_by(|a, b| b["date"].as_str().cmp(&a["date"].as_str()));

    let overview = json!({
        "total_articles": items.len(),
        "by_category": counts,
        "high_influence": feed
            .iter()
            .filter(|f| f["influence"] == "high")
            .count(),
    });

    let summary = json!({
        "total": items.len(),
        "feed_items": feed.len(),
        "research_outputs": research.len(),
    });

    save_output_json(&processed_dir, "feed.json", feed, None)?;
    save_output_json(&processed_dir, "research_outputs.json", research, None)?;
    let mut extra = serde_json::Map::new();
    extra.insert("overview".to_string(), overview);
    save_output_json(&processed_dir, "overview.json", Vec::new(), Some(extra))?;
    Ok(summary)
}
