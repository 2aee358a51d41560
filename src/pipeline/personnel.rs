//! Personnel processor: structured appointment/dismissal extraction from
//! government personnel notices. Pure regex Tier 1; optional oracle pass
//! writes `enriched_feed.json`.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::crawler::CrawledItem;
use crate::oracle::{try_enrich, SharedOracle};
use crate::pipeline::shared::{
    article_date, clamp_score, collect_unique_items, compute_importance, keyword_score,
    save_output_json, HashTracker, Importance,
};
use crate::pipeline::ProcessorContext;

pub const MODULE_DIR: &str = "personnel_intel";
pub const DIMENSION: &str = "personnel";

const KEYWORDS_PERSONNEL: &[(&str, i32)] = &[
    ("人工智能", 25),
    ("教育部", 20),
    ("科技部", 20),
    ("中关村", 20),
    ("海淀", 18),
    ("科学技术", 15),
    ("研究院", 12),
    ("发改委", 10),
    ("工信部", 10),
    ("基金委", 10),
    ("高校", 10),
    ("校长", 10),
    ("副校长", 10),
    ("院长", 8),
    ("国务院", 5),
    ("北京市", 5),
    ("部长", 5),
    ("副部长", 5),
];

const HIGH_IMPORTANCE_KW: &[&str] = &["教育部", "科技部", "人工智能", "中关村", "校长"];

/// What happened to the person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Appointed,
    Elected,
    Removed,
    Retired,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonnelChange {
    pub id: String,
    pub name: String,
    pub action: ChangeAction,
    pub position: String,
    pub organization: Option<String>,
    pub effective_date: Option<String>,
    pub source_article_id: String,
}

// "国务院任命张三为教育部副部长": the appointing organ, when present, sits
// directly against 任命; anything separated by whitespace is unrelated text.
static APPOINTMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:([\p{Han}]{2,12}))?任命\s*([\p{Han}]{2,4})(?:（[^）]*）)?\s*为\s*([^；。，\n]+)")
        .unwrap()
});

// "免去孙其信的中国农业大学校长职务"
static DISMISSAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"免去\s*([\p{Han}]{2,4})(?:（[^）]*）)?\s*(?:的)?\s*([^；。，\n]+?)职务").unwrap()
});

// "李雷当选为市科协主席"
static ELECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([\p{Han}]{2,4})\s*当选(?:为)?\s*([^；。，\n]+)").unwrap()
});

// "王敏卸任研究院院长"
static RETIREMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([\p{Han}]{2,4})\s*(?:卸任|退休)\s*([^；。，\n]*)").unwrap()
});

static ORG_FROM_POSITION: &[(&str, &str)] = &[
    ("教育部", "教育部"),
    ("科技部", "科技部"),
    ("国家发展和改革委员会", "国家发改委"),
    ("发展改革委", "国家发改委"),
    ("工业和信息化部", "工信部"),
    ("人力资源和社会保障部", "人社部"),
    ("自然科学基金委", "国家自然科学基金委"),
    ("北京市", "北京市政府"),
    ("海淀", "海淀区"),
    ("中关村", "中关村"),
];

static UNIVERSITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\p{Han}]{2,8}(?:大学|学院|研究院))").unwrap());

fn infer_organization(position: &str) -> Option<String> {
    for (kw, org) in ORG_FROM_POSITION {
        if position.contains(kw) {
            return Some(org.to_string());
        }
    }
    UNIVERSITY_RE
        .captures(position)
        .map(|c| c[1].to_string())
}

/// Stable id over the change triple; repeat extraction yields the same id.
pub fn change_id(name: &str, action: ChangeAction, position: &str) -> String {
    let key = format!("{name}-{action:?}-{position}");
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

fn clean_position(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Extract every personnel change in an article. One notice commonly lists
/// dozens of appointments and dismissals.
pub fn extract_changes(item: &CrawledItem) -> Vec<PersonnelChange> {
    let content = item.content.as_deref().unwrap_or("");
    let text = format!("{}\n{}", item.title, content);
    let effective_date = Some(article_date(item));

    let mut changes: Vec<PersonnelChange> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let mut push = |name: &str,
                    action: ChangeAction,
                    position: String,
                    organization: Option<String>,
                    changes: &mut Vec<PersonnelChange>| {
        let key = (name.to_string(), action, position.clone());
        if position.is_empty() || !seen.insert(key) {
            return;
        }
        changes.push(PersonnelChange {
            id: change_id(name, action, &position),
            name: name.to_string(),
            action,
            organization: organization.or_else(|| infer_organization(&position)),
            position,
            effective_date: effective_date.clone(),
            source_article_id: item.url_hash.clone(),
        });
    };

    for c in APPOINTMENT_RE.captures_iter(&text) {
        let organization = c.get(1).map(|m| m.as_str().to_string());
        push(
            &c[2],
            ChangeAction::Appointed,
            clean_position(&c[3]),
            organization,
            &mut changes,
        );
    }
    for c in DISMISSAL_RE.captures_iter(&text) {
        push(
            &c[1],
            ChangeAction::Removed,
            clean_position(&c[2]),
            None,
            &mut changes,
        );
    }
    for c in ELECTION_RE.captures_iter(&text) {
        push(
            &c[1],
            ChangeAction::Elected,
            clean_position(&c[2]),
            None,
            &mut changes,
        );
    }
    for c in RETIREMENT_RE.captures_iter(&text) {
        let position = clean_position(&c[2]);
        if position.is_empty() {
            continue;
        }
        push(&c[1], ChangeAction::Retired, position, None, &mut changes);
    }

    changes
}

pub fn compute_match_score(item: &CrawledItem) -> i32 {
    let content = item.content.as_deref().unwrap_or("");
    let head: String = content.chars().take(3000).collect();
    clamp_score(keyword_score(
        &format!("{}\n{}", item.title, head),
        KEYWORDS_PERSONNEL,
    ))
}

// ---------------------------------------------------------------------------
// Processor entry points
// ---------------------------------------------------------------------------

fn article_feed_item(item: &CrawledItem, score: i32, importance: Importance, change_count: usize) -> Value {
    json!({
        "id": item.url_hash,
        "title": item.title,
        "date": article_date(item),
        "source": item.source_id,
        "source_url": item.url,
        "match_score": score,
        "importance": importance,
        "change_count": change_count,
    })
}

/// Tier 1: extract change records, write `feed.json` (article-level) and
/// `changes.json` (person-level).
pub fn process(ctx: &ProcessorContext, dry_run: bool, force: bool) -> Result<Value> {
    let processed_dir = ctx.processed_base.join(MODULE_DIR);
    let items = collect_unique_items(ctx.raw.load_dimension(DIMENSION));

    let mut tracker = HashTracker::load(&processed_dir);
    let pending: Vec<&CrawledItem> = items
        .iter()
        .filter(|item| force || tracker.is_new_or_changed(item))
        .collect();
    info!(total = items.len(), pending = pending.len(), "personnel processing");

    if dry_run {
        return Ok(json!({"total": items.len(), "pending": pending.len(), "dry_run": true}));
    }

    // Outputs are rebuilt over the whole dimension each run; the tracker only
    // throttles logging of how much was genuinely new.
    let newly_processed = pending.len();
    for item in pending {
        tracker.mark(item);
    }
    tracker.save()?;

    let mut feed = Vec::new();
    let mut all_changes: Vec<Value> = Vec::new();
    for item in &items {
        let changes = extract_changes(item);
        let score = compute_match_score(item);
        let importance = compute_importance(score, None, &item.title, HIGH_IMPORTANCE_KW);
        feed.push(article_feed_item(item, score, importance, changes.len()));
        for change in changes {
            all_changes.push(serde_json::to_value(&change)?);
        }
    }

    feed.sort_by(|a, b| b["date"].as_str().cmp(&a["date"].as_str()));
    all_changes.sort_by(|a, b| {
        b["effective_date"]
            .as_str()
            .cmp(&a["effective_date"].as_str())
    });

    let counts = json!({
        "total": items.len(),
        "new_processed": newly_processed,
        "feed_items": feed.len(),
        "changes": all_changes.len(),
    });
    save_output_json(&processed_dir, "feed.json", feed, None)?;
    save_output_json(&processed_dir, "changes.json", all_changes, None)?;
    Ok(counts)
}

/// Oracle pass: annotate each change with relevance/grouping hints; writes
/// `enriched_feed.json`. Rule outputs stay untouched on failure.
pub async fn enrich_with_oracle(ctx: &ProcessorContext, oracle: &SharedOracle) -> Result<Value> {
    let processed_dir = ctx.processed_base.join(MODULE_DIR);
    let changes: Value = match crate::storage::read_json::<Value>(&processed_dir.join("changes.json"))? {
        Some(v) => v,
        None => return Ok(json!({"enriched": 0, "reason": "no changes.json"})),
    };
    let change_list = changes["items"].as_array().cloned().unwrap_or_default();
    if change_list.is_empty() {
        return Ok(json!({"enriched": 0, "reason": "no changes"}));
    }

    let mut enriched_items = Vec::new();
    let mut errors = 0usize;
    for change in change_list {
        let user = format!(
            "人事变动: {} {} {}\n请以JSON返回: {{\"relevance\": number, \"importance\": string, \"group\": string, \"note\": string, \"action_suggestion\": string, \"background\": string, \"signals\": [string], \"ai_insight\": string}}",
            change["name"].as_str().unwrap_or(""),
            change["action"].as_str().unwrap_or(""),
            change["position"].as_str().unwrap_or(""),
        );
        match try_enrich(
            oracle.as_ref(),
            "你是人事情报分析助手，评估政府与高校人事变动对人工智能研究机构的影响。只输出JSON。",
            &user,
        )
        .await
        {
            Some(extra) => {
                let mut merged = change.clone();
                if let (Some(obj), Some(add)) = (merged.as_object_mut(), extra.as_object()) {
                    for (k, v) in add {
                        obj.insert(k.clone(), v.clone());
                    }
                }
                enriched_items.push(merged);
            }
            None => errors += 1,
        }
    }

    let enriched = enriched_items.len();
    if enriched > 0 {
        save_output_json(&processed_dir, "enriched_feed.json", enriched_items, None)?;
    }
    Ok(json!({"enriched": enriched, "errors": errors}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::tests::test_source;

    fn personnel_item(title: &str, content: &str) -> CrawledItem {
        let mut def = test_source("guowuyuan_renshi");
        def.dimension = DIMENSION.to_string();
        let mut item = CrawledItem::new(title, "https://gov.example/renshi/t20260710_9.html", &def);
        item.content = Some(content.to_string());
        item.content_hash = Some(crate::urlnorm::content_hash(content));
        item
    }

    #[test]
    fn appointment_with_appointing_organ() {
        let item = personnel_item("国务院任命张三为教育部副部长", "");
        let changes = extract_changes(&item);
        assert_eq!(changes.len(), 1);
        let c = &changes[0];
        assert_eq!(c.name, "张三");
        assert_eq!(c.action, ChangeAction::Appointed);
        assert_eq!(c.position, "教育部副部长");
        assert_eq!(c.organization.as_deref(), Some("国务院"));
        // And the article clears the medium bar for the feed.
        let score = compute_match_score(&item);
        let importance = compute_importance(score, None, &item.title, HIGH_IMPORTANCE_KW);
        assert!(importance >= Importance::Medium);
    }

    #[test]
    fn one_notice_yields_multiple_changes() {
        let item = personnel_item(
            "国务院任免国家工作人员",
            "任命黄如（女）为国家发展和改革委员会副主任；免去孙其信的中国农业大学校长职务。李雷当选为市科协主席。",
        );
        let changes = extract_changes(&item);
        assert_eq!(changes.len(), 3);

        assert_eq!(changes[0].name, "黄如");
        assert_eq!(changes[0].action, ChangeAction::Appointed);
        assert_eq!(changes[0].organization.as_deref(), Some("国家发改委"));

        assert_eq!(changes[1].name, "孙其信");
        assert_eq!(changes[1].action, ChangeAction::Removed);
        assert_eq!(changes[1].position, "中国农业大学校长");
        assert_eq!(changes[1].organization.as_deref(), Some("中国农业大学"));

        assert_eq!(changes[2].name, "李雷");
        assert_eq!(changes[2].action, ChangeAction::Elected);
    }

    #[test]
    fn duplicate_mentions_collapse_to_one_change() {
        let item = personnel_item(
            "通知",
            "任命张三为教育部副部长。又讯：任命张三为教育部副部长。",
        );
        assert_eq!(extract_changes(&item).len(), 1);
    }

    #[test]
    fn change_ids_are_stable() {
        let a = change_id("张三", ChangeAction::Appointed, "教育部副部长");
        let b = change_id("张三", ChangeAction::Appointed, "教育部副部长");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, change_id("张三", ChangeAction::Removed, "教育部副部长"));
    }

    #[test]
    fn process_writes_feed_and_changes() {
        let dir = tempfile::tempdir().unwrap();
        let raw = crate::storage::raw_store::RawStore::new(dir.path().join("raw"));
        let mut def = test_source("guowuyuan_renshi");
        def.dimension = DIMENSION.to_string();
        let item = personnel_item("国务院任命张三为教育部副部长", "国务院任命张三为教育部副部长。");
        raw.save(&def, &[item], chrono::Utc::now()).unwrap();

        let ctx = ProcessorContext {
            raw,
            processed_base: dir.path().join("processed"),
        };
        let summary = process(&ctx, false, false).unwrap();
        assert_eq!(summary["changes"], 1);

        let changes: Value = serde_json::from_str(
            &std::fs::read_to_string(
                dir.path().join("processed").join(MODULE_DIR).join("changes.json"),
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(changes["items"][0]["name"], "张三");
        assert_eq!(changes["items"][0]["action"], "appointed");
        assert_eq!(changes["items"][0]["position"], "教育部副部长");
    }
}
