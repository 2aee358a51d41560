//! Daily briefing: condenses the per-module feeds into one document with a
//! short narrative, oracle-written when available, rule-composed otherwise.

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use crate::oracle::{try_enrich, SharedOracle};
use crate::pipeline::ProcessorContext;
use crate::pipeline::{personnel, policy, tech, university};
use crate::storage::{read_json, write_json_atomic};

pub const MODULE_DIR: &str = "daily_briefing";

const SECTION_ITEM_CAP: usize = 5;

fn load_items(ctx: &ProcessorContext, module: &str, file: &str) -> Vec<Value> {
    read_json::<Value>(&ctx.processed_base.join(module).join(file))
        .ok()
        .flatten()
        .and_then(|doc| doc["items"].as_array().cloned())
        .unwrap_or_default()
}

fn top_policy(ctx: &ProcessorContext) -> Vec<Value> {
    let mut items = load_items(ctx, policy::MODULE_DIR, "feed.json");
    items.sort_by_key(|i| -(i["match_score"].as_i64().unwrap_or(0)));
    items.truncate(SECTION_ITEM_CAP);
    items
}

fn top_changes(ctx: &ProcessorContext) -> Vec<Value> {
    let mut items = load_items(ctx, personnel::MODULE_DIR, "changes.json");
    items.truncate(SECTION_ITEM_CAP);
    items
}

fn hot_topics(ctx: &ProcessorContext) -> Vec<Value> {
    let mut items = load_items(ctx, tech::MODULE_DIR, "topics.json");
    items.retain(|t| t["article_count"].as_u64().unwrap_or(0) > 0);
    items.sort_by_key(|t| -(t["heat"].as_i64().unwrap_or(0)));
    items.truncate(3);
    items
}

fn top_university(ctx: &ProcessorContext) -> Vec<Value> {
    let mut items = load_items(ctx, university::MODULE_DIR, "research_outputs.json");
    items.truncate(SECTION_ITEM_CAP);
    items
}

/// Deterministic fallback narrative assembled from the section counts.
fn compose_narrative(
    policy: &[Value],
    changes: &[Value],
    topics: &[Value],
    research: &[Value],
) -> String {
    let mut parts = Vec::new();
    if !policy.is_empty() {
        let lead = policy[0]["title"].as_str().unwrap_or("");
        parts.push(format!("政策动态 {} 条，重点关注「{lead}」", policy.len()));
    }
    if !changes.is_empty() {
        parts.push(format!("人事变动 {} 项", changes.len()));
    }
    if let Some(hot) = topics.first() {
        parts.push(format!(
            "技术热点聚焦{}",
            hot["topic"].as_str().unwrap_or("")
        ));
    }
    if !research.is_empty() {
        parts.push(format!("高校科研成果 {} 项", research.len()));
    }
    if parts.is_empty() {
        "今日无新增情报。".to_string()
    } else {
        format!("{}。", parts.join("；"))
    }
}

/// Build `briefing.json`. Oracle (when supplied and enabled) writes the
/// narrative; any oracle failure falls back to the rule-composed text.
pub async fn process(ctx: &ProcessorContext, oracle: Option<&SharedOracle>) -> Result<Value> {
    let processed_dir = ctx.processed_base.join(MODULE_DIR);

    let policy_items = top_policy(ctx);
    let change_items = top_changes(ctx);
    let topic_items = hot_topics(ctx);
    let research_items = top_university(ctx);

    let total =
        policy_items.len() + change_items.len() + topic_items.len() + research_items.len();
    info!(total, "daily briefing");

    let mut narrative = compose_narrative(
        &policy_items,
        &change_items,
        &topic_items,
        &research_items,
    );

    if let Some(oracle) = oracle.filter(|o| o.is_enabled()) {
        let digest = json!({
            "policy": policy_items.iter().map(|i| &i["title"]).collect::<Vec<_>>(),
            "personnel": change_items
                .iter()
                .map(|c| format!(
                    "{}{}{}",
                    c["name"].as_str().unwrap_or(""),
                    c["action"].as_str().unwrap_or(""),
                    c["position"].as_str().unwrap_or("")
                ))
                .collect::<Vec<_>>(),
            "topics": topic_items.iter().map(|t| &t["topic"]).collect::<Vec<_>>(),
        });
        let user = format!(
            "以下是今日情报摘要素材：{digest}\n请以JSON返回: {{\"narrative\": string}}，一段150字以内的中文简报。"
        );
        if let Some(v) = try_enrich(
            oracle.as_ref(),
            "你是情报简报撰写助手，为研究院管理层写每日简报。只输出JSON。",
            &user,
        )
        .await
        {
            if let Some(text) = v["narrative"].as_str() {
                narrative = text.to_string();
            }
        }
    }

    let briefing = json!({
        "generated_at": Utc::now(),
        "date": Utc::now().format("%Y-%m-%d").to_string(),
        "narrative": narrative,
        "sections": {
            "policy": policy_items,
            "personnel": change_items,
            "tech_topics": topic_items,
            "university_research": research_items,
        },
    });

    write_json_atomic(&processed_dir.join("briefing.json"), &briefing)?;
    Ok(json!({"sections": 4, "total_items": total}))
}

/// True when every upstream module produced nothing; the orchestrator
/// skips the briefing stage in that case.
pub fn has_no_inputs(ctx: &ProcessorContext) -> bool {
    top_policy(ctx).is_empty()
        && top_changes(ctx).is_empty()
        && hot_topics(ctx).is_empty()
        && top_university(ctx).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::shared::save_output_json;

    #[tokio::test]
    async fn briefing_composes_from_module_feeds() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("processed");

        save_output_json(
            &base.join(policy::MODULE_DIR),
            "feed.json",
            vec![json!({"title": "人工智能专项", "match_score": 80})],
            None,
        )
        .unwrap();
        save_output_json(
            &base.join(personnel::MODULE_DIR),
            "changes.json",
            vec![json!({"name": "张三", "action": "appointed", "position": "副部长"})],
            None,
        )
        .unwrap();

        let ctx = ProcessorContext {
            raw: crate::storage::raw_store::RawStore::new(dir.path().join("raw")),
            processed_base: base.clone(),
        };
        assert!(!has_no_inputs(&ctx));

        let summary = process(&ctx, None).await.unwrap();
        assert_eq!(summary["total_items"], 2);

        let briefing: Value = serde_json::from_str(
            &std::fs::read_to_string(base.join(MODULE_DIR).join("briefing.json")).unwrap(),
        )
        .unwrap();
        let narrative = briefing["narrative"].as_str().unwrap();
        assert!(narrative.contains("人工智能专项"));
        assert!(narrative.contains("人事变动"));
        assert_eq!(briefing["sections"]["policy"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_inputs_detected_for_skip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ProcessorContext {
            raw: crate::storage::raw_store::RawStore::new(dir.path().join("raw")),
            processed_base: dir.path().join("processed"),
        };
        assert!(has_no_inputs(&ctx));
    }
}
