//! Tech-frontier processor: bins raw items into eight fixed topics, computes
//! recency-weighted heat, surfaces top signals and KOL voices.

use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tracing::info;

use crate::crawler::CrawledItem;
use crate::oracle::{try_enrich, SharedOracle};
use crate::pipeline::shared::{article_date, collect_unique_items, keyword_score, save_output_json};
use crate::pipeline::ProcessorContext;
use crate::storage::read_json;

pub const MODULE_DIR: &str = "tech_frontier";
pub const DIMENSIONS: &[&str] = &["technology", "industry", "twitter"];
/// The AI-institute slice of the universities dimension also feeds topics.
const UNIVERSITY_GROUP: &str = "ai_institutes";

/// Minimum keyword score for an article to join a topic.
pub const TOPIC_MATCH_THRESHOLD: i32 = 15;
const RELATED_NEWS_CAP: usize = 5;
const KOL_VOICES_CAP: usize = 3;

pub struct TopicSpec {
    pub id: &'static str,
    pub topic: &'static str,
    pub description: &'static str,
    pub our_status: &'static str,
    pub gap_level: &'static str,
    pub keywords: &'static [(&'static str, i32)],
}

pub const TOPICS: &[TopicSpec] = &[
    TopicSpec {
        id: "embodied_ai",
        topic: "具身智能",
        description: "AI与物理世界交互的关键方向：机器人控制、运动规划、导航",
        our_status: "none",
        gap_level: "high",
        keywords: &[
            ("具身智能", 20),
            ("embodied", 18),
            ("人形机器人", 15),
            ("humanoid", 15),
            ("机器人控制", 12),
            ("运动规划", 10),
            ("motion planning", 10),
            ("sim-to-real", 10),
            ("robotics", 8),
            ("manipulation", 8),
        ],
    },
    TopicSpec {
        id: "multimodal",
        topic: "多模态大模型",
        description: "视觉、语音、文本多模态融合的大模型技术",
        our_status: "deployed",
        gap_level: "low",
        keywords: &[
            ("多模态", 18),
            ("multimodal", 18),
            ("视觉语言", 15),
            ("vision-language", 15),
            ("视频生成", 15),
            ("video generation", 15),
            ("文生图", 12),
            ("文生视频", 12),
            ("图像生成", 12),
            ("text-to-image", 10),
            ("长上下文", 8),
        ],
    },
    TopicSpec {
        id: "ai_agent",
        topic: "AI Agent",
        description: "自主完成复杂任务的智能代理：工具调用、多Agent协作、自主编程",
        our_status: "weak",
        gap_level: "medium",
        keywords: &[
            ("智能体", 15),
            ("多agent", 15),
            ("multi-agent", 15),
            ("agentic", 12),
            ("工具调用", 12),
            ("tool use", 12),
            ("自主编程", 12),
            ("function calling", 10),
            ("任务规划", 8),
            ("思维链", 8),
            ("agent", 10),
        ],
    },
    TopicSpec {
        id: "ai_for_science",
        topic: "AI for Science",
        description: "AI加速科学发现：药物发现、蛋白质结构、分子模拟",
        our_status: "deployed",
        gap_level: "low",
        keywords: &[
            ("ai for science", 20),
            ("科学计算", 15),
            ("药物发现", 15),
            ("drug discovery", 15),
            ("alphafold", 15),
            ("蛋白质", 12),
            ("分子模拟", 12),
            ("材料设计", 10),
            ("protein", 10),
            ("基因组", 8),
        ],
    },
    TopicSpec {
        id: "edge_ai",
        topic: "端侧AI推理",
        description: "推理下沉到边缘设备：模型压缩、专用芯片、高效推理",
        our_status: "none",
        gap_level: "high",
        keywords: &[
            ("端侧", 18),
            ("edge ai", 18),
            ("on-device", 15),
            ("模型压缩", 15),
            ("ai芯片", 15),
            ("量化", 12),
            ("quantization", 12),
            ("知识蒸馏", 12),
            ("推理优化", 12),
            ("npu", 12),
            ("剪枝", 8),
        ],
    },
    TopicSpec {
        id: "llm_foundation",
        topic: "大语言模型",
        description: "基础模型的预训练、微调与推理：Scaling Law、架构创新",
        our_status: "deployed",
        gap_level: "medium",
        keywords: &[
            ("大语言模型", 15),
            ("llm", 15),
            ("scaling law", 15),
            ("预训练", 12),
            ("pre-training", 12),
            ("rlhf", 12),
            ("deepseek", 12),
            ("foundation model", 12),
            ("基础模型", 12),
            ("微调", 10),
            ("fine-tuning", 10),
            ("指令微调", 10),
            ("大模型", 10),
            ("transformer", 8),
        ],
    },
    TopicSpec {
        id: "ai_safety",
        topic: "AI安全与治理",
        description: "安全性、可控性与治理：对齐、可解释性、监管政策",
        our_status: "weak",
        gap_level: "medium",
        keywords: &[
            ("ai安全", 20),
            ("ai safety", 20),
            ("alignment", 15),
            ("对齐", 15),
            ("治理", 12),
            ("governance", 12),
            ("可解释性", 12),
            ("红队", 12),
            ("jailbreak", 10),
            ("幻觉", 10),
            ("hallucination", 10),
            ("监管", 10),
        ],
    },
    TopicSpec {
        id: "genai_apps",
        topic: "生成式AI应用",
        description: "生成式AI落地：内容生成、AI编程、设计工具、教育",
        our_status: "weak",
        gap_level: "medium",
        keywords: &[
            ("aigc", 18),
            ("生成式ai", 15),
            ("generative ai", 15),
            ("ai编程", 15),
            ("内容创作", 12),
            ("copilot", 10),
            ("ai应用", 10),
            ("落地", 8),
            ("数字人", 8),
        ],
    },
];

/// Score an item against a topic's keyword table.
pub fn topic_score(item: &CrawledItem, spec: &TopicSpec) -> i32 {
    let content = item.content.as_deref().unwrap_or("");
    let head: String = content.chars().take(2000).collect();
    keyword_score(&format!("{}\n{}", item.title, head), spec.keywords)
}

/// Bin an item into the best-scoring topic at or above the threshold.
pub fn classify_topic(item: &CrawledItem) -> Option<(&'static str, i32)> {
    TOPICS
        .iter()
        .map(|spec| (spec.id, topic_score(item, spec)))
        .filter(|(_, score)| *score >= TOPIC_MATCH_THRESHOLD)
        .max_by_key(|(_, score)| *score)
}

/// Recency weight: this week counts 3×, this month 2×, older 1×.
fn recency_weight(item: &CrawledItem) -> i64 {
    let Some(published) = item.published_at else {
        return 1;
    };
    let age = Utc::now() - published;
    if age <= Duration::days(7) {
        3
    } else if age <= Duration::days(30) {
        2
    } else {
        1
    }
}

fn news_ref(item: &CrawledItem, score: i32) -> Value {
    json!({
        "id": item.url_hash,
        "title": item.title,
        "url": item.url,
        "date": article_date(item),
        "source": item.source_id,
        "score": score,
    })
}

fn gather_items(ctx: &ProcessorContext) -> Vec<CrawledItem> {
    let mut artifacts = Vec::new();
    for dim in DIMENSIONS {
        artifacts.extend(ctx.raw.load_dimension(dim));
    }
    let mut uni = ctx.raw.load_dimension("universities");
    uni.retain(|a| a.group.as_deref() == Some(UNIVERSITY_GROUP));
    artifacts.extend(uni);
    collect_unique_items(artifacts)
}

/// Bin, heat-rank, and write `topics.json`, `opportunities.json`, `stats.json`.
pub fn process(ctx: &ProcessorContext, dry_run: bool, _force: bool) -> Result<Value> {
    let processed_dir = ctx.processed_base.join(MODULE_DIR);
    let items = gather_items(ctx);
    info!(total = items.len(), "tech-frontier processing");

    if dry_run {
        return Ok(json!({"total": items.len(), "dry_run": true}));
    }

    struct Bin {
        articles: Vec<(usize, i32)>,
        heat_raw: i64,
    }
    let mut bins: Vec<Bin> = TOPICS
        .iter()
        .map(|_| Bin {
            articles: Vec::new(),
            heat_raw: 0,
        })
        .collect();

    let mut binned_total = 0usize;
    for (idx, item) in items.iter().enumerate() {
        if let Some((topic_id, score)) = classify_topic(item) {
            let pos = TOPICS.iter().position(|t| t.id == topic_id).unwrap();
            bins[pos].articles.push((idx, score));
            bins[pos].heat_raw += recency_weight(item);
            binned_total += 1;
        }
    }

    let max_heat = bins.iter().map(|b| b.heat_raw).max().unwrap_or(0).max(1);

    let mut topics_out = Vec::new();
    for (spec, bin) in TOPICS.iter().zip(&bins) {
        let mut ranked = bin.articles.clone();
        ranked.sort_by_key(|(_, score)| -score);

        let related_news: Vec<Value> = ranked
            .iter()
            .filter(|(idx, _)| items[*idx].dimension != "twitter")
            .take(RELATED_NEWS_CAP)
            .map(|(idx, score)| news_ref(&items[*idx], *score))
            .collect();
        let kol_voices: Vec<Value> = ranked
            .iter()
            .filter(|(idx, _)| items[*idx].dimension == "twitter")
            .take(KOL_VOICES_CAP)
            .map(|(idx, score)| news_ref(&items[*idx], *score))
            .collect();

        topics_out.push(json!({
            "id": spec.id,
            "topic": spec.topic,
            "description": spec.description,
            "our_status": spec.our_status,
            "gap_level": spec.gap_level,
            "heat": (bin.heat_raw * 100 / max_heat).min(100),
            "article_count": bin.articles.len(),
            "related_news": related_news,
            "kol_voices": kol_voices,
        }));
    }

    // Gap opportunities: hot topics we have not deployed in yet.
    let mut opportunities: Vec<Value> = topics_out
        .iter()
        .filter(|t| t["our_status"] != "deployed" && t["article_count"].as_u64().unwrap_or(0) > 0)
        .map(|t| {
            json!({
                "topic_id": t["id"],
                "name": t["topic"],
                "heat": t["heat"],
                "gap_level": t["gap_level"],
                "reason": format!(
                    "{} 个相关信号，布局状态: {}",
                    t["article_count"], t["our_status"].as_str().unwrap_or("?")
                ),
            })
        })
        .collect();
    opportunities.sort_by_key(|o| -(o["heat"].as_i64().unwrap_or(0)));

    let week_ago = Utc::now() - Duration::days(7);
    let articles_7d = items
        .iter()
        .filter(|i| i.published_at.map(|p| p >= week_ago).unwrap_or(false))
        .count();
    let kol_tweets = items.iter().filter(|i| i.dimension == "twitter").count();
    let hottest = topics_out
        .iter()
        .max_by_key(|t| t["heat"].as_i64().unwrap_or(0))
        .map(|t| t["topic"].clone())
        .unwrap_or(Value::Null);

    let stats = json!({
        "total_articles": items.len(),
        "binned_articles": binned_total,
        "articles_7d": articles_7d,
        "kol_tweets": kol_tweets,
        "hottest_topic": hottest,
    });

    let summary = json!({
        "total": items.len(),
        "binned": binned_total,
        "topics": topics_out.len(),
        "opportunities": opportunities.len(),
    });

    save_output_json(&processed_dir, "topics.json", topics_out, None)?;
    save_output_json(&processed_dir, "opportunities.json", opportunities, None)?;
    let mut extra = serde_json::Map::new();
    extra.insert("stats".to_string(), stats);
    save_output_json(&processed_dir, "stats.json", Vec::new(), Some(extra))?;
    Ok(summary)
}

/// Oracle pass: one insight per non-empty topic, merged into `topics.json`.
pub async fn enrich_with_oracle(ctx: &ProcessorContext, oracle: &SharedOracle) -> Result<Value> {
    let processed_dir = ctx.processed_base.join(MODULE_DIR);
    let Some(mut topics_doc) = read_json::<Value>(&processed_dir.join("topics.json"))? else {
        return Ok(json!({"enriched": 0, "reason": "no topics.json"}));
    };
    let Some(topics) = topics_doc["items"].as_array().cloned() else {
        return Ok(json!({"enriched": 0, "reason": "malformed topics.json"}));
    };

    let mut enriched = 0usize;
    let mut updated = Vec::new();
    for mut topic in topics {
        let count = topic["article_count"].as_u64().unwrap_or(0);
        if count > 0 {
            let titles: Vec<String> = topic["related_news"]
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|n| n["title"].as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            let user = format!(
                "主题: {}\n近期信号: {}\n请以JSON返回: {{\"ai_insight\": string}}",
                topic["topic"].as_str().unwrap_or(""),
                titles.join("；")
            );
            if let Some(v) = try_enrich(
                oracle.as_ref(),
                "你是技术前沿分析助手，为研究机构提炼主题洞察。只输出JSON。",
                &user,
            )
            .await
            {
                if let Some(insight) = v["ai_insight"].as_str() {
                    topic["ai_insight"] = json!(insight);
                    enriched += 1;
                }
            }
        }
        updated.push(topic);
    }

    if enriched > 0 {
        topics_doc["items"] = Value::Array(updated);
        topics_doc["generated_at"] = json!(Utc::now());
        crate::storage::write_json_atomic(&processed_dir.join("topics.json"), &topics_doc)?;
    }
    Ok(json!({"enriched": enriched}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::tests::test_source;

    fn tech_item(id: &str, dimension: &str, title: &str, content: &str) -> CrawledItem {
        let mut def = test_source("tech_src");
        def.dimension = dimension.to_string();
        let mut item = CrawledItem::new(title, format!("https://t.example/{id}"), &def);
        item.content = Some(content.to_string());
        item.published_at = Some(Utc::now() - Duration::days(1));
        item
    }

    #[test]
    fn embodied_article_bins_to_embodied_topic() {
        let item = tech_item(
            "1",
            "technology",
            "具身智能与人形机器人的新进展",
            "机器人控制与运动规划的突破。",
        );
        let (topic, score) = classify_topic(&item).unwrap();
        assert_eq!(topic, "embodied_ai");
        assert!(score >= TOPIC_MATCH_THRESHOLD);
    }

    #[test]
    fn unrelated_article_stays_unbinned() {
        let item = tech_item("2", "technology", "本市天气预报", "明天多云。");
        assert!(classify_topic(&item).is_none());
    }

    #[test]
    fn process_emits_all_three_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let raw = crate::storage::raw_store::RawStore::new(dir.path().join("raw"));

        let mut def = test_source("tech_src");
        def.dimension = "technology".to_string();
        raw.save(
            &def,
            &[
                tech_item("1", "technology", "具身智能机器人控制新品", "人形机器人运动规划。"),
                tech_item("2", "technology", "大模型预训练 Scaling Law 研究", "LLM 预训练与微调。"),
            ],
            Utc::now(),
        )
        .unwrap();

        let mut tw_def = test_source("tw_kol");
        tw_def.dimension = "twitter".to_string();
        raw.save(
            &tw_def,
            &[tech_item("3", "twitter", "多模态视频生成的文生视频演示", "multimodal")],
            Utc::now(),
        )
        .unwrap();

        let ctx = ProcessorContext {
            raw,
            processed_base: dir.path().join("processed"),
        };
        let summary = process(&ctx, false, false).unwrap();
        assert_eq!(summary["topics"], TOPICS.len());
        assert!(summary["binned"].as_u64().unwrap() >= 2);

        let topics: Value = serde_json::from_str(
            &std::fs::read_to_string(
                dir.path().join("processed").join(MODULE_DIR).join("topics.json"),
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(topics["items"].as_array().unwrap().len(), TOPICS.len());

        // Tweets land in kol_voices, not related_news.
        let multimodal = topics["items"]
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["id"] == "multimodal")
            .unwrap();
        assert_eq!(multimodal["kol_voices"].as_array().unwrap().len(), 1);
        assert!(multimodal["related_news"].as_array().unwrap().is_empty());

        assert!(dir
            .path()
            .join("processed")
            .join(MODULE_DIR)
            .join("stats.json")
            .exists());
        assert!(dir
            .path()
            .join("processed")
            .join(MODULE_DIR)
            .join("opportunities.json")
            .exists());
    }
}
