//! HTTP read API over the file store.
//!
//! Every endpoint is a cheap whole-file read plus in-memory filtering; the
//! atomic-rename write discipline means readers never see partial JSON. The
//! only write paths are the enable-toggle and the manual trigger, both of
//! which go through the scheduler/state layer.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::pipeline::{self, briefing, personnel, policy, tech, university};
use crate::scheduler::Monitor;
use crate::storage::read_json;

/// Consecutive failures at or above this mark a source as failing.
const FAILING_THRESHOLD: u32 = 3;
const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 200;

#[derive(Clone)]
pub struct ApiState {
    pub monitor: Arc<Monitor>,
    pub prometheus: Option<PrometheusHandle>,
}

pub fn create_router(monitor: Arc<Monitor>, prometheus: Option<PrometheusHandle>) -> Router {
    let state = Arc::new(ApiState {
        monitor,
        prometheus,
    });

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/articles", get(list_articles))
        .route("/api/sources", get(list_sources))
        .route("/api/sources/:id", get(source_detail))
        .route("/api/sources/:id/logs", get(source_logs))
        .route("/api/sources/:id/toggle", post(toggle_source))
        .route("/api/sources/:id/trigger", post(trigger_source))
        .route("/api/dimensions", get(dimension_overview))
        .route("/api/dimensions/:dimension/articles", get(dimension_articles))
        .route("/api/pipeline/status", get(pipeline_status))
        .route("/api/pipeline/trigger", post(trigger_pipeline))
        .route("/api/intel/policy/feed", get(policy_feed))
        .route("/api/intel/policy/opportunities", get(policy_opportunities))
        .route("/api/intel/personnel/feed", get(personnel_feed))
        .route("/api/intel/personnel/changes", get(personnel_changes))
        .route("/api/intel/tech/topics", get(tech_topics))
        .route("/api/intel/tech/stats", get(tech_stats))
        .route("/api/intel/university/feed", get(university_feed))
        .route("/api/intel/university/research", get(university_research))
        .route("/api/intel/briefing", get(daily_briefing))
        .route(
            "/api/articles/:url_hash/annotations",
            get(get_annotations).post(set_annotations),
        )
        .layer(CorsLayer::very_permissive())
        .layer(Extension(state))
}

// ---------------------------------------------------------------------------
// Common filters
// ---------------------------------------------------------------------------

/// Shared filter set: pagination, keyword, date range, and the source
/// quadruple (`source_id`, `source_ids`, fuzzy `source_name`, `source_names`).
#[derive(Debug, Default, Deserialize)]
pub struct CommonFilters {
    pub dimension: Option<String>,
    pub source_id: Option<String>,
    pub source_ids: Option<String>,
    pub source_name: Option<String>,
    pub source_names: Option<String>,
    pub keyword: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

/// Case- and whitespace-insensitive form used for fuzzy name matching.
fn fuzzy(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

fn item_source_id(item: &Value) -> &str {
    item["source_id"]
        .as_str()
        .or_else(|| item["source"].as_str())
        .unwrap_or("")
}

impl CommonFilters {
    fn matches(&self, item: &Value, source_names: &HashMap<String, String>) -> bool {
        let sid = item_source_id(item);

        if let Some(want) = &self.source_id {
            if sid != want {
                return false;
            }
        }
        if let Some(want) = &self.source_ids {
            if !want.split(',').map(str::trim).any(|w| w == sid) {
                return false;
            }
        }

        let resolved_name = source_names.get(sid).map(String::as_str).unwrap_or(sid);
        if let Some(want) = &self.source_name {
            if !fuzzy(resolved_name).contains(&fuzzy(want)) {
                return false;
            }
        }
        if let Some(want) = &self.source_names {
            let hit = want
                .split(',')
                .map(str::trim)
                .any(|w| fuzzy(resolved_name).contains(&fuzzy(w)));
            if !hit {
                return false;
            }
        }

        if let Some(dim) = &self.dimension {
            if item["dimension"].as_str().map(|d| d != dim).unwrap_or(false) {
                return false;
            }
        }

        if let Some(keyword) = &self.keyword {
            let kw = keyword.to_lowercase();
            let title = item["title"].as_str().unwrap_or("").to_lowercase();
            let content = item["content"].as_str().unwrap_or("").to_lowercase();
            if !title.contains(&kw) && !content.contains(&kw) {
                return false;
            }
        }

        let date = item["date"]
            .as_str()
            .or_else(|| item["published_at"].as_str())
            .unwrap_or("");
        if let Some(from) = &self.date_from {
            if !date.is_empty() && date < from.as_str() {
                return false;
            }
        }
        if let Some(to) = &self.date_to {
            // `to` is a date; timestamps starting with it still match.
            if !date.is_empty() && date > to.as_str() && !date.starts_with(to.as_str()) {
                return false;
            }
        }

        true
    }

    fn paginate(&self, items: Vec<Value>) -> Value {
        let page = self.page.unwrap_or(1).max(1);
        let page_size = self
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let total = items.len();
        let paged: Vec<Value> = items
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();
        json!({
            "total": total,
            "page": page,
            "page_size": page_size,
            "items": paged,
        })
    }
}

fn source_name_map(monitor: &Monitor) -> HashMap<String, String> {
    monitor
        .catalog
        .iter()
        .map(|s| (s.id.clone(), s.name.clone()))
        .collect()
}

/// Load a processed feed document and apply the common filters to its items.
fn filtered_feed(
    state: &ApiState,
    module: &str,
    file: &str,
    filters: &CommonFilters,
) -> Json<Value> {
    let path = state
        .monitor
        .settings
        .processed_dir()
        .join(module)
        .join(file);
    let doc = read_json::<Value>(&path).ok().flatten().unwrap_or_else(|| {
        json!({"generated_at": null, "item_count": 0, "items": []})
    });

    let names = source_name_map(&state.monitor);
    let items: Vec<Value> = doc["items"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter(|i| filters.matches(i, &names))
        .collect();

    let mut out = filters.paginate(items);
    out["generated_at"] = doc["generated_at"].clone();
    Json(out)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health(Extension(state): Extension<Arc<ApiState>>) -> Json<Value> {
    let states = state.monitor.state.all();
    let mut healthy = 0u64;
    let mut warning = 0u64;
    let mut failing = 0u64;
    for s in states.values() {
        if s.consecutive_failures >= FAILING_THRESHOLD {
            failing += 1;
        } else if s.consecutive_failures > 0 {
            warning += 1;
        } else {
            healthy += 1;
        }
    }

    Json(json!({
        "status": "ok",
        "sources": {
            "total": state.monitor.catalog.len(),
            "healthy": healthy,
            "warning": warning,
            "failing": failing,
        },
        "recent_24h": state.monitor.run_logs.recent_stats(24),
        "pipeline": pipeline::last_pipeline_result(),
    }))
}

async fn metrics_endpoint(Extension(state): Extension<Arc<ApiState>>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

async fn list_articles(
    Extension(state): Extension<Arc<ApiState>>,
    Query(filters): Query<CommonFilters>,
) -> Json<Value> {
    let artifacts = match &filters.dimension {
        Some(dim) => state.monitor.raw.load_dimension(dim),
        None => state.monitor.raw.load_all(),
    };
    let names = source_name_map(&state.monitor);

    let mut items: Vec<Value> = Vec::new();
    for artifact in artifacts {
        for item in artifact.items {
            if let Ok(v) = serde_json::to_value(&item) {
                if filters.matches(&v, &names) {
                    items.push(v);
                }
            }
        }
    }
    items.sort_by(|a, b| {
        b["published_at"]
            .as_str()
            .unwrap_or("")
            .cmp(a["published_at"].as_str().unwrap_or(""))
    });
    Json(filters.paginate(items))
}

async fn list_sources(
    Extension(state): Extension<Arc<ApiState>>,
    Query(filters): Query<CommonFilters>,
) -> Json<Value> {
    let sources: Vec<Value> = state
        .monitor
        .catalog
        .iter()
        .filter(|s| {
            filters
                .dimension
                .as_deref()
                .map(|d| s.dimension == d)
                .unwrap_or(true)
        })
        .map(|s| {
            let st = state.monitor.state.get(&s.id);
            json!({
                "id": s.id,
                "name": s.name,
                "dimension": s.dimension,
                "group": s.group,
                "url": s.url,
                "schedule": s.schedule,
                "enabled": state.monitor.is_source_enabled(s),
                "last_crawl_at": st.last_crawl_at,
                "last_success_at": st.last_success_at,
                "consecutive_failures": st.consecutive_failures,
            })
        })
        .collect();
    Json(json!({"total": sources.len(), "items": sources}))
}

async fn source_detail(
    Extension(state): Extension<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let def = state.monitor.source(&id).ok_or(StatusCode::NOT_FOUND)?;
    let st = state.monitor.state.get(&id);
    Ok(Json(json!({
        "definition": def,
        "state": {
            "last_crawl_at": st.last_crawl_at,
            "last_success_at": st.last_success_at,
            "consecutive_failures": st.consecutive_failures,
            "is_enabled_override": st.is_enabled_override,
        },
    })))
}

#[derive(Deserialize)]
struct LogQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn source_logs(
    Extension(state): Extension<Arc<ApiState>>,
    Path(id): Path<String>,
    Query(q): Query<LogQuery>,
) -> Json<Value> {
    let logs = state.monitor.run_logs.recent(&id, q.limit.unwrap_or(50));
    Json(json!({"total": logs.len(), "items": logs}))
}

#[derive(Deserialize)]
struct TogglePayload {
    enabled: bool,
}

async fn toggle_source(
    Extension(state): Extension<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(payload): Json<TogglePayload>,
) -> Result<Json<Value>, StatusCode> {
    if state.monitor.source(&id).is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    state
        .monitor
        .state
        .set_enabled_override(&id, payload.enabled)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({"id": id, "enabled": payload.enabled})))
}

async fn trigger_source(
    Extension(state): Extension<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    Arc::clone(&state.monitor)
        .trigger(&id)
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(json!({"id": id, "triggered": true})))
}

async fn dimension_overview(Extension(state): Extension<Arc<ApiState>>) -> Json<Value> {
    let index_path = state.monitor.settings.data_dir.join("index.json");
    match read_json::<Value>(&index_path).ok().flatten() {
        Some(idx) => Json(idx),
        // Index not generated yet: derive a minimal overview on the fly.
        None => {
            let mut dims: HashMap<String, u64> = HashMap::new();
            for artifact in state.monitor.raw.load_all() {
                *dims.entry(artifact.dimension).or_default() += artifact.item_count as u64;
            }
            Json(json!({"generated_at": null, "dimensions": dims}))
        }
    }
}

async fn dimension_articles(
    Extension(state): Extension<Arc<ApiState>>,
    Path(dimension): Path<String>,
    Query(mut filters): Query<CommonFilters>,
) -> Json<Value> {
    filters.dimension = Some(dimension);
    list_articles(Extension(state), Query(filters)).await
}

async fn trigger_pipeline(Extension(state): Extension<Arc<ApiState>>) -> Json<Value> {
    let monitor = Arc::clone(&state.monitor);
    tokio::spawn(async move {
        pipeline::run_daily_pipeline(&monitor).await;
    });
    Json(json!({"triggered": true}))
}

async fn pipeline_status(Extension(state): Extension<Arc<ApiState>>) -> Json<Value> {
    match pipeline::last_pipeline_result() {
        Some(result) => Json(serde_json::to_value(result).unwrap_or(Value::Null)),
        None => {
            let path = state
                .monitor
                .settings
                .processed_dir()
                .join("pipeline_status.json");
            Json(read_json::<Value>(&path).ok().flatten().unwrap_or(Value::Null))
        }
    }
}

macro_rules! feed_handler {
    ($name:ident, $module:expr, $file:expr) => {
        async fn $name(
            Extension(state): Extension<Arc<ApiState>>,
            Query(filters): Query<CommonFilters>,
        ) -> Json<Value> {
            filtered_feed(&state, $module, $file, &filters)
        }
    };
}

feed_handler!(policy_feed, policy::MODULE_DIR, "feed.json");
feed_handler!(policy_opportunities, policy::MODULE_DIR, "opportunities.json");
feed_handler!(personnel_feed, personnel::MODULE_DIR, "feed.json");
feed_handler!(personnel_changes, personnel::MODULE_DIR, "changes.json");
feed_handler!(tech_topics, tech::MODULE_DIR, "topics.json");
feed_handler!(tech_stats, tech::MODULE_DIR, "stats.json");
feed_handler!(university_feed, university::MODULE_DIR, "feed.json");
feed_handler!(university_research, university::MODULE_DIR, "research_outputs.json");

async fn daily_briefing(Extension(state): Extension<Arc<ApiState>>) -> Json<Value> {
    let path = state
        .monitor
        .settings
        .processed_dir()
        .join(briefing::MODULE_DIR)
        .join("briefing.json");
    Json(read_json::<Value>(&path).ok().flatten().unwrap_or(Value::Null))
}

// ---------------------------------------------------------------------------
// Article annotations: reader-side flags the crawl path never touches.
// ---------------------------------------------------------------------------

static ANNOTATIONS_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn annotations_path(state: &ApiState) -> std::path::PathBuf {
    state
        .monitor
        .settings
        .state_dir()
        .join("article_annotations.json")
}

async fn get_annotations(
    Extension(state): Extension<Arc<ApiState>>,
    Path(url_hash): Path<String>,
) -> Json<Value> {
    let map = read_json::<Value>(&annotations_path(&state))
        .ok()
        .flatten()
        .unwrap_or_else(|| json!({}));
    Json(map[&url_hash].clone())
}

async fn set_annotations(
    Extension(state): Extension<Arc<ApiState>>,
    Path(url_hash): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if !payload.is_object() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let path = annotations_path(&state);
    let _guard = ANNOTATIONS_LOCK.lock().expect("annotations lock poisoned");
    let mut map = read_json::<Value>(&path)
        .ok()
        .flatten()
        .unwrap_or_else(|| json!({}));
    let entry = map
        .as_object_mut()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .entry(url_hash.clone())
        .or_insert_with(|| json!({}));
    if let (Some(target), Some(update)) = (entry.as_object_mut(), payload.as_object()) {
        for (k, v) in update {
            target.insert(k.clone(), v.clone());
        }
    }
    crate::storage::write_json_atomic(&path, &map)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(map[&url_hash].clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzy_matching_ignores_case_and_whitespace() {
        assert_eq!(fuzzy("科技 部 新闻"), "科技部新闻");
        assert!(fuzzy("Beijing AI Daily").contains(&fuzzy("ai daily")));
    }

    #[test]
    fn source_quadruple_filters() {
        let names: HashMap<String, String> =
            [("most_policy".to_string(), "科技部 新闻".to_string())].into();
        let item = json!({"source": "most_policy", "title": "x"});

        let f = CommonFilters {
            source_id: Some("most_policy".into()),
            ..Default::default()
        };
        assert!(f.matches(&item, &names));

        let f = CommonFilters {
            source_ids: Some("other, most_policy".into()),
            ..Default::default()
        };
        assert!(f.matches(&item, &names));

        let f = CommonFilters {
            source_name: Some("科技部".into()),
            ..Default::default()
        };
        assert!(f.matches(&item, &names));

        let f = CommonFilters {
            source_names: Some("教育部, 科技 部".into()),
            ..Default::default()
        };
        assert!(f.matches(&item, &names));

        let f = CommonFilters {
            source_id: Some("moe_policy".into()),
            ..Default::default()
        };
        assert!(!f.matches(&item, &names));
    }

    #[test]
    fn keyword_and_date_filters() {
        let names = HashMap::new();
        let item = json!({
            "source": "s",
            "title": "人工智能新政",
            "content": "大模型相关",
            "date": "2026-07-01",
        });

        let f = CommonFilters {
            keyword: Some("大模型".into()),
            ..Default::default()
        };
        assert!(f.matches(&item, &names));

        let f = CommonFilters {
            keyword: Some("区块链".into()),
            ..Default::default()
        };
        assert!(!f.matches(&item, &names));

        let f = CommonFilters {
            date_from: Some("2026-07-01".into()),
            date_to: Some("2026-07-31".into()),
            ..Default::default()
        };
        assert!(f.matches(&item, &names));

        let f = CommonFilters {
            date_from: Some("2026-07-02".into()),
            ..Default::default()
        };
        assert!(!f.matches(&item, &names));
    }

    #[test]
    fn pagination_slices_and_reports_total() {
        let f = CommonFilters {
            page: Some(2),
            page_size: Some(2),
            ..Default::default()
        };
        let out = f.paginate((0..5).map(|i| json!({"i": i})).collect());
        assert_eq!(out["total"], 5);
        assert_eq!(out["items"].as_array().unwrap().len(), 2);
        assert_eq!(out["items"][0]["i"], 2);
    }
}
