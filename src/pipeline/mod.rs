//! Daily analytical pipeline: ordered stages with per-stage status capture.
//!
//! The orchestrator continues past failed stages; a broken processor must
//! not starve the others. Oracle stages are gated on configuration and
//! record `skipped` when the gate is closed; the briefing is skipped when
//! no upstream module produced output.

pub mod briefing;
pub mod index;
pub mod personnel;
pub mod policy;
pub mod shared;
pub mod tech;
pub mod university;

use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::oracle::build_oracle;
use crate::scheduler::Monitor;
use crate::storage::raw_store::RawStore;
use crate::storage::write_json_atomic;

/// Handles the processors need: the raw store and the processed-output root.
pub struct ProcessorContext {
    pub raw: RawStore,
    pub processed_base: PathBuf,
}

impl ProcessorContext {
    pub fn from_monitor(monitor: &Monitor) -> Self {
        Self {
            raw: monitor.raw.clone(),
            processed_base: monitor.settings.processed_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub name: String,
    pub status: StageStatus,
    pub duration_seconds: f64,
    #[serde(default)]
    pub summary: Value,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub stages: Vec<StageResult>,
}

impl PipelineResult {
    fn overall_status(stages: &[StageResult]) -> String {
        let any_failed = stages.iter().any(|s| s.status == StageStatus::Failed);
        let any_success = stages.iter().any(|s| s.status == StageStatus::Success);
        if !any_failed {
            "success".to_string()
        } else if any_success {
            "partial".to_string()
        } else {
            "failed".to_string()
        }
    }
}

/// Last run, queryable through the health endpoint.
static LAST_RESULT: Lazy<RwLock<Option<PipelineResult>>> = Lazy::new(|| RwLock::new(None));

pub fn last_pipeline_result() -> Option<PipelineResult> {
    LAST_RESULT.read().expect("pipeline result lock poisoned").clone()
}

async fn run_stage<F, Fut>(name: &str, stage: F) -> StageResult
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<Value>>,
{
    let started = Utc::now();
    info!(stage = name, "pipeline stage starting");
    let (status, summary, error) = match stage().await {
        Ok(summary) => (StageStatus::Success, summary, None),
        Err(e) => {
            error!(stage = name, error = %e, "pipeline stage failed");
            counter!("pipeline_stage_failures_total").increment(1);
            (StageStatus::Failed, Value::Null, Some(e.to_string()))
        }
    };
    let finished = Utc::now();
    StageResult {
        name: name.to_string(),
        status,
        duration_seconds: (finished - started)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0),
        summary,
        error,
    }
}

fn skipped_stage(name: &str, reason: &str) -> StageResult {
    StageResult {
        name: name.to_string(),
        status: StageStatus::Skipped,
        duration_seconds: 0.0,
        summary: json!({"reason": reason}),
        error: None,
    }
}

/// Execute the full daily pipeline. Never returns an error: every failure is
/// captured in the per-stage records.
pub async fn run_daily_pipeline(monitor: &std::sync::Arc<Monitor>) -> PipelineResult {
    let started_at = Utc::now();
    let ctx = ProcessorContext::from_monitor(monitor);
    let oracle = build_oracle(&monitor.settings);
    let mut stages = Vec::new();

    info!("daily pipeline starting");

    // Stage 1: crawl every enabled source.
    stages.push(
        run_stage("crawl_all", || async {
            let (ok, failed) = std::sync::Arc::clone(monitor).run_all(None).await;
            Ok(json!({"ok": ok, "failed": failed}))
        })
        .await,
    );

    // Stages 2-5: rule-engine processors. Each runs regardless of the others.
    stages.push(run_stage("process_policy", || async { policy::process(&ctx, false, false) }).await);
    stages.push(
        run_stage("process_personnel", || async { personnel::process(&ctx, false, false) }).await,
    );
    stages.push(
        run_stage("process_university", || async { university::process(&ctx, false, false) })
            .await,
    );
    stages.push(run_stage("process_tech", || async { tech::process(&ctx, false, false) }).await);

    // Stage 6: oracle enrichment, gated on config + key.
    if monitor.settings.oracle_enabled() {
        stages.push(
            run_stage("enrich_oracle", || async {
                let policy_summary = policy::enrich_with_oracle(&ctx, &oracle).await?;
                let personnel_summary = personnel::enrich_with_oracle(&ctx, &oracle).await?;
                let tech_summary = tech::enrich_with_oracle(&ctx, &oracle).await?;
                Ok(json!({
                    "policy": policy_summary,
                    "personnel": personnel_summary,
                    "tech": tech_summary,
                }))
            })
            .await,
        );
    } else {
        let reason = if monitor.settings.enable_llm_enrichment {
            "ORACLE_API_KEY not set"
        } else {
            "ENABLE_LLM_ENRICHMENT=false"
        };
        stages.push(skipped_stage("enrich_oracle", reason));
    }

    // Stage 7: index generation.
    stages.push(
        run_stage("generate_index", || async {
            index::generate_index(monitor).map(|idx| {
                json!({
                    "total_articles": idx["total_articles"],
                    "dimensions": idx["dimensions"].as_array().map(|d| d.len()).unwrap_or(0),
                })
            })
        })
        .await,
    );

    // Stage 8: daily briefing, skipped when stages 2-5 produced nothing.
    if briefing::has_no_inputs(&ctx) {
        stages.push(skipped_stage("generate_briefing", "no module output"));
    } else {
        stages.push(
            run_stage("generate_briefing", || async {
                briefing::process(&ctx, Some(&oracle)).await
            })
            .await,
        );
    }

    let finished_at = Utc::now();
    let result = PipelineResult {
        status: PipelineResult::overall_status(&stages),
        started_at,
        finished_at,
        duration_seconds: (finished_at - started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0),
        stages,
    };

    info!(
        status = %result.status,
        secs = format!("{:.0}", result.duration_seconds),
        "daily pipeline complete"
    );
    for stage in &result.stages {
        info!(
            stage = %stage.name,
            status = ?stage.status,
            secs = format!("{:.1}", stage.duration_seconds),
            "stage summary"
        );
    }

    if let Err(e) = write_json_atomic(
        &monitor.settings.processed_dir().join("pipeline_status.json"),
        &result,
    ) {
        error!(error = %e, "failed to write pipeline status");
    }
    *LAST_RESULT.write().expect("pipeline result lock poisoned") = Some(result.clone());
    result
}
