//! Text-analysis oracle: provider abstraction for optional enrichment.
//!
//! Concrete backends are out of scope; this speaks an OpenRouter-compatible
//! chat-completions dialect and returns validated JSON. Failures are always
//! non-fatal upstream: processors keep their rule-engine fields and skip
//! the cache update. Per-item caching lives in the processors, keyed by the
//! processing-input content hash.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::CrawlError;

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Ask for a JSON object; the returned value is already parsed and is
    /// guaranteed to be a JSON object.
    async fn complete_json(&self, system: &str, user: &str) -> Result<Value, CrawlError>;

    fn provider_name(&self) -> &'static str;

    fn is_enabled(&self) -> bool {
        true
    }
}

pub type SharedOracle = Arc<dyn Oracle>;

/// Build from settings: the HTTP provider when enrichment is on and a key is
/// present, the disabled stub otherwise.
pub fn build_oracle(settings: &Settings) -> SharedOracle {
    if settings.oracle_enabled() {
        Arc::new(HttpOracle::new(
            settings.oracle_base_url.clone(),
            settings.oracle_api_key.clone(),
            settings.oracle_model.clone(),
        ))
    } else {
        Arc::new(DisabledOracle)
    }
}

// ---------------------------------------------------------------------------
// Disabled stub
// ---------------------------------------------------------------------------

pub struct DisabledOracle;

#[async_trait]
impl Oracle for DisabledOracle {
    async fn complete_json(&self, _system: &str, _user: &str) -> Result<Value, CrawlError> {
        Err(CrawlError::Oracle("oracle is disabled".to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// HTTP provider (OpenRouter-compatible chat completions)
// ---------------------------------------------------------------------------

pub struct HttpOracle {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpOracle {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("oracle client construction cannot fail with static config");
        Self {
            http,
            base_url,
            api_key,
            model,
        }
    }
}

/// Models love to wrap JSON in markdown fences; strip them before parsing.
fn extract_json_object(content: &str) -> Result<Value, CrawlError> {
    let trimmed = content.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    // Fall back to the outermost braces when the model added prose.
    let candidate = if inner.starts_with('{') {
        inner.to_string()
    } else {
        let start = inner.find('{');
        let end = inner.rfind('}');
        match (start, end) {
            (Some(s), Some(e)) if e > s => inner[s..=e].to_string(),
            _ => {
                return Err(CrawlError::Oracle(format!(
                    "no JSON object in oracle response: {}",
                    &inner.chars().take(120).collect::<String>()
                )))
            }
        }
    };

    let value: Value = serde_json::from_str(&candidate)
        .map_err(|e| CrawlError::Oracle(format!("malformed oracle JSON: {e}")))?;
    if !value.is_object() {
        return Err(CrawlError::Oracle("oracle response is not an object".into()));
    }
    Ok(value)
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn complete_json(&self, system: &str, user: &str) -> Result<Value, CrawlError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.2,
        });

        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CrawlError::Oracle(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::Oracle(format!("oracle returned {status}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| CrawlError::Oracle(format!("response decode: {e}")))?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CrawlError::Oracle("response missing content".to_string()))?;

        debug!(chars = content.len(), "oracle responded");
        extract_json_object(content)
    }

    fn provider_name(&self) -> &'static str {
        "openrouter"
    }
}

// ---------------------------------------------------------------------------
// Deterministic mock for tests
// ---------------------------------------------------------------------------

pub struct MockOracle {
    pub fixed: Value,
}

#[async_trait]
impl Oracle for MockOracle {
    async fn complete_json(&self, _system: &str, _user: &str) -> Result<Value, CrawlError> {
        if self.fixed.is_object() {
            Ok(self.fixed.clone())
        } else {
            Err(CrawlError::Oracle("mock configured with non-object".into()))
        }
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// Call the oracle, logging and swallowing failures into `None`, the
/// standard non-fatal posture for enrichment passes.
pub async fn try_enrich(oracle: &dyn Oracle, system: &str, user: &str) -> Option<Value> {
    match oracle.complete_json(system, user).await {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(provider = oracle.provider_name(), error = %e, "oracle call failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_is_unwrapped() {
        let v = extract_json_object("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn prose_wrapped_json_is_found() {
        let v = extract_json_object("Here you go: {\"ok\": true} hope it helps").unwrap();
        assert_eq!(v["ok"], true);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(extract_json_object("no json here").is_err());
        assert!(extract_json_object("[1, 2, 3]").is_err());
    }

    #[tokio::test]
    async fn disabled_oracle_errors_and_reports_disabled() {
        let oracle = DisabledOracle;
        assert!(!oracle.is_enabled());
        assert!(oracle.complete_json("s", "u").await.is_err());
    }

    #[tokio::test]
    async fn try_enrich_swallows_failures() {
        assert!(try_enrich(&DisabledOracle, "s", "u").await.is_none());
        let mock = MockOracle {
            fixed: json!({"insight": "x"}),
        };
        assert_eq!(try_enrich(&mock, "s", "u").await.unwrap()["insight"], "x");
    }
}
