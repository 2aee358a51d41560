//! Runtime settings loaded from environment variables.
//!
//! YAML files under `sources/` carry the static catalog (what to crawl);
//! everything operational (caps, cron, oracle keys, paths) comes from the
//! environment so deployments can tune it without touching the catalog.

use std::path::PathBuf;

use once_cell::sync::OnceCell;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Global cap on simultaneously running crawls.
    pub max_concurrent_crawls: usize,
    /// Per-host cap on concurrent HTTP requests.
    pub max_concurrent_per_domain: usize,
    /// Bounded pool of headless-browser contexts.
    pub browser_max_contexts: usize,
    /// Minimum inter-request delay per host, seconds.
    pub default_request_delay: f64,

    /// Daily pipeline cron (UTC).
    pub pipeline_cron_hour: u32,
    pub pipeline_cron_minute: u32,

    /// Oracle enrichment gate: both must be present for Tier 2 to run.
    pub enable_llm_enrichment: bool,
    pub oracle_api_key: String,
    pub oracle_model: String,
    pub oracle_base_url: String,

    pub twitter_api_key: String,
    pub rsshub_base_url: String,

    pub data_dir: PathBuf,
    pub sources_dir: PathBuf,

    /// Bind address for the read API.
    pub api_addr: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            max_concurrent_crawls: env_parse("MAX_CONCURRENT_CRAWLS", 5),
            max_concurrent_per_domain: env_parse("MAX_CONCURRENT_PER_DOMAIN", 2),
            browser_max_contexts: env_parse("PLAYWRIGHT_MAX_CONTEXTS", 3),
            default_request_delay: env_parse("DEFAULT_REQUEST_DELAY", 1.0),
            pipeline_cron_hour: env_parse("PIPELINE_CRON_HOUR", 5),
            pipeline_cron_minute: env_parse("PIPELINE_CRON_MINUTE", 30),
            enable_llm_enrichment: env_bool("ENABLE_LLM_ENRICHMENT"),
            oracle_api_key: env_string("ORACLE_API_KEY", ""),
            oracle_model: env_string("ORACLE_MODEL", "google/gemini-2.0-flash-001"),
            oracle_base_url: env_string(
                "ORACLE_BASE_URL",
                "https://openrouter.ai/api/v1/chat/completions",
            ),
            twitter_api_key: env_string("TWITTER_API_KEY", ""),
            rsshub_base_url: env_string("RSSHUB_BASE_URL", "https://rsshub.app"),
            data_dir: PathBuf::from(env_string("DATA_DIR", "data")),
            sources_dir: PathBuf::from(env_string("SOURCES_DIR", "sources")),
            api_addr: env_string("API_ADDR", "0.0.0.0:8000"),
        }
    }

    /// Process-wide settings, loaded once on first access.
    pub fn global() -> &'static Settings {
        static SETTINGS: OnceCell<Settings> = OnceCell::new();
        SETTINGS.get_or_init(Settings::from_env)
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir.join("processed")
    }

    /// True when Tier 2 oracle enrichment may run.
    pub fn oracle_enabled(&self) -> bool {
        self.enable_llm_enrichment && !self.oracle_api_key.is_empty()
    }
}
