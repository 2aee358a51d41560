//! Shared HTTP client: UA rotation, per-domain pacing, retry with backoff.
//!
//! Every outbound request goes through here so that rate limits are enforced
//! at per-host granularity no matter which fetcher issued the request. The
//! domain gate combines a semaphore (concurrent requests per host) with a
//! minimum inter-request delay.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use once_cell::sync::Lazy;
use rand::Rng;
use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::config::Settings;
use crate::error::CrawlError;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.2 Safari/605.1.15",
];

fn random_user_agent() -> &'static str {
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Per-host gate: bounded concurrency plus minimum spacing between requests.
struct DomainGate {
    semaphore: Semaphore,
    last_request: Mutex<Option<Instant>>,
}

static DOMAIN_GATES: Lazy<Mutex<HashMap<String, Arc<DomainGate>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn gate_for(domain: &str) -> Arc<DomainGate> {
    let mut gates = DOMAIN_GATES.lock().expect("domain gate map poisoned");
    gates
        .entry(domain.to_string())
        .or_insert_with(|| {
            Arc::new(DomainGate {
                semaphore: Semaphore::new(Settings::global().max_concurrent_per_domain),
                last_request: Mutex::new(None),
            })
        })
        .clone()
}

async fn pace_domain(gate: &DomainGate, delay: f64) {
    let wait = {
        let last = gate.last_request.lock().expect("pacing mutex poisoned");
        match *last {
            Some(t) => {
                let elapsed = t.elapsed().as_secs_f64();
                (delay - elapsed).max(0.0)
            }
            None => 0.0,
        }
    };
    if wait > 0.0 {
        tokio::time::sleep(Duration::from_secs_f64(wait)).await;
    }
    *gate.last_request.lock().expect("pacing mutex poisoned") = Some(Instant::now());
}

/// Options for a single fetch. Defaults follow the config layer.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub headers: HashMap<String, String>,
    pub params: Vec<(String, String)>,
    /// Charset used when the response does not declare one.
    pub encoding: Option<String>,
    /// When false, accept invalid chains (legacy government servers).
    pub verify_tls: Option<bool>,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
    pub request_delay: Option<f64>,
}

impl FetchOptions {
    pub fn from_source(def: &crate::catalog::SourceDefinition) -> Self {
        Self {
            headers: def.headers.clone(),
            encoding: def.encoding.clone(),
            verify_tls: Some(def.verify_tls),
            request_delay: def.request_delay_seconds,
            ..Default::default()
        }
    }
}

fn build_client(verify_tls: bool) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .cookie_store(true)
        .danger_accept_invalid_certs(!verify_tls)
        .build()
        .expect("reqwest client construction cannot fail with static config")
}

static CLIENT: Lazy<Client> = Lazy::new(|| build_client(true));
static CLIENT_LAX_TLS: Lazy<Client> = Lazy::new(|| build_client(false));

fn client_for(verify_tls: bool) -> &'static Client {
    if verify_tls {
        &CLIENT
    } else {
        &CLIENT_LAX_TLS
    }
}

fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default()
}

/// Core request path with retry. Returns the raw body bytes and the charset
/// hint from the Content-Type header, if any.
async fn request_with_retry(
    url: &str,
    options: &FetchOptions,
) -> Result<(Vec<u8>, Option<String>), CrawlError> {
    let settings = Settings::global();
    let max_retries = options.max_retries.unwrap_or(3);
    let delay = options.request_delay.unwrap_or(settings.default_request_delay);
    let verify_tls = options.verify_tls.unwrap_or(true);
    let client = client_for(verify_tls);

    let domain = domain_of(url);
    let gate = gate_for(&domain);
    let _permit = gate
        .semaphore
        .acquire()
        .await
        .expect("domain semaphore closed");
    pace_domain(&gate, delay).await;

    let mut last_err: Option<CrawlError> = None;

    for attempt in 0..max_retries {
        let mut req = client.get(url);
        if !options.headers.contains_key("User-Agent") {
            req = req.header("User-Agent", random_user_agent());
        }
        for (k, v) in &options.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if !options.params.is_empty() {
            req = req.query(&options.params);
        }
        if let Some(t) = options.timeout {
            req = req.timeout(t);
        }

        match req.send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_client_error() {
                    return Err(CrawlError::PermanentFetch {
                        url: url.to_string(),
                        status: Some(status.as_u16()),
                        message: format!("client error {status}"),
                    });
                }
                if status.is_server_error() {
                    last_err = Some(CrawlError::TransientFetch {
                        url: url.to_string(),
                        status: Some(status.as_u16()),
                        message: format!("server error {status}"),
                    });
                } else {
                    let charset = resp
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|ct| {
                            ct.split(';').find_map(|p| {
                                p.trim()
                                    .strip_prefix("charset=")
                                    .map(|c| c.trim_matches('"').to_string())
                            })
                        });
                    match resp.bytes().await {
                        Ok(bytes) => return Ok((bytes.to_vec(), charset)),
                        Err(e) => {
                            last_err = Some(CrawlError::TransientFetch {
                                url: url.to_string(),
                                status: None,
                                message: format!("body read failed: {e}"),
                            });
                        }
                    }
                }
            }
            Err(e) => {
                last_err = Some(CrawlError::TransientFetch {
                    url: url.to_string(),
                    status: e.status().map(|s| s.as_u16()),
                    message: e.to_string(),
                });
            }
        }

        if attempt + 1 < max_retries {
            let backoff =
                f64::from(2u32.pow(attempt)) + rand::thread_rng().gen_range(0.0..1.0);
            debug!(
                url,
                attempt = attempt + 1,
                backoff_secs = backoff,
                "retrying after fetch failure"
            );
            tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
        }
    }

    warn!(url, "fetch failed after {max_retries} attempts");
    Err(last_err.unwrap_or_else(|| CrawlError::TransientFetch {
        url: url.to_string(),
        status: None,
        message: "exhausted retries".to_string(),
    }))
}

/// Decode body bytes with the given charset label (override wins over the
/// Content-Type header). Unknown labels fall back to UTF-8 with replacement.
fn decode_body(bytes: Vec<u8>, charset: Option<&str>) -> String {
    let encoding = charset
        .and_then(|c| encoding_rs::Encoding::for_label(c.trim().as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);
    let (text, _, _) = encoding.decode(&bytes);
    text.into_owned()
}

/// Fetch a page and decode to text, honoring the caller's encoding override.
pub async fn fetch_page(url: &str, options: &FetchOptions) -> Result<String, CrawlError> {
    let (bytes, header_charset) = request_with_retry(url, options).await?;
    let charset = options.encoding.as_deref().or(header_charset.as_deref());
    Ok(decode_body(bytes, charset))
}

/// Fetch raw bytes (PDFs, images).
pub async fn fetch_bytes(url: &str, options: &FetchOptions) -> Result<Vec<u8>, CrawlError> {
    let (bytes, _) = request_with_retry(url, options).await?;
    Ok(bytes)
}

/// Fetch and decode a JSON endpoint.
pub async fn fetch_json(
    url: &str,
    options: &FetchOptions,
) -> Result<serde_json::Value, CrawlError> {
    let (bytes, _) = request_with_retry(url, options).await?;
    serde_json::from_slice(&bytes).map_err(|e| CrawlError::Decode {
        url: url.to_string(),
        message: format!("invalid JSON: {e}"),
    })
}
