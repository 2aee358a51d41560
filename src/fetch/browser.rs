//! Bounded pool of headless-browser contexts for JS-rendered sources.
//!
//! One process-wide browser, launched lazily on first use. Each open session
//! takes a context permit from a semaphore sized by `PLAYWRIGHT_MAX_CONTEXTS`
//! and holds it until the session is closed; the permit is released on all
//! exit paths. A shutdown hook closes the browser at process teardown without
//! masking the primary error.

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::CrawlError;

/// Symbolic wait states; any other string is treated as a CSS selector the
/// page must match before the render is considered complete.
const WAIT_LOAD: &str = "load";
const WAIT_NETWORKIDLE: &str = "networkidle";

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(15_000);
const DETAIL_TIMEOUT: Duration = Duration::from_millis(10_000);
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct BrowserPool {
    inner: Mutex<Option<Arc<Browser>>>,
    permits: Arc<Semaphore>,
}

/// One rendered page session. Holds its pool permit for its whole lifetime,
/// so detail navigations share cookies with the list render.
pub struct BrowserSession {
    page: Page,
    url: String,
    _permit: OwnedSemaphorePermit,
}

impl BrowserPool {
    pub fn new(max_contexts: usize) -> Self {
        Self {
            inner: Mutex::new(None),
            permits: Arc::new(Semaphore::new(max_contexts)),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.browser_max_contexts)
    }

    async fn get_or_launch(&self) -> Result<Arc<Browser>, CrawlError> {
        let mut guard = self.inner.lock().await;
        if let Some(b) = guard.as_ref() {
            return Ok(Arc::clone(b));
        }

        let config = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .build()
            .map_err(|e| CrawlError::Render {
                url: String::new(),
                message: format!("browser config: {e}"),
            })?;

        let (browser, mut handler) =
            Browser::launch(config).await.map_err(|e| CrawlError::Render {
                url: String::new(),
                message: format!("browser launch: {e}"),
            })?;

        // The CDP event loop must be polled for the browser to make progress.
        tokio::spawn(async move { while handler.next().await.is_some() {} });

        let shared = Arc::new(browser);
        *guard = Some(Arc::clone(&shared));
        debug!("headless browser launched");
        Ok(shared)
    }

    /// Close the browser if it was ever started. Close errors are logged,
    /// never propagated; shutdown must not fail because a tab was stuck.
    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(browser) = guard.take() {
            match Arc::try_unwrap(browser) {
                Ok(mut b) => {
                    if let Err(e) = b.close().await {
                        warn!(error = %e, "browser close error");
                    }
                }
                Err(_) => warn!("browser still referenced at shutdown; leaving to process exit"),
            }
        }
    }

    /// Open a page, wait for the configured condition, and hand the session
    /// to the caller. The caller must `close()` it (or drop it; close is
    /// best-effort either way).
    pub async fn open(
        &self,
        url: &str,
        wait_condition: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<BrowserSession, CrawlError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("browser pool semaphore closed");

        let browser = self.get_or_launch().await?;
        let timeout = timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT);

        let page = browser.new_page(url).await.map_err(|e| CrawlError::Render {
            url: url.to_string(),
            message: format!("open page: {e}"),
        })?;

        let session = BrowserSession {
            page,
            url: url.to_string(),
            _permit: permit,
        };

        if let Err(e) = session.wait_for(wait_condition, timeout).await {
            session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    /// One-shot render: open, read content, close.
    pub async fn render(
        &self,
        url: &str,
        wait_condition: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<String, CrawlError> {
        let session = self.open(url, wait_condition, timeout).await?;
        let html = session.content().await;
        session.close().await;
        html
    }
}

impl BrowserSession {
    async fn wait_for(
        &self,
        wait_condition: Option<&str>,
        timeout: Duration,
    ) -> Result<(), CrawlError> {
        match wait_condition {
            None | Some(WAIT_LOAD) => {
                let _ = tokio::time::timeout(timeout, self.page.wait_for_navigation()).await;
                Ok(())
            }
            Some(WAIT_NETWORKIDLE) => {
                let _ = tokio::time::timeout(timeout, self.page.wait_for_navigation()).await;
                // Give in-flight XHRs a beat to settle; CDP has no direct
                // network-idle signal at this API level.
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            }
            Some(selector) => {
                let deadline = tokio::time::Instant::now() + timeout;
                loop {
                    if self.page.find_element(selector).await.is_ok() {
                        return Ok(());
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(CrawlError::Render {
                            url: self.url.clone(),
                            message: format!(
                                "wait condition '{selector}' not met within {timeout:?}"
                            ),
                        });
                    }
                    tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
                }
            }
        }
    }

    pub async fn content(&self) -> Result<String, CrawlError> {
        self.page.content().await.map_err(|e| CrawlError::Render {
            url: self.url.clone(),
            message: format!("read content: {e}"),
        })
    }

    /// Navigate the same page to a detail URL and return its HTML. Shares
    /// cookies with the original render.
    pub async fn goto_content(&self, url: &str) -> Result<String, CrawlError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| CrawlError::Render {
                url: url.to_string(),
                message: format!("detail navigation: {e}"),
            })?;
        let _ = tokio::time::timeout(DETAIL_TIMEOUT, self.page.wait_for_navigation()).await;
        self.page.content().await.map_err(|e| CrawlError::Render {
            url: url.to_string(),
            message: format!("detail content: {e}"),
        })
    }

    pub async fn close(self) {
        if let Err(e) = self.page.close().await {
            debug!(url = %self.url, error = %e, "page close error");
        }
    }
}
