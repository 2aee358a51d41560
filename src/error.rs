//! Crawl error taxonomy.
//!
//! Fetchers convert all of these into a `FAILED` result with an error
//! message; nothing here crosses the scheduler boundary as a panic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown fetcher kind: {0}")]
    UnknownFetcherKind(String),

    /// Retriable failure that survived all retries (5xx, timeout, reset).
    #[error("transient fetch error for {url}: {message}")]
    TransientFetch {
        url: String,
        status: Option<u16>,
        message: String,
    },

    /// Client-side failure; retrying will not help (4xx, DNS).
    #[error("permanent fetch error for {url}: {message}")]
    PermanentFetch {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("decode error for {url}: {message}")]
    Decode { url: String, message: String },

    /// A configured selector matched nothing on the page.
    #[error("selector '{selector}' matched nothing at {url}")]
    SelectorMiss { url: String, selector: String },

    #[error("render error for {url}: {message}")]
    Render { url: String, message: String },

    #[error("oracle error: {0}")]
    Oracle(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("artifact integrity error at {path}: {message}")]
    Integrity { path: String, message: String },
}

impl CrawlError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CrawlError::TransientFetch { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            CrawlError::TransientFetch { status, .. }
            | CrawlError::PermanentFetch { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let e = CrawlError::TransientFetch {
            url: "https://x/".into(),
            status: Some(503),
            message: "service unavailable".into(),
        };
        assert!(e.is_transient());
        assert_eq!(e.status(), Some(503));

        let e = CrawlError::PermanentFetch {
            url: "https://x/".into(),
            status: Some(404),
            message: "not found".into(),
        };
        assert!(!e.is_transient());
    }
}
