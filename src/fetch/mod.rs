//! Network access: the shared HTTP client and the headless-browser pool.

pub mod browser;
pub mod http;

pub use browser::{BrowserPool, BrowserSession};
pub use http::{fetch_bytes, fetch_json, fetch_page, FetchOptions};
