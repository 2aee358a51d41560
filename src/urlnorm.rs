//! URL canonicalization and content hashing.
//!
//! `url_hash` is the primary dedup key across the whole system, so the
//! canonical form must be stable: lowercase scheme/host, tracking params
//! stripped, remaining params sorted, trailing slash dropped (except root).
//! Fragments are preserved: the snapshot strategy encodes the content hash
//! into the fragment to give each page version a distinct key.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

/// Query parameters that never affect content identity.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "from",
    "spm",
    "ref",
    "share_token",
    "wfr",
    "isappinstalled",
];

fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}

/// Canonicalize a URL for deduplication. Idempotent; returns the input
/// unchanged when it does not parse as an absolute URL.
pub fn canonicalize(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.trim().to_string();
    };

    // Url already lowercases scheme and host on parse.
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    if params.is_empty() {
        url.set_query(None);
    } else {
        let qs = params
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&qs));
    }

    // Drop trailing slash except on the root path.
    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    url.to_string()
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 of the canonical URL, lowercase hex. Primary dedup key.
pub fn url_hash(url: &str) -> String {
    sha256_hex(&canonicalize(url))
}

/// SHA-256 over whitespace-collapsed text.
pub fn content_hash(text: &str) -> String {
    static WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
    let collapsed = WS.replace_all(text.trim(), " ");
    sha256_hex(&collapsed)
}

/// Ensure a base URL ends with `/` so relative joins treat the last path
/// segment as a directory. A last segment containing a dot is assumed to be
/// a file (e.g. `index.html`) and left alone.
pub fn normalize_base_url(base: &str) -> String {
    if base.is_empty() {
        return String::new();
    }
    let Ok(url) = Url::parse(base) else {
        return base.to_string();
    };
    let path = url.path().to_string();
    if path.is_empty() || path.ends_with('/') {
        return base.to_string();
    }
    let last = path.rsplit('/').next().unwrap_or("");
    if last.contains('.') {
        return base.to_string();
    }
    let mut out = url;
    out.set_path(&format!("{path}/"));
    out.to_string()
}

/// Resolve a possibly-relative link against a (normalized) base URL.
pub fn resolve_link(base: &str, link: &str) -> Option<String> {
    let base = normalize_base_url(base);
    match Url::parse(link) {
        Ok(abs) => Some(abs.to_string()),
        Err(_) => Url::parse(&base).ok()?.join(link).ok().map(|u| u.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_strips_tracking_params() {
        let a = canonicalize("https://Example.com/news?utm_source=x&id=3&spm=t");
        let b = canonicalize("https://example.com/news?id=3");
        assert_eq!(a, b);
        assert_eq!(url_hash(&a), url_hash(&b));
    }

    #[test]
    fn canonicalize_sorts_params_and_drops_trailing_slash() {
        assert_eq!(
            canonicalize("https://x.com/a/b/?b=2&a=1"),
            "https://x.com/a/b?a=1&b=2"
        );
        // Root slash stays.
        assert_eq!(canonicalize("https://x.com/"), "https://x.com/");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let once = canonicalize("https://X.com/p/?utm_medium=m&z=1&a=2#frag");
        assert_eq!(canonicalize(&once), once);
    }

    #[test]
    fn fragment_is_preserved() {
        let c = canonicalize("https://site/leaders#snapshot-abcdef012345");
        assert!(c.ends_with("#snapshot-abcdef012345"));
        assert_ne!(
            url_hash("https://site/leaders#snapshot-aaa"),
            url_hash("https://site/leaders#snapshot-bbb")
        );
    }

    #[test]
    fn content_hash_collapses_whitespace() {
        assert_eq!(content_hash("a  b\n\tc"), content_hash(" a b c "));
        assert_ne!(content_hash("a b"), content_hash("a c"));
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        assert_eq!(
            normalize_base_url("https://x.com/a/b"),
            "https://x.com/a/b/"
        );
        assert_eq!(
            normalize_base_url("https://x.com/a/b/"),
            "https://x.com/a/b/"
        );
        // File-like last segment is left as-is.
        assert_eq!(
            normalize_base_url("https://x.com/a/index.html"),
            "https://x.com/a/index.html"
        );
    }

    #[test]
    fn relative_links_resolve_under_directory_base() {
        let url = resolve_link("https://x.com/a/b", "c.html").unwrap();
        assert_eq!(url, "https://x.com/a/b/c.html");
        let url = resolve_link("https://x.com/a/", "./202602/d.html").unwrap();
        assert_eq!(url, "https://x.com/a/202602/d.html");
        // Absolute links pass through.
        let url = resolve_link("https://x.com/", "https://y.com/z").unwrap();
        assert_eq!(url, "https://y.com/z");
    }
}
