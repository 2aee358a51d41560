//! Snapshot strategy: change detection for pages without a news list
//! (leadership rosters, committee pages).
//!
//! The content area's text is hashed and compared to the last stored
//! snapshot. No change → empty result. A change emits exactly one item whose
//! URL carries `#snapshot-<hash12>` so every page version gets a distinct
//! `url_hash`, and whose content is a line-level diff summary.

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

use crate::catalog::SourceDefinition;
use crate::crawler::{CrawlContext, CrawledItem, FetchOutcome, Fetcher};
use crate::error::CrawlError;
use crate::extract::html_to_text;
use crate::fetch::{fetch_page, FetchOptions};
use crate::storage::snapshot_store::SnapshotRecord;
use crate::urlnorm::content_hash;

const FIRST_SNAPSHOT_PREVIEW_CHARS: usize = 500;

pub struct SnapshotFetcher;

/// Extract the watched text from the page: the configured content area (or
/// whole body), with ignore patterns stripped.
fn extract_watched_text(html: &str, def: &SourceDefinition) -> Result<String, CrawlError> {
    let document = Html::parse_document(html);
    let mut text = match &def.content_area {
        Some(selector_str) if !selector_str.is_empty() => {
            let selector = Selector::parse(selector_str).map_err(|e| {
                CrawlError::Configuration(format!("invalid content_area '{selector_str}': {e}"))
            })?;
            match document.select(&selector).next() {
                Some(el) => html_to_text(&el.inner_html()),
                None => {
                    return Err(CrawlError::SelectorMiss {
                        url: def.url.clone(),
                        selector: selector_str.clone(),
                    })
                }
            }
        }
        _ => html_to_text(html),
    };

    for pattern in &def.ignore_patterns {
        if let Ok(re) = Regex::new(pattern) {
            text = re.replace_all(&text, "").into_owned();
        }
    }

    // Re-normalize line structure after pattern stripping.
    static BLANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").unwrap());
    Ok(BLANK.replace_all(text.trim(), "\n").into_owned())
}

/// Line-level diff summary: removed lines prefixed `-`, added lines `+`.
/// Position-insensitive: roster pages reorder freely; what matters is who
/// appeared and who left.
fn diff_summary(old: &str, new: &str) -> String {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let old_set: std::collections::HashSet<&str> = old_lines.iter().copied().collect();
    let new_set: std::collections::HashSet<&str> = new_lines.iter().copied().collect();

    let mut out = Vec::new();
    for line in &old_lines {
        if !new_set.contains(line) {
            out.push(format!("- {line}"));
        }
    }
    for line in &new_lines {
        if !old_set.contains(line) {
            out.push(format!("+ {line}"));
        }
    }
    out.join("\n")
}

#[async_trait]
impl Fetcher for SnapshotFetcher {
    async fn fetch_and_parse(
        &self,
        def: &SourceDefinition,
        ctx: &CrawlContext,
    ) -> Result<FetchOutcome, CrawlError> {
        let options = FetchOptions::from_source(def);
        let html = fetch_page(&def.url, &options).await?;
        let text = extract_watched_text(&html, def)?;
        let hash = content_hash(&text);

        let last = ctx.snapshots.last(&def.id);
        if let Some(last) = &last {
            if last.content_hash == hash {
                return Ok(FetchOutcome::default());
            }
        }

        let diff = last
            .as_ref()
            .and_then(|l| l.content_text.as_deref())
            .map(|old| diff_summary(old, &text));

        ctx.snapshots
            .append(
                &def.id,
                SnapshotRecord {
                    captured_at: Utc::now(),
                    content_hash: hash.clone(),
                    content_length: text.chars().count(),
                    diff_summary: diff.clone(),
                    content_text: Some(text.clone()),
                },
            )
            .map_err(|e| CrawlError::Configuration(format!("snapshot store: {e}")))?;

        let content = match diff {
            Some(d) if !d.is_empty() => d,
            _ => {
                let preview: String = text.chars().take(FIRST_SNAPSHOT_PREVIEW_CHARS).collect();
                format!("初次快照: {preview}")
            }
        };

        let item_url = format!("{}#snapshot-{}", def.url, &hash[..12]);
        let mut item = CrawledItem::new(format!("[变更检测] {}", def.name), item_url, def);
        item.content_hash = Some(hash);
        item.content = Some(content);
        item.tags.push("snapshot_diff".to_string());
        item.extra
            .insert("is_first_snapshot".to_string(), (last.is_none()).into());

        Ok(FetchOutcome::from_items(vec![item]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::tests::test_source;

    #[test]
    fn watched_text_scopes_to_content_area_and_strips_patterns() {
        let mut def = test_source("s1");
        def.content_area = Some("#roster".into());
        def.ignore_patterns = vec![r"浏览量[:：]\s*\d+".to_string()];
        let html = r#"
            <div id="nav">menu</div>
            <div id="roster"><ul><li>A: Smith</li><li>B: Jones</li></ul><p>浏览量: 10234</p></div>
        "#;
        let text = extract_watched_text(html, &def).unwrap();
        assert!(text.contains("A: Smith"));
        assert!(text.contains("B: Jones"));
        assert!(!text.contains("menu"));
        assert!(!text.contains("10234"));
    }

    #[test]
    fn missing_content_area_is_selector_miss() {
        let mut def = test_source("s1");
        def.content_area = Some("#gone".into());
        let err = extract_watched_text("<div id='x'>y</div>", &def).unwrap_err();
        assert!(matches!(err, CrawlError::SelectorMiss { .. }));
    }

    #[test]
    fn diff_lists_added_and_removed_lines() {
        let diff = diff_summary("A: Smith", "A: Smith\nB: Jones");
        assert_eq!(diff, "+ B: Jones");
        let diff = diff_summary("A: Smith\nB: Jones", "A: Smith");
        assert_eq!(diff, "- B: Jones");
    }

    #[test]
    fn snapshot_url_fragment_shape() {
        let hash = content_hash("roster text");
        let url = format!("https://site/leaders#snapshot-{}", &hash[..12]);
        let re = Regex::new(r".*#snapshot-[0-9a-f]{12}$").unwrap();
        assert!(re.is_match(&url));
    }
}
