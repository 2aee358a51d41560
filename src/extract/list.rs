//! List-page extraction: titles, links, and publish dates.
//!
//! The `_self` convention lets a selector refer to the list element itself,
//! for pages where the `<a>` tag *is* the list item. Dates fall back through
//! three strategies: configured selector + format, then URL filename
//! patterns, then URL directory patterns; government sites frequently carry
//! the date only in the URL.

use std::collections::HashSet;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::catalog::ListSelectors;
use crate::error::CrawlError;
use crate::urlnorm::resolve_link;

#[derive(Debug, Clone, PartialEq)]
pub struct RawListItem {
    pub title: String,
    pub url: String,
    pub published_at: Option<NaiveDate>,
}

const SELF_SELECTOR: &str = "_self";

fn parse_selector(css: &str) -> Result<Selector, CrawlError> {
    Selector::parse(css)
        .map_err(|e| CrawlError::Configuration(format!("invalid selector '{css}': {e}")))
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn element_text_spaced(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a date string with a strftime-style format; accepts a pure date or
/// a datetime format.
fn parse_with_format(text: &str, format: &str) -> Option<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(text, format) {
        return Some(d);
    }
    chrono::NaiveDateTime::parse_from_str(text, format)
        .ok()
        .map(|dt| dt.date())
}

/// Strategy (a): configured selector + format, with optional regex pre-pass.
/// Tries both text renderings (concatenated and space-joined) because some
/// sites split dates across child elements.
fn extract_date(el: ElementRef<'_>, selectors: &ListSelectors) -> Option<NaiveDate> {
    if selectors.date.is_empty() || selectors.date_format.is_empty() {
        return None;
    }
    let date_sel = Selector::parse(&selectors.date).ok()?;
    let date_el = el.select(&date_sel).next()?;

    let regex = if selectors.date_regex.is_empty() {
        None
    } else {
        Regex::new(&selectors.date_regex).ok()
    };

    for text in [element_text(date_el), element_text_spaced(date_el)] {
        let candidate = match &regex {
            Some(re) => match re.find(&text) {
                Some(m) => m.as_str().to_string(),
                None => continue,
            },
            None => text,
        };
        if let Some(d) = parse_with_format(candidate.trim(), &selectors.date_format) {
            return Some(d);
        }
    }
    None
}

/// Strategies (b) and (c): date baked into the URL.
pub fn extract_date_from_url(url: &str) -> Option<NaiveDate> {
    static FULL: Lazy<Regex> = Lazy::new(|| Regex::new(r"/t(\d{4})(\d{2})(\d{2})_").unwrap());
    static ISO: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").unwrap());
    static DIR: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(\d{4})(\d{2})/t?\d+").unwrap());

    let ymd = |y: &str, m: &str, d: &str| {
        NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
    };

    if let Some(c) = FULL.captures(url) {
        if let Some(d) = ymd(&c[1], &c[2], &c[3]) {
            return Some(d);
        }
    }
    if let Some(c) = ISO.captures(url) {
        if let Some(d) = ymd(&c[1], &c[2], &c[3]) {
            return Some(d);
        }
    }
    if let Some(c) = DIR.captures(url) {
        if let Some(d) = ymd(&c[1], &c[2], "1") {
            return Some(d);
        }
    }
    None
}

/// Extract list items from a parsed document.
///
/// Keyword filter is a case-insensitive title whitelist (empty → keep all);
/// the blacklist drops matches. Items are deduplicated by title: several
/// sites expose the same article under multiple URL paths.
pub fn parse_list_items(
    document: &Html,
    selectors: &ListSelectors,
    base_url: &str,
    keyword_filter: &[String],
    keyword_blacklist: &[String],
) -> Result<Vec<RawListItem>, CrawlError> {
    let list_sel = parse_selector(&selectors.list_item)?;

    let title_sel = if selectors.title == SELF_SELECTOR {
        None
    } else {
        Some(parse_selector(&selectors.title)?)
    };
    let link_sel = if selectors.link == SELF_SELECTOR {
        None
    } else {
        Some(parse_selector(&selectors.link)?)
    };

    let filter_lower: Vec<String> = keyword_filter.iter().map(|k| k.to_lowercase()).collect();
    let blacklist_lower: Vec<String> =
        keyword_blacklist.iter().map(|k| k.to_lowercase()).collect();

    let mut items = Vec::new();
    for el in document.select(&list_sel) {
        let title_el = match &title_sel {
            None => Some(el),
            Some(sel) => el.select(sel).next(),
        };
        let Some(title_el) = title_el else { continue };
        let title = element_text(title_el);
        if title.is_empty() {
            continue;
        }

        let link_el = match &link_sel {
            None => Some(el),
            Some(sel) => el.select(sel).next(),
        };
        let Some(link_el) = link_el else { continue };
        let raw_link = link_el
            .value()
            .attr(&selectors.link_attr)
            .unwrap_or("")
            .trim();
        if raw_link.is_empty() {
            continue;
        }
        let Some(url) = resolve_link(base_url, raw_link) else {
            continue;
        };

        let title_lower = title.to_lowercase();
        if !filter_lower.is_empty() && !filter_lower.iter().any(|k| title_lower.contains(k)) {
            continue;
        }
        if blacklist_lower.iter().any(|k| title_lower.contains(k)) {
            continue;
        }

        let published_at = extract_date(el, selectors).or_else(|| extract_date_from_url(&url));
        items.push(RawListItem {
            title,
            url,
            published_at,
        });
    }

    let before = items.len();
    let mut seen_titles = HashSet::new();
    items.retain(|item| seen_titles.insert(item.title.clone()));
    if items.len() < before {
        debug!(dropped = before - items.len(), "title-level duplicates removed");
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selectors() -> ListSelectors {
        ListSelectors {
            list_item: "ul.list li".into(),
            title: "a".into(),
            link: "a".into(),
            link_attr: "href".into(),
            date: String::new(),
            date_format: String::new(),
            date_regex: String::new(),
        }
    }

    #[test]
    fn extracts_items_with_url_dates() {
        let html = Html::parse_document(
            r#"<ul class="list">
                <li><a href="/news/t20260215_001.html">首条新闻</a></li>
                <li><a href="/news/t20260220_002.html">第二条</a></li>
            </ul>"#,
        );
        let items =
            parse_list_items(&html, &selectors(), "https://site/news/", &[], &[]).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://site/news/t20260215_001.html");
        assert_eq!(
            items[0].published_at,
            NaiveDate::from_ymd_opt(2026, 2, 15)
        );
        assert_eq!(
            items[1].published_at,
            NaiveDate::from_ymd_opt(2026, 2, 20)
        );
    }

    #[test]
    fn self_selector_uses_the_item_element() {
        let html = Html::parse_document(
            r#"<div><a class="entry" href="/a.html">Alpha</a><a class="entry" href="/b.html">Beta</a></div>"#,
        );
        let sels = ListSelectors {
            list_item: "a.entry".into(),
            title: "_self".into(),
            link: "_self".into(),
            ..selectors()
        };
        let items = parse_list_items(&html, &sels, "https://x/", &[], &[]).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Alpha");
        assert_eq!(items[1].url, "https://x/b.html");
    }

    #[test]
    fn keyword_filter_is_case_insensitive_substring() {
        let html = Html::parse_document(
            r#"<ul class="list">
                <li><a href="/1">AI policy update</a></li>
                <li><a href="/2">Sports news</a></li>
            </ul>"#,
        );
        let items = parse_list_items(
            &html,
            &selectors(),
            "https://x/",
            &["ai".to_string()],
            &[],
        )
        .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "AI policy update");
    }

    #[test]
    fn blacklist_drops_titles() {
        let html = Html::parse_document(
            r#"<ul class="list">
                <li><a href="/1">通知公告</a></li>
                <li><a href="/2">招聘启事</a></li>
            </ul>"#,
        );
        let items = parse_list_items(
            &html,
            &selectors(),
            "https://x/",
            &[],
            &["招聘".to_string()],
        )
        .unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn duplicate_titles_collapse() {
        let html = Html::parse_document(
            r#"<ul class="list">
                <li><a href="/a/1.html">同一篇</a></li>
                <li><a href="/b/1.html">同一篇</a></li>
            </ul>"#,
        );
        let items = parse_list_items(&html, &selectors(), "https://x/", &[], &[]).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn date_selector_with_format_and_regex() {
        let html = Html::parse_document(
            r#"<ul class="list">
                <li><a href="/n/1.html">标题</a><span class="d">发布于 2026-03-01</span></li>
            </ul>"#,
        );
        let sels = ListSelectors {
            date: "span.d".into(),
            date_format: "%Y-%m-%d".into(),
            date_regex: r"\d{4}-\d{2}-\d{2}".into(),
            ..selectors()
        };
        let items = parse_list_items(&html, &sels, "https://x/", &[], &[]).unwrap();
        assert_eq!(
            items[0].published_at,
            NaiveDate::from_ymd_opt(2026, 3, 1)
        );
    }

    #[test]
    fn url_directory_date_fallback() {
        assert_eq!(
            extract_date_from_url("https://x/202507/t123.html"),
            NaiveDate::from_ymd_opt(2025, 7, 1)
        );
        assert_eq!(extract_date_from_url("https://x/about.html"), None);
    }
}
