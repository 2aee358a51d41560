//! Detail-page extraction: sanitized body HTML, plain text, images, PDF
//! links, and configured section fields.

use std::collections::{HashMap, HashSet};

use ammonia::UrlRelative;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use url::Url;

use crate::catalog::DetailSelectors;
use crate::extract::text::html_to_text;
use crate::urlnorm::content_hash;

/// Tag whitelist for `content_html`. Everything else is unwrapped (text
/// kept, tag dropped); script/style subtrees are removed entirely by ammonia.
const SAFE_TAGS: &[&str] = &[
    "p", "div", "span", "h1", "h2", "h3", "h4", "h5", "h6", "a", "img", "table", "tr", "td",
    "ul", "ol", "li", "br", "strong", "em", "pre", "code",
];

const SAFE_ATTRS: &[&str] = &["href", "src", "alt", "title"];

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ImageRef {
    pub src: String,
    #[serde(default)]
    pub alt: String,
}

#[derive(Debug, Clone, Default)]
pub struct DetailResult {
    pub content: String,
    pub content_html: String,
    pub content_hash: Option<String>,
    pub author: Option<String>,
    pub images: Vec<ImageRef>,
    pub pdf_url: Option<String>,
    /// Fields produced by heading_sections / label_prefix_sections config.
    pub sections: HashMap<String, String>,
}

/// Sanitize an HTML fragment to the safe subset, rewriting relative `src` /
/// `href` against `base_url`.
pub fn sanitize_html(html: &str, base_url: &str) -> String {
    let mut builder = ammonia::Builder::default();
    builder
        .tags(HashSet::from_iter(SAFE_TAGS.iter().copied()))
        .generic_attributes(HashSet::from_iter(SAFE_ATTRS.iter().copied()))
        .link_rel(None);
    if let Ok(base) = Url::parse(base_url) {
        builder.url_relative(UrlRelative::RewriteWithBase(base));
    }
    builder.clean(html).to_string().trim().to_string()
}

static IMG_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());
static A_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
static HEADING_HOST_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h2, h3, h4, p, div").unwrap());
static LABEL_HOST_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("p, li").unwrap());

fn collect_images(fragment: &Html) -> Vec<ImageRef> {
    fragment
        .select(&IMG_SEL)
        .filter_map(|img| {
            let src = img.value().attr("src")?.trim();
            if src.is_empty() {
                return None;
            }
            Some(ImageRef {
                src: src.to_string(),
                alt: img.value().attr("alt").unwrap_or("").trim().to_string(),
            })
        })
        .collect()
}

fn find_pdf_url(fragment: &Html) -> Option<String> {
    fragment.select(&A_SEL).find_map(|a| {
        let href = a.value().attr("href")?.trim();
        let path_part = href.split(['?', '#']).next().unwrap_or(href);
        if path_part.to_ascii_lowercase().ends_with(".pdf") {
            Some(href.to_string())
        } else {
            None
        }
    })
}

fn element_text(el: scraper::ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// `{field: heading_text}` → field value is the sibling text between the
/// matched heading and the next heading element.
fn extract_heading_sections(
    fragment: &Html,
    config: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if config.is_empty() {
        return out;
    }

    for (field, heading_text) in config {
        let Some(heading_el) = fragment.select(&HEADING_HOST_SEL).find(|el| {
            let text = element_text(*el);
            !text.is_empty() && (text == *heading_text || text.contains(heading_text.as_str()))
        }) else {
            continue;
        };

        let mut parts = Vec::new();
        for sibling in heading_el.next_siblings() {
            if let Some(el) = scraper::ElementRef::wrap(sibling) {
                if matches!(el.value().name(), "h2" | "h3" | "h4") {
                    break;
                }
                let text = element_text(el);
                if !text.is_empty() {
                    parts.push(text);
                }
            } else if let Some(text) = sibling.value().as_text() {
                let text = text.trim();
                if !text.is_empty() {
                    parts.push(text.to_string());
                }
            }
        }
        if !parts.is_empty() {
            out.insert(field.clone(), parts.join("\n"));
        }
    }
    out
}

/// `{field: label}` → value from `Label: value` / `Label：value` lines.
fn extract_label_sections(
    fragment: &Html,
    config: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if config.is_empty() {
        return out;
    }

    for el in fragment.select(&LABEL_HOST_SEL) {
        let text = element_text(el);
        for (field, label) in config {
            if out.contains_key(field) {
                continue;
            }
            for sep in [':', '：'] {
                if let Some(rest) = text.strip_prefix(&format!("{label}{sep}")) {
                    let value = rest.trim();
                    if !value.is_empty() {
                        out.insert(field.clone(), value.to_string());
                    }
                    break;
                }
            }
        }
    }
    out
}

/// Parse a detail page. A missing `content` selector match is non-fatal: the
/// item keeps empty content fields and the crawl proceeds.
pub fn parse_detail_html(
    html: &str,
    selectors: &DetailSelectors,
    page_url: &str,
) -> DetailResult {
    let mut result = DetailResult::default();
    let document = Html::parse_document(html);

    if !selectors.content.is_empty() {
        if let Ok(content_sel) = Selector::parse(&selectors.content) {
            if let Some(content_el) = document.select(&content_sel).next() {
                let sanitized = sanitize_html(&content_el.inner_html(), page_url);
                let plain = html_to_text(&sanitized);

                let sanitized_doc = Html::parse_fragment(&sanitized);
                result.images = collect_images(&sanitized_doc);
                result.pdf_url = find_pdf_url(&sanitized_doc);
                result
                    .sections
                    .extend(extract_heading_sections(&sanitized_doc, &selectors.heading_sections));
                result.sections.extend(extract_label_sections(
                    &sanitized_doc,
                    &selectors.label_prefix_sections,
                ));

                if !plain.is_empty() {
                    result.content_hash = Some(content_hash(&plain));
                }
                result.content = plain;
                result.content_html = sanitized;
            }
        }
    }

    if !selectors.author.is_empty() {
        if let Ok(author_sel) = Selector::parse(&selectors.author) {
            if let Some(author_el) = document.select(&author_sel).next() {
                let author = element_text(author_el);
                if !author.is_empty() {
                    result.author = Some(author);
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail_selectors(content: &str) -> DetailSelectors {
        DetailSelectors {
            content: content.into(),
            ..Default::default()
        }
    }

    #[test]
    fn sanitizer_strips_scripts_and_keeps_whitelist() {
        let clean = sanitize_html(
            r#"<p onclick="x()">text</p><script>alert(1)</script><iframe src="x"></iframe>"#,
            "https://site/a/",
        );
        assert!(clean.contains("<p>text</p>"));
        assert!(!clean.contains("script"));
        assert!(!clean.contains("iframe"));
        assert!(!clean.contains("onclick"));
    }

    #[test]
    fn relative_images_become_absolute() {
        let result = parse_detail_html(
            r#"<div id="c"><img src="./img/a.png" alt="figure"><p>body</p></div>"#,
            &detail_selectors("#c"),
            "https://site/news/2026/post.html",
        );
        assert_eq!(result.images.len(), 1);
        assert_eq!(result.images[0].src, "https://site/news/2026/img/a.png");
        assert_eq!(result.images[0].alt, "figure");
    }

    #[test]
    fn first_pdf_link_is_detected() {
        let result = parse_detail_html(
            r#"<div id="c"><a href="/files/doc.PDF">附件</a><a href="/files/other.pdf">二</a></div>"#,
            &detail_selectors("#c"),
            "https://site/x.html",
        );
        assert_eq!(result.pdf_url.as_deref(), Some("https://site/files/doc.PDF"));
    }

    #[test]
    fn content_hash_is_set_iff_content_nonempty() {
        let hit = parse_detail_html(
            r#"<div id="c"><p>正文内容</p></div>"#,
            &detail_selectors("#c"),
            "https://site/x.html",
        );
        assert!(hit.content_hash.is_some());
        assert_eq!(hit.content, "正文内容");

        let miss = parse_detail_html(
            r#"<div id="other">x</div>"#,
            &detail_selectors("#c"),
            "https://site/x.html",
        );
        assert!(miss.content_hash.is_none());
        assert!(miss.content.is_empty());
    }

    #[test]
    fn heading_sections_capture_until_next_heading() {
        let mut selectors = detail_selectors("#c");
        selectors
            .heading_sections
            .insert("research".into(), "研究方向".into());
        let result = parse_detail_html(
            r#"<div id="c">
                <h3>研究方向</h3><p>机器学习</p><p>计算机视觉</p>
                <h3>联系方式</h3><p>email</p>
            </div>"#,
            &selectors,
            "https://site/x.html",
        );
        assert_eq!(
            result.sections.get("research").map(String::as_str),
            Some("机器学习\n计算机视觉")
        );
    }

    #[test]
    fn label_prefix_sections_match_both_colon_forms() {
        let mut selectors = detail_selectors("#c");
        selectors
            .label_prefix_sections
            .insert("email".into(), "邮箱".into());
        selectors
            .label_prefix_sections
            .insert("phone".into(), "电话".into());
        let result = parse_detail_html(
            r#"<div id="c"><p>邮箱：someone@example.edu</p><li>电话: 010-1234</li></div>"#,
            &selectors,
            "https://site/x.html",
        );
        assert_eq!(
            result.sections.get("email").map(String::as_str),
            Some("someone@example.edu")
        );
        assert_eq!(result.sections.get("phone").map(String::as_str), Some("010-1234"));
    }

    #[test]
    fn author_extracted_from_full_document() {
        let mut selectors = detail_selectors("#c");
        selectors.author = ".byline".into();
        let result = parse_detail_html(
            r#"<div class="byline">记者 王强</div><div id="c"><p>正文</p></div>"#,
            &selectors,
            "https://site/x.html",
        );
        assert_eq!(result.author.as_deref(), Some("记者 王强"));
    }
}
