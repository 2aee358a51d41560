//! Faculty strategy: structured person-card rosters with optional
//! pagination. Renders via the browser when the source declares a
//! wait_condition, otherwise plain HTTP.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::catalog::{FacultySelectors, SourceDefinition};
use crate::crawler::{CrawlContext, CrawledItem, FetchOutcome, Fetcher};
use crate::error::CrawlError;
use crate::fetch::{fetch_page, FetchOptions};
use crate::urlnorm::resolve_link;

pub const DEFAULT_MAX_PAGES: usize = 5;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FacultyCard {
    pub name: String,
    pub position: Option<String>,
    pub bio: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
    pub research_areas: Vec<String>,
    pub profile_url: Option<String>,
}

fn select_text(el: ElementRef<'_>, css: &str) -> Option<String> {
    if css.is_empty() {
        return None;
    }
    let sel = Selector::parse(css).ok()?;
    let found = el.select(&sel).next()?;
    let text = found.text().collect::<String>().trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn select_attr(el: ElementRef<'_>, css: &str, attr: &str) -> Option<String> {
    if css.is_empty() {
        return None;
    }
    let sel = Selector::parse(css).ok()?;
    el.select(&sel)
        .next()
        .and_then(|e| e.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse all person cards on one roster page.
pub fn parse_faculty_cards(
    html: &str,
    selectors: &FacultySelectors,
    base_url: &str,
) -> Result<Vec<FacultyCard>, CrawlError> {
    let card_sel = Selector::parse(&selectors.card).map_err(|e| {
        CrawlError::Configuration(format!("invalid card selector '{}': {e}", selectors.card))
    })?;

    let document = Html::parse_document(html);
    let mut cards = Vec::new();
    for el in document.select(&card_sel) {
        let Some(name) = select_text(el, &selectors.name) else {
            continue;
        };
        let research_areas = select_text(el, &selectors.research_areas)
            .map(|t| {
                t.split(['、', ',', ';', '；'])
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        cards.push(FacultyCard {
            name,
            position: select_text(el, &selectors.position),
            bio: select_text(el, &selectors.bio),
            email: select_text(el, &selectors.email)
                .map(|e| e.trim_start_matches("mailto:").to_string()),
            photo_url: select_attr(el, &selectors.photo, "src")
                .and_then(|src| resolve_link(base_url, &src)),
            research_areas,
            profile_url: select_attr(el, "a", "href")
                .and_then(|href| resolve_link(base_url, &href)),
        });
    }
    Ok(cards)
}

fn page_url(def: &SourceDefinition, selectors: &FacultySelectors, page: usize) -> Option<String> {
    if page == 0 {
        return Some(def.url.clone());
    }
    if selectors.next_page.is_empty() {
        return None;
    }
    let relative = selectors.next_page.replace("{page}", &page.to_string());
    resolve_link(&def.effective_base_url(), &relative)
}

pub struct FacultyFetcher;

#[async_trait]
impl Fetcher for FacultyFetcher {
    async fn fetch_and_parse(
        &self,
        def: &SourceDefinition,
        ctx: &CrawlContext,
    ) -> Result<FetchOutcome, CrawlError> {
        let selectors = def.faculty_selectors.clone().ok_or_else(|| {
            CrawlError::Configuration(format!("source {} has no faculty_selectors", def.id))
        })?;
        let options = FetchOptions::from_source(def);
        let max_pages = def.max_pages.unwrap_or(DEFAULT_MAX_PAGES);
        let base_url = def.effective_base_url();

        let mut outcome = FetchOutcome::default();
        for page in 0..max_pages {
            let Some(url) = page_url(def, &selectors, page) else {
                break;
            };

            let html = if def.wait_condition.is_some() {
                ctx.browser
                    .render(&url, def.wait_condition.as_deref(), None)
                    .await?
            } else {
                fetch_page(&url, &options).await?
            };

            let cards = parse_faculty_cards(&html, &selectors, &base_url)?;
            if cards.is_empty() {
                if page == 0 {
                    return Err(CrawlError::SelectorMiss {
                        url,
                        selector: selectors.card.clone(),
                    });
                }
                // Ran past the last page.
                break;
            }
            debug!(source_id = %def.id, page, cards = cards.len(), "roster page parsed");

            for card in cards {
                // Profile URL keys the item when present; otherwise the name
                // anchored to the roster page keeps items distinct.
                let item_url = card
                    .profile_url
                    .clone()
                    .unwrap_or_else(|| format!("{}#person-{}", def.url, card.name));
                let mut item = CrawledItem::new(card.name.clone(), item_url, def);
                item.content = card.bio.clone();
                item.extra.insert(
                    "person".to_string(),
                    serde_json::to_value(&card).unwrap_or_default(),
                );
                outcome.items.push(item);
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selectors() -> FacultySelectors {
        FacultySelectors {
            card: "div.teacher".into(),
            name: ".name".into(),
            position: ".title".into(),
            bio: ".intro".into(),
            email: ".mail".into(),
            photo: "img".into(),
            research_areas: ".areas".into(),
            next_page: String::new(),
        }
    }

    #[test]
    fn cards_parse_with_structured_fields() {
        let html = r#"
            <div class="teacher">
                <img src="/photos/zhang.jpg">
                <span class="name">张伟</span>
                <span class="title">教授</span>
                <p class="intro">研究员简介</p>
                <span class="mail">mailto:zhang@uni.edu.cn</span>
                <span class="areas">机器学习、计算机视觉</span>
                <a href="/people/zhang.html">主页</a>
            </div>
        "#;
        let cards = parse_faculty_cards(html, &selectors(), "https://uni.edu.cn/").unwrap();
        assert_eq!(cards.len(), 1);
        let card = &cards[0];
        assert_eq!(card.name, "张伟");
        assert_eq!(card.position.as_deref(), Some("教授"));
        assert_eq!(card.email.as_deref(), Some("zhang@uni.edu.cn"));
        assert_eq!(card.photo_url.as_deref(), Some("https://uni.edu.cn/photos/zhang.jpg"));
        assert_eq!(card.research_areas, vec!["机器学习", "计算机视觉"]);
        assert_eq!(
            card.profile_url.as_deref(),
            Some("https://uni.edu.cn/people/zhang.html")
        );
    }

    #[test]
    fn cards_without_names_are_skipped() {
        let html = r#"<div class="teacher"><span class="title">教授</span></div>"#;
        let cards = parse_faculty_cards(html, &selectors(), "https://uni.edu.cn/").unwrap();
        assert!(cards.is_empty());
    }
}
