//! Dynamic strategy: headless-browser render for JS-built list pages.
//!
//! Details are fetched inside the same page session so cookies set during
//! the list render carry over; `detail_via_plain_http` switches detail
//! fetches to the HTTP client for sites where rendering is only needed for
//! the listing.

use async_trait::async_trait;
use scraper::Html;
use tracing::warn;

use crate::catalog::SourceDefinition;
use crate::crawler::static_html::apply_detail;
use crate::crawler::{CrawlContext, CrawledItem, FetchOutcome, Fetcher};
use crate::error::CrawlError;
use crate::extract::{parse_list_items, RawListItem};
use crate::fetch::{fetch_page, FetchOptions};

pub struct DynamicPageFetcher;

fn extract_list(html: &str, def: &SourceDefinition) -> Result<Vec<RawListItem>, CrawlError> {
    let document = Html::parse_document(html);
    let items = parse_list_items(
        &document,
        &def.list_selectors,
        &def.effective_base_url(),
        def.effective_keywords(),
        &def.keyword_blacklist,
    )?;
    if items.is_empty() {
        return Err(CrawlError::SelectorMiss {
            url: def.url.clone(),
            selector: def.list_selectors.list_item.clone(),
        });
    }
    Ok(items)
}

#[async_trait]
impl Fetcher for DynamicPageFetcher {
    async fn fetch_and_parse(
        &self,
        def: &SourceDefinition,
        ctx: &CrawlContext,
    ) -> Result<FetchOutcome, CrawlError> {
        let wait = def.wait_condition.as_deref();
        let fetch_details = def
            .detail_selectors
            .as_ref()
            .map(|d| !d.content.is_empty() || !d.author.is_empty())
            .unwrap_or(false);

        let mut outcome = FetchOutcome::default();

        if !fetch_details {
            let html = ctx.browser.render(&def.url, wait, None).await?;
            outcome.items = extract_list(&html, def)?
                .into_iter()
                .map(|raw| {
                    CrawledItem::new(raw.title, raw.url, def)
                        .with_published_date(raw.published_at)
                })
                .collect();
            return Ok(outcome);
        }

        if def.detail_via_plain_http {
            // Render only the listing; details go over HTTP.
            let html = ctx.browser.render(&def.url, wait, None).await?;
            let raw_items = extract_list(&html, def)?;
            let options = FetchOptions::from_source(def);
            for raw in raw_items {
                let mut item = CrawledItem::new(raw.title, raw.url.clone(), def)
                    .with_published_date(raw.published_at);
                match fetch_page(&raw.url, &options).await {
                    Ok(detail_html) => apply_detail(&mut item, &detail_html, def),
                    Err(e) => {
                        warn!(url = %raw.url, error = %e, "plain-http detail fetch failed");
                        outcome.item_errors.push(format!("{}: {e}", raw.url));
                    }
                }
                outcome.items.push(item);
            }
            return Ok(outcome);
        }

        // Shared-session path: list render and detail navigations reuse one
        // page. Serialized by nature: one page, one navigation at a time.
        let session = ctx.browser.open(&def.url, wait, None).await?;
        let result = async {
            let html = session.content().await?;
            let raw_items = extract_list(&html, def)?;

            let mut items = Vec::with_capacity(raw_items.len());
            let mut errors = Vec::new();
            for raw in raw_items {
                let mut item = CrawledItem::new(raw.title, raw.url.clone(), def)
                    .with_published_date(raw.published_at);
                match session.goto_content(&raw.url).await {
                    Ok(detail_html) => apply_detail(&mut item, &detail_html, def),
                    Err(e) => {
                        warn!(url = %raw.url, error = %e, "rendered detail fetch failed");
                        errors.push(format!("{}: {e}", raw.url));
                    }
                }
                items.push(item);
            }
            Ok(FetchOutcome {
                items,
                item_errors: errors,
            })
        }
        .await;

        // Release the context permit on success and failure alike.
        session.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::tests::test_source;

    #[test]
    fn list_extraction_matches_static_semantics() {
        let mut def = test_source("s1");
        def.list_selectors.list_item = "div.item".into();
        let html = r#"<div class="item"><a href="/x/1.html">加载后的条目</a></div>"#;
        let items = extract_list(html, &def).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://example.com/x/1.html");
    }
}
