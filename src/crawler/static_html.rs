//! Static strategy: plain HTTP for the list page and, when detail selectors
//! are configured, one HTTP fetch per listed item.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use scraper::Html;
use tracing::warn;

use crate::catalog::SourceDefinition;
use crate::crawler::{CrawlContext, CrawledItem, FetchOutcome, Fetcher};
use crate::error::CrawlError;
use crate::extract::{parse_detail_html, parse_list_items, RawListItem};
use crate::fetch::{fetch_page, FetchOptions};

/// Detail fetches run concurrently; the per-domain gate in the HTTP client is
/// the real limiter, this only bounds future fan-out.
const DETAIL_FANOUT: usize = 4;

pub struct StaticHtmlFetcher;

/// Parse the list page. Scoped so the non-`Send` DOM is dropped before any
/// await point.
fn extract_list(
    html: &str,
    def: &SourceDefinition,
) -> Result<Vec<RawListItem>, CrawlError> {
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

/// Fill detail fields on an item; detail failures degrade to empty content.
pub(crate) fn apply_detail(item: &mut CrawledItem, detail_html: &str, def: &SourceDefinition) {
    let Some(selectors) = &def.detail_selectors else {
        return;
    };
    let detail = parse_detail_html(detail_html, selectors, &item.url);
    if !detail.content.is_empty() {
        item.content = Some(detail.content);
        item.content_html = Some(detail.content_html);
        item.content_hash = detail.content_hash;
    }
    if detail.author.is_some() {
        item.author = detail.author;
    }
    if !detail.images.is_empty() {
        item.extra.insert(
            "images".to_string(),
            serde_json::to_value(&detail.images).unwrap_or_default(),
        );
    }
    if let Some(pdf) = detail.pdf_url {
        item.extra.insert("pdf_url".to_string(), pdf.into());
    }
    for (field, value) in detail.sections {
        item.extra.insert(field, value.into());
    }
}

#[async_trait]
impl Fetcher for StaticHtmlFetcher {
    async fn fetch_and_parse(
        &self,
        def: &SourceDefinition,
        _ctx: &CrawlContext,
    ) -> Result<FetchOutcome, CrawlError> {
        let options = FetchOptions::from_source(def);
        let html = fetch_page(&def.url, &options).await?;
        let raw_items = extract_list(&html, def)?;

        let fetch_details = def
            .detail_selectors
            .as_ref()
            .map(|d| !d.content.is_empty() || !d.author.is_empty())
            .unwrap_or(false);

        let mut outcome = FetchOutcome::default();

        if !fetch_details {
            outcome.items = raw_items
                .into_iter()
                .map(|raw| {
                    CrawledItem::new(raw.title, raw.url, def)
                        .with_published_date(raw.published_at)
                })
                .collect();
            return Ok(outcome);
        }

        // List order is preserved; `buffered` keeps completion in order.
        let results: Vec<(CrawledItem, Option<String>)> = stream::iter(raw_items)
            .map(|raw| {
                let options = options.clone();
                async move {
                    let mut item = CrawledItem::new(raw.title, raw.url.clone(), def)
                        .with_published_date(raw.published_at);
                    match fetch_page(&raw.url, &options).await {
                        Ok(detail_html) => {
                            apply_detail(&mut item, &detail_html, def);
                            (item, None)
                        }
                        Err(e) => {
                            warn!(url = %raw.url, error = %e, "detail fetch failed, keeping bare item");
                            (item, Some(format!("{}: {e}", raw.url)))
                        }
                    }
                }
            })
            .buffered(DETAIL_FANOUT)
            .collect()
            .await;

        for (item, error) in results {
            outcome.items.push(item);
            if let Some(e) = error {
                outcome.item_errors.push(e);
            }
        }
        Ok(outcome)
    }
}
