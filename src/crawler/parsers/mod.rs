//! Bespoke API parsers, selected by `parser_kind` in the source definition.
//!
//! Each parser is self-contained: it issues its own API calls and maps the
//! responses into `CrawledItem`s. The table here is the registry's lookup
//! target; adding a parser means adding one arm.

pub mod arxiv;
pub mod github;
pub mod hacker_news;
pub mod twitter;

use crate::crawler::Fetcher;

/// Constructor table for API parsers. Returns `None` for unknown kinds so
/// the registry can surface `UnknownFetcherKind` with the offending name.
pub fn build_api_parser(kind: &str) -> Option<Box<dyn Fetcher>> {
    match kind {
        "arxiv_api" => Some(Box::new(arxiv::ArxivFetcher)),
        "github_api" => Some(Box::new(github::GithubTrendingFetcher)),
        "hacker_news_api" => Some(Box::new(hacker_news::HackerNewsFetcher)),
        "twitter_search" => Some(Box::new(twitter::TwitterSearchFetcher)),
        "twitter_kol" => Some(Box::new(twitter::TwitterKolFetcher)),
        _ => None,
    }
}

pub fn known_parsers() -> Vec<&'static str> {
    vec![
        "arxiv_api",
        "github_api",
        "hacker_news_api",
        "twitter_search",
        "twitter_kol",
    ]
}
