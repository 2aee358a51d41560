//! Fetcher resolution: `parser_kind` wins over `fetch_strategy`.

use crate::catalog::{FetchStrategy, SourceDefinition};
use crate::crawler::parsers;
use crate::crawler::{
    dynamic::DynamicPageFetcher, faculty::FacultyFetcher, rss::RssFetcher,
    snapshot::SnapshotFetcher, static_html::StaticHtmlFetcher, Fetcher,
};
use crate::error::CrawlError;

/// Build the fetcher for a source definition.
pub fn build_fetcher(def: &SourceDefinition) -> Result<Box<dyn Fetcher>, CrawlError> {
    if let Some(kind) = &def.parser_kind {
        return parsers::build_api_parser(kind)
            .ok_or_else(|| CrawlError::UnknownFetcherKind(kind.clone()));
    }

    Ok(match def.fetch_strategy {
        FetchStrategy::Static => Box::new(StaticHtmlFetcher),
        FetchStrategy::Dynamic => Box::new(DynamicPageFetcher),
        FetchStrategy::Rss => Box::new(RssFetcher),
        FetchStrategy::Snapshot => Box::new(SnapshotFetcher),
        FetchStrategy::Faculty => Box::new(FacultyFetcher),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::tests::test_source;

    #[test]
    fn parser_kind_takes_precedence_over_strategy() {
        let mut def = test_source("s1");
        def.fetch_strategy = FetchStrategy::Rss;
        def.parser_kind = Some("arxiv_api".to_string());
        assert!(build_fetcher(&def).is_ok());
    }

    #[test]
    fn unknown_parser_kind_fails() {
        let mut def = test_source("s1");
        def.parser_kind = Some("definitely_not_registered".to_string());
        let result = build_fetcher(&def);
        assert!(matches!(result, Err(CrawlError::UnknownFetcherKind(_))));
    }

    #[test]
    fn all_builtin_strategies_resolve() {
        for strategy in [
            FetchStrategy::Static,
            FetchStrategy::Dynamic,
            FetchStrategy::Rss,
            FetchStrategy::Snapshot,
            FetchStrategy::Faculty,
        ] {
            let mut def = test_source("s1");
            def.fetch_strategy = strategy;
            assert!(build_fetcher(&def).is_ok());
        }
    }
}
