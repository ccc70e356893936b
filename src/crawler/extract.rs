//! Result extraction seam
//!
//! Turning a search page into asset hits is site specific and lives outside
//! this crate. The crawl task only needs to know whether extraction worked
//! and whether to use a site's fallback rules.

use serde::Serialize;

use crate::config::SiteConfig;
use crate::crawler::FetchedPage;
use crate::state::{CrawlingError, FailureKind};

/// One search result for a 3D asset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub site_id: String,
    pub title: String,
    pub url: String,
    pub snippet: Option<String>,
}

/// Extracts search hits from a fetched page
///
/// Return a `CrawlingError` with a structural kind (`SelectorNotFound`,
/// `ParseError`, `InvalidContent`) when the page cannot be read; the
/// recovery orchestrator will then ask for the fallback rules.
pub trait ResultExtractor: Send + Sync {
    fn extract(
        &self,
        site: &SiteConfig,
        page: &FetchedPage,
        use_fallback: bool,
    ) -> Result<Vec<SearchHit>, CrawlingError>;
}

/// Reports the fetched page itself as the single hit
///
/// Used by the CLI, which has no site rules. Only checks that the page is
/// non-empty text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageExtractor;

impl ResultExtractor for PageExtractor {
    fn extract(
        &self,
        site: &SiteConfig,
        page: &FetchedPage,
        _use_fallback: bool,
    ) -> Result<Vec<SearchHit>, CrawlingError> {
        let content_type = page.content_type.to_ascii_lowercase();
        if !content_type.is_empty()
            && !content_type.starts_with("text/")
            && !content_type.contains("json")
            && !content_type.contains("xml")
        {
            return Err(CrawlingError::new(
                FailureKind::InvalidContent,
                format!("unexpected content-type {}", page.content_type),
            ));
        }

        if page.body.trim().is_empty() {
            return Err(CrawlingError::new(
                FailureKind::SelectorNotFound,
                "empty search page",
            ));
        }

        Ok(vec![SearchHit {
            site_id: site.id.clone(),
            title: site.display_name().to_string(),
            url: page.final_url.clone(),
            snippet: None,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SiteConfig {
        SiteConfig {
            id: "cults3d".to_string(),
            name: Some("Cults".to_string()),
            search_url: "https://cults3d.com/en/search?q={query}".to_string(),
            rate_limit: None,
            enabled: true,
        }
    }

    fn page(content_type: &str, body: &str) -> FetchedPage {
        FetchedPage {
            final_url: "https://cults3d.com/en/search?q=vase".to_string(),
            status_code: 200,
            content_type: content_type.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_page_extractor() {
        let hits = PageExtractor
            .extract(&site(), &page("text/html; charset=utf-8", "<html></html>"), false)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Cults");
        assert_eq!(hits[0].url, "https://cults3d.com/en/search?q=vase");
    }

    #[test]
    fn test_page_extractor_failures() {
        let err = PageExtractor
            .extract(&site(), &page("text/html", "   "), false)
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::SelectorNotFound);

        let err = PageExtractor
            .extract(&site(), &page("image/png", "\u{89}PNG"), false)
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidContent);
    }
}
