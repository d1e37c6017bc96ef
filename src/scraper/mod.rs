//! Job search scraper
//!
//! Provides the page capability, browser automation, session handling,
//! scrolling, listing extraction and the pagination loop.

pub mod browser;
pub mod cookie_store;
pub mod pacing;
pub mod page;
pub mod pagination;
pub mod parsers;
pub mod scroll;
pub mod session;

#[cfg(test)]
pub mod testing;

pub use browser::ChromePage;
pub use pagination::{JobScraper, NoopSink, PageSink};

use url::Url;

use crate::config::{ScrapingConfig, SiteConfig};
use crate::error::ScrapeError;

/// Query parameter carrying the listing offset
const START_PARAM: &str = "start";

/// Search URL for a run: the configured URL, or one built from the query
pub fn search_url(scraping: &ScrapingConfig, site: &SiteConfig) -> Result<String, ScrapeError> {
    let explicit = scraping.search_url.trim();
    if !explicit.is_empty() {
        Url::parse(explicit)
            .map_err(|e| ScrapeError::Config(format!("invalid search_url '{}': {}", explicit, e)))?;
        return Ok(explicit.to_string());
    }

    let url = Url::parse_with_params(
        &site.search_base_url,
        &[("keywords", scraping.search_query.trim())],
    )
    .map_err(|e| {
        ScrapeError::Config(format!(
            "invalid search_base_url '{}': {}",
            site.search_base_url, e
        ))
    })?;
    Ok(url.to_string())
}

/// URL of result page `page`, replacing any existing offset
pub fn page_url(search_url: &str, page: u32, results_per_page: u32) -> Result<String, ScrapeError> {
    let mut url = Url::parse(search_url)
        .map_err(|e| ScrapeError::Config(format!("invalid search URL '{}': {}", search_url, e)))?;

    let has_start = url.query_pairs().any(|(k, _)| k == START_PARAM);
    if page <= 1 && !has_start {
        return Ok(search_url.to_string());
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != START_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.extend_pairs(pairs);
        if page > 1 {
            let offset = (page - 1) as u64 * results_per_page as u64;
            query.append_pair(START_PARAM, &offset.to_string());
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url.to_string())
}
