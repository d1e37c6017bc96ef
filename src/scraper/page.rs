//! Capability interface over a live page.
//!
//! The controller, session, scroll and extraction logic only talk to this
//! trait. `browser::ChromePage` drives a real Chrome tab; tests use an
//! in-memory page.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::ScrapeError;

/// Polling interval for explicit waits
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A page condition described as data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Current URL contains the substring
    UrlContains(String),
    /// Path of the current URL contains the substring; the query is ignored
    PathContains(String),
    /// At least one element matches the selector
    Selector(String),
    /// Rendered markup contains the substring (case-insensitive)
    TextContains(String),
}

/// Browser cookie as persisted between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    /// Seconds since the epoch; `None` for session cookies
    #[serde(default)]
    pub expires: Option<f64>,
}

/// Path part of `url`, or everything before the query if it does not parse
fn url_path(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    }
}

/// Operations the scraper needs from a live page.
///
/// Methods take `&self` so a driver can be borrowed by retried closures;
/// implementations use interior mutability where they need it.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Load `url`, failing with `Network` if it does not load in time
    async fn navigate(&self, url: &str) -> Result<(), ScrapeError>;

    async fn current_url(&self) -> Result<String, ScrapeError>;

    /// Full rendered markup of the page
    async fn content(&self) -> Result<String, ScrapeError>;

    async fn count_elements(&self, selector: &str) -> Result<usize, ScrapeError>;

    /// Inner text of the first match, `None` if nothing matches
    async fn read_text(&self, selector: &str) -> Result<Option<String>, ScrapeError>;

    /// Clear an input field
    async fn clear(&self, selector: &str) -> Result<(), ScrapeError>;

    /// Append text to an input field
    async fn type_text(&self, selector: &str, text: &str) -> Result<(), ScrapeError>;

    /// Click the first match; `Ok(false)` if nothing matches
    async fn click(&self, selector: &str) -> Result<bool, ScrapeError>;

    /// Scroll the container (or the window) down by `pixels`
    async fn scroll_by(&self, container: Option<&str>, pixels: u32) -> Result<(), ScrapeError>;

    /// Scroll height of the container (or the document)
    async fn scroll_height(&self, container: Option<&str>) -> Result<u64, ScrapeError>;

    async fn cookies(&self) -> Result<Vec<SessionCookie>, ScrapeError>;

    async fn set_cookies(&self, cookies: &[SessionCookie]) -> Result<(), ScrapeError>;

    async fn screenshot(&self, path: &Path) -> Result<(), ScrapeError>;

    /// Release the page and its browser
    async fn close(&self) -> Result<(), ScrapeError>;

    /// Whether a single probe currently holds
    async fn probe(&self, probe: &Probe) -> Result<bool, ScrapeError> {
        match probe {
            Probe::UrlContains(needle) => Ok(self.current_url().await?.contains(needle.as_str())),
            Probe::PathContains(needle) => {
                Ok(url_path(&self.current_url().await?).contains(needle.as_str()))
            }
            Probe::Selector(selector) => Ok(self.count_elements(selector).await? > 0),
            Probe::TextContains(needle) => Ok(self
                .content()
                .await?
                .to_lowercase()
                .contains(&needle.to_lowercase())),
        }
    }

    /// Poll until one of the probe groups matches or `timeout` elapses.
    ///
    /// Groups are checked in order on every poll, so earlier groups win ties.
    /// Returns the index of the matching group, or `None` on timeout. Probe
    /// errors count as "not yet".
    async fn wait_for_any(
        &self,
        groups: &[Vec<Probe>],
        timeout: Duration,
    ) -> Result<Option<usize>, ScrapeError> {
        let start = Instant::now();
        loop {
            for (index, group) in groups.iter().enumerate() {
                for probe in group {
                    if let Ok(true) = self.probe(probe).await {
                        return Ok(Some(index));
                    }
                }
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL.min(timeout)).await;
        }
    }
}
