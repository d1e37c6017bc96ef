//! In-memory `PageDriver` for unit tests.
//!
//! Pages are static HTML documents keyed by URL. Selector queries run against
//! the current document with the `scraper` crate, so the same markup drives
//! waits, clicks and extraction.

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::page::{PageDriver, SessionCookie};
use crate::error::ScrapeError;

#[derive(Default)]
struct FakeState {
    routes: HashMap<String, String>,
    /// Remaining failures per URL; `u32::MAX` fails forever
    failures: HashMap<String, u32>,
    redirects: HashMap<String, String>,
    /// Loading one of these drops the connection for good
    disconnects: Vec<String>,
    disconnected: bool,
    click_targets: HashMap<String, String>,
    heights: VecDeque<u64>,
    scroll_fails_after: Option<u32>,
    current_url: String,
    current_html: String,
    navigations: Vec<String>,
    typed: HashMap<String, String>,
    scrolls: u32,
    cookies: Vec<SessionCookie>,
    screenshots: Vec<PathBuf>,
    closed: bool,
}

/// Scripted page used in place of a browser.
///
/// Clones share state, so a test can keep a handle after giving the page
/// away.
#[derive(Clone, Default)]
pub struct FakePage {
    state: Arc<Mutex<FakeState>>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Serve `html` at `url`
    pub fn route(self, url: &str, html: &str) -> Self {
        self.lock().routes.insert(url.to_string(), html.to_string());
        self
    }

    /// Fail the next `times` navigations to `url`
    pub fn fail_times(self, url: &str, times: u32) -> Self {
        self.lock().failures.insert(url.to_string(), times);
        self
    }

    pub fn fail_always(self, url: &str) -> Self {
        self.fail_times(url, u32::MAX)
    }

    /// Navigating to `from` ends up at `to`
    pub fn redirect(self, from: &str, to: &str) -> Self {
        self.lock().redirects.insert(from.to_string(), to.to_string());
        self
    }

    /// Navigating to `url` kills the page, as if the browser crashed
    pub fn disconnect_on(self, url: &str) -> Self {
        self.lock().disconnects.push(url.to_string());
        self
    }

    /// Clicking an element matching `selector` loads `url`
    pub fn click_target(self, selector: &str, url: &str) -> Self {
        self.lock()
            .click_targets
            .insert(selector.to_string(), url.to_string());
        self
    }

    /// Successive scroll height readings; the last one repeats
    pub fn heights(self, heights: &[u64]) -> Self {
        self.lock().heights = heights.iter().copied().collect();
        self
    }

    /// Scrolls beyond the first `n` fail
    pub fn scroll_fails_after(self, n: u32) -> Self {
        self.lock().scroll_fails_after = Some(n);
        self
    }

    pub fn with_cookies(self, cookies: Vec<SessionCookie>) -> Self {
        self.lock().cookies = cookies;
        self
    }

    pub fn navigations(&self) -> Vec<String> {
        self.lock().navigations.clone()
    }

    pub fn navigations_to(&self, url: &str) -> usize {
        self.lock().navigations.iter().filter(|u| *u == url).count()
    }

    pub fn typed(&self, selector: &str) -> String {
        self.lock().typed.get(selector).cloned().unwrap_or_default()
    }

    pub fn scrolls(&self) -> u32 {
        self.lock().scrolls
    }

    pub fn stored_cookies(&self) -> Vec<SessionCookie> {
        self.lock().cookies.clone()
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.lock().screenshots.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn load(&self, url: &str) -> Result<(), ScrapeError> {
        let mut state = self.lock();
        state.navigations.push(url.to_string());

        if state.disconnects.iter().any(|u| u == url) {
            state.disconnected = true;
        }
        if state.disconnected {
            return Err(lost());
        }

        if let Some(remaining) = state.failures.get_mut(url) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(ScrapeError::Network(format!("timed out loading {}", url)));
            }
        }

        let target = state
            .redirects
            .get(url)
            .cloned()
            .unwrap_or_else(|| url.to_string());
        let html = state
            .routes
            .get(&target)
            .cloned()
            .ok_or_else(|| ScrapeError::Network(format!("unreachable: {}", target)))?;

        state.current_url = target;
        state.current_html = html;
        Ok(())
    }

    fn check_alive(&self) -> Result<(), ScrapeError> {
        if self.lock().disconnected {
            return Err(lost());
        }
        Ok(())
    }

    fn with_matches<T>(
        &self,
        selector: &str,
        f: impl FnOnce(Vec<scraper::ElementRef<'_>>) -> T,
    ) -> Result<T, ScrapeError> {
        let selector = Selector::parse(selector)
            .map_err(|e| ScrapeError::Config(format!("bad selector: {:?}", e)))?;
        let html = self.lock().current_html.clone();
        let document = Html::parse_document(&html);
        let matches = document.select(&selector).collect();
        Ok(f(matches))
    }
}

fn lost() -> ScrapeError {
    ScrapeError::SessionLost("browser connection closed".into())
}

#[async_trait]
impl PageDriver for FakePage {
    async fn navigate(&self, url: &str) -> Result<(), ScrapeError> {
        self.load(url)
    }

    async fn current_url(&self) -> Result<String, ScrapeError> {
        Ok(self.lock().current_url.clone())
    }

    async fn content(&self) -> Result<String, ScrapeError> {
        self.check_alive()?;
        Ok(self.lock().current_html.clone())
    }

    async fn count_elements(&self, selector: &str) -> Result<usize, ScrapeError> {
        self.with_matches(selector, |m| m.len())
    }

    async fn read_text(&self, selector: &str) -> Result<Option<String>, ScrapeError> {
        self.with_matches(selector, |m| {
            m.first()
                .map(|el| el.text().collect::<String>().trim().to_string())
        })
    }

    async fn clear(&self, selector: &str) -> Result<(), ScrapeError> {
        self.lock().typed.insert(selector.to_string(), String::new());
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), ScrapeError> {
        if self.with_matches(selector, |m| m.is_empty())? {
            return Err(ScrapeError::Browser(format!("no element for {}", selector)));
        }
        self.lock()
            .typed
            .entry(selector.to_string())
            .or_default()
            .push_str(text);
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<bool, ScrapeError> {
        if self.with_matches(selector, |m| m.is_empty())? {
            return Ok(false);
        }
        let target = self.lock().click_targets.get(selector).cloned();
        if let Some(url) = target {
            self.load(&url)?;
        }
        Ok(true)
    }

    async fn scroll_by(&self, _container: Option<&str>, _pixels: u32) -> Result<(), ScrapeError> {
        let mut state = self.lock();
        if let Some(limit) = state.scroll_fails_after {
            if state.scrolls >= limit {
                return Err(ScrapeError::Browser("scroll script failed".into()));
            }
        }
        state.scrolls += 1;
        Ok(())
    }

    async fn scroll_height(&self, _container: Option<&str>) -> Result<u64, ScrapeError> {
        let mut state = self.lock();
        let height = if state.heights.len() > 1 {
            state.heights.pop_front()
        } else {
            state.heights.front().copied()
        };
        Ok(height.unwrap_or(1000))
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, ScrapeError> {
        Ok(self.lock().cookies.clone())
    }

    async fn set_cookies(&self, cookies: &[SessionCookie]) -> Result<(), ScrapeError> {
        self.lock().cookies = cookies.to_vec();
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), ScrapeError> {
        self.check_alive()?;
        self.lock().screenshots.push(path.to_path_buf());
        Ok(())
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        self.lock().closed = true;
        Ok(())
    }
}
