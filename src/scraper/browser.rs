//! Browser automation using chromiumoxide.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser as ChromeBrowser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::debug;

use super::page::{PageDriver, SessionCookie, WAIT_POLL_INTERVAL};
use crate::config::{BrowserSettings, Timeouts};
use crate::error::ScrapeError;

/// A single Chrome tab driven over CDP
pub struct ChromePage {
    browser: Mutex<Option<ChromeBrowser>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    page: Page,
    timeouts: Timeouts,
}

impl ChromePage {
    /// Launch a browser and open a blank tab
    pub async fn launch(
        settings: &BrowserSettings,
        timeouts: Timeouts,
    ) -> Result<Self, ScrapeError> {
        // Find Chrome executable
        let chrome_path = settings.chrome_executable.clone().unwrap_or_else(|| {
            if cfg!(target_os = "macos") {
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"
            } else if cfg!(target_os = "windows") {
                "C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe"
            } else {
                "google-chrome"
            }
            .to_string()
        });

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--mute-audio")
            .window_size(settings.window_width, settings.window_height)
            .request_timeout(timeouts.page_load);
        builder = if settings.headless {
            builder.new_headless_mode()
        } else {
            builder.with_head()
        };
        if let Some(agent) = &settings.user_agent {
            builder = builder.arg(format!("--user-agent={}", agent));
        }
        let config = builder
            .build()
            .map_err(|e| ScrapeError::Browser(format!("Failed to build browser config: {}", e)))?;

        let (browser, mut handler) = ChromeBrowser::launch(config)
            .await
            .map_err(|e| ScrapeError::Browser(format!("Failed to launch browser: {}", e)))?;

        // Spawn handler task - must keep running for browser to work
        let handle = tokio::spawn(async move {
            loop {
                match handler.next().await {
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => continue, // Don't break on errors
                    None => break,
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScrapeError::Browser(format!("Failed to create new page: {}", e)))?;

        debug!(headless = settings.headless, "Browser launched");

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handle: Mutex::new(Some(handle)),
            page,
            timeouts,
        })
    }

    /// Fail with `SessionLost` once the CDP handler task has stopped
    async fn ensure_alive(&self) -> Result<(), ScrapeError> {
        let alive = self
            .handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished());
        if alive {
            Ok(())
        } else {
            Err(ScrapeError::SessionLost("browser connection closed".to_string()))
        }
    }

    /// Run a script and decode its result, bounded by the script timeout
    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, ScrapeError> {
        let result = bounded(self.timeouts.script, "script", self.page.evaluate(script))
            .await?
            .map_err(|e| cdp_error(e, |m| ScrapeError::Browser(format!("script failed: {}", m))))?;
        result
            .into_value::<T>()
            .map_err(|e| ScrapeError::Browser(format!("unexpected script result: {}", e)))
    }

    /// First match, or `None` right away
    async fn find(&self, selector: &str) -> Result<Option<Element>, ScrapeError> {
        let mut elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|e| ScrapeError::Browser(format!("lookup of '{}' failed: {}", selector, e)))?;
        Ok(if elements.is_empty() {
            None
        } else {
            Some(elements.remove(0))
        })
    }

    /// First match, polling up to the implicit wait
    async fn find_required(&self, selector: &str) -> Result<Element, ScrapeError> {
        let start = Instant::now();
        loop {
            if let Some(element) = self.find(selector).await? {
                return Ok(element);
            }
            if start.elapsed() >= self.timeouts.implicit_wait {
                return Err(ScrapeError::Network(format!(
                    "element '{}' not found within {:?}",
                    selector, self.timeouts.implicit_wait
                )));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = T>,
) -> Result<T, ScrapeError> {
    timeout(limit, fut)
        .await
        .map_err(|_| ScrapeError::Network(format!("{} timed out after {:?}", what, limit)))
}

/// Map a CDP failure; a dropped connection to the browser ends the session
fn cdp_error(err: CdpError, other: impl FnOnce(String) -> ScrapeError) -> ScrapeError {
    match err {
        CdpError::ChannelSendError(_) | CdpError::NoResponse | CdpError::Ws(_) => {
            ScrapeError::SessionLost(format!("browser connection lost: {}", err))
        }
        err => other(err.to_string()),
    }
}

/// JS expression for the scroll target
fn scroll_target(container: Option<&str>) -> String {
    let selector = container
        .map(|s| serde_json::Value::String(s.to_string()).to_string())
        .unwrap_or_else(|| "null".to_string());
    format!(
        "(() => {{ const sel = {}; const el = sel ? document.querySelector(sel) : null; \
         return el || document.scrollingElement || document.body; }})()",
        selector
    )
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn navigate(&self, url: &str) -> Result<(), ScrapeError> {
        self.ensure_alive().await?;
        bounded(self.timeouts.page_load, "page load", self.page.goto(url))
            .await?
            .map_err(|e| {
                cdp_error(e, |m| {
                    ScrapeError::Network(format!("failed to load {}: {}", url, m))
                })
            })?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, ScrapeError> {
        self.page
            .url()
            .await
            .map(|u| u.unwrap_or_default())
            .map_err(|e| {
                cdp_error(e, |m| {
                    ScrapeError::Browser(format!("could not read URL: {}", m))
                })
            })
    }

    async fn content(&self) -> Result<String, ScrapeError> {
        self.ensure_alive().await?;
        bounded(self.timeouts.script, "content", self.page.content())
            .await?
            .map_err(|e| {
                cdp_error(e, |m| {
                    ScrapeError::Network(format!("Failed to get page content: {}", m))
                })
            })
    }

    async fn count_elements(&self, selector: &str) -> Result<usize, ScrapeError> {
        let selector = serde_json::Value::String(selector.to_string()).to_string();
        self.eval(format!("document.querySelectorAll({}).length", selector))
            .await
    }

    async fn read_text(&self, selector: &str) -> Result<Option<String>, ScrapeError> {
        let Some(element) = self.find(selector).await? else {
            return Ok(None);
        };
        element
            .inner_text()
            .await
            .map_err(|e| ScrapeError::Browser(format!("text of '{}': {}", selector, e)))
    }

    async fn clear(&self, selector: &str) -> Result<(), ScrapeError> {
        self.find_required(selector).await?;
        let selector = serde_json::Value::String(selector.to_string()).to_string();
        self.eval::<bool>(format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; \
             el.value = ''; return true; }})()",
            selector
        ))
        .await?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), ScrapeError> {
        let element = self.find_required(selector).await?;
        element
            .focus()
            .await
            .map_err(|e| ScrapeError::Browser(format!("focus '{}': {}", selector, e)))?;
        element
            .type_str(text)
            .await
            .map_err(|e| ScrapeError::Browser(format!("typing into '{}': {}", selector, e)))?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<bool, ScrapeError> {
        let Some(element) = self.find(selector).await? else {
            return Ok(false);
        };
        element
            .click()
            .await
            .map_err(|e| ScrapeError::Network(format!("click on '{}' failed: {}", selector, e)))?;
        Ok(true)
    }

    async fn scroll_by(&self, container: Option<&str>, pixels: u32) -> Result<(), ScrapeError> {
        self.eval::<bool>(format!(
            "(() => {{ {}.scrollBy(0, {}); return true; }})()",
            scroll_target(container),
            pixels
        ))
        .await?;
        Ok(())
    }

    async fn scroll_height(&self, container: Option<&str>) -> Result<u64, ScrapeError> {
        self.eval(format!("{}.scrollHeight", scroll_target(container)))
            .await
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, ScrapeError> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| ScrapeError::Browser(format!("reading cookies: {}", e)))?;
        Ok(cookies
            .into_iter()
            .map(|c| SessionCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
                expires: (c.expires > 0.0).then_some(c.expires),
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[SessionCookie]) -> Result<(), ScrapeError> {
        let params = cookies
            .iter()
            .map(|c| {
                let mut builder = CookieParam::builder()
                    .name(c.name.clone())
                    .value(c.value.clone())
                    .domain(c.domain.clone())
                    .path(c.path.clone())
                    .secure(c.secure)
                    .http_only(c.http_only);
                if let Some(expires) = c.expires {
                    builder = builder.expires(TimeSinceEpoch::new(expires));
                }
                builder
                    .build()
                    .map_err(|e| ScrapeError::Browser(format!("cookie '{}': {}", c.name, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.page
            .set_cookies(params)
            .await
            .map_err(|e| ScrapeError::Browser(format!("installing cookies: {}", e)))?;
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), ScrapeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .map_err(|e| ScrapeError::Browser(format!("screenshot failed: {}", e)))?;
        Ok(())
    }

    /// Close the browser
    async fn close(&self) -> Result<(), ScrapeError> {
        if let Some(mut browser) = self.browser.lock().await.take() {
            let _ = browser.close().await;
            let _ = browser.wait().await;
        }
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}
