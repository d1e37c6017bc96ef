//! Configuration for jobscrape.
//!
//! Layered the usual way: built-in defaults, then an optional TOML file, then
//! `JOBSCRAPE__SECTION__KEY` environment variables, then CLI overrides.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ScrapeError;
use crate::scraper::page::Probe;
use crate::scraper::parsers::ExtractionRules;

/// String whose value never shows up in logs or debug output
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<empty>)")
        } else {
            f.write_str("Secret(***)")
        }
    }
}

/// Scrape parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Secret,
    #[serde(default = "default_search_query")]
    pub search_query: String,
    /// Full search URL; when empty one is built from `search_query`
    #[serde(default)]
    pub search_url: String,
    #[serde(default = "default_total_pages")]
    pub total_pages: u32,
    #[serde(default = "default_scroll_count")]
    pub scroll_count: u32,
    #[serde(default = "default_scroll_step")]
    pub scroll_step: u32,
    // Timeouts, in seconds
    #[serde(default = "default_page_load_timeout")]
    pub page_load_timeout: u64,
    #[serde(default = "default_script_timeout")]
    pub script_timeout: u64,
    #[serde(default = "default_implicit_wait")]
    pub implicit_wait: u64,
    #[serde(default = "default_element_wait_timeout")]
    pub element_wait_timeout: u64,
    // Retry
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: f64,
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay: u64,
    // Pacing, in milliseconds
    #[serde(default = "default_scroll_pause_ms")]
    pub scroll_pause_ms: u64,
    #[serde(default = "default_keystroke_delay_min_ms")]
    pub keystroke_delay_min_ms: u64,
    #[serde(default = "default_keystroke_delay_max_ms")]
    pub keystroke_delay_max_ms: u64,
    #[serde(default = "default_page_delay_min_ms")]
    pub page_delay_min_ms: u64,
    #[serde(default = "default_page_delay_max_ms")]
    pub page_delay_max_ms: u64,
    /// Listing offset step for URL-based pagination
    #[serde(default = "default_results_per_page")]
    pub results_per_page: u32,
    /// Consecutive pages without new records that end the run
    #[serde(default = "default_max_empty_pages")]
    pub max_empty_pages: u32,
}

fn default_search_query() -> String {
    "Senior Data Scientist".to_string()
}

fn default_total_pages() -> u32 {
    100
}

fn default_scroll_count() -> u32 {
    10
}

fn default_scroll_step() -> u32 {
    500
}

fn default_page_load_timeout() -> u64 {
    60
}

fn default_script_timeout() -> u64 {
    30
}

fn default_implicit_wait() -> u64 {
    10
}

fn default_element_wait_timeout() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

fn default_retry_backoff() -> f64 {
    2.0
}

fn default_retry_max_delay() -> u64 {
    60
}

fn default_scroll_pause_ms() -> u64 {
    2000
}

fn default_keystroke_delay_min_ms() -> u64 {
    50
}

fn default_keystroke_delay_max_ms() -> u64 {
    180
}

fn default_page_delay_min_ms() -> u64 {
    3000
}

fn default_page_delay_max_ms() -> u64 {
    8000
}

fn default_results_per_page() -> u32 {
    25
}

fn default_max_empty_pages() -> u32 {
    2
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: Secret::default(),
            search_query: default_search_query(),
            search_url: String::new(),
            total_pages: default_total_pages(),
            scroll_count: default_scroll_count(),
            scroll_step: default_scroll_step(),
            page_load_timeout: default_page_load_timeout(),
            script_timeout: default_script_timeout(),
            implicit_wait: default_implicit_wait(),
            element_wait_timeout: default_element_wait_timeout(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            retry_backoff: default_retry_backoff(),
            retry_max_delay: default_retry_max_delay(),
            scroll_pause_ms: default_scroll_pause_ms(),
            keystroke_delay_min_ms: default_keystroke_delay_min_ms(),
            keystroke_delay_max_ms: default_keystroke_delay_max_ms(),
            page_delay_min_ms: default_page_delay_min_ms(),
            page_delay_max_ms: default_page_delay_max_ms(),
            results_per_page: default_results_per_page(),
            max_empty_pages: default_max_empty_pages(),
        }
    }
}

/// Per-operation timeouts handed to the page driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub page_load: Duration,
    pub script: Duration,
    pub implicit_wait: Duration,
    pub element_wait: Duration,
}

impl ScrapingConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            page_load: Duration::from_secs(self.page_load_timeout),
            script: Duration::from_secs(self.script_timeout),
            implicit_wait: Duration::from_secs(self.implicit_wait),
            element_wait: Duration::from_secs(self.element_wait_timeout),
        }
    }

    /// Check counts, ranges and backoff shape
    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.total_pages < 1 {
            return Err(ScrapeError::Config("total_pages must be at least 1".into()));
        }
        if self.max_retries < 1 {
            return Err(ScrapeError::Config("max_retries must be at least 1".into()));
        }
        if !self.retry_backoff.is_finite() || self.retry_backoff < 1.0 {
            return Err(ScrapeError::Config(format!(
                "retry_backoff must be a finite number >= 1.0, got {}",
                self.retry_backoff
            )));
        }
        if self.results_per_page < 1 {
            return Err(ScrapeError::Config("results_per_page must be at least 1".into()));
        }
        if self.max_empty_pages < 1 {
            return Err(ScrapeError::Config("max_empty_pages must be at least 1".into()));
        }
        check_range(
            "keystroke_delay",
            self.keystroke_delay_min_ms,
            self.keystroke_delay_max_ms,
        )?;
        check_range("page_delay", self.page_delay_min_ms, self.page_delay_max_ms)?;
        if self.search_url.trim().is_empty() && self.search_query.trim().is_empty() {
            return Err(ScrapeError::Config(
                "either search_url or search_query must be set".into(),
            ));
        }
        Ok(())
    }

    /// Credentials are only needed for live runs
    pub fn validate_credentials(&self) -> Result<(), ScrapeError> {
        if self.username.trim().is_empty() || self.password.is_empty() {
            return Err(ScrapeError::Config("username and password are required".into()));
        }
        Ok(())
    }
}

fn check_range(name: &str, min: u64, max: u64) -> Result<(), ScrapeError> {
    if min > max {
        return Err(ScrapeError::Config(format!(
            "{}_min_ms ({}) exceeds {}_max_ms ({})",
            name, min, name, max
        )));
    }
    Ok(())
}

/// Browser launch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    #[serde(default = "default_headless")]
    pub headless: bool,
    /// Chrome binary; platform default when unset
    #[serde(default)]
    pub chrome_executable: Option<String>,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Save a screenshot when a run ends on a fatal error
    #[serde(default = "default_screenshot_on_error")]
    pub screenshot_on_error: bool,
}

fn default_headless() -> bool {
    true
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

fn default_screenshot_on_error() -> bool {
    true
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            chrome_executable: None,
            window_width: default_window_width(),
            window_height: default_window_height(),
            user_agent: None,
            screenshot_on_error: default_screenshot_on_error(),
        }
    }
}

/// A set of page conditions, any one of which counts as a match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indicators {
    #[serde(default)]
    pub url_contains: Vec<String>,
    #[serde(default)]
    pub selectors: Vec<String>,
    #[serde(default)]
    pub text_contains: Vec<String>,
}

impl Indicators {
    pub fn to_probes(&self) -> Vec<Probe> {
        self.url_contains
            .iter()
            .map(|s| Probe::UrlContains(s.clone()))
            .chain(self.selectors.iter().map(|s| Probe::Selector(s.clone())))
            .chain(self.text_contains.iter().map(|s| Probe::TextContains(s.clone())))
            .collect()
    }

    /// Probes for checks made on result pages.
    ///
    /// URL needles match the path only and text needles are left out, so a
    /// search term or listing text cannot trigger them.
    pub fn to_page_probes(&self) -> Vec<Probe> {
        self.url_contains
            .iter()
            .map(|s| Probe::PathContains(s.clone()))
            .chain(self.selectors.iter().map(|s| Probe::Selector(s.clone())))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.url_contains.is_empty() && self.selectors.is_empty() && self.text_contains.is_empty()
    }
}

/// Site endpoints, login form selectors and outcome indicators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub login_url: String,
    /// Page loaded to verify restored cookies
    pub landing_url: String,
    /// Base for search URLs built from a query
    pub search_base_url: String,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    pub landing: Indicators,
    pub challenge: Indicators,
    pub login_error: Indicators,
    /// Elements whose text is captured when a login is rejected
    pub login_error_text_selectors: Vec<String>,
    pub session_lost: Indicators,
    /// Query parameters ignored when comparing listing links
    pub tracking_params: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            login_url: "https://www.linkedin.com/login".to_string(),
            landing_url: "https://www.linkedin.com/feed/".to_string(),
            search_base_url: "https://www.linkedin.com/jobs/search/".to_string(),
            username_selector: "#username".to_string(),
            password_selector: "#password".to_string(),
            submit_selector: "button[type='submit']".to_string(),
            landing: Indicators {
                url_contains: vec!["/feed".to_string(), "/in/".to_string()],
                selectors: vec!["[data-test-id='nav-top-secondary']".to_string()],
                text_contains: vec![],
            },
            challenge: Indicators {
                url_contains: vec!["/checkpoint/challenge".to_string(), "challenge".to_string()],
                selectors: vec![
                    "[data-js-module-id='guest-frontend-challenge-alert']".to_string(),
                    "#captcha-internal".to_string(),
                ],
                text_contains: vec!["security verification".to_string()],
            },
            login_error: Indicators {
                url_contains: vec![],
                selectors: vec![
                    ".form__label--error".to_string(),
                    "#error-for-password".to_string(),
                    "#error-for-username".to_string(),
                ],
                text_contains: vec![],
            },
            login_error_text_selectors: vec![
                "#error-for-password".to_string(),
                "#error-for-username".to_string(),
                ".form__label--error".to_string(),
                ".alert".to_string(),
            ],
            session_lost: Indicators {
                url_contains: vec![
                    "/login".to_string(),
                    "/authwall".to_string(),
                    "/uas/login".to_string(),
                ],
                selectors: vec![],
                text_contains: vec![],
            },
            tracking_params: vec![
                "refId".to_string(),
                "trackingId".to_string(),
                "trk".to_string(),
            ],
        }
    }
}

/// How the controller reaches page `n`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationMode {
    /// Click the page-`n` control on the current results page
    Button,
    /// Load the search URL with a `start` offset
    Url,
}

/// Pagination and page-readiness settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    pub mode: PaginationMode,
    /// Selector templates for the page-`n` control; `{page}` is substituted
    pub page_button_selectors: Vec<String>,
    /// Present when the results page loaded but has no listings
    pub empty_results: Indicators,
    /// Element scrolled instead of the window, when set
    #[serde(default)]
    pub scroll_container: Option<String>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            mode: PaginationMode::Button,
            page_button_selectors: vec![
                "button[aria-label='Page {page}']".to_string(),
                "li[data-test-pagination-page-btn='{page}'] button".to_string(),
                "button[data-test-pagination-page-btn='{page}']".to_string(),
            ],
            empty_results: Indicators {
                url_contains: vec![],
                selectors: vec![".jobs-search-no-results-banner".to_string()],
                text_contains: vec!["No matching jobs found".to_string()],
            },
            scroll_container: Some("div[class*='search-results']".to_string()),
        }
    }
}

/// Output file settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_output_prefix")]
    pub prefix: String,
    /// Write each page to its own CSV as soon as it is extracted
    #[serde(default = "default_true")]
    pub per_page_files: bool,
    #[serde(default = "default_true")]
    pub text_listing: bool,
    #[serde(default = "default_true")]
    pub summary: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_output_prefix() -> String {
    "jobs".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            prefix: default_output_prefix(),
            per_page_files: true,
            text_listing: true,
            summary: true,
        }
    }
}

/// Log file settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub file_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_log_max_files")]
    pub max_files: usize,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_file_prefix() -> String {
    "jobscrape.log".to_string()
}

fn default_log_max_files() -> usize {
    5
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_enabled: true,
            dir: default_log_dir(),
            file_prefix: default_log_file_prefix(),
            max_files: default_log_max_files(),
        }
    }
}

/// Persisted session cookie settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cookie_path")]
    pub path: PathBuf,
    #[serde(default = "default_cookie_ttl_hours")]
    pub ttl_hours: i64,
}

fn default_cookie_path() -> PathBuf {
    PathBuf::from("data/session/cookies.json")
}

fn default_cookie_ttl_hours() -> i64 {
    24 * 7
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_cookie_path(),
            ttl_hours: default_cookie_ttl_hours(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraping: ScrapingConfig,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub selectors: ExtractionRules,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub session_cache: SessionCacheConfig,
}

impl AppConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file_source = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name("jobscrape").required(false),
        };

        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(file_source)
            // JOBSCRAPE__SCRAPING__TOTAL_PAGES=5, etc.
            .add_source(
                config::Environment::with_prefix("JOBSCRAPE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validate everything that does not depend on credentials
    pub fn validate(&self) -> Result<(), ScrapeError> {
        self.scraping.validate()?;
        self.selectors.compile()?;
        if self.pagination.mode == PaginationMode::Button
            && self.pagination.page_button_selectors.is_empty()
        {
            return Err(ScrapeError::Config(
                "button pagination needs at least one page_button_selector".into(),
            ));
        }
        if self.site.landing.is_empty() {
            return Err(ScrapeError::Config(
                "site.landing needs at least one indicator".into(),
            ));
        }
        Ok(())
    }
}
