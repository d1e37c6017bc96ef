//! Top-level scrape loop.
//!
//! The run is an explicit state machine:
//! `Init → SessionEstablished → PageLoop { page, empty_streak } → Done(reason)`.
//! One page is fully processed before the next is requested.

use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use super::pacing::Pacing;
use super::page::{PageDriver, Probe};
use super::parsers::{CompiledRules, JobCardParser};
use super::scroll::{ScrollDriver, ScrollOutcome};
use super::session::{SessionController, SessionHandle};
use super::{page_url, search_url};
use crate::config::{AppConfig, Indicators, PaginationMode};
use crate::error::ScrapeError;
use crate::retry::{retry_if, RetryError, RetryPolicy};
use crate::types::{JobRecord, RunReport, RunSummary, StopReason, StopSignal};

/// Receives each page's new records as soon as the page is done
pub trait PageSink {
    fn page_completed(&mut self, page: u32, records: &[JobRecord]) -> anyhow::Result<()>;
}

/// Sink that discards pages
pub struct NoopSink;

impl PageSink for NoopSink {
    fn page_completed(&mut self, _page: u32, _records: &[JobRecord]) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    SessionEstablished,
    PageLoop { page: u32, empty_streak: u32 },
    Done(StopReason),
}

/// What one page produced
struct PageResult {
    records: Vec<JobRecord>,
    fragments_skipped: usize,
    scroll: Option<ScrollOutcome>,
}

/// Records and counters accumulated across pages
struct RunContext<'a> {
    records: Vec<JobRecord>,
    seen: HashSet<String>,
    tracking_params: &'a [String],
    summary: RunSummary,
    error: Option<ScrapeError>,
}

impl<'a> RunContext<'a> {
    fn new(tracking_params: &'a [String]) -> Self {
        Self {
            records: Vec::new(),
            seen: HashSet::new(),
            tracking_params,
            summary: RunSummary::new(),
            error: None,
        }
    }

    /// Append records not seen before; returns the new ones
    fn accept(&mut self, records: Vec<JobRecord>) -> Vec<JobRecord> {
        let mut fresh = Vec::with_capacity(records.len());
        for record in records {
            if self.seen.insert(record.identity_key(self.tracking_params)) {
                fresh.push(record);
            } else {
                self.summary.duplicates_dropped += 1;
            }
        }
        self.records.extend(fresh.iter().cloned());
        self.summary.total_records = self.records.len();
        fresh
    }

    fn into_report(mut self, reason: StopReason) -> RunReport {
        self.summary.finish(reason, self.error.as_ref());
        RunReport {
            records: self.records,
            summary: self.summary,
            error: self.error,
        }
    }
}

/// Drives login, paging, scrolling and extraction for one run
pub struct JobScraper {
    session: SessionController,
    scroller: ScrollDriver,
    rules: CompiledRules,
    policy: RetryPolicy,
    pacing: Pacing,
    stop: StopSignal,
    search_url: String,
    mode: PaginationMode,
    page_button_selectors: Vec<String>,
    empty_results: Indicators,
    total_pages: u32,
    results_per_page: u32,
    max_empty_pages: u32,
    element_wait: std::time::Duration,
    tracking_params: Vec<String>,
    screenshot_dir: Option<PathBuf>,
}

impl JobScraper {
    /// Build a scraper from validated configuration
    pub fn new(config: &AppConfig, stop: StopSignal) -> Result<Self, ScrapeError> {
        let scraping = &config.scraping;
        let pacing = Pacing::from_config(scraping);
        Ok(Self {
            session: SessionController::from_config(config),
            scroller: ScrollDriver::new(
                scraping.scroll_count,
                scraping.scroll_step,
                config.pagination.scroll_container.clone(),
                pacing.clone(),
            ),
            rules: config.selectors.compile()?,
            policy: RetryPolicy::from_config(scraping),
            pacing,
            stop,
            search_url: search_url(scraping, &config.site)?,
            mode: config.pagination.mode,
            page_button_selectors: config.pagination.page_button_selectors.clone(),
            empty_results: config.pagination.empty_results.clone(),
            total_pages: scraping.total_pages,
            results_per_page: scraping.results_per_page,
            max_empty_pages: scraping.max_empty_pages.max(1),
            element_wait: scraping.timeouts().element_wait,
            tracking_params: config.site.tracking_params.clone(),
            screenshot_dir: config
                .browser
                .screenshot_on_error
                .then(|| config.output.dir.clone()),
        })
    }

    pub fn search_url(&self) -> &str {
        &self.search_url
    }

    /// Run a full scrape with `driver`.
    ///
    /// Never fails as a whole: a fatal error ends the loop and is returned in
    /// the report next to the records gathered so far. The driver is closed
    /// before this returns.
    pub async fn run<D: PageDriver>(&self, driver: D, sink: &mut dyn PageSink) -> RunReport {
        let mut ctx = RunContext::new(&self.tracking_params);
        debug!(state = ?RunState::Init, "Run state");

        let handle = match self.session.establish(driver, &self.policy).await {
            Ok(handle) => handle,
            Err(failure) => {
                match &failure.state {
                    Some(state) => error!("Login ended in {:?}: {}", state, failure.error),
                    None => error!("Could not establish a session: {}", failure.error),
                }
                self.capture_screenshot(&failure.driver, &failure.error).await;
                if let Err(e) = failure.driver.close().await {
                    warn!("Failed to close page cleanly: {}", e);
                }
                ctx.error = Some(failure.error);
                return ctx.into_report(StopReason::Fatal);
            }
        };

        let mut state = RunState::SessionEstablished;
        let reason = loop {
            debug!(?state, "Run state");
            state = match state {
                RunState::Done(reason) => break reason,
                other => self.advance(other, &handle, &mut ctx, sink).await,
            };
        };

        if let Some(e) = &ctx.error {
            self.capture_screenshot(handle.driver(), e).await;
        }
        handle.close().await;

        let summary = &ctx.summary;
        info!(
            "Run finished ({:?}): {} records from {}/{} pages, {} duplicates dropped",
            reason,
            ctx.records.len(),
            summary.pages_completed,
            summary.pages_attempted,
            summary.duplicates_dropped
        );
        if !summary.skipped_pages.is_empty() {
            warn!("Skipped pages: {:?}", summary.skipped_pages);
        }

        ctx.into_report(reason)
    }

    /// Perform one transition of the run loop
    async fn advance<D: PageDriver>(
        &self,
        state: RunState,
        handle: &SessionHandle<D>,
        ctx: &mut RunContext<'_>,
        sink: &mut dyn PageSink,
    ) -> RunState {
        let (page, empty_streak) = match state {
            RunState::Init | RunState::SessionEstablished => {
                info!(
                    "Session ready ({:?} at {}), starting at {}",
                    handle.origin(),
                    handle.established_at().format("%H:%M:%S"),
                    self.search_url
                );
                return RunState::PageLoop {
                    page: 1,
                    empty_streak: 0,
                };
            }
            RunState::Done(reason) => return RunState::Done(reason),
            RunState::PageLoop { page, empty_streak } => (page, empty_streak),
        };

        if page > self.total_pages {
            return RunState::Done(StopReason::PageLimit);
        }
        if self.stop.is_triggered() {
            info!("Stop requested, ending before page {}", page);
            return RunState::Done(StopReason::Cancelled);
        }

        info!("Scraping page {}/{}", page, self.total_pages);
        ctx.summary.pages_attempted += 1;

        let next_streak = match self.scrape_page(handle.driver(), page).await {
            Ok(result) => {
                let found = result.records.len();
                let fresh = ctx.accept(result.records);
                ctx.summary.pages_completed += 1;
                ctx.summary.fragments_skipped += result.fragments_skipped;

                if let Err(e) = sink.page_completed(page, &fresh) {
                    warn!("Failed to save page {}: {}", page, e);
                }
                info!(
                    "Page {}: {} new records ({} found, {} fragments skipped, {} scrolls), total {}",
                    page,
                    fresh.len(),
                    found,
                    result.fragments_skipped,
                    result.scroll.map_or(0, |s| s.scrolls_performed),
                    ctx.records.len()
                );

                if fresh.is_empty() {
                    empty_streak + 1
                } else {
                    0
                }
            }
            Err(ScrapeError::NoMorePages(_)) => {
                info!("No control for page {}, reached the end of results", page);
                return RunState::Done(StopReason::NoMorePages);
            }
            Err(e) if e.is_fatal() => {
                error!("Stopping on page {}: {}", page, e);
                ctx.error = Some(e);
                return RunState::Done(StopReason::Fatal);
            }
            Err(e) => {
                warn!("Skipping page {}: {}", page, e);
                ctx.summary.skipped_pages.push(page);
                empty_streak
            }
        };

        if next_streak >= self.max_empty_pages {
            info!("{} consecutive pages without new records, stopping", next_streak);
            return RunState::Done(StopReason::EndOfResults);
        }
        if page < self.total_pages {
            self.pacing.between_pages().await;
        }
        RunState::PageLoop {
            page: page + 1,
            empty_streak: next_streak,
        }
    }

    async fn scrape_page<D: PageDriver>(
        &self,
        driver: &D,
        page: u32,
    ) -> Result<PageResult, ScrapeError> {
        let operation = format!("load page {}", page);
        retry_if(&self.policy, &operation, ScrapeError::is_retryable, || {
            self.open_page(driver, page)
        })
        .await
        .map_err(|e| page_error(page, e))?;

        let operation = format!("wait for listings on page {}", page);
        let has_listings = retry_if(&self.policy, &operation, ScrapeError::is_retryable, || {
            self.wait_for_listings(driver)
        })
        .await
        .map_err(|e| page_error(page, e))?;

        if !has_listings {
            debug!("Page {} reports no results", page);
            return Ok(PageResult {
                records: Vec::new(),
                fragments_skipped: 0,
                scroll: None,
            });
        }

        let scroll = self
            .scroller
            .scroll(driver, self.rules.fragment_selector())
            .await;

        let operation = format!("read page {}", page);
        let html = retry_if(&self.policy, &operation, ScrapeError::is_retryable, || {
            driver.content()
        })
        .await
        .map_err(|e| page_error(page, e))?;

        let base = driver.current_url().await.ok();
        let report = JobCardParser::parse(&html, base.as_deref(), &self.rules);
        let fragments_skipped = report.skipped.len();
        debug!(
            "Page {}: {} listing fragments, {} usable",
            page,
            report.fragments_seen(),
            report.records.len()
        );

        Ok(PageResult {
            records: report.records,
            fragments_skipped,
            scroll: Some(scroll),
        })
    }

    /// Bring page `page` into view and check the session survived
    async fn open_page<D: PageDriver>(&self, driver: &D, page: u32) -> Result<(), ScrapeError> {
        match self.mode {
            PaginationMode::Button if page > 1 => self.click_page_control(driver, page).await?,
            _ => {
                let url = page_url(&self.search_url, page, self.results_per_page)?;
                debug!("Navigating to {}", url);
                driver.navigate(&url).await?;
            }
        }
        self.session.verify_session(driver).await
    }

    async fn click_page_control<D: PageDriver>(
        &self,
        driver: &D,
        page: u32,
    ) -> Result<(), ScrapeError> {
        let page_str = page.to_string();
        for template in &self.page_button_selectors {
            let selector = template.replace("{page}", &page_str);
            if driver.click(&selector).await? {
                debug!("Clicked page control {}", selector);
                return Ok(());
            }
        }
        Err(ScrapeError::NoMorePages(page))
    }

    /// `true` once listings are present, `false` if the page says it has none
    async fn wait_for_listings<D: PageDriver>(&self, driver: &D) -> Result<bool, ScrapeError> {
        let groups = [
            vec![Probe::Selector(self.rules.fragment_selector().to_string())],
            self.empty_results.to_probes(),
        ];
        match driver.wait_for_any(&groups, self.element_wait).await? {
            Some(0) => Ok(true),
            Some(_) => Ok(false),
            None => Err(ScrapeError::Network(format!(
                "no listings appeared within {:?}",
                self.element_wait
            ))),
        }
    }

    async fn capture_screenshot<D: PageDriver>(&self, driver: &D, error: &ScrapeError) {
        let Some(dir) = &self.screenshot_dir else {
            return;
        };
        if !error.is_fatal() {
            return;
        }
        let path = dir.join(format!(
            "error_{}_{}.png",
            error.kind(),
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        match driver.screenshot(&path).await {
            Ok(()) => info!("Saved error screenshot to {}", path.display()),
            Err(e) => warn!("Failed to save error screenshot: {}", e),
        }
    }
}

/// Collapse a retry failure into the error the run loop acts on
fn page_error(page: u32, err: RetryError<ScrapeError>) -> ScrapeError {
    match err {
        RetryError::Exhausted {
            attempts, source, ..
        } => ScrapeError::PageFailure {
            page,
            attempts,
            source: Box::new(source),
        },
        RetryError::Aborted { source, .. }
            if source.is_fatal() || matches!(source, ScrapeError::NoMorePages(_)) =>
        {
            source
        }
        RetryError::Aborted { source, .. } => ScrapeError::PageFailure {
            page,
            attempts: 1,
            source: Box::new(source),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Secret, SiteConfig};
    use crate::scraper::parsers::ExtractionRules;
    use crate::scraper::testing::FakePage;
    use crate::types::RunStatus;

    const LOGIN_URL: &str = "https://jobs.example.com/login";
    const FEED_URL: &str = "https://jobs.example.com/feed/";
    const SEARCH_URL: &str = "https://jobs.example.com/jobs/search/?keywords=rust";
    const CHALLENGE_URL: &str = "https://jobs.example.com/checkpoint/challenge/1";
    const AUTHWALL_URL: &str = "https://jobs.example.com/authwall?trk=jobs";

    const LOGIN_HTML: &str = r#"<form><input id="username"><input id="password">
        <button type="submit">Sign in</button></form>"#;
    const NO_RESULTS_HTML: &str =
        r#"<div class="jobs-search-no-results-banner">No matching jobs found</div>"#;

    #[derive(Default)]
    struct CollectingSink {
        pages: Vec<(u32, usize)>,
    }

    impl PageSink for CollectingSink {
        fn page_completed(&mut self, page: u32, records: &[JobRecord]) -> anyhow::Result<()> {
            self.pages.push((page, records.len()));
            Ok(())
        }
    }

    fn page_n(n: u32) -> String {
        if n == 1 {
            SEARCH_URL.to_string()
        } else {
            format!("{}&start={}", SEARCH_URL, (n - 1) * 25)
        }
    }

    fn listing(ids: &[u32]) -> String {
        let items: String = ids
            .iter()
            .map(|id| {
                format!(
                    r#"<li class="job"><a href="/jobs/view/{id}/"><span class="title">Job {id}</span></a>
                    <span class="company">Company {id}</span><span class="location">Remote</span>
                    <time datetime="2024-05-01">1 day ago</time></li>"#
                )
            })
            .collect();
        format!("<html><body><ul>{}</ul></body></html>", items)
    }

    fn config(total_pages: u32) -> AppConfig {
        let mut config = AppConfig::default();
        let s = &mut config.scraping;
        s.username = "user@example.com".into();
        s.password = Secret::new("s3cret");
        s.search_url = SEARCH_URL.into();
        s.total_pages = total_pages;
        s.scroll_count = 2;
        s.element_wait_timeout = 0;
        s.retry_delay = 0;
        s.retry_max_delay = 0;
        s.scroll_pause_ms = 0;
        s.keystroke_delay_min_ms = 0;
        s.keystroke_delay_max_ms = 0;
        s.page_delay_min_ms = 0;
        s.page_delay_max_ms = 0;

        config.site = SiteConfig {
            login_url: LOGIN_URL.into(),
            landing_url: FEED_URL.into(),
            search_base_url: "https://jobs.example.com/jobs/search/".into(),
            landing: Indicators {
                url_contains: vec!["/feed".into()],
                ..Default::default()
            },
            ..SiteConfig::default()
        };
        config.pagination.mode = PaginationMode::Url;
        config.pagination.scroll_container = None;
        config.selectors = ExtractionRules {
            fragment: "li.job".into(),
            title: ".title".into(),
            company: ".company".into(),
            location: ".location".into(),
            link: "a".into(),
            date: "time".into(),
            date_attribute: Some("datetime".into()),
            screen_reader_text: None,
        };
        config.session_cache.enabled = false;
        config.output.dir = PathBuf::from("screens");
        config
    }

    fn logged_in_page() -> FakePage {
        FakePage::new()
            .route(LOGIN_URL, LOGIN_HTML)
            .route(FEED_URL, "<html>feed</html>")
            .click_target("button[type='submit']", FEED_URL)
    }

    async fn run(config: &AppConfig, page: &FakePage) -> (RunReport, CollectingSink) {
        run_with_stop(config, page, StopSignal::new()).await
    }

    async fn run_with_stop(
        config: &AppConfig,
        page: &FakePage,
        stop: StopSignal,
    ) -> (RunReport, CollectingSink) {
        let scraper = JobScraper::new(config, stop).unwrap();
        let mut sink = CollectingSink::default();
        let report = scraper.run(page.clone(), &mut sink).await;
        (report, sink)
    }

    #[tokio::test]
    async fn test_collects_pages_in_order() {
        let page = logged_in_page()
            .route(&page_n(1), &listing(&[1, 2]))
            .route(&page_n(2), &listing(&[3, 4]))
            .route(&page_n(3), &listing(&[5]));

        let (report, sink) = run(&config(3), &page).await;

        let titles: Vec<_> = report.records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Job 1", "Job 2", "Job 3", "Job 4", "Job 5"]);
        assert_eq!(report.records[0].link, "https://jobs.example.com/jobs/view/1/");
        assert_eq!(report.records[0].date_posted, "1 day ago");
        assert_eq!(report.summary.stop_reason, Some(StopReason::PageLimit));
        assert_eq!(report.summary.status, RunStatus::Completed);
        assert_eq!(report.summary.pages_completed, 3);
        assert_eq!(sink.pages, vec![(1, 2), (2, 2), (3, 1)]);
        assert!(report.error.is_none());
        assert!(page.is_closed());
    }

    #[tokio::test]
    async fn test_two_pages_without_new_records_end_run() {
        let page = logged_in_page()
            .route(&page_n(1), &listing(&[1, 2]))
            .route(&page_n(2), NO_RESULTS_HTML)
            // Only repeats of page 1
            .route(&page_n(3), &listing(&[1, 2]))
            .route(&page_n(4), &listing(&[9]));

        let (report, _) = run(&config(10), &page).await;

        assert_eq!(report.records.len(), 2);
        assert_eq!(report.summary.stop_reason, Some(StopReason::EndOfResults));
        assert_eq!(report.summary.pages_attempted, 3);
        assert_eq!(report.summary.duplicates_dropped, 2);
        assert_eq!(page.navigations_to(&page_n(4)), 0);
    }

    #[tokio::test]
    async fn test_empty_streak_resets_on_new_records() {
        let page = logged_in_page()
            .route(&page_n(1), NO_RESULTS_HTML)
            .route(&page_n(2), &listing(&[1]))
            .route(&page_n(3), NO_RESULTS_HTML)
            .route(&page_n(4), &listing(&[2]));

        let (report, _) = run(&config(4), &page).await;

        assert_eq!(report.records.len(), 2);
        assert_eq!(report.summary.stop_reason, Some(StopReason::PageLimit));
    }

    #[tokio::test]
    async fn test_failing_page_is_skipped() {
        let page = logged_in_page()
            .route(&page_n(1), &listing(&[1]))
            .fail_always(&page_n(2))
            .route(&page_n(3), &listing(&[3]));

        let (report, sink) = run(&config(3), &page).await;

        assert_eq!(report.records.len(), 2);
        assert_eq!(page.navigations_to(&page_n(2)), 3);
        assert_eq!(report.summary.skipped_pages, vec![2]);
        assert_eq!(
            report.summary.status,
            RunStatus::Partial {
                skipped_pages: vec![2]
            }
        );
        assert_eq!(sink.pages, vec![(1, 1), (3, 1)]);
        assert!(!report.is_failure());
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let page = logged_in_page()
            .fail_times(&page_n(1), 2)
            .route(&page_n(1), &listing(&[1, 2]));

        let (report, _) = run(&config(1), &page).await;

        assert_eq!(report.records.len(), 2);
        assert_eq!(page.navigations_to(&page_n(1)), 3);
        assert!(report.summary.skipped_pages.is_empty());
    }

    #[tokio::test]
    async fn test_session_lost_keeps_earlier_records() {
        let page = logged_in_page()
            .route(&page_n(1), &listing(&[1, 2]))
            .redirect(&page_n(2), AUTHWALL_URL)
            .route(AUTHWALL_URL, "<html>Sign in to continue</html>")
            .route(&page_n(3), &listing(&[3]));

        let (report, _) = run(&config(3), &page).await;

        assert_eq!(report.records.len(), 2);
        assert!(matches!(report.error, Some(ScrapeError::SessionLost(_))));
        assert_eq!(report.summary.stop_reason, Some(StopReason::Fatal));
        assert!(report.is_failure());
        // Fatal errors are not retried
        assert_eq!(page.navigations_to(&page_n(2)), 1);
        assert_eq!(page.navigations_to(&page_n(3)), 0);
        assert_eq!(page.screenshots().len(), 1);
        assert!(page.is_closed());
    }

    #[tokio::test]
    async fn test_dead_browser_ends_run_without_retrying_pages() {
        let page = logged_in_page()
            .route(&page_n(1), &listing(&[1, 2]))
            .disconnect_on(&page_n(2))
            .route(&page_n(3), &listing(&[3]));

        let (report, _) = run(&config(20), &page).await;

        assert_eq!(report.records.len(), 2);
        assert!(matches!(report.error, Some(ScrapeError::SessionLost(_))));
        assert_eq!(report.summary.stop_reason, Some(StopReason::Fatal));
        assert_eq!(report.summary.pages_attempted, 2);
        assert!(report.summary.skipped_pages.is_empty());
        assert_eq!(page.navigations_to(&page_n(2)), 1);
        assert_eq!(page.navigations_to(&page_n(3)), 0);
        assert!(page.is_closed());
    }

    #[tokio::test]
    async fn test_query_identified_links_are_distinct() {
        let html = r#"<ul>
            <li class="job"><a href="/job?id=101&amp;trk=search"><span class="title">Backend Engineer</span></a></li>
            <li class="job"><a href="/job?id=202&amp;trk=search"><span class="title">Frontend Engineer</span></a></li>
            <li class="job"><a href="/job?id=303"><span class="title">Data Engineer</span></a></li>
            <li class="job"><a href="/job?id=101&amp;refId=x"><span class="title">Backend Engineer</span></a></li>
        </ul>"#;
        let page = logged_in_page().route(&page_n(1), html);

        let (report, _) = run(&config(1), &page).await;

        let titles: Vec<_> = report.records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Backend Engineer", "Frontend Engineer", "Data Engineer"]
        );
        assert_eq!(report.summary.duplicates_dropped, 1);
    }

    #[tokio::test]
    async fn test_listing_text_does_not_look_like_a_challenge() {
        let page = logged_in_page()
            .route(&page_n(1), &listing(&[1]))
            .route(
                &page_n(2),
                &listing(&[2]).replace("Job 2", "Security Verification Engineer"),
            )
            .route(&page_n(3), &listing(&[3]));

        let (report, _) = run(&config(3), &page).await;

        assert!(report.error.is_none());
        assert_eq!(report.records.len(), 3);
        assert_eq!(report.records[1].title, "Security Verification Engineer");
        assert_eq!(report.summary.stop_reason, Some(StopReason::PageLimit));
        assert_eq!(page.navigations_to(&page_n(3)), 1);
    }

    #[tokio::test]
    async fn test_challenge_mid_run_is_fatal() {
        let page = logged_in_page()
            .route(&page_n(1), &listing(&[1]))
            .redirect(&page_n(2), CHALLENGE_URL)
            .route(CHALLENGE_URL, "<html>Let's do a quick security check</html>")
            .route(&page_n(3), &listing(&[3]));

        let (report, _) = run(&config(3), &page).await;

        assert_eq!(report.records.len(), 1);
        assert!(matches!(
            report.error,
            Some(ScrapeError::AuthChallenge { .. })
        ));
        assert_eq!(page.navigations_to(&page_n(3)), 0);
    }

    #[tokio::test]
    async fn test_challenge_at_login_ends_run() {
        let page = FakePage::new()
            .route(LOGIN_URL, LOGIN_HTML)
            .route(CHALLENGE_URL, "<html>Let's do a quick security check</html>")
            .click_target("button[type='submit']", CHALLENGE_URL)
            .route(&page_n(1), &listing(&[1]));

        let (report, _) = run(&config(3), &page).await;

        assert!(report.records.is_empty());
        assert!(matches!(
            report.error,
            Some(ScrapeError::AuthChallenge { .. })
        ));
        assert_eq!(page.navigations_to(LOGIN_URL), 1);
        assert_eq!(page.navigations_to(&page_n(1)), 0);
        assert_eq!(report.summary.pages_attempted, 0);
        assert!(page.is_closed());
    }

    #[tokio::test]
    async fn test_stop_signal_checked_before_each_page() {
        let page = logged_in_page().route(&page_n(1), &listing(&[1]));
        let stop = StopSignal::new();
        stop.trigger();

        let (report, _) = run_with_stop(&config(5), &page, stop).await;

        assert_eq!(report.summary.stop_reason, Some(StopReason::Cancelled));
        assert_eq!(page.navigations_to(&page_n(1)), 0);
        assert!(page.is_closed());
    }

    #[tokio::test]
    async fn test_button_mode_stops_without_next_control() {
        let page_two = "https://jobs.example.com/jobs/search/?keywords=rust&page=2";
        let first = listing(&[1]).replace(
            "</ul>",
            r#"</ul><button aria-label="Page 2">2</button>"#,
        );
        let page = logged_in_page()
            .route(SEARCH_URL, &first)
            .route(page_two, &listing(&[2]))
            .click_target("button[aria-label='Page 2']", page_two);

        let mut config = config(5);
        config.pagination.mode = PaginationMode::Button;
        let (report, _) = run(&config, &page).await;

        assert_eq!(report.records.len(), 2);
        assert_eq!(report.summary.stop_reason, Some(StopReason::NoMorePages));
        assert_eq!(report.summary.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_malformed_fragments_do_not_fail_page() {
        let html = r#"<ul>
            <li class="job"><a href="/jobs/view/1/"><span class="title">Job 1</span></a></li>
            <li class="job"><span class="location">Berlin</span></li>
            <li class="job"><span class="title">Job 3</span></li>
        </ul>"#;
        let page = logged_in_page().route(&page_n(1), html);

        let (report, _) = run(&config(1), &page).await;

        assert_eq!(report.records.len(), 2);
        assert_eq!(report.summary.fragments_skipped, 1);
        assert_eq!(report.summary.status, RunStatus::Completed);
    }
}
