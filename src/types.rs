//! Records and run-level types shared by the scraper, output and CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ScrapeError;

/// One extracted job posting
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct JobRecord {
    #[serde(rename = "Job Title")]
    pub title: String,
    #[serde(rename = "Company Name")]
    pub company: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Link")]
    pub link: String,
    #[serde(rename = "Date Posted")]
    pub date_posted: String,
}

impl JobRecord {
    /// Identity used to drop repeats across pages.
    ///
    /// Links are compared without their fragment, a trailing slash and any
    /// query parameter named in `tracking_params`; other parameters are kept
    /// since some sites identify the posting in the query. Without a link,
    /// title and company stand in.
    pub fn identity_key(&self, tracking_params: &[String]) -> String {
        if !self.link.is_empty() {
            let Ok(mut url) = url::Url::parse(&self.link) else {
                return self.link.clone();
            };
            url.set_fragment(None);

            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| !tracking_params.iter().any(|p| p == k))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            let path = url.path().trim_end_matches('/').to_string();
            url.set_path(&path);
            if kept.is_empty() {
                url.set_query(None);
            } else {
                url.query_pairs_mut().clear().extend_pairs(kept);
            }
            return url.as_str().trim_end_matches('/').to_string();
        }
        format!(
            "{}|{}",
            self.title.to_lowercase(),
            self.company.to_lowercase()
        )
    }
}

/// Ephemeral state of one page visit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageState {
    pub scroll_height: u64,
    pub scroll_iterations: u32,
    pub records_before: usize,
    pub records_after: usize,
}

/// Why the page loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    PageLimit,
    /// Consecutive pages produced no new records
    EndOfResults,
    /// The next page control was not present
    NoMorePages,
    Cancelled,
    Fatal,
}

/// Terminal status of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Partial { skipped_pages: Vec<u32> },
    Failed { kind: String, message: String },
}

/// Counters and outcome of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub pages_attempted: u32,
    pub pages_completed: u32,
    pub skipped_pages: Vec<u32>,
    pub total_records: usize,
    pub duplicates_dropped: usize,
    pub fragments_skipped: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<StopReason>,
    pub status: RunStatus,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            pages_attempted: 0,
            pages_completed: 0,
            skipped_pages: Vec::new(),
            total_records: 0,
            duplicates_dropped: 0,
            fragments_skipped: 0,
            started_at: Utc::now(),
            finished_at: None,
            stop_reason: None,
            status: RunStatus::Completed,
        }
    }

    /// Seal the summary once the loop has ended
    pub fn finish(&mut self, reason: StopReason, error: Option<&ScrapeError>) {
        self.stop_reason = Some(reason);
        self.finished_at = Some(Utc::now());
        self.status = match error {
            Some(e) => RunStatus::Failed {
                kind: e.kind().to_string(),
                message: e.to_string(),
            },
            None if !self.skipped_pages.is_empty() => RunStatus::Partial {
                skipped_pages: self.skipped_pages.clone(),
            },
            None => RunStatus::Completed,
        };
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

/// Records and summary of a run, plus the fatal error if there was one
#[derive(Debug)]
pub struct RunReport {
    pub records: Vec<JobRecord>,
    pub summary: RunSummary,
    pub error: Option<ScrapeError>,
}

impl RunReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.summary.status, RunStatus::Failed { .. })
    }
}

/// Cooperative stop flag checked between pages
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
