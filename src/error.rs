//! Error taxonomy for a scrape run.

use thiserror::Error;

/// Errors raised by the page-traversal and extraction controller.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Navigation, load or element-wait failure. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// Login rejected (bad credentials, error banner, or no outcome before the deadline).
    #[error("login rejected: {}", .message.as_deref().unwrap_or("no error text on page"))]
    Auth { message: Option<String> },

    /// A verification step was presented instead of normal content.
    #[error("security challenge detected at {url}")]
    AuthChallenge { url: String },

    /// The authenticated session was invalidated mid-run.
    #[error("session lost: {0}")]
    SessionLost(String),

    /// Retries exhausted for one page.
    #[error("page {page} failed after {attempts} attempt(s): {source}")]
    PageFailure {
        page: u32,
        attempts: u32,
        #[source]
        source: Box<ScrapeError>,
    },

    /// No pagination control exists for the requested page.
    #[error("no pagination control for page {0}")]
    NoMorePages(u32),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Browser-side failure that is not a network condition (crashed target, bad script result).
    #[error("browser error: {0}")]
    Browser(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScrapeError {
    /// Whether the retry wrapper should try the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScrapeError::Network(_))
    }

    /// Whether the error ends the whole run rather than one page.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScrapeError::Auth { .. }
                | ScrapeError::AuthChallenge { .. }
                | ScrapeError::SessionLost(_)
                | ScrapeError::Config(_)
        )
    }

    /// Short machine-friendly name used in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::Network(_) => "network",
            ScrapeError::Auth { .. } => "auth",
            ScrapeError::AuthChallenge { .. } => "auth_challenge",
            ScrapeError::SessionLost(_) => "session_lost",
            ScrapeError::PageFailure { .. } => "page_failure",
            ScrapeError::NoMorePages(_) => "no_more_pages",
            ScrapeError::Config(_) => "config",
            ScrapeError::Browser(_) => "browser",
            ScrapeError::Io(_) => "io",
        }
    }
}
