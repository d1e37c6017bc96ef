//! Incremental scrolling of lazily loaded result lists.

use tracing::{debug, warn};

use super::pacing::Pacing;
use super::page::PageDriver;
use crate::error::ScrapeError;
use crate::types::PageState;

/// Result of scrolling one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollOutcome {
    pub scrolls_performed: u32,
    /// Height and listing count stopped changing before the budget ran out
    pub stabilized: bool,
    pub state: PageState,
}

/// Scrolls a page until its content stops growing or the budget is spent
pub struct ScrollDriver {
    scroll_count: u32,
    scroll_step: u32,
    container: Option<String>,
    pacing: Pacing,
}

impl ScrollDriver {
    pub fn new(
        scroll_count: u32,
        scroll_step: u32,
        container: Option<String>,
        pacing: Pacing,
    ) -> Self {
        Self {
            scroll_count,
            scroll_step,
            container,
            pacing,
        }
    }

    /// Scroll `driver` and report how far it got.
    ///
    /// `fragment_selector` counts listings after each scroll. Errors end the
    /// loop with whatever state was measured so far.
    pub async fn scroll<D: PageDriver + ?Sized>(
        &self,
        driver: &D,
        fragment_selector: &str,
    ) -> ScrollOutcome {
        let mut state = PageState::default();
        let mut outcome = ScrollOutcome {
            scrolls_performed: 0,
            stabilized: false,
            state,
        };

        let mut previous = match self.measure(driver, fragment_selector).await {
            Ok(m) => m,
            Err(e) => {
                warn!("Could not measure page before scrolling: {}", e);
                return outcome;
            }
        };
        state.scroll_height = previous.0;
        state.records_before = previous.1;
        state.records_after = previous.1;
        outcome.state = state;

        let container = self.container.as_deref();
        for iteration in 1..=self.scroll_count {
            if let Err(e) = driver.scroll_by(container, self.scroll_step).await {
                warn!("Scroll {} failed, keeping partial results: {}", iteration, e);
                break;
            }
            self.pacing.after_scroll().await;

            let current = match self.measure(driver, fragment_selector).await {
                Ok(m) => m,
                Err(e) => {
                    warn!("Measurement after scroll {} failed: {}", iteration, e);
                    outcome.scrolls_performed = iteration;
                    outcome.state.scroll_iterations = iteration;
                    break;
                }
            };

            state.scroll_iterations = iteration;
            state.scroll_height = current.0;
            state.records_before = previous.1;
            state.records_after = current.1;
            outcome.scrolls_performed = iteration;
            outcome.state = state;

            debug!(iteration, height = current.0, listings = current.1, "Scrolled");

            if current == previous {
                outcome.stabilized = true;
                break;
            }
            previous = current;
        }

        outcome
    }

    /// `(scroll height, listing count)`
    async fn measure<D: PageDriver + ?Sized>(
        &self,
        driver: &D,
        fragment_selector: &str,
    ) -> Result<(u64, usize), ScrapeError> {
        let height = driver.scroll_height(self.container.as_deref()).await?;
        let count = driver.count_elements(fragment_selector).await?;
        Ok((height, count))
    }
}
