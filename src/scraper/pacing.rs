//! Bounded random delays between browser actions.

use rand::Rng;
use tokio::time::Duration;
use tracing::debug;

use crate::config::ScrapingConfig;

/// Delay ranges applied while typing, scrolling and paging
#[derive(Debug, Clone)]
pub struct Pacing {
    keystroke_min: Duration,
    keystroke_max: Duration,
    scroll_pause: Duration,
    page_min: Duration,
    page_max: Duration,
}

impl Pacing {
    /// Create a pacing profile
    ///
    /// # Arguments
    /// * `keystroke` - Inclusive range slept after each typed character
    /// * `scroll_pause` - Fixed pause after each scroll
    /// * `page` - Inclusive range slept between result pages
    pub fn new(
        keystroke: (Duration, Duration),
        scroll_pause: Duration,
        page: (Duration, Duration),
    ) -> Self {
        Self {
            keystroke_min: keystroke.0,
            keystroke_max: keystroke.1.max(keystroke.0),
            scroll_pause,
            page_min: page.0,
            page_max: page.1.max(page.0),
        }
    }

    pub fn from_config(config: &ScrapingConfig) -> Self {
        Self::new(
            (
                Duration::from_millis(config.keystroke_delay_min_ms),
                Duration::from_millis(config.keystroke_delay_max_ms),
            ),
            Duration::from_millis(config.scroll_pause_ms),
            (
                Duration::from_millis(config.page_delay_min_ms),
                Duration::from_millis(config.page_delay_max_ms),
            ),
        )
    }

    /// No delays at all
    #[cfg(test)]
    pub fn none() -> Self {
        Self::new(
            (Duration::ZERO, Duration::ZERO),
            Duration::ZERO,
            (Duration::ZERO, Duration::ZERO),
        )
    }

    pub fn keystroke_delay(&self) -> Duration {
        random_between(self.keystroke_min, self.keystroke_max)
    }

    pub fn page_delay(&self) -> Duration {
        random_between(self.page_min, self.page_max)
    }

    pub async fn after_keystroke(&self) {
        sleep_if_nonzero(self.keystroke_delay()).await;
    }

    pub async fn after_scroll(&self) {
        sleep_if_nonzero(self.scroll_pause).await;
    }

    pub async fn between_pages(&self) {
        let delay = self.page_delay();
        if !delay.is_zero() {
            debug!("Waiting {:?} before next page", delay);
        }
        sleep_if_nonzero(delay).await;
    }
}

fn random_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let min_ms = min.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

async fn sleep_if_nonzero(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
