//! File-based session cookie store with TTL support.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use super::page::SessionCookie;
use crate::config::SessionCacheConfig;

/// Stored cookies with timestamp
#[derive(Serialize, Deserialize)]
struct StoredSession {
    cookies: Vec<SessionCookie>,
    saved_at: DateTime<Utc>,
}

/// Persists the cookies of an authenticated session between runs
pub struct CookieStore {
    path: PathBuf,
    ttl: Duration,
}

impl CookieStore {
    pub fn new(path: PathBuf, ttl: Duration) -> Self {
        Self { path, ttl }
    }

    /// Store from config, `None` when session reuse is disabled
    pub fn from_config(config: &SessionCacheConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.path.clone(), Duration::hours(config.ttl_hours)))
    }

    /// Saved cookies if present, fresh, and not all expired
    pub fn load(&self) -> Option<Vec<SessionCookie>> {
        if !self.path.exists() {
            return None;
        }

        let content = std::fs::read_to_string(&self.path).ok()?;
        let stored: StoredSession = serde_json::from_str(&content).ok()?;

        let now = Utc::now();
        if now - stored.saved_at > self.ttl {
            // Remove stale session
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("Failed to remove expired session cookies: {}", e);
            }
            return None;
        }

        let now_secs = now.timestamp() as f64;
        let cookies: Vec<_> = stored
            .cookies
            .into_iter()
            .filter(|c| c.expires.map_or(true, |exp| exp <= 0.0 || exp > now_secs))
            .collect();

        if cookies.is_empty() {
            None
        } else {
            Some(cookies)
        }
    }

    pub fn save(&self, cookies: &[SessionCookie]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let stored = StoredSession {
            cookies: cookies.to_vec(),
            saved_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&stored)?;
        std::fs::write(&self.path, content)?;

        Ok(())
    }

    /// Forget the saved session
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
