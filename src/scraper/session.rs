//! Authenticated session establishment.
//!
//! Login runs as an explicit state machine:
//! `Unauthenticated → Navigating → CredentialsEntered → Submitted →
//! {Authenticated | ChallengeDetected | Rejected}`. Each call to
//! [`SessionController::advance`] performs one transition. Nothing inside
//! the machine retries; [`SessionController::establish`] retries whole login
//! attempts only for network failures.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::cookie_store::CookieStore;
use super::pacing::Pacing;
use super::page::{PageDriver, Probe};
use crate::config::{AppConfig, Secret, SiteConfig};
use crate::error::ScrapeError;
use crate::retry::{retry_if, RetryPolicy};

/// Login state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    Unauthenticated,
    Navigating,
    CredentialsEntered,
    Submitted,
    Authenticated,
    ChallengeDetected { url: String },
    Rejected { message: Option<String> },
}

impl LoginState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoginState::Authenticated
                | LoginState::ChallengeDetected { .. }
                | LoginState::Rejected { .. }
        )
    }

    /// Map a terminal state to the run-level outcome
    pub fn into_result(self) -> Result<(), ScrapeError> {
        match self {
            LoginState::Authenticated => Ok(()),
            LoginState::ChallengeDetected { url } => Err(ScrapeError::AuthChallenge { url }),
            LoginState::Rejected { message } => Err(ScrapeError::Auth { message }),
            other => Err(ScrapeError::Browser(format!(
                "login stopped in non-terminal state {:?}",
                other
            ))),
        }
    }
}

/// How the session was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    FreshLogin,
    RestoredCookies,
}

/// Owns the live page once authenticated
pub struct SessionHandle<D> {
    driver: D,
    origin: SessionOrigin,
    established_at: DateTime<Utc>,
}

impl<D: PageDriver> SessionHandle<D> {
    pub fn new(driver: D, origin: SessionOrigin) -> Self {
        Self {
            driver,
            origin,
            established_at: Utc::now(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn origin(&self) -> SessionOrigin {
        self.origin
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    /// Close the page and give the driver back
    pub async fn close(self) -> D {
        if let Err(e) = self.driver.close().await {
            warn!("Failed to close page cleanly: {}", e);
        }
        self.driver
    }
}

/// Failed session establishment; the driver is returned for teardown
pub struct LoginFailure<D> {
    pub driver: D,
    pub error: ScrapeError,
    /// Terminal login state, when the machine reached one
    pub state: Option<LoginState>,
}

/// Establishes and checks the authenticated session
pub struct SessionController {
    site: SiteConfig,
    username: String,
    password: Secret,
    element_wait: std::time::Duration,
    pacing: Pacing,
    cookie_store: Option<CookieStore>,
}

impl SessionController {
    pub fn new(
        site: SiteConfig,
        username: String,
        password: Secret,
        element_wait: std::time::Duration,
        pacing: Pacing,
        cookie_store: Option<CookieStore>,
    ) -> Self {
        Self {
            site,
            username,
            password,
            element_wait,
            pacing,
            cookie_store,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.site.clone(),
            config.scraping.username.clone(),
            config.scraping.password.clone(),
            config.scraping.timeouts().element_wait,
            Pacing::from_config(&config.scraping),
            CookieStore::from_config(&config.session_cache),
        )
    }

    /// Authenticate `driver`, reusing saved cookies when they still work
    pub async fn establish<D: PageDriver>(
        &self,
        driver: D,
        policy: &RetryPolicy,
    ) -> Result<SessionHandle<D>, LoginFailure<D>> {
        if self.try_restore(&driver).await {
            info!("Restored previous session from saved cookies");
            return Ok(SessionHandle::new(driver, SessionOrigin::RestoredCookies));
        }

        // Only transport failures come back as errors; terminal states are final
        let result = retry_if(policy, "login", ScrapeError::is_retryable, || {
            self.login(&driver)
        })
        .await;

        let state = match result {
            Ok(state) => state,
            Err(e) => {
                let attempts = e.attempts().unwrap_or(1);
                let error = e.into_inner();
                error!("Login failed after {} attempt(s): {}", attempts, error);
                return Err(LoginFailure {
                    driver,
                    error,
                    state: None,
                });
            }
        };

        match state.clone().into_result() {
            Ok(()) => {
                info!("Successfully logged in");
                self.save_cookies(&driver).await;
                Ok(SessionHandle::new(driver, SessionOrigin::FreshLogin))
            }
            Err(error) => Err(LoginFailure {
                driver,
                error,
                state: Some(state),
            }),
        }
    }

    /// Run one full login attempt and return the terminal state
    pub async fn login<D: PageDriver + ?Sized>(
        &self,
        driver: &D,
    ) -> Result<LoginState, ScrapeError> {
        let mut state = LoginState::Unauthenticated;
        while !state.is_terminal() {
            state = self.advance(driver, state).await?;
            debug!(?state, "Login transition");
        }

        match &state {
            LoginState::ChallengeDetected { url } => {
                error!("Login blocked - security challenge detected at {}", url)
            }
            LoginState::Rejected { message } => error!(
                "Login failed - {}",
                message.as_deref().unwrap_or("no outcome indicator before timeout")
            ),
            _ => {}
        }

        Ok(state)
    }

    /// Perform one transition of the login machine
    pub async fn advance<D: PageDriver + ?Sized>(
        &self,
        driver: &D,
        state: LoginState,
    ) -> Result<LoginState, ScrapeError> {
        match state {
            LoginState::Unauthenticated => Ok(LoginState::Navigating),
            LoginState::Navigating => self.open_login_form(driver).await,
            LoginState::CredentialsEntered => {
                if !driver.click(&self.site.submit_selector).await? {
                    return Err(ScrapeError::Network(format!(
                        "login submit control '{}' not found",
                        self.site.submit_selector
                    )));
                }
                Ok(LoginState::Submitted)
            }
            LoginState::Submitted => self.await_outcome(driver).await,
            terminal => Ok(terminal),
        }
    }

    async fn open_login_form<D: PageDriver + ?Sized>(
        &self,
        driver: &D,
    ) -> Result<LoginState, ScrapeError> {
        info!("Navigating to login page: {}", self.site.login_url);
        driver.navigate(&self.site.login_url).await?;

        let groups = [
            self.site.challenge.to_probes(),
            self.site.landing.to_probes(),
            vec![Probe::Selector(self.site.username_selector.clone())],
        ];
        match driver.wait_for_any(&groups, self.element_wait).await? {
            Some(0) => Ok(LoginState::ChallengeDetected {
                url: driver.current_url().await?,
            }),
            // Already signed in
            Some(1) => Ok(LoginState::Authenticated),
            Some(_) => {
                self.enter_credentials(driver).await?;
                Ok(LoginState::CredentialsEntered)
            }
            None => Err(ScrapeError::Network(format!(
                "login form '{}' did not appear within {:?}",
                self.site.username_selector, self.element_wait
            ))),
        }
    }

    async fn enter_credentials<D: PageDriver + ?Sized>(
        &self,
        driver: &D,
    ) -> Result<(), ScrapeError> {
        debug!("Entering credentials");
        self.type_slowly(driver, &self.site.username_selector, &self.username)
            .await?;
        self.type_slowly(driver, &self.site.password_selector, self.password.expose())
            .await
    }

    /// Type one character at a time with a random pause after each
    async fn type_slowly<D: PageDriver + ?Sized>(
        &self,
        driver: &D,
        selector: &str,
        text: &str,
    ) -> Result<(), ScrapeError> {
        driver.clear(selector).await?;
        let mut buf = [0u8; 4];
        for c in text.chars() {
            driver.type_text(selector, c.encode_utf8(&mut buf)).await?;
            self.pacing.after_keystroke().await;
        }
        Ok(())
    }

    async fn await_outcome<D: PageDriver + ?Sized>(
        &self,
        driver: &D,
    ) -> Result<LoginState, ScrapeError> {
        let groups = [
            self.site.challenge.to_probes(),
            self.site.landing.to_probes(),
            self.site.login_error.to_probes(),
        ];
        match driver.wait_for_any(&groups, self.element_wait).await? {
            Some(0) => Ok(LoginState::ChallengeDetected {
                url: driver.current_url().await?,
            }),
            Some(1) => Ok(LoginState::Authenticated),
            _ => Ok(LoginState::Rejected {
                message: self.capture_error_text(driver).await,
            }),
        }
    }

    async fn capture_error_text<D: PageDriver + ?Sized>(&self, driver: &D) -> Option<String> {
        for selector in &self.site.login_error_text_selectors {
            if let Ok(Some(text)) = driver.read_text(selector).await {
                let text = text.trim();
                if !text.is_empty() {
                    return Some(text.to_string());
                }
            }
        }
        None
    }

    /// Check that the current page still belongs to the authenticated session.
    ///
    /// Runs on result pages, so only URL-path and selector indicators apply.
    pub async fn verify_session<D: PageDriver + ?Sized>(
        &self,
        driver: &D,
    ) -> Result<(), ScrapeError> {
        for probe in self.site.challenge.to_page_probes() {
            if driver.probe(&probe).await.unwrap_or(false) {
                return Err(ScrapeError::AuthChallenge {
                    url: driver.current_url().await.unwrap_or_default(),
                });
            }
        }
        for probe in self.site.session_lost.to_page_probes() {
            if driver.probe(&probe).await.unwrap_or(false) {
                let url = driver.current_url().await.unwrap_or_default();
                self.forget_cookies();
                return Err(ScrapeError::SessionLost(format!("redirected to {}", url)));
            }
        }
        Ok(())
    }

    async fn try_restore<D: PageDriver + ?Sized>(&self, driver: &D) -> bool {
        let Some(store) = &self.cookie_store else {
            return false;
        };
        let Some(cookies) = store.load() else {
            return false;
        };

        debug!("Trying {} saved cookies", cookies.len());
        if let Err(e) = driver.set_cookies(&cookies).await {
            warn!("Could not install saved cookies: {}", e);
            return false;
        }
        if let Err(e) = driver.navigate(&self.site.landing_url).await {
            warn!("Could not load landing page with saved cookies: {}", e);
            return false;
        }

        let groups = [self.site.challenge.to_probes(), self.site.landing.to_probes()];
        match driver.wait_for_any(&groups, self.element_wait).await {
            Ok(Some(1)) => true,
            _ => {
                info!("Saved session is no longer valid, logging in");
                self.forget_cookies();
                false
            }
        }
    }

    fn forget_cookies(&self) {
        if let Some(store) = &self.cookie_store {
            if let Err(e) = store.clear() {
                warn!("Failed to remove saved session cookies: {}", e);
            }
        }
    }

    async fn save_cookies<D: PageDriver + ?Sized>(&self, driver: &D) {
        let Some(store) = &self.cookie_store else {
            return;
        };
        match driver.cookies().await {
            Ok(cookies) if !cookies.is_empty() => {
                if let Err(e) = store.save(&cookies) {
                    warn!("Failed to save session cookies: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to read session cookies: {}", e),
        }
    }
}
