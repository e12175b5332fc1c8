//! The feed session state machine
//!
//! `FeedSession` owns the remote session driver and walks it through
//! `Root -> Login -> FeedNav -> Scrolling` until the feed is exhausted or a
//! fatal fault moves it to `Error`. Each state has one async handler that
//! returns the next state; the machine never stores callables as states.

use anyhow::{Context, Result, anyhow, bail};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::driver::{InterceptRule, RaceWinner, SessionDriver};
use super::interceptor::Interceptor;
use super::observer::{Observers, StateObserver};
use super::profile::SiteProfile;
use super::state::{LOGGING_IN_LABEL, SessionError, SessionOutcome, SessionState};
use crate::asset::AssetReference;
use crate::config::{Credentials, HarvestConfig, ScrollTuning};
use crate::utils::FEED_CAPACITY;

pub struct FeedSession<D: SessionDriver> {
    driver: D,
    profile: SiteProfile,
    credentials: Credentials,
    tuning: ScrollTuning,
    interceptor: Arc<Interceptor>,
    rule: Option<D::Rule>,
    feed: Option<mpsc::Receiver<AssetReference>>,
    observers: Observers,
    state: SessionState,
    scrolls: u64,
}

impl<D: SessionDriver> FeedSession<D> {
    /// Create a session in `Root` with a fresh asset feed of capacity `FEED_CAPACITY`
    pub fn new(
        driver: D,
        profile: SiteProfile,
        credentials: Credentials,
        tuning: ScrollTuning,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let interceptor = Interceptor::new(&profile, tx).context("invalid asset pattern")?;
        Ok(Self {
            driver,
            profile,
            credentials,
            tuning,
            interceptor: Arc::new(interceptor),
            rule: None,
            feed: Some(rx),
            observers: Observers::new(),
            state: SessionState::Root,
            scrolls: 0,
        })
    }

    pub fn from_config(driver: D, config: &HarvestConfig) -> Result<Self> {
        Self::new(
            driver,
            config.profile().clone(),
            config.credentials().clone(),
            config.scroll(),
        )
    }

    /// Register a callback invoked with the name of each entered state
    #[must_use]
    pub fn with_state_observer(mut self, observer: StateObserver) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn add_state_observer(&mut self, observer: StateObserver) {
        self.observers.push(observer);
    }

    /// Hand the receiving end of the asset feed to the consumer
    ///
    /// Returns `None` once taken. A feed that is never taken is dropped at
    /// shutdown so pending publishes do not block the drain.
    pub fn take_feed(&mut self) -> Option<mpsc::Receiver<AssetReference>> {
        self.feed.take()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Drive the session to a terminal state
    ///
    /// On return the rule is stopped, every in-flight interception has
    /// published, and the feed is closed.
    pub async fn run(&mut self, cancel: &CancellationToken) -> SessionOutcome {
        assert!(
            self.interceptor.is_open(),
            "FeedSession::run called on a session whose feed is already closed"
        );

        let mut state = SessionState::Root;
        let mut failure = None;
        loop {
            if state.is_terminal() {
                self.shutdown().await;
                self.enter(state);
                break;
            }
            self.enter(state);

            let next = if cancel.is_cancelled() {
                Err(SessionError::Cancelled)
            } else {
                self.step(state, cancel).await
            };
            state = match next {
                Ok(next) => next,
                Err(e) => {
                    failure = Some(e);
                    SessionState::Error
                }
            };
        }

        match failure {
            Some(e) => {
                error!(error = %e, "Feed session failed");
                SessionOutcome::Failed(e)
            }
            None => {
                let published = self.interceptor.published();
                info!(
                    scrolls = self.scrolls,
                    published,
                    rejected = self.interceptor.rejected(),
                    "Feed exhausted"
                );
                SessionOutcome::Exhausted {
                    scrolls: self.scrolls,
                    published,
                }
            }
        }
    }

    fn enter(&mut self, state: SessionState) {
        self.state = state;
        debug!(state = %state, "entering state");
        self.observers.notify(state.label());
    }

    async fn step(
        &mut self,
        state: SessionState,
        cancel: &CancellationToken,
    ) -> Result<SessionState, SessionError> {
        match state {
            SessionState::Root => self.visit_root().await,
            SessionState::Login => self.log_in().await,
            SessionState::FeedNav => self.open_feed(cancel).await,
            SessionState::Scrolling => self.scroll_feed(cancel).await,
            SessionState::Error | SessionState::Done => Ok(state),
        }
    }

    async fn visit_root(&mut self) -> Result<SessionState, SessionError> {
        self.driver
            .open(&self.profile.base_url)
            .await
            .map_err(SessionError::driver("open root"))?;
        let location = self
            .driver
            .current_location()
            .await
            .map_err(SessionError::driver("read location"))?;

        if self.profile.is_home(&location) {
            info!("Already logged in");
            Ok(SessionState::FeedNav)
        } else {
            Ok(SessionState::Login)
        }
    }

    async fn log_in(&mut self) -> Result<SessionState, SessionError> {
        let login_url = self.profile.login_url();
        self.driver
            .navigate(&login_url)
            .await
            .map_err(SessionError::driver("navigate to login"))?;
        self.driver
            .find(&self.profile.login_marker)
            .await
            .map_err(SessionError::driver("find login marker"))?
            .ok_or(SessionError::LoginSurfaceMissing)?;

        self.observers.notify(LOGGING_IN_LABEL);
        self.submit_credentials()
            .await
            .map_err(SessionError::driver("submit credentials"))?;

        let location = self
            .driver
            .current_location()
            .await
            .map_err(SessionError::driver("read location"))?;
        if self.profile.is_home(&location) {
            Ok(SessionState::FeedNav)
        } else {
            Err(SessionError::UnexpectedLocation(location))
        }
    }

    async fn submit_credentials(&self) -> Result<()> {
        let profile = &self.profile;
        self.driver
            .fill(&profile.identifier_input, &self.credentials.username)
            .await?;
        self.driver.click(&profile.identifier_submit).await?;
        self.driver
            .fill(&profile.secret_input, &self.credentials.password)
            .await?;
        self.driver
            .click_and_await_navigation(&profile.secret_submit)
            .await
    }

    async fn open_feed(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<SessionState, SessionError> {
        assert!(
            self.rule.is_none(),
            "interception rule installed while another rule is still active"
        );
        // The rule must be live before navigation or the first images are missed.
        let rule = self
            .driver
            .install_interceptor(Arc::clone(&self.interceptor))
            .await
            .map_err(SessionError::driver("install interceptor"))?;
        self.rule = Some(rule);

        let feed_url = self.profile.feed_url(&self.credentials.username);
        self.driver
            .navigate(&feed_url)
            .await
            .map_err(SessionError::driver("navigate to feed"))?;

        let winner = tokio::select! {
            () = cancel.cancelled() => return Err(SessionError::Cancelled),
            raced = self.driver.race_first(&self.profile.feed_container, &self.profile.retry_banner) => {
                raced.map_err(SessionError::driver("wait for feed"))?
            }
        };
        match winner {
            RaceWinner::First => Ok(SessionState::Scrolling),
            RaceWinner::Second => Err(SessionError::FeedLoadFailed),
        }
    }

    async fn scroll_feed(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<SessionState, SessionError> {
        assert!(
            self.rule.is_some(),
            "entered Scrolling without an active interception rule"
        );

        let mut failures: u32 = 0;
        while failures < self.tuning.num_retries {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }

            let outcome = tokio::time::timeout(self.tuning.step_timeout, self.scroll_to_last())
                .await
                .unwrap_or_else(|_| Err(anyhow!("scroll step timed out")));
            let reason = match outcome {
                Ok(()) => {
                    failures = 0;
                    self.scrolls += 1;
                    continue;
                }
                Err(e) => e,
            };

            failures += 1;
            if failures > 1 {
                warn!(attempt = failures, "Scroll failed: {reason:#}");
            } else {
                debug!(attempt = failures, "Scroll failed: {reason:#}");
            }
            if failures >= self.tuning.num_retries {
                break;
            }

            self.jitter(failures).await;
            let backoff = self.tuning.backoff * failures;
            tokio::select! {
                () = cancel.cancelled() => return Err(SessionError::Cancelled),
                () = tokio::time::sleep(backoff) => {}
            }
        }

        info!(retries = failures, "No new content after retries, ending scroll");
        Ok(SessionState::Done)
    }

    /// One scroll step: bring the last element into view and prove it is real content
    async fn scroll_to_last(&self) -> Result<()> {
        let last = self
            .driver
            .last_child(&self.profile.feed_items)
            .await?
            .ok_or_else(|| anyhow!("feed container has no content elements"))?;
        self.driver.scroll_into_view(&last).await?;

        // Every image this scroll triggered has to be published before the step is judged.
        self.interceptor.wait_idle().await;

        if !self
            .driver
            .element_has(&last, &self.profile.content_marker)
            .await?
        {
            bail!("last element has no content marker");
        }
        Ok(())
    }

    async fn jitter(&self, attempt: u32) {
        let distance = f64::from(attempt) * self.tuning.jitter_px;
        if let Err(e) = self.driver.scroll_by(-distance).await {
            debug!("jitter up failed: {e:#}");
        }
        if let Err(e) = self.driver.scroll_by(distance).await {
            debug!("jitter down failed: {e:#}");
        }
    }

    async fn shutdown(&mut self) {
        if let Some(mut rule) = self.rule.take()
            && let Err(e) = rule.stop().await
        {
            error!("Failed to stop interception rule: {e:#}");
        }
        // Nobody will drain an untaken feed; dropping it unblocks pending publishes.
        drop(self.feed.take());
        self.interceptor.wait_idle().await;
        self.interceptor.close_feed();
    }
}
