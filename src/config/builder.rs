//! Type-safe builder for `HarvestConfig` using the typestate pattern
//!
//! `build()` only exists once credentials have been supplied, so a config
//! without a login can never reach the session.

use anyhow::{Result, anyhow};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::Duration;

use super::types::{
    BrowserOptions, Credentials, HarvestConfig, PipelineTuning, ScrollTuning, StoreKind,
};
use crate::session::SiteProfile;
use crate::session::interceptor::compile_glob_pattern;
use crate::utils::{
    DEFAULT_DB_PATH, DEFAULT_IMAGE_DIR, DEFAULT_ITEM_TIMEOUT_SECS, DEFAULT_JITTER_PX,
    DEFAULT_NUM_WORKERS, DEFAULT_OPERATION_TIMEOUT_SECS, DEFAULT_SCROLL_BACKOFF_SECS,
    DEFAULT_SCROLL_RETRIES, DEFAULT_SCROLL_STEP_TIMEOUT_SECS, PROGRESS_LOG_INTERVAL,
};

// Type states for the builder
pub struct WithCredentials;

pub struct HarvestConfigBuilder<State = ()> {
    pub(crate) credentials: Option<Credentials>,
    pub(crate) profile: SiteProfile,
    pub(crate) scroll: ScrollTuning,
    pub(crate) pipeline: PipelineTuning,
    pub(crate) store_kind: StoreKind,
    pub(crate) image_dir: PathBuf,
    pub(crate) db_path: PathBuf,
    pub(crate) wipe_on_completion: bool,
    pub(crate) browser: BrowserOptions,
    pub(crate) _phantom: PhantomData<State>,
}

impl Default for HarvestConfigBuilder<()> {
    fn default() -> Self {
        Self {
            credentials: None,
            profile: SiteProfile::default(),
            scroll: ScrollTuning {
                num_retries: DEFAULT_SCROLL_RETRIES,
                backoff: Duration::from_secs(DEFAULT_SCROLL_BACKOFF_SECS),
                step_timeout: Duration::from_secs(DEFAULT_SCROLL_STEP_TIMEOUT_SECS),
                jitter_px: DEFAULT_JITTER_PX,
            },
            pipeline: PipelineTuning {
                num_workers: DEFAULT_NUM_WORKERS,
                item_timeout: Duration::from_secs(DEFAULT_ITEM_TIMEOUT_SECS),
                progress_interval: PROGRESS_LOG_INTERVAL,
            },
            store_kind: StoreKind::File,
            image_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            wipe_on_completion: false,
            browser: BrowserOptions {
                headless: false,
                profile_dir: None,
                operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            },
            _phantom: PhantomData,
        }
    }
}

impl HarvestConfig {
    /// Create a builder for configuring a `HarvestConfig` with a fluent interface
    #[must_use]
    pub fn builder() -> HarvestConfigBuilder<()> {
        HarvestConfigBuilder::default()
    }
}

impl HarvestConfigBuilder<()> {
    pub fn credentials(
        self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> HarvestConfigBuilder<WithCredentials> {
        HarvestConfigBuilder {
            credentials: Some(Credentials::new(username, password)),
            profile: self.profile,
            scroll: self.scroll,
            pipeline: self.pipeline,
            store_kind: self.store_kind,
            image_dir: self.image_dir,
            db_path: self.db_path,
            wipe_on_completion: self.wipe_on_completion,
            browser: self.browser,
            _phantom: PhantomData,
        }
    }
}

// Build method only available when credentials are set
impl HarvestConfigBuilder<WithCredentials> {
    pub fn build(self) -> Result<HarvestConfig> {
        let credentials = self
            .credentials
            .ok_or_else(|| anyhow!("credentials are required"))?;
        if credentials.username.trim().is_empty() {
            return Err(anyhow!("username must not be empty"));
        }
        if self.pipeline.num_workers == 0 {
            return Err(anyhow!("num_workers must be at least 1"));
        }
        if self.scroll.num_retries == 0 {
            return Err(anyhow!("num_retries must be at least 1"));
        }
        // Fail at startup rather than when the feed view is reached.
        compile_glob_pattern(&self.profile.asset_pattern)?;

        Ok(HarvestConfig {
            credentials,
            profile: self.profile,
            scroll: self.scroll,
            pipeline: self.pipeline,
            store_kind: self.store_kind,
            image_dir: self.image_dir,
            db_path: self.db_path,
            wipe_on_completion: self.wipe_on_completion,
            browser: self.browser,
        })
    }
}

// Optional settings, available in any state
impl<State> HarvestConfigBuilder<State> {
    #[must_use]
    pub fn profile(mut self, profile: SiteProfile) -> Self {
        self.profile = profile;
        self
    }

    #[must_use]
    pub fn num_retries(mut self, retries: u32) -> Self {
        self.scroll.num_retries = retries;
        self
    }

    #[must_use]
    pub fn scroll_backoff(mut self, backoff: Duration) -> Self {
        self.scroll.backoff = backoff;
        self
    }

    #[must_use]
    pub fn scroll_step_timeout(mut self, timeout: Duration) -> Self {
        self.scroll.step_timeout = timeout;
        self
    }

    #[must_use]
    pub fn jitter_px(mut self, px: f64) -> Self {
        self.scroll.jitter_px = px;
        self
    }

    #[must_use]
    pub fn num_workers(mut self, workers: usize) -> Self {
        self.pipeline.num_workers = workers;
        self
    }

    #[must_use]
    pub fn item_timeout(mut self, timeout: Duration) -> Self {
        self.pipeline.item_timeout = timeout;
        self
    }

    #[must_use]
    pub fn progress_interval(mut self, every: u64) -> Self {
        self.pipeline.progress_interval = every;
        self
    }

    #[must_use]
    pub fn store_kind(mut self, kind: StoreKind) -> Self {
        self.store_kind = kind;
        self
    }

    #[must_use]
    pub fn image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_dir = dir.into();
        self
    }

    #[must_use]
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    #[must_use]
    pub fn wipe_on_completion(mut self, wipe: bool) -> Self {
        self.wipe_on_completion = wipe;
        self
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.browser.headless = headless;
        self
    }

    #[must_use]
    pub fn browser_profile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.browser.profile_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn operation_timeout_secs(mut self, secs: u64) -> Self {
        self.browser.operation_timeout_secs = secs;
        self
    }
}
