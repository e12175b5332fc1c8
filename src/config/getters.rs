//! Getter methods for `HarvestConfig`

use std::path::{Path, PathBuf};

use super::types::{BrowserOptions, Credentials, HarvestConfig, PipelineTuning, ScrollTuning, StoreKind};
use crate::session::SiteProfile;

impl HarvestConfig {
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    #[must_use]
    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    #[must_use]
    pub fn scroll(&self) -> ScrollTuning {
        self.scroll
    }

    #[must_use]
    pub fn pipeline(&self) -> PipelineTuning {
        self.pipeline
    }

    #[must_use]
    pub fn store_kind(&self) -> StoreKind {
        self.store_kind
    }

    #[must_use]
    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[must_use]
    pub fn wipe_on_completion(&self) -> bool {
        self.wipe_on_completion
    }

    #[must_use]
    pub fn browser(&self) -> &BrowserOptions {
        &self.browser
    }

    #[must_use]
    pub fn headless(&self) -> bool {
        self.browser.headless
    }

    /// Chrome profile directory, falling back to the platform data dir
    ///
    /// The profile must persist between runs so an existing login is reused.
    #[must_use]
    pub fn browser_profile_dir(&self) -> PathBuf {
        self.browser.profile_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("feed-harvest")
                .join("chrome-profile")
        })
    }
}
