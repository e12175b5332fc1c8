//! Core configuration types for a harvest run
//!
//! `HarvestConfig` bundles everything the session, the pipeline and the
//! storage backends need. Build it with [`HarvestConfig::builder`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::session::SiteProfile;

/// Login credentials for the feed site
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Retry and pacing settings for the scrolling state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollTuning {
    /// Consecutive failures that end the session as exhausted
    pub num_retries: u32,
    /// Linear backoff unit; attempt `n` sleeps `n * backoff`
    pub backoff: Duration,
    /// Bound on one scroll step
    pub step_timeout: Duration,
    /// Jitter distance per attempt, in pixels
    pub jitter_px: f64,
}

/// Worker pool settings for the ingestion pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTuning {
    pub num_workers: usize,
    pub item_timeout: Duration,
    /// Log a progress line every N items; 0 disables it
    pub progress_interval: u64,
}

/// Which artifact store receives downloaded images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    File,
    S3,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "s3" => Ok(Self::S3),
            other => Err(anyhow::anyhow!("must be one of [file s3], got '{other}'")),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::S3 => f.write_str("s3"),
        }
    }
}

/// Browser launch options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserOptions {
    pub headless: bool,
    /// Persistent Chrome profile; keeps the login between runs
    pub profile_dir: Option<PathBuf>,
    pub operation_timeout_secs: u64,
}

/// Main configuration for one harvest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    pub(crate) credentials: Credentials,
    pub(crate) profile: SiteProfile,
    pub(crate) scroll: ScrollTuning,
    pub(crate) pipeline: PipelineTuning,
    pub(crate) store_kind: StoreKind,
    pub(crate) image_dir: PathBuf,
    pub(crate) db_path: PathBuf,
    /// Delete the ledger database once the run completes
    pub(crate) wipe_on_completion: bool,
    pub(crate) browser: BrowserOptions,
}
