//! Artifact stores and the job ledger
//!
//! The pipeline only sees the two traits below. Both must be safe to call
//! from every worker at once; the pipeline adds no locking around them.

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

pub mod download;
pub mod file_store;
pub mod s3_store;
pub mod sqlite_ledger;

pub use file_store::FileStore;
pub use s3_store::{S3Settings, S3Store};
pub use sqlite_ledger::{FailureRecord, SqliteLedger};

/// Durable store-by-reference for one image
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch `locator` and persist it under `asset_id`
    async fn store(&self, locator: &Url, asset_id: &str) -> Result<()>;
}

/// Per-asset download outcomes keyed by asset id
///
/// At most one downloaded record exists per id. Failure records accumulate
/// and never block a later retry.
#[async_trait]
pub trait JobLedger: Send + Sync {
    async fn has_downloaded(&self, asset_id: &str) -> Result<bool>;

    async fn mark_downloaded(&self, asset_id: &str, locator: &Url) -> Result<()>;

    /// Record a failed attempt; an empty `asset_id` is stored as `unknown`
    async fn mark_failed(&self, asset_id: &str, locator: &str, reason: &str) -> Result<()>;
}
