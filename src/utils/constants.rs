//! Shared configuration constants for feed-harvest
//!
//! Default values used by the config builder, the CLI and the pipeline, kept
//! in one place to avoid magic numbers.

/// Consecutive failed scroll steps that mark the end of the feed
///
/// A long feed with a slow CDN stalls now and then; ten in a row without a
/// single successful step is the point where the end has been reached.
pub const DEFAULT_SCROLL_RETRIES: u32 = 10;

/// Base backoff after a failed scroll step, multiplied by the attempt number
pub const DEFAULT_SCROLL_BACKOFF_SECS: u64 = 2;

/// Upper bound for one scroll step (locate, scroll, barrier, marker check)
pub const DEFAULT_SCROLL_STEP_TIMEOUT_SECS: u64 = 20;

/// Pixels per attempt used for the up/down corrective jitter
pub const DEFAULT_JITTER_PX: f64 = 100.0;

/// Number of ingestion workers
pub const DEFAULT_NUM_WORKERS: usize = 5;

/// Per-item store timeout in seconds
pub const DEFAULT_ITEM_TIMEOUT_SECS: u64 = 60;

/// Every Nth feed item logs a progress line
pub const PROGRESS_LOG_INTERVAL: u64 = 100;

/// Capacity of the interception → pipeline feed
///
/// One slot couples the browser's network layer to the slowest worker, so a
/// lagging store throttles discovery instead of buffering without bound.
pub const FEED_CAPACITY: usize = 1;

/// Timeout for individual driver operations (navigation, queries, clicks)
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

/// Default directory for the filesystem store
pub const DEFAULT_IMAGE_DIR: &str = "./images";

/// Default sqlite ledger location
pub const DEFAULT_DB_PATH: &str = "./state.db";

/// Bucket used by the S3 store
pub const S3_BUCKET: &str = "x-likes";

/// Best-effort id recorded when an asset id cannot be derived
pub const UNKNOWN_ASSET_ID: &str = "unknown";

/// Chrome user agent string presented by the controlled browser
///
/// Update quarterly to stay within a reasonable version window.
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";
