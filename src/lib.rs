pub mod asset;
pub mod browser;
pub mod config;
pub mod harvest;
pub mod pipeline;
pub mod session;
pub mod storage;
pub mod utils;

pub use asset::{AssetFormat, AssetIdError, AssetReference, derive_asset_id};
pub use config::{HarvestConfig, StoreKind};
pub use harvest::{HarvestSummary, harvest, run};
pub use pipeline::{IngestPipeline, ItemOutcome, PipelineStats};
pub use session::{
    FeedSession, InterceptRule, Interceptor, SessionDriver, SessionError, SessionOutcome,
    SessionState, SiteProfile,
};
pub use storage::{ArtifactStore, JobLedger};
