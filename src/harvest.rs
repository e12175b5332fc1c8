//! Run orchestration: wire the session, the pipeline and the backends together

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::browser::{ChromiumDriver, launch_browser};
use crate::config::{HarvestConfig, StoreKind};
use crate::pipeline::{IngestPipeline, PipelineStats};
use crate::session::{FeedSession, SessionDriver, SessionOutcome};
use crate::storage::{ArtifactStore, FileStore, JobLedger, S3Settings, S3Store, SqliteLedger};

/// Everything a finished run reports
#[derive(Debug)]
pub struct HarvestSummary {
    pub session: SessionOutcome,
    pub pipeline: PipelineStats,
    /// Downloaded rows in the ledger after the run, including earlier runs
    pub downloaded_total: Option<i64>,
}

/// Build the artifact store selected by the config
pub async fn build_store(config: &HarvestConfig) -> Result<Arc<dyn ArtifactStore>> {
    let profile = config.profile();
    match config.store_kind() {
        StoreKind::File => {
            let store = FileStore::new(config.image_dir())
                .await?
                .with_variant_param(profile.variant_param.clone());
            info!(dir = %store.dir().display(), "Using file image store");
            Ok(Arc::new(store))
        }
        StoreKind::S3 => {
            let settings = S3Settings::from_env()?;
            let store = S3Store::connect(&settings)
                .await?
                .with_variant(profile.variant_param.clone(), profile.variant_value.clone());
            info!(bucket = store.bucket(), endpoint = %settings.endpoint_url(), "Using S3 image store");
            Ok(Arc::new(store))
        }
    }
}

/// Run one session against `pipeline` until the session ends and the pipeline drains
///
/// The pipeline consumes the session's feed on a spawned task. A session
/// failure does not cancel the pipeline; closing the feed is enough for it
/// to finish.
pub async fn harvest<D: SessionDriver>(
    session: &mut FeedSession<D>,
    pipeline: Arc<IngestPipeline>,
    cancel: &CancellationToken,
) -> (SessionOutcome, PipelineStats) {
    let Some(feed) = session.take_feed() else {
        panic!("harvest called on a session whose feed was already taken");
    };
    let processor = tokio::spawn(Arc::clone(&pipeline).run(cancel.clone(), feed));

    let outcome = session.run(cancel).await;

    let stats = match processor.await {
        Ok(stats) => stats,
        Err(e) => {
            error!("image processor task failed: {e}");
            pipeline.stats()
        }
    };
    (outcome, stats)
}

/// Launch the browser and harvest the configured feed
pub async fn run(config: &HarvestConfig, cancel: CancellationToken) -> Result<HarvestSummary> {
    let started = chrono::Utc::now();
    let store = build_store(config).await?;
    let ledger = SqliteLedger::open(config.db_path()).await?;
    let job_ledger: Arc<dyn JobLedger> = Arc::new(ledger.clone());

    let pipeline = Arc::new(
        IngestPipeline::new(store, job_ledger, config.pipeline())
            .with_variant_param(config.profile().variant_param.clone()),
    );

    let browser = launch_browser(config.browser(), config.browser_profile_dir()).await?;
    let result = async {
        let page = browser
            .browser()
            .new_page("about:blank")
            .await
            .context("Failed to open browser page")?;
        let driver = ChromiumDriver::new(page, config.browser().operation_timeout_secs).await?;
        let mut session = FeedSession::from_config(driver, config)?
            .with_state_observer(Box::new(|state: &str| info!(state, "State changed")));
        Ok::<_, anyhow::Error>(harvest(&mut session, pipeline, &cancel).await)
    }
    .await;

    let downloaded_total = match ledger.downloaded_count().await {
        Ok(n) => Some(n),
        Err(e) => {
            warn!("Failed to count downloaded images: {e:#}");
            None
        }
    };
    if config.wipe_on_completion() {
        if let Err(e) = ledger.wipe().await {
            error!("Failed to wipe DB: {e:#}");
        }
    } else {
        ledger.close().await;
        info!("Closed sqlite job store");
    }
    browser.close().await;
    info!("Closed browser");

    let (session, pipeline) = result?;
    let elapsed = chrono::Utc::now() - started;
    info!(
        started_at = %started.to_rfc3339(),
        elapsed_secs = elapsed.num_seconds(),
        attempted = pipeline.seen,
        downloaded = pipeline.downloaded,
        failed = pipeline.failed,
        unrecorded = pipeline.unrecorded,
        "Harvest finished"
    );
    Ok(HarvestSummary {
        session,
        pipeline,
        downloaded_total,
    })
}
