//! Ingestion pipeline: a fixed worker pool draining the asset feed
//!
//! A single forwarding loop copies references from the feed into a relay
//! channel. `num_workers` workers compete for relay items. When the feed
//! closes the relay closes too, and every worker finishes what it holds
//! before exiting; nothing already received is dropped.

use anyhow::anyhow;
use dashmap::DashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::asset::{AssetReference, VARIANT_PARAM, without_variant};
use crate::config::PipelineTuning;
use crate::storage::{ArtifactStore, JobLedger};

/// What happened to one feed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Downloaded,
    /// Already downloaded, or being downloaded by another worker
    Duplicate,
    Failed,
}

/// Totals for one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub seen: u64,
    pub downloaded: u64,
    pub duplicates: u64,
    pub failed: u64,
    /// Counted as downloaded, but the ledger write failed
    pub unrecorded: u64,
}

#[derive(Default)]
struct Counters {
    seen: AtomicU64,
    downloaded: AtomicU64,
    duplicates: AtomicU64,
    failed: AtomicU64,
    unrecorded: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: ItemOutcome) {
        let counter = match outcome {
            ItemOutcome::Downloaded => &self.downloaded,
            ItemOutcome::Duplicate => &self.duplicates,
            ItemOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            seen: self.seen.load(Ordering::Relaxed),
            downloaded: self.downloaded.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            unrecorded: self.unrecorded.load(Ordering::Relaxed),
        }
    }
}

pub struct IngestPipeline {
    store: Arc<dyn ArtifactStore>,
    ledger: Arc<dyn JobLedger>,
    tuning: PipelineTuning,
    variant_param: String,
    counters: Counters,
    /// Asset ids currently being stored by some worker
    claims: DashSet<String>,
}

/// Releases an asset id claim when the worker is done with it
struct Claim<'a> {
    claims: &'a DashSet<String>,
    id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.id);
    }
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        ledger: Arc<dyn JobLedger>,
        tuning: PipelineTuning,
    ) -> Self {
        assert!(tuning.num_workers > 0, "pipeline needs at least one worker");
        Self {
            store,
            ledger,
            tuning,
            variant_param: VARIANT_PARAM.to_string(),
            counters: Counters::default(),
            claims: DashSet::new(),
        }
    }

    /// Query parameter stripped from locators before they are recorded as downloaded
    #[must_use]
    pub fn with_variant_param(mut self, param: impl Into<String>) -> Self {
        self.variant_param = param.into();
        self
    }

    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// Drain `feed` until it closes and every worker has finished
    pub async fn run(
        self: Arc<Self>,
        cancel: CancellationToken,
        mut feed: mpsc::Receiver<AssetReference>,
    ) -> PipelineStats {
        let workers = self.tuning.num_workers;
        let (relay_tx, relay_rx) = mpsc::channel::<AssetReference>(workers);
        let relay_rx = Arc::new(Mutex::new(relay_rx));

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let pipeline = Arc::clone(&self);
                let relay_rx = Arc::clone(&relay_rx);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        // Hold the lock only while waiting for the next item.
                        let next = relay_rx.lock().await.recv().await;
                        let Some(asset) = next else { break };
                        pipeline.process_image(&asset, &cancel).await;
                    }
                    debug!(worker, "worker done");
                })
            })
            .collect();

        while let Some(asset) = feed.recv().await {
            if relay_tx.send(asset).await.is_err() {
                error!("all pipeline workers exited while the feed was open");
                break;
            }
        }
        drop(relay_tx);

        for (worker, result) in futures::future::join_all(handles)
            .await
            .into_iter()
            .enumerate()
        {
            if let Err(e) = result {
                error!(worker, "pipeline worker panicked: {e}");
            }
        }

        let stats = self.stats();
        info!(
            seen = stats.seen,
            downloaded = stats.downloaded,
            duplicates = stats.duplicates,
            failed = stats.failed,
            unrecorded = stats.unrecorded,
            "Image processor completed"
        );
        stats
    }

    /// Dedup, store and record one asset reference
    pub async fn process_image(
        &self,
        asset: &AssetReference,
        cancel: &CancellationToken,
    ) -> ItemOutcome {
        let outcome = self.process_inner(asset, cancel).await;
        self.counters.record(outcome);
        outcome
    }

    async fn process_inner(&self, asset: &AssetReference, cancel: &CancellationToken) -> ItemOutcome {
        let locator = asset.locator();
        let n = self.counters.seen.fetch_add(1, Ordering::Relaxed) + 1;
        if self.tuning.progress_interval > 0 && n % self.tuning.progress_interval == 0 {
            info!("{n}th image from feed: {locator}");
        }

        let id = match asset.asset_id() {
            Ok(id) => id,
            Err(e) => {
                if let Err(le) = self
                    .ledger
                    .mark_failed("", locator.as_str(), &format!("parse url: {e}"))
                    .await
                {
                    error!(url = %locator, "mark as failed: {le:#}");
                }
                return ItemOutcome::Failed;
            }
        };

        let Some(_claim) = self.claim(&id) else {
            debug!(id = %id, "image already in progress on another worker");
            return ItemOutcome::Duplicate;
        };

        match self.ledger.has_downloaded(&id).await {
            Ok(true) => {
                debug!(id = %id, "duplicate image");
                return ItemOutcome::Duplicate;
            }
            Ok(false) => {}
            Err(e) => warn!(id = %id, "failed to check exists: {e:#}"),
        }

        let stored = tokio::select! {
            () = cancel.cancelled() => Err(anyhow!("cancelled")),
            result = tokio::time::timeout(self.tuning.item_timeout, self.store.store(locator, &id)) => {
                result.unwrap_or_else(|_| Err(anyhow!("timed out after {:?}", self.tuning.item_timeout)))
            }
        };

        if let Err(e) = stored {
            let reason = format!("download failed: {e:#}");
            debug!(id = %id, url = %locator, "{reason}");
            if let Err(le) = self
                .ledger
                .mark_failed(&id, locator.as_str(), &reason)
                .await
            {
                error!(id = %id, url = %locator, "mark as failed: {le:#}");
            }
            return ItemOutcome::Failed;
        }

        let normalized = without_variant(locator, &self.variant_param);
        if let Err(e) = self.ledger.mark_downloaded(&id, &normalized).await {
            self.counters.unrecorded.fetch_add(1, Ordering::Relaxed);
            error!(id = %id, url = %normalized, "stored but not recorded as downloaded: {e:#}");
        }
        ItemOutcome::Downloaded
    }

    fn claim(&self, id: &str) -> Option<Claim<'_>> {
        self.claims.insert(id.to_string()).then(|| Claim {
            claims: &self.claims,
            id: id.to_string(),
        })
    }
}
