//! Interception rule: republish matched image requests onto the asset feed
//!
//! The driver owns the network plumbing and calls into an `Interceptor` once
//! per matched request. Each call goes through an [`InFlight`] guard:
//!
//! 1. `Interceptor::begin()` bumps the in-flight count. The driver calls it
//!    synchronously from its event loop, before anything is awaited.
//! 2. `InFlight::publish()` rewrites the variant tag and sends the
//!    `AssetReference` on the feed. It waits while the feed is full.
//! 3. Dropping the guard decrements the count and wakes barrier waiters when
//!    it reaches zero.
//!
//! The scroll state waits on [`Interceptor::wait_idle`] between scrolling and
//! checking the content marker, so every image a scroll triggered has been
//! captured before the step is judged.
//!
//! Drivers hand over absolute request URLs. One that does not parse has no
//! asset id to record a ledger failure under, so it is dropped, logged and
//! counted in [`Interceptor::rejected`].

use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};
use url::Url;

use super::profile::SiteProfile;
use crate::asset::{
    AssetReference, META_ORIGINAL_VARIANT, META_VARIANT, query_value, with_variant,
};

/// Network resource class a rule is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    Image,
}

/// Compile a glob pattern into an anchored regex
///
/// `*` matches any run of characters; everything else is literal.
pub fn compile_glob_pattern(pattern: &str) -> Result<Regex> {
    let regex_pattern = regex::escape(pattern).replace(r"\*", ".*");
    let anchored = format!("^{regex_pattern}$");
    Regex::new(&anchored).map_err(|e| anyhow!("Invalid glob pattern '{pattern}': {e}"))
}

/// Shared state of one interception rule
pub struct Interceptor {
    pattern: String,
    matcher: Regex,
    resource_class: ResourceClass,
    variant_param: String,
    variant_value: String,
    in_flight: AtomicUsize,
    idle: Notify,
    feed: Mutex<Option<mpsc::Sender<AssetReference>>>,
    published: AtomicU64,
    rejected: AtomicU64,
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptor")
            .field("pattern", &self.pattern)
            .field("in_flight", &self.in_flight())
            .field("published", &self.published())
            .field("rejected", &self.rejected())
            .field("feed_open", &self.is_open())
            .finish()
    }
}

impl Interceptor {
    pub fn new(profile: &SiteProfile, feed: mpsc::Sender<AssetReference>) -> Result<Self> {
        Ok(Self {
            pattern: profile.asset_pattern.clone(),
            matcher: compile_glob_pattern(&profile.asset_pattern)?,
            resource_class: ResourceClass::Image,
            variant_param: profile.variant_param.clone(),
            variant_value: profile.variant_value.clone(),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            feed: Mutex::new(Some(feed)),
            published: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    /// Glob pattern handed to the driver's request filter
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub fn resource_class(&self) -> ResourceClass {
        self.resource_class
    }

    /// Whether `url` falls under this rule
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        self.matcher.is_match(url)
    }

    /// Rewrite an intercepted request locator into a max-fidelity asset reference
    ///
    /// The original variant tag (empty when absent) is kept as provenance.
    pub fn rewrite(&self, raw: &str) -> Result<AssetReference, url::ParseError> {
        let original = Url::parse(raw)?;
        let original_variant = query_value(&original, &self.variant_param).unwrap_or_default();
        let rewritten = with_variant(&original, &self.variant_param, &self.variant_value);

        let mut metadata = BTreeMap::new();
        metadata.insert(META_VARIANT.to_string(), self.variant_value.clone());
        metadata.insert(META_ORIGINAL_VARIANT.to_string(), original_variant);

        Ok(AssetReference::from_locator(rewritten, metadata))
    }

    /// Register one matched request as in flight
    #[must_use]
    pub fn begin(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight {
            interceptor: Arc::clone(self),
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of references successfully sent on the feed
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Number of intercepted locators dropped because they did not parse
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.feed.lock().is_some()
    }

    /// Wait until no interception is in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before reading the count so a concurrent decrement cannot slip between.
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Drop the feed sender; the pipeline sees end-of-feed once it drains
    ///
    /// Callers must stop the driver rule and `wait_idle()` first.
    pub fn close_feed(&self) {
        if self.feed.lock().take().is_some() {
            debug!("asset feed closed after {} references", self.published());
        }
    }

    async fn publish(&self, raw: &str) {
        let asset = match self.rewrite(raw) {
            Ok(asset) => asset,
            Err(e) => {
                warn!(url = raw, "dropping unparseable intercepted locator: {e}");
                self.rejected.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        // Clone out of the lock so the send can wait without holding it.
        let sender = self.feed.lock().clone();
        let Some(sender) = sender else {
            debug!(url = raw, "feed already closed, dropping intercepted asset");
            return;
        };

        if sender.send(asset).await.is_err() {
            warn!(url = raw, "asset feed receiver dropped");
            return;
        }
        self.published.fetch_add(1, Ordering::SeqCst);
    }

    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Guard for one in-flight interception
///
/// Dropping it, published or not, releases the barrier slot.
pub struct InFlight {
    interceptor: Arc<Interceptor>,
}

impl InFlight {
    /// Rewrite and publish the intercepted locator, then release the slot
    pub async fn publish(self, raw: &str) {
        self.interceptor.publish(raw).await;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.interceptor.finish_one();
    }
}
