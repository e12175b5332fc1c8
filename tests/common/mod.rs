//! Shared fakes for the feed_harvest test suite
//!
//! `MockDriver` plays a scripted remote session. Each scroll step pops one
//! `ScrollStep` that says which image requests scrolling "triggers" and
//! whether the last element turns out to be real content.

#![allow(dead_code)]

use anyhow::{Result, bail};
use async_trait::async_trait;
use feed_harvest::session::{
    InterceptRule, Interceptor, RaceWinner, Selector, SessionDriver, SiteProfile,
};
use feed_harvest::storage::{ArtifactStore, JobLedger};
use feed_harvest::AssetReference;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const USERNAME: &str = "alice";

/// A media locator in the shape the default profile intercepts
pub fn media_url(id: &str, variant: &str) -> String {
    format!("https://pbs.twimg.com/media/{id}?format=jpg&name={variant}")
}

pub fn asset(raw: &str) -> AssetReference {
    AssetReference::from_locator(Url::parse(raw).unwrap(), BTreeMap::new())
}

/// Outcome of one scripted scroll step
#[derive(Debug, Clone, Default)]
pub struct ScrollStep {
    /// Image requests the scroll triggers
    pub images: Vec<String>,
    /// Whether the last element carries the content marker
    pub has_content: bool,
    /// The feed container has no children at all
    pub empty_container: bool,
}

impl ScrollStep {
    pub fn content(images: Vec<String>) -> Self {
        Self {
            images,
            has_content: true,
            empty_container: false,
        }
    }

    pub fn ok() -> Self {
        Self::content(Vec::new())
    }

    pub fn placeholder() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct MockElement {
    pub images: Vec<String>,
    pub has_content: bool,
}

/// What the remote session does when driven
#[derive(Clone)]
pub struct MockScript {
    /// Location after opening the root page
    pub root_location: String,
    /// Location after the credentials are submitted
    pub after_login_location: String,
    pub login_marker: bool,
    /// `None` never resolves the feed race
    pub feed_winner: Option<RaceWinner>,
    /// Popped once per scroll step; an empty queue yields placeholders
    pub steps: Vec<ScrollStep>,
    /// How long each triggered request takes before it is published
    pub publish_delay: Duration,
    /// Cancel the token once this many scroll attempts have started
    pub cancel_after: Option<(usize, CancellationToken)>,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            root_location: "https://x.com/".to_string(),
            after_login_location: "https://x.com/home".to_string(),
            login_marker: true,
            feed_winner: Some(RaceWinner::First),
            steps: Vec::new(),
            publish_delay: Duration::from_millis(5),
            cancel_after: None,
        }
    }
}

/// Observable side of a `MockDriver`
#[derive(Default)]
pub struct MockState {
    pub calls: Mutex<Vec<String>>,
    pub installs: AtomicUsize,
    pub stops: AtomicUsize,
    pub rule_active: AtomicBool,
    pub attempts: AtomicUsize,
    /// Marker checks that ran while an interception was still in flight
    pub barrier_violations: AtomicUsize,
}

impl MockState {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls.lock().iter().position(|c| c == call)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

pub struct MockDriver {
    script: MockScript,
    steps: Mutex<VecDeque<ScrollStep>>,
    location: Mutex<String>,
    interceptor: Mutex<Option<Arc<Interceptor>>>,
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new(script: MockScript) -> Self {
        Self {
            steps: Mutex::new(script.steps.iter().cloned().collect()),
            location: Mutex::new(String::new()),
            interceptor: Mutex::new(None),
            state: Arc::new(MockState::default()),
            script,
        }
    }

    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

pub struct MockRule {
    state: Arc<MockState>,
    stopped: bool,
}

#[async_trait]
impl InterceptRule for MockRule {
    async fn stop(&mut self) -> Result<()> {
        if !self.stopped {
            self.stopped = true;
            self.state.rule_active.store(false, Ordering::SeqCst);
            self.state.stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionDriver for MockDriver {
    type Element = MockElement;
    type Rule = MockRule;

    async fn open(&mut self, url: &str) -> Result<()> {
        self.state.record(format!("open {url}"));
        *self.location.lock() = self.script.root_location.clone();
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.state.record(format!("navigate {url}"));
        *self.location.lock() = url.to_string();
        Ok(())
    }

    async fn current_location(&self) -> Result<String> {
        Ok(self.location.lock().clone())
    }

    async fn find(&self, selector: &Selector) -> Result<Option<MockElement>> {
        self.state.record(format!("find {selector}"));
        Ok(self.script.login_marker.then(|| MockElement {
            images: Vec::new(),
            has_content: false,
        }))
    }

    async fn fill(&self, selector: &Selector, text: &str) -> Result<()> {
        self.state.record(format!("fill {selector} {text}"));
        Ok(())
    }

    async fn click(&self, selector: &Selector) -> Result<()> {
        self.state.record(format!("click {selector}"));
        Ok(())
    }

    async fn click_and_await_navigation(&self, selector: &Selector) -> Result<()> {
        self.state.record(format!("submit {selector}"));
        *self.location.lock() = self.script.after_login_location.clone();
        Ok(())
    }

    async fn race_first(&self, _first: &Selector, _second: &Selector) -> Result<RaceWinner> {
        match self.script.feed_winner {
            Some(winner) => Ok(winner),
            None => std::future::pending().await,
        }
    }

    async fn last_child(&self, _container_xpath: &str) -> Result<Option<MockElement>> {
        let step = self.steps.lock().pop_front().unwrap_or_default();
        if step.empty_container {
            return Ok(None);
        }
        Ok(Some(MockElement {
            images: step.images,
            has_content: step.has_content,
        }))
    }

    async fn scroll_into_view(&self, element: &MockElement) -> Result<()> {
        let attempt = self.state.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let interceptor = self.interceptor.lock().clone();
        if self.state.rule_active.load(Ordering::SeqCst)
            && let Some(interceptor) = interceptor
        {
            for raw in &element.images {
                if !interceptor.matches(raw) {
                    continue;
                }
                let guard = interceptor.begin();
                let raw = raw.clone();
                let delay = self.script.publish_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    guard.publish(&raw).await;
                });
            }
        }

        if let Some((at, token)) = &self.script.cancel_after
            && attempt >= *at
        {
            token.cancel();
        }
        Ok(())
    }

    async fn element_has(&self, element: &MockElement, _selector: &Selector) -> Result<bool> {
        let in_flight = self
            .interceptor
            .lock()
            .as_ref()
            .map_or(0, |i| i.in_flight());
        if in_flight > 0 {
            self.state.barrier_violations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(element.has_content)
    }

    async fn scroll_by(&self, dy: f64) -> Result<()> {
        self.state.record(format!("scroll_by {dy}"));
        Ok(())
    }

    async fn install_interceptor(&mut self, interceptor: Arc<Interceptor>) -> Result<MockRule> {
        self.state.record("install_interceptor");
        if self.state.rule_active.swap(true, Ordering::SeqCst) {
            bail!("rule already active");
        }
        self.state.installs.fetch_add(1, Ordering::SeqCst);
        *self.interceptor.lock() = Some(interceptor);
        Ok(MockRule {
            state: Arc::clone(&self.state),
            stopped: false,
        })
    }
}

pub fn profile() -> SiteProfile {
    SiteProfile::default()
}

/// In-memory job ledger
#[derive(Default)]
pub struct MemoryLedger {
    pub downloaded: Mutex<BTreeMap<String, Url>>,
    pub failed: Mutex<Vec<(String, String, String)>>,
    /// Number of times `mark_downloaded` was called
    pub downloaded_writes: AtomicUsize,
}

impl MemoryLedger {
    pub fn failures(&self) -> Vec<(String, String, String)> {
        self.failed.lock().clone()
    }

    pub fn downloaded_ids(&self) -> Vec<String> {
        self.downloaded.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl JobLedger for MemoryLedger {
    async fn has_downloaded(&self, asset_id: &str) -> Result<bool> {
        Ok(self.downloaded.lock().contains_key(asset_id))
    }

    async fn mark_downloaded(&self, asset_id: &str, locator: &Url) -> Result<()> {
        self.downloaded_writes.fetch_add(1, Ordering::SeqCst);
        self.downloaded
            .lock()
            .entry(asset_id.to_string())
            .or_insert_with(|| locator.clone());
        Ok(())
    }

    async fn mark_failed(&self, asset_id: &str, locator: &str, reason: &str) -> Result<()> {
        self.failed.lock().push((
            asset_id.to_string(),
            locator.to_string(),
            reason.to_string(),
        ));
        Ok(())
    }
}

/// Job ledger whose every call fails, as with a locked or missing database
#[derive(Default)]
pub struct BrokenLedger {
    pub calls: AtomicUsize,
}

#[async_trait]
impl JobLedger for BrokenLedger {
    async fn has_downloaded(&self, _asset_id: &str) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("database is locked")
    }

    async fn mark_downloaded(&self, _asset_id: &str, _locator: &Url) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("database is locked")
    }

    async fn mark_failed(&self, _asset_id: &str, _locator: &str, _reason: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("database is locked")
    }
}

/// Artifact store that records calls and fails for chosen ids
#[derive(Default)]
pub struct RecordingStore {
    pub calls: Mutex<Vec<(Url, String)>>,
    pub fail_ids: HashSet<String>,
    pub delay: Duration,
}

impl RecordingStore {
    pub fn failing(ids: &[&str]) -> Self {
        Self {
            fail_ids: ids.iter().map(|id| (*id).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, id)| id.clone()).collect()
    }
}

#[async_trait]
impl ArtifactStore for RecordingStore {
    async fn store(&self, locator: &Url, asset_id: &str) -> Result<()> {
        self.calls
            .lock()
            .push((locator.clone(), asset_id.to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_ids.contains(asset_id) {
            bail!("upstream returned 500");
        }
        Ok(())
    }
}
