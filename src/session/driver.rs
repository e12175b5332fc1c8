//! Remote session driver abstraction
//!
//! The state machine only talks to the browser through this trait. The
//! production implementation is [`crate::browser::ChromiumDriver`]; tests
//! use a scripted driver.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::interceptor::Interceptor;
use super::profile::Selector;

/// Which of two raced observations resolved first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceWinner {
    First,
    Second,
}

/// Handle to an installed interception rule
#[async_trait]
pub trait InterceptRule: Send {
    /// Stop accepting new matches
    ///
    /// Idempotent: stopping a stopped rule is `Ok(())`. Interceptions already
    /// in flight keep running; the caller drains them.
    async fn stop(&mut self) -> Result<()>;
}

/// Operations the session state machine needs from a remote session
#[async_trait]
pub trait SessionDriver: Send + Sync {
    /// Element handle type returned by queries
    type Element: Send + Sync;

    /// Rule handle type returned by `install_interceptor`
    type Rule: InterceptRule;

    /// Open the session at `url` and wait for it to settle
    async fn open(&mut self, url: &str) -> Result<()>;

    /// Navigate the open session to `url` and wait for it to settle
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Current location of the session
    async fn current_location(&self) -> Result<String>;

    /// Look up one element; `Ok(None)` means absent
    async fn find(&self, selector: &Selector) -> Result<Option<Self::Element>>;

    /// Type `text` into the element matched by `selector`
    async fn fill(&self, selector: &Selector, text: &str) -> Result<()>;

    /// Click the element matched by `selector`
    async fn click(&self, selector: &Selector) -> Result<()>;

    /// Click the element matched by `selector` and wait for the resulting navigation
    async fn click_and_await_navigation(&self, selector: &Selector) -> Result<()>;

    /// Resolve once either selector is present
    ///
    /// Has no timeout of its own; callers race it against cancellation.
    async fn race_first(&self, first: &Selector, second: &Selector) -> Result<RaceWinner>;

    /// Last child element of the XPath container, `Ok(None)` when it has none
    async fn last_child(&self, container_xpath: &str) -> Result<Option<Self::Element>>;

    async fn scroll_into_view(&self, element: &Self::Element) -> Result<()>;

    /// Whether `element` contains a descendant matching `selector`
    async fn element_has(&self, element: &Self::Element, selector: &Selector) -> Result<bool>;

    /// Scroll the viewport vertically by `dy` pixels (negative is up)
    async fn scroll_by(&self, dy: f64) -> Result<()>;

    /// Start routing requests matching the interceptor's pattern through it
    ///
    /// For every match the driver must call `interceptor.begin()` before
    /// awaiting anything, publish through the guard, and then let the
    /// original request continue.
    async fn install_interceptor(&mut self, interceptor: Arc<Interceptor>) -> Result<Self::Rule>;
}
