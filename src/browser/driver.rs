//! Chromium implementation of the session driver
//!
//! Interception uses the CDP Fetch domain: `Fetch.enable` with one image-class
//! request pattern, a `Fetch.requestPaused` listener that republishes matches
//! through the [`Interceptor`], and `Fetch.continueRequest` so the page still
//! gets its image.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, DisableParams, EnableParams, EventRequestPaused, RequestPattern,
    RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::ResourceType;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use regex::Regex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::session::{
    InterceptRule, Interceptor, RaceWinner, ResourceClass, Selector, SessionDriver,
};

const RACE_POLL_INTERVAL: Duration = Duration::from_millis(200);

const HIDE_AUTOMATION_JS: &str = r"
    Object.defineProperty(navigator, 'webdriver', { get: () => false });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
";

/// Wrap a page operation with an explicit timeout
///
/// Distinguishes a timeout from the operation's own failure in the message.
pub async fn with_page_timeout<F, T>(operation: F, timeout_secs: u64, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(Duration::from_secs(timeout_secs), operation).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!(
            "{operation_name} timeout after {timeout_secs} seconds"
        )),
    }
}

/// Session driver over one chromiumoxide page
pub struct ChromiumDriver {
    page: Page,
    timeout_secs: u64,
}

impl ChromiumDriver {
    pub async fn new(page: Page, timeout_secs: u64) -> Result<Self> {
        page.execute(AddScriptToEvaluateOnNewDocumentParams {
            source: HIDE_AUTOMATION_JS.to_string(),
            include_command_line_api: None,
            world_name: None,
            run_immediately: None,
        })
        .await
        .context("Failed to inject automation shims")?;
        Ok(Self { page, timeout_secs })
    }

    #[must_use]
    pub fn page(&self) -> &Page {
        &self.page
    }

    async fn goto(&self, url: &str) -> Result<()> {
        with_page_timeout(
            async {
                self.page
                    .goto(url)
                    .await
                    .with_context(|| format!("Failed to navigate to {url}"))?;
                self.page
                    .wait_for_navigation()
                    .await
                    .context("Failed to wait for page load")?;
                Ok(())
            },
            self.timeout_secs,
            "Navigation",
        )
        .await
    }

    /// Absent elements and lookup failures both read as `None`
    async fn lookup(&self, selector: &Selector) -> Result<Option<Element>> {
        match selector {
            Selector::Css { css } => Ok(self.page.find_element(css.as_str()).await.ok()),
            Selector::XPath { xpath } => Ok(self.page.find_xpath(xpath.as_str()).await.ok()),
            Selector::Text { css, pattern } => {
                let re = Regex::new(pattern)
                    .with_context(|| format!("Invalid text pattern '{pattern}'"))?;
                let Ok(candidates) = self.page.find_elements(css.as_str()).await else {
                    return Ok(None);
                };
                for element in candidates {
                    if let Ok(Some(text)) = element.inner_text().await
                        && re.is_match(&text)
                    {
                        return Ok(Some(element));
                    }
                }
                Ok(None)
            }
        }
    }

    async fn require(&self, selector: &Selector) -> Result<Element> {
        self.lookup(selector)
            .await?
            .ok_or_else(|| anyhow!("element not found: {selector}"))
    }
}

#[async_trait]
impl SessionDriver for ChromiumDriver {
    type Element = Element;
    type Rule = ChromiumRule;

    async fn open(&mut self, url: &str) -> Result<()> {
        info!("Opening {url}");
        self.goto(url).await
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        debug!("Navigating to {url}");
        self.goto(url).await
    }

    async fn current_location(&self) -> Result<String> {
        let url = self.page.url().await.context("Failed to read page url")?;
        Ok(url.unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn find(&self, selector: &Selector) -> Result<Option<Element>> {
        with_page_timeout(self.lookup(selector), self.timeout_secs, "Element lookup").await
    }

    async fn fill(&self, selector: &Selector, text: &str) -> Result<()> {
        with_page_timeout(
            async {
                let element = self.require(selector).await?;
                element.click().await?;
                element.type_str(text).await?;
                Ok(())
            },
            self.timeout_secs,
            "Fill",
        )
        .await
    }

    async fn click(&self, selector: &Selector) -> Result<()> {
        with_page_timeout(
            async {
                self.require(selector).await?.click().await?;
                Ok(())
            },
            self.timeout_secs,
            "Click",
        )
        .await
    }

    async fn click_and_await_navigation(&self, selector: &Selector) -> Result<()> {
        with_page_timeout(
            async {
                self.require(selector).await?.click().await?;
                self.page
                    .wait_for_navigation()
                    .await
                    .context("Failed to wait for navigation after click")?;
                Ok(())
            },
            self.timeout_secs,
            "Click and navigate",
        )
        .await
    }

    async fn race_first(&self, first: &Selector, second: &Selector) -> Result<RaceWinner> {
        loop {
            if self.lookup(first).await?.is_some() {
                return Ok(RaceWinner::First);
            }
            if self.lookup(second).await?.is_some() {
                return Ok(RaceWinner::Second);
            }
            tokio::time::sleep(RACE_POLL_INTERVAL).await;
        }
    }

    async fn last_child(&self, container_xpath: &str) -> Result<Option<Element>> {
        let xpath = format!("{container_xpath}/*[last()]");
        Ok(self.page.find_xpath(xpath).await.ok())
    }

    async fn scroll_into_view(&self, element: &Element) -> Result<()> {
        with_page_timeout(
            async {
                element.scroll_into_view().await?;
                Ok(())
            },
            self.timeout_secs,
            "Scroll into view",
        )
        .await
    }

    async fn element_has(&self, element: &Element, selector: &Selector) -> Result<bool> {
        match selector {
            Selector::Css { css } => Ok(element.find_element(css.as_str()).await.is_ok()),
            Selector::Text { css, pattern } => {
                let re = Regex::new(pattern)
                    .with_context(|| format!("Invalid text pattern '{pattern}'"))?;
                let Ok(children) = element.find_elements(css.as_str()).await else {
                    return Ok(false);
                };
                for child in children {
                    if let Ok(Some(text)) = child.inner_text().await
                        && re.is_match(&text)
                    {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Selector::XPath { xpath } => {
                let xpath = serde_json::to_string(xpath)?;
                let js = format!(
                    "function() {{ return document.evaluate({xpath}, this, null, \
                     XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue !== null; }}"
                );
                let returns = element.call_js_fn(js, false).await?;
                Ok(returns
                    .result
                    .value
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false))
            }
        }
    }

    async fn scroll_by(&self, dy: f64) -> Result<()> {
        self.page
            .evaluate(format!("window.scrollBy(0, {dy})"))
            .await
            .context("Failed to scroll window")?;
        Ok(())
    }

    async fn install_interceptor(&mut self, interceptor: Arc<Interceptor>) -> Result<ChromiumRule> {
        let resource_type = match interceptor.resource_class() {
            ResourceClass::Image => ResourceType::Image,
        };

        // Subscribe before enabling so no paused request is missed.
        let mut paused = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .context("Failed to subscribe to Fetch.requestPaused")?;

        self.page
            .execute(EnableParams {
                patterns: Some(vec![RequestPattern {
                    url_pattern: Some(interceptor.pattern().to_string()),
                    resource_type: Some(resource_type),
                    request_stage: Some(RequestStage::Request),
                }]),
                handle_auth_requests: None,
            })
            .await
            .context("Failed to enable Fetch interception")?;
        info!(pattern = interceptor.pattern(), "Interception rule installed");

        let page = self.page.clone();
        let listener = tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let url = event.request.url.clone();
                // Count the request before anything is awaited so the barrier sees it.
                let guard = interceptor
                    .matches(&url)
                    .then(|| interceptor.begin());
                let page = page.clone();
                let request_id = event.request_id.clone();
                tokio::spawn(async move {
                    if let Some(guard) = guard {
                        guard.publish(&url).await;
                    } else {
                        trace!(url = %url, "paused request outside pattern, continuing");
                    }
                    if let Err(e) = page.execute(ContinueRequestParams::new(request_id)).await {
                        debug!(url = %url, "Failed to continue intercepted request: {e}");
                    }
                });
            }
            debug!("Fetch.requestPaused stream ended");
        });

        Ok(ChromiumRule {
            page: self.page.clone(),
            listener: Some(listener),
        })
    }
}

/// Live Fetch-domain interception on one page
pub struct ChromiumRule {
    page: Page,
    listener: Option<JoinHandle<()>>,
}

#[async_trait]
impl InterceptRule for ChromiumRule {
    async fn stop(&mut self) -> Result<()> {
        let Some(listener) = self.listener.take() else {
            return Ok(());
        };
        listener.abort();
        self.page
            .execute(DisableParams::default())
            .await
            .context("Failed to disable Fetch interception")?;
        info!("Interception rule stopped");
        Ok(())
    }
}

impl Drop for ChromiumRule {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}
