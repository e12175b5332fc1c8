//! Site profile: every location, selector and pattern the session needs
//!
//! The state machine never hardcodes markup. All of it lives here so a DOM
//! change on the remote side is a profile edit, and tests can drive the
//! machine against a synthetic profile.

use serde::{Deserialize, Serialize};

use crate::asset::{MAX_VARIANT, VARIANT_PARAM};

/// Base location of the feed site
pub const DEFAULT_BASE_URL: &str = "https://x.com";

/// How an element is located in the remote DOM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Selector {
    /// CSS selector
    Css { css: String },
    /// XPath expression
    XPath { xpath: String },
    /// First element matching `css` whose inner text matches the regex `pattern`
    Text { css: String, pattern: String },
}

impl Selector {
    #[must_use]
    pub fn css(css: impl Into<String>) -> Self {
        Self::Css { css: css.into() }
    }

    #[must_use]
    pub fn xpath(xpath: impl Into<String>) -> Self {
        Self::XPath {
            xpath: xpath.into(),
        }
    }

    #[must_use]
    pub fn text(css: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Text {
            css: css.into(),
            pattern: pattern.into(),
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Css { css } => write!(f, "css({css})"),
            Self::XPath { xpath } => write!(f, "xpath({xpath})"),
            Self::Text { css, pattern } => write!(f, "text({css} ~ /{pattern}/)"),
        }
    }
}

/// Locations, selectors and interception settings for one feed site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteProfile {
    pub base_url: String,
    pub login_path: String,
    /// Feed path relative to `base_url`; `{username}` is substituted
    pub feed_path: String,
    /// Substring of the location that proves an authenticated home surface
    pub home_marker: String,

    pub login_marker: Selector,
    pub identifier_input: Selector,
    pub identifier_submit: Selector,
    pub secret_input: Selector,
    pub secret_submit: Selector,

    pub feed_container: Selector,
    pub retry_banner: Selector,
    /// XPath container whose children are the feed's content elements
    pub feed_items: String,
    /// Marker that proves a content element is real content, not a placeholder
    pub content_marker: Selector,

    /// Glob (`*` = any run) matched against intercepted image requests
    pub asset_pattern: String,
    pub variant_param: String,
    pub variant_value: String,
}

const FEED_SECTION_XPATH: &str =
    "/html/body/div[1]/div/div/div[2]/main/div/div/div/div[1]/div/div[3]/div/div/section/div/div";

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            login_path: "/i/flow/login".to_string(),
            feed_path: "/{username}/likes".to_string(),
            home_marker: "home".to_string(),
            login_marker: Selector::text("span", "Sign in to X"),
            identifier_input: Selector::css("input[name=text]"),
            identifier_submit: Selector::css("button.css-175oi2r:nth-child(6)"),
            secret_input: Selector::css("input[name=password]"),
            secret_submit: Selector::css(".r-19yznuf"),
            feed_container: Selector::xpath(FEED_SECTION_XPATH),
            retry_banner: Selector::text("span", "Retry"),
            feed_items: FEED_SECTION_XPATH.to_string(),
            content_marker: Selector::css("div[data-testid=tweetText]>span"),
            asset_pattern: "https://pbs.twimg.com/media/*format=jpg*".to_string(),
            variant_param: VARIANT_PARAM.to_string(),
            variant_value: MAX_VARIANT.to_string(),
        }
    }
}

impl SiteProfile {
    #[must_use]
    pub fn login_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.login_path)
    }

    #[must_use]
    pub fn feed_url(&self, username: &str) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.feed_path.replace("{username}", username)
        )
    }

    /// True when `location` is the authenticated home surface
    #[must_use]
    pub fn is_home(&self, location: &str) -> bool {
        location.contains(&self.home_marker)
    }
}
