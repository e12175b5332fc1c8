//! Session states, terminal outcomes and the error taxonomy

use std::fmt;

/// State of the feed session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Open the landing page and decide whether a login is needed
    Root,
    /// Reach the login surface, then submit credentials
    Login,
    /// Install the interception rule and load the feed view
    FeedNav,
    /// Scroll the feed until it stops yielding new content
    Scrolling,
    /// Terminal: a fatal fault ended the session
    Error,
    /// Terminal: the feed was scrolled to exhaustion
    Done,
}

impl SessionState {
    /// Human-readable name reported to state observers
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Root => "Navigating to root",
            Self::Login => "Navigating to login",
            Self::FeedNav => "Navigating to feed",
            Self::Scrolling => "Scrolling feed",
            Self::Error => "Error",
            Self::Done => "Done",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Done)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Observer label emitted when the login state starts submitting credentials
pub const LOGGING_IN_LABEL: &str = "Logging in";

/// Faults that end the session in the `Error` state
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The driver failed while performing `step`
    #[error("{step}: {source:#}")]
    Driver {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The login page loaded without its marker element
    #[error("failed to navigate to login: login marker not present")]
    LoginSurfaceMissing,

    /// Credentials were submitted but the session did not land on home
    #[error("not at home url: {0}")]
    UnexpectedLocation(String),

    /// The feed view showed its retry banner instead of content
    #[error("failed to load feed")]
    FeedLoadFailed,

    /// The shared cancellation token fired
    #[error("session cancelled")]
    Cancelled,
}

impl SessionError {
    pub(crate) fn driver(step: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Driver { step, source }
    }
}

/// How a session run ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// Consecutive scroll failures reached the retry ceiling: end of collection
    Exhausted {
        /// Successful scroll steps over the whole run
        scrolls: u64,
        /// Asset references published on the feed
        published: u64,
    },
    /// The machine went through `Error`
    Failed(SessionError),
}

impl SessionOutcome {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}
