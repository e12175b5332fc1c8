//! Feed session: state machine, interception rule and driver seam

pub mod driver;
pub mod interceptor;
pub mod machine;
pub mod observer;
pub mod profile;
pub mod state;

pub use driver::{InterceptRule, RaceWinner, SessionDriver};
pub use interceptor::{InFlight, Interceptor, ResourceClass, compile_glob_pattern};
pub use machine::FeedSession;
pub use observer::{Observers, StateObserver};
pub use profile::{Selector, SiteProfile};
pub use state::{LOGGING_IN_LABEL, SessionError, SessionOutcome, SessionState};
