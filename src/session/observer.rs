//! State-change observers
//!
//! Observers are plain callbacks invoked synchronously with the name of each
//! entered state. A panicking observer is caught and logged so it cannot tear
//! down the driving loop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::warn;

/// Callback invoked with a human-readable state name
pub type StateObserver = Box<dyn Fn(&str) + Send + Sync>;

/// Ordered list of state observers
#[derive(Default)]
pub struct Observers {
    hooks: Vec<StateObserver>,
}

impl Observers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: StateObserver) {
        self.hooks.push(hook);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Call every observer in registration order
    pub fn notify(&self, state: &str) {
        for (index, hook) in self.hooks.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| hook(state))).is_err() {
                warn!(observer = index, state, "state observer panicked; ignoring");
            }
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.hooks.len())
            .finish()
    }
}
