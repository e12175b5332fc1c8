//! Configuration module for harvest runs
//!
//! This module provides the `HarvestConfig` struct and its type-safe builder
//! with validation and sensible defaults.

// Sub-modules
pub mod builder;
pub mod getters;
pub mod types;

// Re-exports for public API
pub use builder::{HarvestConfigBuilder, WithCredentials};
pub use types::{BrowserOptions, Credentials, HarvestConfig, PipelineTuning, ScrollTuning, StoreKind};
