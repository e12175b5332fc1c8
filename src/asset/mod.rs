//! Asset references discovered while scrolling a feed
//!
//! An `AssetReference` is the only value that crosses from the session state
//! machine into the ingestion pipeline. Its dedup identity is the last path
//! segment of the locator. Query parameters select a rendition (size/quality)
//! and vary between sightings of the same asset, so they never take part in
//! the identity.
//!
//! # Locator precondition
//!
//! The remote source must place a stable, unique id in the final path segment
//! (`https://pbs.twimg.com/media/<id>?format=jpg&name=small`). Nothing here can
//! verify that assumption; a source that breaks it will collapse distinct
//! assets onto one id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Query parameter carrying the rendition format on the image CDN
pub const FORMAT_PARAM: &str = "format";

/// Query parameter selecting the rendition size on the image CDN
pub const VARIANT_PARAM: &str = "name";

/// Highest-fidelity rendition the CDN serves
pub const MAX_VARIANT: &str = "large";

/// Metadata key holding the variant tag requested after rewriting
pub const META_VARIANT: &str = "name";

/// Metadata key holding the variant tag of the intercepted request
pub const META_ORIGINAL_VARIANT: &str = "originalName";

/// Normalized image format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssetFormat {
    #[default]
    Unknown,
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl AssetFormat {
    /// Map a `format=` query value onto a format tag
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Self::Jpeg,
            "png" => Self::Png,
            "webp" => Self::Webp,
            "gif" => Self::Gif,
            _ => Self::Unknown,
        }
    }

    /// MIME type used when uploading to object storage
    ///
    /// Unknown formats are served as JPEG, which is what the CDN falls back to.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Webp => "image/webp",
            Self::Gif => "image/gif",
            Self::Jpeg | Self::Unknown => "image/jpeg",
        }
    }

    /// File extension used by the filesystem store
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Gif => "gif",
            Self::Jpeg | Self::Unknown => "jpg",
        }
    }
}

impl fmt::Display for AssetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Gif => "gif",
        };
        f.write_str(s)
    }
}

/// Reasons an asset id cannot be derived from a locator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetIdError {
    /// Locator has no hierarchical path (`data:`, `mailto:`, ...)
    #[error("locator has no path: {0}")]
    NoPath(String),

    /// Locator path ends without a usable segment (`/`, `/media/`)
    #[error("locator has no trailing path segment: {0}")]
    EmptySegment(String),
}

/// One discovered, not-yet-stored asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetReference {
    locator: Url,
    format: AssetFormat,
    metadata: BTreeMap<String, String>,
}

impl AssetReference {
    #[must_use]
    pub fn new(locator: Url, format: AssetFormat, metadata: BTreeMap<String, String>) -> Self {
        Self {
            locator,
            format,
            metadata,
        }
    }

    /// Build a reference whose format is read from the locator's `format=` parameter
    #[must_use]
    pub fn from_locator(locator: Url, metadata: BTreeMap<String, String>) -> Self {
        let format = query_value(&locator, FORMAT_PARAM)
            .map(|tag| AssetFormat::from_tag(&tag))
            .unwrap_or_default();
        Self::new(locator, format, metadata)
    }

    #[must_use]
    pub fn locator(&self) -> &Url {
        &self.locator
    }

    #[must_use]
    pub fn format(&self) -> AssetFormat {
        self.format
    }

    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Dedup identity of this asset
    pub fn asset_id(&self) -> Result<String, AssetIdError> {
        derive_asset_id(&self.locator)
    }
}

/// Derive the asset id from the last path segment of a locator
pub fn derive_asset_id(locator: &Url) -> Result<String, AssetIdError> {
    let mut segments = locator
        .path_segments()
        .ok_or_else(|| AssetIdError::NoPath(locator.to_string()))?;

    match segments.next_back() {
        Some(last) if !last.is_empty() => Ok(last.to_string()),
        _ => Err(AssetIdError::EmptySegment(locator.to_string())),
    }
}

/// Return a copy of `locator` with `param` set to `value`
///
/// Other query pairs keep their order; `param` is moved to the end. A locator
/// without `param` gains it.
#[must_use]
pub fn with_variant(locator: &Url, param: &str, value: &str) -> Url {
    let pairs: Vec<(String, String)> = locator
        .query_pairs()
        .filter(|(k, _)| k != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut rewritten = locator.clone();
    rewritten
        .query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair(param, value);
    rewritten
}

/// Return a copy of `locator` without `param`
///
/// This is the normalized form recorded in the ledger. An emptied query is
/// removed entirely so `https://host/a?` never appears.
#[must_use]
pub fn without_variant(locator: &Url, param: &str) -> Url {
    let pairs: Vec<(String, String)> = locator
        .query_pairs()
        .filter(|(k, _)| k != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut stripped = locator.clone();
    if pairs.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(pairs);
    }
    stripped
}

/// First value of a query parameter, if present
#[must_use]
pub fn query_value(locator: &Url, param: &str) -> Option<String> {
    locator
        .query_pairs()
        .find(|(k, _)| k == param)
        .map(|(_, v)| v.into_owned())
}
