//! Local directory artifact store

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

use super::ArtifactStore;
use super::download::{fetch_image, image_client, stream_to_file};
use crate::asset::{AssetFormat, FORMAT_PARAM, VARIANT_PARAM, query_value, without_variant};

/// Writes each image to `<dir>/<asset_id>.<format>`
pub struct FileStore {
    dir: PathBuf,
    client: Client,
    variant_param: String,
}

impl FileStore {
    /// Create the store, creating `dir` if needed
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create image directory {}", dir.display()))?;
        Ok(Self {
            dir,
            client: image_client()?,
            variant_param: VARIANT_PARAM.to_string(),
        })
    }

    /// Query parameter stripped from locators before fetching
    #[must_use]
    pub fn with_variant_param(mut self, param: impl Into<String>) -> Self {
        self.variant_param = param.into();
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Target path for an asset
    ///
    /// The extension is the known format named by the `format` query value,
    /// `jpg` otherwise. The raw query value never reaches the path.
    #[must_use]
    pub fn path_for(&self, locator: &Url, asset_id: &str) -> PathBuf {
        let tag = query_value(locator, FORMAT_PARAM).unwrap_or_default();
        let ext = AssetFormat::from_tag(&tag).extension();
        self.dir.join(format!("{asset_id}.{ext}"))
    }
}

#[async_trait]
impl ArtifactStore for FileStore {
    async fn store(&self, locator: &Url, asset_id: &str) -> Result<()> {
        // The server picks its default rendition when no variant is requested.
        let source = without_variant(locator, &self.variant_param);
        let path = self.path_for(&source, asset_id);

        let response = fetch_image(&self.client, &source).await?;
        let bytes = stream_to_file(response, &path).await?;
        debug!(id = asset_id, path = %path.display(), bytes, "Stored image file");
        Ok(())
    }
}
