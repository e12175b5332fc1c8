//! S3-compatible object store (MinIO and friends)

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use reqwest::Client;
use tracing::{info, warn};
use url::Url;

use super::ArtifactStore;
use super::download::{fetch_image, image_client};
use crate::asset::{AssetFormat, FORMAT_PARAM, MAX_VARIANT, VARIANT_PARAM, query_value, with_variant};
use crate::utils::S3_BUCKET;

/// Connection settings read from `S3_*` environment variables
#[derive(Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_key: String,
    pub use_ssl: bool,
    pub bucket: String,
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("use_ssl", &self.use_ssl)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl S3Settings {
    /// Read `S3_ENDPOINT`, `S3_ACCESS_KEY_ID`, `S3_SECRET_KEY` and `S3_USE_SSL`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let endpoint = lookup("S3_ENDPOINT").unwrap_or_default();
        if endpoint.trim().is_empty() {
            bail!("S3_ENDPOINT must be set for the s3 store");
        }
        let use_ssl = match lookup("S3_USE_SSL").as_deref().map(parse_bool) {
            Some(Some(value)) => value,
            _ => {
                info!("S3_USE_SSL env not set, defaulting to 'true'");
                true
            }
        };
        Ok(Self {
            endpoint,
            access_key_id: lookup("S3_ACCESS_KEY_ID").unwrap_or_default(),
            secret_key: lookup("S3_SECRET_KEY").unwrap_or_default(),
            use_ssl,
            bucket: S3_BUCKET.to_string(),
        })
    }

    /// Endpoint as a URL; a bare `host:port` gets a scheme from `use_ssl`
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            let scheme = if self.use_ssl { "https" } else { "http" };
            format!("{scheme}://{}", self.endpoint)
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

/// Uploads each image as an object keyed by asset id
pub struct S3Store {
    s3: S3Client,
    http: Client,
    bucket: String,
    variant_param: String,
    variant_value: String,
}

impl S3Store {
    /// Connect and create the bucket if it does not exist yet
    pub async fn connect(settings: &S3Settings) -> Result<Self> {
        let store = Self::new(settings)?;
        store.ensure_bucket().await?;
        Ok(store)
    }

    /// Build the client without touching the endpoint
    pub fn new(settings: &S3Settings) -> Result<Self> {
        let credentials = Credentials::new(
            settings.access_key_id.clone(),
            settings.secret_key.clone(),
            None,
            None,
            "feed-harvest-env",
        );
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(settings.endpoint_url())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Ok(Self {
            s3: S3Client::from_conf(config),
            http: image_client()?,
            bucket: settings.bucket.clone(),
            variant_param: VARIANT_PARAM.to_string(),
            variant_value: MAX_VARIANT.to_string(),
        })
    }

    /// Query parameter and value that select the preferred rendition
    #[must_use]
    pub fn with_variant(mut self, param: impl Into<String>, value: impl Into<String>) -> Self {
        self.variant_param = param.into();
        self.variant_value = value.into();
        self
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Locator of the preferred rendition, tried before the locator itself
    #[must_use]
    pub fn preferred_rendition(&self, locator: &Url) -> Url {
        with_variant(locator, &self.variant_param, &self.variant_value)
    }

    /// Object tags: the format and the variant the locator asked for
    #[must_use]
    pub fn object_tagging(&self, locator: &Url) -> String {
        let format_tag = query_value(locator, FORMAT_PARAM).unwrap_or_default();
        let variant = query_value(locator, &self.variant_param).unwrap_or_default();
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair(FORMAT_PARAM, &format_tag)
            .append_pair(&self.variant_param, &variant)
            .finish()
    }

    async fn ensure_bucket(&self) -> Result<()> {
        match self.s3.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                self.s3
                    .create_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .with_context(|| format!("Failed to create bucket {}", self.bucket))?;
                info!(bucket = %self.bucket, "Created bucket");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to check bucket {}", self.bucket)),
        }
    }
}

#[async_trait]
impl ArtifactStore for S3Store {
    async fn store(&self, locator: &Url, asset_id: &str) -> Result<()> {
        let preferred = self.preferred_rendition(locator);
        let response = match fetch_image(&self.http, &preferred).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %preferred, id = asset_id, "Failed to fetch preferred rendition, falling back: {e:#}");
                fetch_image(&self.http, locator).await?
            }
        };
        // Buffered whole: put_object needs a known length and images are small.
        let body = response
            .bytes()
            .await
            .context("Failed to read image body")?;

        let format_tag = query_value(locator, FORMAT_PARAM).unwrap_or_default();
        let content_type = AssetFormat::from_tag(&format_tag).content_type();
        let tagging = self.object_tagging(locator);

        self.s3
            .put_object()
            .bucket(&self.bucket)
            .key(asset_id)
            .content_type(content_type)
            .tagging(tagging)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("Failed to upload {asset_id}"))?;
        Ok(())
    }
}
