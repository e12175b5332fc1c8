//! HTTP fetch helpers shared by the artifact stores

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::utils::CHROME_USER_AGENT;

const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";

/// Client used for every image download
pub fn image_client() -> Result<Client> {
    Client::builder()
        .user_agent(CHROME_USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")
}

/// GET `url` and reject anything but a 2xx response
pub async fn fetch_image(client: &Client, url: &Url) -> Result<reqwest::Response> {
    let response = client
        .get(url.as_str())
        .header("Accept", IMAGE_ACCEPT)
        .send()
        .await
        .with_context(|| format!("Failed to request {url}"))?;

    if !response.status().is_success() {
        bail!("non success status: {}", response.status().as_u16());
    }
    Ok(response)
}

/// Stream the body of `response` into `path`, returning the byte count
///
/// Writes to a `.part` sibling first and renames on completion so an
/// interrupted download never leaves a file under the final name.
pub async fn stream_to_file(response: reqwest::Response, path: &Path) -> Result<u64> {
    let partial = path.with_extension(format!(
        "{}.part",
        path.extension().and_then(|e| e.to_str()).unwrap_or_default()
    ));
    let mut file = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("Failed to create {}", partial.display()))?;

    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Failed to read image chunk")?;
        file.write_all(&chunk)
            .await
            .context("Failed to write image chunk")?;
        written += chunk.len() as u64;
    }
    file.flush().await.context("Failed to flush image file")?;
    drop(file);

    tokio::fs::rename(&partial, path)
        .await
        .with_context(|| format!("Failed to move image into {}", path.display()))?;
    Ok(written)
}
