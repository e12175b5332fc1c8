//! Chrome discovery and launch
//!
//! The browser runs with a persistent profile directory so a successful login
//! survives between harvest runs; the session then starts in the feed.

use anyhow::{Context, Result, anyhow};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::BrowserOptions;
use crate::utils::CHROME_USER_AGENT;

#[cfg(target_os = "windows")]
const INSTALL_LOCATIONS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
];

#[cfg(target_os = "macos")]
const INSTALL_LOCATIONS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const INSTALL_LOCATIONS: &[&str] = &[
    "/usr/bin/google-chrome-stable",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
];

const PATH_COMMANDS: &[&str] = &["google-chrome", "chromium", "chromium-browser"];

/// Flags that keep the automated browser close to a regular desktop one
const STEALTH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-notifications",
    "--no-first-run",
    "--no-default-browser-check",
    "--password-store=basic",
    "--mute-audio",
];

/// Locate an installed Chrome; `CHROMIUM_PATH` wins when it points at a file
pub fn find_browser_executable() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os("CHROMIUM_PATH").map(PathBuf::from) {
        if path.is_file() {
            debug!(path = %path.display(), "Using CHROMIUM_PATH");
            return Ok(path);
        }
        warn!(path = %path.display(), "Ignoring CHROMIUM_PATH, no such file");
    }

    INSTALL_LOCATIONS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
        .or_else(|| PATH_COMMANDS.iter().find_map(|cmd| on_path(cmd)))
        .ok_or_else(|| anyhow!("no Chrome or Chromium installation found"))
}

fn on_path(cmd: &str) -> Option<PathBuf> {
    let output = std::process::Command::new("which").arg(cmd).output().ok()?;
    let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (output.status.success() && !found.is_empty()).then(|| PathBuf::from(found))
}

/// Fetch a pinned Chromium build into the user cache
pub async fn download_managed_browser() -> Result<PathBuf> {
    let target = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("feed-harvest")
        .join("chromium");
    tokio::fs::create_dir_all(&target)
        .await
        .with_context(|| format!("Failed to create {}", target.display()))?;

    info!(dir = %target.display(), "Downloading Chromium");
    let options = BrowserFetcherOptions::builder()
        .with_path(&target)
        .build()
        .context("Invalid browser fetcher options")?;
    let installed = BrowserFetcher::new(options)
        .fetch()
        .await
        .context("Chromium download failed")?;
    Ok(installed.executable_path)
}

/// A running browser and the task that pumps its CDP connection
pub struct BrowserHandle {
    browser: Browser,
    handler: JoinHandle<()>,
    profile_dir: PathBuf,
}

impl BrowserHandle {
    #[must_use]
    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    #[must_use]
    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    /// Shut the browser down; the profile directory stays on disk
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Browser close failed: {e}");
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Browser did not exit cleanly: {e}");
        }
        self.handler.abort();
    }
}

/// chromiumoxide cannot decode every event newer Chrome versions emit
fn is_undecodable_event(message: &str) -> bool {
    message.contains("did not match any variant of untagged enum Message")
        || message.contains("Failed to deserialize WS response")
}

pub async fn launch_browser(options: &BrowserOptions, profile_dir: PathBuf) -> Result<BrowserHandle> {
    let executable = match find_browser_executable() {
        Ok(path) => path,
        Err(e) => {
            warn!("{e:#}, downloading one");
            download_managed_browser().await?
        }
    };
    tokio::fs::create_dir_all(&profile_dir)
        .await
        .with_context(|| format!("Failed to create profile dir {}", profile_dir.display()))?;

    let mut builder = BrowserConfigBuilder::default()
        .chrome_executable(executable)
        .user_data_dir(profile_dir.clone())
        .request_timeout(Duration::from_secs(options.operation_timeout_secs))
        .window_size(1920, 1080)
        .arg(format!("--user-agent={CHROME_USER_AGENT}"))
        .args(STEALTH_ARGS.iter().copied());
    builder = if options.headless {
        builder.headless_mode(HeadlessMode::New)
    } else {
        builder.with_head()
    };
    let config = builder
        .build()
        .map_err(|e| anyhow!("Invalid browser config: {e}"))?;

    info!(profile = %profile_dir.display(), headless = options.headless, "Launching browser");
    let (browser, mut events) = Browser::launch(config)
        .await
        .context("Failed to launch browser")?;

    let handler = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(()) => {}
                Err(e) if is_undecodable_event(&e.to_string()) => trace!("Skipped CDP event: {e}"),
                Err(e) => error!("CDP connection error: {e}"),
            }
        }
        debug!("CDP handler finished");
    });

    Ok(BrowserHandle {
        browser,
        handler,
        profile_dir,
    })
}
