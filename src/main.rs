//! feed-harvest: archive every image from a logged-in feed

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use feed_harvest::config::{HarvestConfig, StoreKind};
use feed_harvest::session::{SessionOutcome, SiteProfile};
use feed_harvest::utils::{DEFAULT_DB_PATH, DEFAULT_IMAGE_DIR, DEFAULT_NUM_WORKERS, DEFAULT_SCROLL_RETRIES};

#[derive(Parser)]
#[command(name = "feed-harvest", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in, scroll the likes feed and store every image
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// How image objects are stored
    #[arg(long, default_value_t = StoreKind::File)]
    store: StoreKind,

    /// Where to store image files
    #[arg(long, default_value = DEFAULT_IMAGE_DIR)]
    dir: PathBuf,

    /// SQLite ledger path
    #[arg(long, default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    /// Delete the ledger once the run completes
    #[arg(long)]
    wipe: bool,

    #[arg(long, default_value_t = DEFAULT_NUM_WORKERS)]
    workers: usize,

    /// Consecutive failed scrolls that end the run
    #[arg(long, default_value_t = DEFAULT_SCROLL_RETRIES)]
    retries: u32,

    #[arg(long)]
    headless: bool,

    #[arg(long, env = "X_USERNAME")]
    username: String,

    #[arg(long, env = "X_PASSWORD", hide_env_values = true)]
    password: String,

    /// Chrome profile directory kept between runs
    #[arg(long, env = "FEED_HARVEST_BROWSER_PROFILE")]
    browser_profile: Option<PathBuf>,

    /// JSON file overriding the site profile (selectors, paths, asset pattern)
    #[arg(long)]
    profile: Option<PathBuf>,
}

impl RunArgs {
    fn into_config(self) -> Result<HarvestConfig> {
        let profile = match &self.profile {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read profile {}", path.display()))?;
                serde_json::from_str::<SiteProfile>(&raw)
                    .with_context(|| format!("Invalid profile {}", path.display()))?
            }
            None => SiteProfile::default(),
        };

        let mut builder = HarvestConfig::builder()
            .profile(profile)
            .store_kind(self.store)
            .image_dir(self.dir)
            .db_path(self.db)
            .wipe_on_completion(self.wipe)
            .num_workers(self.workers)
            .num_retries(self.retries)
            .headless(self.headless);
        if let Some(dir) = self.browser_profile {
            builder = builder.browser_profile_dir(dir);
        }
        builder.credentials(self.username, self.password).build()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => match run(args).await {
            Ok(code) => code,
            Err(e) => {
                error!("{e:#}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let config = args.into_config()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, shutting down");
            on_signal.cancel();
        }
    });

    let summary = feed_harvest::run(&config, cancel).await?;
    if let Some(total) = summary.downloaded_total {
        info!(total, "Images in ledger");
    }

    match summary.session {
        SessionOutcome::Exhausted { scrolls, published } => {
            info!(scrolls, published, "Reached the end of the feed");
            Ok(ExitCode::SUCCESS)
        }
        SessionOutcome::Failed(e) => {
            error!("Session failed: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}
