use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use redsaver::config::Settings;
use redsaver::pushshift::PushshiftClient;

#[derive(Parser)]
#[command(name = "redsaver", version)]
#[command(about = "Redsaver: a tool to archive text posts from Subreddits.")]
struct Args {
    /// The subreddit to archive.
    #[arg(short, long)]
    subreddit: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Nothing to do; leave every file alone and exit quietly.
    let Some(subreddit) = args.subreddit.filter(|s| !s.is_empty()) else {
        return;
    };

    // Load .env file if present
    let _ = dotenvy::dotenv();

    // No subscriber to report through yet
    if let Err(e) = init_tracing() {
        eprintln!("Fatal error: {e:#}");
        std::process::exit(1);
    }

    if let Err(e) = run(&subreddit).await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(subreddit: &str) -> Result<()> {
    let settings = Settings::from_env().context("Failed to load configuration")?;
    settings.validate().context("Invalid configuration")?;

    info!(
        archive_dir = %settings.archive_dir.display(),
        api = %settings.api_base_url,
        "Configuration loaded"
    );

    let client = PushshiftClient::from_settings(&settings)
        .context("Failed to build search API client")?;

    redsaver::archive_subreddit(&settings, client, subreddit).await?;

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,redsaver=debug"));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}
