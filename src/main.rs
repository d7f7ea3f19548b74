use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use advisory_feeds::config::Config;
use advisory_feeds::feed::{FeedStore, Fetcher};
use advisory_feeds::runner::{RunSettings, Runner};

#[derive(Parser, Debug)]
#[command(
    name = "advisory-feeds",
    version,
    about = "Republish PAGASA regional advisories as per-region RSS feeds"
)]
struct Args {
    /// Configuration file (TOML). Missing file means defaults.
    #[arg(long, value_name = "FILE", default_value = "advisory-feeds.toml")]
    config: PathBuf,

    /// Directory the `<slug>.rss` files are written to
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Maximum items kept per feed
    #[arg(long, value_name = "N")]
    max_items: Option<usize>,

    /// Region slugs to process (e.g. visprsd). Replaces the configured regions.
    #[arg(value_name = "SLUG")]
    slugs: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?;
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(max_items) = args.max_items {
        config.max_items = max_items;
    }
    if !args.slugs.is_empty() {
        config.set_region_slugs(&args.slugs);
    }
    config.validate().context("Invalid settings")?;

    let regions = config.regions()?;
    if regions.is_empty() {
        anyhow::bail!("No regions configured: pass region slugs or add a [regions] table");
    }

    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.request_timeout())
        .build()
        .context("Failed to build HTTP client")?;
    let fetcher = Fetcher::new(client, config.base_url()?)
        .with_timeout(config.request_timeout())
        .with_retry(config.retry_policy());
    let settings = RunSettings {
        max_items: config.max_items,
        utc_offset: config.utc_offset()?,
        concurrency: config.concurrency,
        title_style: config.title_style,
    };
    let runner = Runner::new(fetcher, FeedStore::new(&config.output_dir), settings);

    tracing::info!(
        regions = regions.len(),
        output_dir = %config.output_dir.display(),
        "Updating advisory feeds"
    );
    let outcomes = runner.run_all(&regions).await;

    let mut failed = 0usize;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => println!(
                "{}: {} new, {} items -> {}",
                outcome.slug,
                report.inserted,
                report.items,
                report.path.display()
            ),
            Err(e) => {
                failed += 1;
                eprintln!("{}: skipped ({e})", outcome.slug);
            }
        }
    }

    tracing::info!(
        succeeded = outcomes.len() - failed,
        failed = failed,
        "Run complete"
    );
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
