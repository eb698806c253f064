use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use sprouts_feed::config::{Config, API_KEY_ENV};
use sprouts_feed::content::{load_template, CompletionClient};
use sprouts_feed::feed::{FeedMerger, FeedStore, MergeMode};
use sprouts_feed::pipeline::{Pipeline, RunKind};

const MAX_RETRIES: u32 = 3;

#[derive(Parser, Debug)]
#[command(
    name = "sprouts-feed",
    about = "Generate a weekly newsletter with a chat model and publish it as RSS"
)]
struct Args {
    /// Config file
    #[arg(long, value_name = "FILE", default_value = "newsletter.toml")]
    config: PathBuf,

    /// Feed file to update (overrides `feed_path`)
    #[arg(long, value_name = "FILE")]
    feed: Option<PathBuf>,

    /// append or overwrite (overrides `mode`)
    #[arg(long)]
    mode: Option<MergeMode>,

    /// Chat model (overrides `model`)
    #[arg(long)]
    model: Option<String>,

    /// Print the merged feed instead of writing it
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::warn!(error = %e, "Failed to load .env file");
        }
    }

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?;
    if let Some(feed) = args.feed {
        config.feed_path = feed;
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(model) = args.model {
        config.model = model;
    }
    config.validate()?;

    let api_key = config.api_key(std::env::var(API_KEY_ENV).ok())?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("sprouts-feed/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let client = CompletionClient::new(http, &config.base_url, api_key, config.model.clone())?
        .with_timeout(Duration::from_secs(config.request_timeout_secs))
        .with_retries(MAX_RETRIES, Duration::from_secs(1));

    let template = load_template(config.prompt_file.as_deref())
        .await
        .context("Failed to load prompt template")?;

    let pipeline = Pipeline::new(client, template, FeedStore::new(&config.feed_path))
        .with_policy(config.html_policy())
        .with_item_options(config.item_options())
        .with_merger(FeedMerger::new(config.channel.clone(), config.placement))
        .with_mode(config.mode)
        .dry_run(args.dry_run);

    let report = pipeline.run(Utc::now()).await?;

    if args.dry_run {
        println!("{}", report.document);
        return Ok(());
    }

    match report.kind {
        RunKind::Created => println!("Created new RSS feed with first entry: {}", report.title),
        RunKind::Appended => println!(
            "Appended new newsletter to {} ({} items)",
            pipeline.store().path().display(),
            report.item_count
        ),
    }

    Ok(())
}
