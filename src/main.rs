//! # gleaner CLI
//!
//! Command-line front end for the crawler.
//!
//! - `crawl`: crawl the configured site into an output directory
//! - `seeds`: print the seed list a crawl would start from
//!
//! Progress is shown on a spinner fed by the crawler's event channel;
//! Ctrl-C stops the crawl after the page in flight.

mod telemetry;

use clap::{Args, Parser, Subcommand};
use gleaner::crawler::{
    CrawlEvent, CrawlState, Crawler, CrawlerConfig, Outcome, SiteProfile, read_seeds_file,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use telemetry::OtelGuard;
use tokio::sync::{mpsc, watch};
use tracing::{instrument, warn};

#[derive(Parser)]
#[command(author, version, about = "Crawl a content site and extract its article regions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Crawl the site and write content regions and images
    Crawl(CrawlArgs),

    /// Print the seed URLs a crawl would start from
    Seeds(SeedsArgs),
}

#[derive(Args, Debug)]
struct CrawlArgs {
    /// Output directory
    #[arg(short, long, default_value = "scraped_pages")]
    output: PathBuf,

    /// Seconds to wait between page requests
    #[arg(short, long, default_value = "1.0")]
    delay: f64,

    /// Maximum number of pages to fetch
    #[arg(short = 'p', long)]
    max_pages: Option<u32>,

    /// Maximum link depth from the seeds
    #[arg(long)]
    max_depth: Option<u32>,

    /// Only fetch the seeds; do not follow links
    #[arg(long)]
    seed_only: bool,

    /// Site profile (JSON); defaults to reactome.org
    #[arg(long)]
    site: Option<PathBuf>,

    /// File with one seed URL per line
    #[arg(long)]
    seeds_file: Option<PathBuf>,

    /// Seed URL (repeatable)
    #[arg(long = "seed")]
    seeds: Vec<String>,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SeedsArgs {
    /// Site profile (JSON); defaults to reactome.org
    #[arg(long)]
    site: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        Some(Commands::Crawl(args)) => args.log_file.clone(),
        _ => None,
    };
    let _otel: OtelGuard = telemetry::init_tracing_subscriber(log_file.as_deref())?;

    match cli.command {
        Some(Commands::Crawl(args)) => {
            crawl_command(args).await?;
        }
        Some(Commands::Seeds(args)) => {
            seeds_command(args)?;
        }
        None => {
            // If no command is provided, show help
            let _ = Cli::parse_from(["gleaner", "--help"]);
        }
    }

    Ok(())
}

fn load_profile(path: Option<&PathBuf>) -> gleaner::Result<SiteProfile> {
    match path {
        Some(path) => Ok(SiteProfile::from_file(path)?),
        None => Ok(SiteProfile::default()),
    }
}

fn build_config(args: &CrawlArgs) -> gleaner::Result<CrawlerConfig> {
    let mut seeds = match &args.seeds_file {
        Some(path) => read_seeds_file(path)?,
        None => Vec::new(),
    };
    seeds.extend(args.seeds.iter().cloned());

    let config = CrawlerConfig::builder()
        .site(load_profile(args.site.as_ref())?)
        .seeds(seeds)
        .output_dir(&args.output)
        .delay_secs(args.delay)
        .max_pages(args.max_pages)
        .max_depth(args.max_depth)
        .seed_only(args.seed_only)
        .request_timeout_secs(args.timeout)
        .build();
    config.validate()?;
    Ok(config)
}

#[instrument]
async fn crawl_command(args: CrawlArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;
    println!(
        "Crawling {} ({} seeds) into {}...",
        config.site.base_url,
        config.effective_seeds().len(),
        config.output_dir.display()
    );

    // Create a channel for progress updates
    let (progress_sender, mut progress_receiver) = mpsc::channel(100);
    let (cancel_sender, cancel_receiver) = watch::channel(false);

    let mut crawler = Crawler::new(config)
        .await?
        .with_progress(progress_sender)
        .with_cancellation(cancel_receiver);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current page");
            let _ = cancel_sender.send(true);
        }
    });

    let progress_bar = ProgressBar::new_spinner();
    progress_bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} [{elapsed_precise}] {pos} pages {msg}")?,
    );
    progress_bar.enable_steady_tick(Duration::from_millis(120));

    // Spawn a task to process progress updates
    let progress_handle = tokio::spawn({
        let progress_bar = progress_bar.clone();
        async move {
            while let Some(event) = progress_receiver.recv().await {
                match event {
                    CrawlEvent::PageStarted { url, queued, .. } => {
                        progress_bar.set_message(format!("({} queued) {}", queued, url));
                    }
                    CrawlEvent::PageFinished { outcome, .. } => {
                        progress_bar.inc(1);
                        if outcome == Outcome::Failed {
                            progress_bar.set_message("last page failed");
                        }
                    }
                    CrawlEvent::StateChanged(CrawlState::Stopped) => break,
                    CrawlEvent::StateChanged(_) => {}
                }
            }
            progress_bar.finish_and_clear();
        }
    });

    let start_time = std::time::Instant::now();
    let summary = crawler.run().await?;
    drop(crawler);

    // Wait for progress task to complete (it will end when all senders are dropped)
    let _ = progress_handle.await;

    println!("Crawl finished: {} in {:.2?}", summary.state, start_time.elapsed());
    println!("  Fetched: {}", summary.fetched);
    println!("  Skipped: {}", summary.skipped);
    println!("  Failed:  {}", summary.failed);
    println!("  Records written: {}", summary.records_written);
    println!(
        "  Images: {} downloaded, {} reused, {} failed",
        summary.assets_downloaded, summary.assets_reused, summary.assets_failed
    );

    Ok(())
}

fn seeds_command(args: SeedsArgs) -> anyhow::Result<()> {
    let profile = load_profile(args.site.as_ref())?;
    for seed in &profile.seeds {
        println!("{}", seed);
    }
    Ok(())
}
