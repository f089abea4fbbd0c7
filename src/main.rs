use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use recon_crawler::utils::logger::init_logger;
use recon_crawler::{Crawler, CrawlerConfig, WaitUntil};

/// Budget-bounded site crawler driven through headless Chrome.
///
/// Crawls from BASE_URL, staying on the same origin by default, and emits
/// one JSON record per fetched page.
#[derive(Parser, Debug)]
#[command(name = "recon-crawler", version, about)]
struct Args {
    /// Root URL of the crawl; defines the same-origin scope
    base_url: String,

    /// Additional seed URL, absolute or relative to BASE_URL; repeatable
    #[arg(long = "seed")]
    seeds: Vec<String>,

    /// Number of concurrent workers, one browser context each
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Hard cap on URLs fetched in this crawl
    #[arg(long, default_value_t = 100)]
    max_visits: usize,

    /// Per-fetch timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Follow links to other origins as well
    #[arg(long)]
    allow_cross_origin: bool,

    /// Run the browser with a visible window
    #[arg(long)]
    headed: bool,

    /// Readiness condition waited for on each fetch
    #[arg(long, value_enum, default_value = "load")]
    wait_until: WaitUntil,

    /// Explicit Chrome/Chromium executable to launch
    #[arg(long)]
    chrome: Option<PathBuf>,

    /// Write records as JSON Lines to this file instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Write logs to a timestamped file in this directory instead of stderr
    #[arg(long)]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.log_dir.as_deref())?;

    let mut config = CrawlerConfig::new(&args.base_url)
        .with_seeds(args.seeds.clone())
        .with_max_workers(args.workers)
        .with_max_visits(args.max_visits)
        .with_same_origin_only(!args.allow_cross_origin)
        .with_request_timeout(Duration::from_secs(args.timeout_secs))
        .with_headless(!args.headed)
        .with_wait_until(args.wait_until);
    if let Some(chrome) = args.chrome {
        config = config.with_chrome_executable(chrome);
    }

    let mut crawler = Crawler::new(config)?;

    // First Ctrl-C stops the crawl cooperatively; records already produced
    // are still written out.
    let stop = crawler.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping crawl");
            stop.stop();
        }
    });

    // Stream records out as workers produce them instead of buffering the
    // whole crawl.
    let mut records = crawler.subscribe().await;
    let output = args.output.clone();
    let writer = tokio::spawn(async move {
        let mut out: Box<dyn Write + Send> = match output {
            Some(ref path) => Box::new(
                File::create(path)
                    .with_context(|| format!("Failed to create output file {}", path.display()))?,
            ),
            None => Box::new(std::io::stdout()),
        };

        while let Some(record) = records.recv().await {
            let line = serde_json::to_string(&record).context("Failed to serialize record")?;
            writeln!(out, "{}", line).context("Failed to write record")?;
        }
        out.flush().context("Failed to flush output")?;
        Ok::<(), anyhow::Error>(())
    });

    let records = crawler.run().await?;
    info!("Crawl produced {} records", records.len());

    // Dropping the crawler drops the last sender, ending the writer stream.
    drop(crawler);
    writer.await??;

    Ok(())
}
