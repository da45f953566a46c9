//! Termscout main entry point
//!
//! This is the command-line interface for the Termscout crawler and its AI
//! classification pipeline.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use termscout::ai::{AiPipeline, AiQueueStore, GeminiClassifier};
use termscout::config::{load_config_with_hash, resolve_api_key, Config};
use termscout::crawler::{Coordinator, HttpBrowser, MainContentExtractor};
use termscout::logging::init_logging;
use termscout::storage::StatePaths;
use termscout::url::UrlFilter;
use tokio_util::sync::CancellationToken;

/// Termscout: a focused term-matching crawler
///
/// Termscout crawls one allow-listed domain, matches page text against
/// curated term lists, and stages matching pages for an AI classifier.
/// Crawl and classification state is persisted under the output directory so
/// either half can be stopped and resumed.
#[derive(Parser, Debug)]
#[command(name = "termscout")]
#[command(version)]
#[command(about = "A focused term-matching crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Start a fresh crawl, ignoring the saved frontier
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with_all = ["stats", "analyze"])]
    dry_run: bool,

    /// Show statistics from the saved state and exit
    #[arg(long, conflicts_with_all = ["dry_run", "analyze"])]
    stats: bool,

    /// Run only the AI pipeline over the saved queue
    #[arg(long, conflicts_with_all = ["dry_run", "stats", "with_analyzer", "fresh"])]
    analyze: bool,

    /// Run the AI pipeline alongside the crawler
    #[arg(long)]
    with_analyzer: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            init_logging(cli.verbose, cli.quiet, None)?;
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e).context(format!("invalid configuration {}", cli.config.display()));
        }
    };

    let paths = StatePaths::from_config(&config);
    let log_dir = if cli.dry_run || cli.stats {
        None
    } else if cli.analyze {
        Some(paths.ai_log_dir())
    } else {
        Some(paths.log_dir())
    };
    init_logging(cli.verbose, cli.quiet, log_dir.as_deref())
        .context("failed to set up logging")?;

    tracing::info!(
        "Configuration loaded from {} (hash: {})",
        cli.config.display(),
        config_hash
    );

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }
    if cli.stats {
        return handle_stats(&paths);
    }

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    if cli.analyze {
        handle_analyze(config, &paths, cancel).await
    } else {
        handle_crawl(config, &paths, cli.fresh, cli.with_analyzer, cancel).await
    }
}

/// Cancels `cancel` on Ctrl-C; further signals change nothing
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if cancel.is_cancelled() {
                tracing::info!("Shutdown already in progress");
            } else {
                tracing::info!("Interrupt received, finishing the current batch");
                cancel.cancel();
            }
        }
    });
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) {
    println!("=== Termscout Dry Run ===\n");

    let crawler = &config.crawler;
    println!("Crawler Configuration:");
    println!("  Start URL: {}", crawler.start_url);
    println!("  Allowed domain: {}", crawler.allowed_domain);
    println!("  Max depth: {}", crawler.max_depth);
    println!("  Max concurrent pages: {}", crawler.max_concurrent);
    println!("  Page timeout: {}ms", crawler.page_timeout_ms);
    println!(
        "  Retries: {} (base delay {}ms)",
        crawler.max_retries, crawler.retry_base_delay_ms
    );
    println!("  Visited cap: {}", crawler.max_visited);

    println!("\nAI Pipeline:");
    println!("  Model: {} at {}", config.ai.model, config.ai.endpoint);
    println!("  API key variable: {}", config.ai.api_key_env);
    println!("  Request delay: {}ms", config.ai.request_delay_ms);

    println!("\nOutput:");
    println!("  Domain directory: {}", config.domain_dir().display());

    println!("\nTerm Categories ({}):", config.terms.len());
    for category in &config.terms {
        println!("  - {} ({} terms)", category.category, category.terms.len());
    }

    println!("\nHost Overrides ({}):", config.host_overrides.len());
    for o in &config.host_overrides {
        println!("  - {}", o.host);
    }

    let filter = UrlFilter::from_config(config);
    println!("\n✓ Configuration is valid");
    match filter.exclusion(&crawler.start_url) {
        None => println!("✓ Would start crawling at {}", crawler.start_url),
        Some(reason) => println!(
            "✗ Start URL {} is excluded by the URL filter ({})",
            crawler.start_url, reason
        ),
    }
}

/// Handles the --stats mode: shows statistics from the saved state
fn handle_stats(paths: &StatePaths) -> Result<()> {
    use termscout::output::{load_statistics, print_statistics};

    println!("State directory: {}\n", paths.root().display());
    let stats = load_statistics(paths).context("failed to read saved state")?;
    print_statistics(&stats);
    Ok(())
}

fn build_pipeline(
    config: &Config,
    paths: &StatePaths,
    queue: Arc<AiQueueStore>,
    cancel: CancellationToken,
) -> Result<AiPipeline> {
    let api_key = resolve_api_key(config)?;
    let classifier = GeminiClassifier::new(&config.ai, api_key)
        .context("failed to build classifier HTTP client")?;
    Ok(AiPipeline::new(
        config,
        Arc::new(classifier),
        queue,
        paths,
        cancel,
    ))
}

/// Handles the --analyze mode: drains the saved AI queue
async fn handle_analyze(config: Config, paths: &StatePaths, cancel: CancellationToken) -> Result<()> {
    let queue = Arc::new(AiQueueStore::new(paths.ai_queue()));
    let mut pipeline = build_pipeline(&config, paths, queue, cancel)?;

    match pipeline.run().await {
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::error!("AI pipeline stopped: {}", e);
            Err(e.into())
        }
    }
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: Config,
    paths: &StatePaths,
    fresh: bool,
    with_analyzer: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let queue = Arc::new(AiQueueStore::new(paths.ai_queue()));
    let pipeline = if with_analyzer {
        Some(build_pipeline(&config, paths, queue.clone(), cancel.child_token())?)
    } else {
        None
    };

    let browser = HttpBrowser::new(&config.crawler.user_agent)
        .context("failed to build HTTP client")?;
    let coordinator = Coordinator::new(
        config,
        Arc::new(browser),
        Arc::new(MainContentExtractor::new()),
        queue,
        cancel.clone(),
        fresh,
    )?;

    let result = match pipeline {
        Some(pipeline) => coordinator.run_with_analyzer(pipeline).await,
        None => coordinator.run().await,
    };
    if let Err(e) = result {
        tracing::error!("Crawl stopped: {}", e);
        return Err(e.into());
    }

    tracing::info!("Crawl completed successfully");
    Ok(())
}
