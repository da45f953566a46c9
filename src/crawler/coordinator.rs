//! Crawler coordinator - main crawl orchestration logic
//!
//! The coordinator owns everything a crawl needs for its lifetime: the
//! scheduler (and through it the frontier), the browser, the extractor, the
//! term matcher and the AI queue. It is built once in `main` and torn down
//! explicitly with [`Coordinator::shutdown`].

use crate::ai::{AiPipeline, AiQueueItem, AiQueueStore};
use crate::config::Config;
use crate::crawler::extractor::ContentExtractor;
use crate::crawler::fetcher::{Browser, BrowserSession, LoadConfig, NavigationError};
use crate::crawler::scheduler::Scheduler;
use crate::crawler::terms::TermMatcher;
use crate::output::MatchRecorder;
use crate::state::{Frontier, FrontierLimits, UrlItem};
use crate::storage::StatePaths;
use crate::url::{extract_domain, UrlFilter};
use crate::CrawlError;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Status codes that end a page without retrying
const SKIP_STATUSES: &[u16] = &[403, 404, 429, 502, 503, 504];

/// Totals reported when a crawl ends
#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    /// Pages loaded and scanned
    pub processed: usize,
    /// Pages added to the AI queue
    pub staged: usize,
    /// Pages marked visited without a successful load
    pub skipped: usize,
    pub elapsed: Duration,
}

enum PageOutcome {
    Processed { staged: bool },
    Skipped,
    /// Left in progress for the next run
    Deferred,
}

enum LoadOutcome {
    Loaded(Box<dyn BrowserSession>),
    Skip(String),
    Retry(String),
    /// No browser session could be opened; the page itself was never tried
    NoSession(String),
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    scheduler: Scheduler,
    browser: Arc<dyn Browser>,
    extractor: Arc<dyn ContentExtractor>,
    matcher: TermMatcher,
    ai_queue: Arc<AiQueueStore>,
    recorder: MatchRecorder,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `browser` - Browser automation backend
    /// * `extractor` - Main-content extractor
    /// * `ai_queue` - Queue shared with an in-process AI pipeline, if any
    /// * `cancel` - Shutdown signal
    /// * `fresh` - Ignore any existing frontier snapshot
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Frontier restored (or empty) and seeded
    /// * `Err(CrawlError)` - The state directories could not be created
    pub fn new(
        config: Config,
        browser: Arc<dyn Browser>,
        extractor: Arc<dyn ContentExtractor>,
        ai_queue: Arc<AiQueueStore>,
        cancel: CancellationToken,
        fresh: bool,
    ) -> Result<Self, CrawlError> {
        let paths = StatePaths::from_config(&config);
        paths.ensure_dirs()?;

        let filter = UrlFilter::from_config(&config);
        let limits = FrontierLimits::from_config(&config.crawler);

        let mut frontier = if fresh {
            info!("Fresh crawl requested, ignoring any existing frontier snapshot");
            Frontier::new(filter, limits)
        } else {
            Frontier::restore(&paths.frontier(), filter, limits)
        };

        let start_url = &config.crawler.start_url;
        if !frontier.has_pending() && !frontier.is_visited(start_url) {
            if frontier.admit(start_url, 0) {
                info!("Seeded frontier with {}", start_url);
            } else {
                warn!("Start URL {} was rejected by the URL filter", start_url);
            }
        }

        let counts = frontier.counts();
        info!(
            "Frontier ready: {} visited, {} queued",
            counts.visited, counts.queued
        );

        let scheduler = Scheduler::new(
            frontier,
            config.crawler.max_concurrent as usize,
            paths.frontier(),
            config.crawler.persist_interval(),
        );

        Ok(Self {
            matcher: TermMatcher::new(&config.terms),
            recorder: MatchRecorder::new(&paths),
            config: Arc::new(config),
            scheduler,
            browser,
            extractor,
            ai_queue,
            cancel,
            closed: AtomicBool::new(false),
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Runs the main crawl loop
    ///
    /// Dispatches batches of at most `max-concurrent` URLs and processes each
    /// batch concurrently until the frontier is empty or shutdown is requested.
    /// The frontier is persisted and the browser released before returning,
    /// including when a fatal error stops the crawl.
    pub async fn run(&self) -> Result<CrawlSummary, CrawlError> {
        let crawler = &self.config.crawler;
        info!(
            "Starting crawl of {} (max depth {}, {} concurrent, {} terms)",
            crawler.allowed_domain,
            crawler.max_depth,
            self.scheduler.batch_size(),
            self.matcher.term_count()
        );

        let start_time = Instant::now();
        let mut summary = CrawlSummary::default();
        let mut fatal: Option<CrawlError> = None;

        loop {
            if self.cancel.is_cancelled() {
                info!("Shutdown requested, stopping crawl");
                break;
            }

            let batch = self.scheduler.next_batch().await;
            if batch.is_empty() {
                if crawler.stop_when_empty {
                    info!("Frontier is empty, crawl complete");
                    break;
                }
                debug!("Frontier is empty, polling again in {:?}", crawler.idle_poll());
                if !self.sleep(crawler.idle_poll()).await {
                    break;
                }
                continue;
            }

            let results = join_all(batch.into_iter().map(|item| self.process_page(item))).await;
            for result in results {
                match result {
                    Ok(PageOutcome::Processed { staged }) => {
                        summary.processed += 1;
                        if staged {
                            summary.staged += 1;
                        }
                    }
                    Ok(PageOutcome::Skipped) => summary.skipped += 1,
                    Ok(PageOutcome::Deferred) => {}
                    Err(e) => {
                        error!("{}", e);
                        if e.is_fatal() && fatal.is_none() {
                            fatal = Some(e);
                        }
                    }
                }
            }

            let counts = self.scheduler.counts().await;
            debug!(
                "State: {} visited, {} queued, {} in progress",
                counts.visited, counts.queued, counts.in_progress
            );

            if fatal.is_some() {
                break;
            }

            let elapsed = start_time.elapsed();
            info!(
                "Progress: {} pages processed, {} queued, {:.2} pages/sec",
                summary.processed,
                counts.queued,
                summary.processed as f64 / elapsed.as_secs_f64().max(0.001)
            );

            if let Err(e) = self.scheduler.persist_if_due().await {
                error!("Failed to persist frontier: {}", e);
                fatal = Some(e.into());
                break;
            }

            if !self.sleep(crawler.batch_delay()).await {
                break;
            }
        }

        self.shutdown().await?;

        summary.elapsed = start_time.elapsed();
        info!(
            "Crawl finished: {} pages processed, {} staged for AI analysis, {} skipped in {:?} ({:.2} pages/sec)",
            summary.processed,
            summary.staged,
            summary.skipped,
            summary.elapsed,
            summary.processed as f64 / summary.elapsed.as_secs_f64().max(0.001)
        );

        match fatal {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Runs the crawl with an AI pipeline consuming its queue in the same task
    ///
    /// `pipeline` must be built with a child of this coordinator's shutdown
    /// token. It keeps polling while the crawl is still producing. A fatal
    /// pipeline error (an open circuit) cancels the crawl, which drains its
    /// batch, persists and returns; a fatal crawl error stops the pipeline at
    /// its next item boundary. The crawl's error wins when both fail.
    pub async fn run_with_analyzer(&self, pipeline: AiPipeline) -> Result<CrawlSummary, CrawlError> {
        let crawl_done = CancellationToken::new();
        let mut pipeline = pipeline.with_producer(crawl_done.clone());

        let crawl = async {
            let result = self.run().await;
            crawl_done.cancel();
            if result.is_err() {
                self.cancel.cancel();
            }
            result
        };
        let analyze = async {
            let result = pipeline.run().await;
            if let Err(e) = &result {
                error!("AI pipeline stopped, shutting down the crawl: {}", e);
                self.cancel.cancel();
            }
            result
        };

        let (crawl_result, analyze_result) = tokio::join!(crawl, analyze);
        let summary = crawl_result?;
        analyze_result?;
        Ok(summary)
    }

    /// Writes the final snapshot and releases the browser
    ///
    /// Safe to call more than once; only the first call does anything.
    pub async fn shutdown(&self) -> Result<(), CrawlError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let persisted = self.scheduler.persist().await;
        self.browser.close().await;
        persisted?;
        info!("Crawler state saved, browser closed");
        Ok(())
    }

    /// Processes a single dispatched URL
    ///
    /// Only storage failures while staging escape as errors; every other
    /// failure ends in a skip or a retry.
    async fn process_page(&self, item: UrlItem) -> Result<PageOutcome, CrawlError> {
        if self.cancel.is_cancelled() {
            return Ok(PageOutcome::Deferred);
        }

        if self.scheduler.is_visited(&item.url).await {
            debug!("Already visited: {}", item.url);
            self.scheduler.complete(&item.url).await;
            return Ok(PageOutcome::Skipped);
        }

        let max_retries = self.config.crawler.max_retries;
        let mut attempt = 0;
        loop {
            match self.load_page(&item.url).await {
                LoadOutcome::Loaded(session) => return self.handle_loaded(&item, session).await,
                LoadOutcome::Skip(reason) => {
                    warn!("Skipping {}: {}", item.url, reason);
                    self.scheduler.complete(&item.url).await;
                    return Ok(PageOutcome::Skipped);
                }
                LoadOutcome::NoSession(reason) if attempt >= max_retries => {
                    warn!(
                        "No browser session for {} after {} attempts, releasing it: {}",
                        item.url,
                        attempt + 1,
                        reason
                    );
                    self.scheduler.fail(&item.url).await;
                    return Ok(PageOutcome::Skipped);
                }
                LoadOutcome::Retry(reason) | LoadOutcome::NoSession(reason) => {
                    if attempt >= max_retries {
                        warn!(
                            "Giving up on {} after {} attempts: {}",
                            item.url,
                            attempt + 1,
                            reason
                        );
                        self.scheduler.complete(&item.url).await;
                        return Ok(PageOutcome::Skipped);
                    }

                    let delay = self.config.crawler.retry_delay(attempt);
                    attempt += 1;
                    warn!(
                        "Error loading {}, retry {}/{} in {:?}: {}",
                        item.url, attempt, max_retries, delay, reason
                    );
                    if !self.sleep(delay).await {
                        return Ok(PageOutcome::Deferred);
                    }
                }
            }
        }
    }

    async fn load_page(&self, url: &str) -> LoadOutcome {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| extract_domain(&u))
            .unwrap_or_default();
        let load = LoadConfig::for_host(&self.config.crawler, &self.config.host_overrides, &host);

        let mut session = match self.browser.new_session().await {
            Ok(session) => session,
            Err(e) => return LoadOutcome::NoSession(e.to_string()),
        };

        let response = match tokio::time::timeout(load.timeout, session.load(url, &load)).await {
            Err(_) => return LoadOutcome::Skip(NavigationError::Timeout(load.timeout).to_string()),
            Ok(Err(e)) if e.is_skippable() => return LoadOutcome::Skip(e.to_string()),
            Ok(Err(e)) => return LoadOutcome::Retry(e.to_string()),
            Ok(Ok(response)) => response,
        };

        if response.final_url != url {
            debug!("{} redirected to {}", url, response.final_url);
        }

        match response.status {
            200 | 304 => LoadOutcome::Loaded(session),
            status if SKIP_STATUSES.contains(&status) => LoadOutcome::Skip(format!("HTTP {}", status)),
            status => LoadOutcome::Retry(format!("HTTP {}", status)),
        }
    }

    async fn handle_loaded(
        &self,
        item: &UrlItem,
        session: Box<dyn BrowserSession>,
    ) -> Result<PageOutcome, CrawlError> {
        let follow_links = item.depth < self.config.crawler.max_depth;
        let (content, title, links) = {
            let content = session
                .rendered()
                .map(|page| self.extractor.extract(page))
                .unwrap_or_default();
            let links = if follow_links {
                session.extract_links()
            } else {
                Vec::new()
            };
            (content, session.title(), links)
        };
        drop(session);

        let matches = self.matcher.find(&content.text);
        let mut staged = false;
        if !matches.is_empty() {
            info!("Found {} term matches on {}", matches.len(), item.url);
            let queued = AiQueueItem::new(item.url.clone(), content.text, title, matches);
            match self.ai_queue.stage(queued, &self.recorder).await {
                Ok(added) => staged = added,
                Err(e) => {
                    // Stays in progress so the next run loads it again
                    error!("Failed to stage {} for AI analysis: {}", item.url, e);
                    return Err(CrawlError::Storage(e));
                }
            }
        }

        if follow_links {
            let queued = self.scheduler.admit_all(&links, item.depth + 1).await;
            debug!(
                "Queued {} of {} links from {} at depth {}",
                queued,
                links.len(),
                item.url,
                item.depth + 1
            );
        }

        self.scheduler.complete(&item.url).await;
        debug!(
            "Visited {} (depth {}, {} chars)",
            item.url, item.depth, content.length
        );
        Ok(PageOutcome::Processed { staged })
    }

    /// Sleeps unless cancelled first; returns false on cancellation
    async fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
