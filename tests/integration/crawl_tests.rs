//! Integration tests for the crawler
//!
//! These tests drive the coordinator end-to-end against an in-process fake
//! browser and check the persisted frontier and AI queue afterwards.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use termscout::ai::{AiPipeline, AiQueueStore, Classifier, ClassifierError, ItemStatus, Verdict};
use termscout::config::{parse_config, Config};
use termscout::crawler::{
    Browser, BrowserSession, Coordinator, LoadConfig, MainContentExtractor, NavigationError,
    PageResponse, RenderedPage,
};
use termscout::output::{MatchRecord, MatchRecorder};
use termscout::state::{FrontierSnapshot, UrlItem};
use termscout::storage::{write_json_atomic, StatePaths};
use termscout::CrawlError;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct FakePage {
    status: u16,
    html: String,
    title: Option<String>,
    links: Vec<String>,
}

fn page(body: &str, links: &[&str]) -> FakePage {
    FakePage {
        status: 200,
        html: format!("<html><body><main>{}</main></body></html>", body),
        title: Some("Page".to_string()),
        links: links.iter().map(|l| l.to_string()).collect(),
    }
}

fn status(code: u16) -> FakePage {
    FakePage {
        status: code,
        html: String::new(),
        title: None,
        links: Vec::new(),
    }
}

/// Pages by URL; a URL with several responses answers them in order and
/// then repeats the last one. Unknown URLs are 404s.
#[derive(Default)]
struct Site {
    pages: HashMap<String, Vec<FakePage>>,
    loads: Mutex<HashMap<String, usize>>,
    cancel_on: Option<(String, CancellationToken)>,
}

impl Site {
    fn with(mut self, url: &str, responses: Vec<FakePage>) -> Self {
        self.pages.insert(url.to_string(), responses);
        self
    }

    fn loads(&self, url: &str) -> usize {
        self.loads.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

struct FakeBrowser {
    site: Arc<Site>,
    closes: AtomicUsize,
    refuse_sessions: AtomicBool,
}

impl FakeBrowser {
    fn new(site: Site) -> Arc<Self> {
        Arc::new(Self {
            site: Arc::new(site),
            closes: AtomicUsize::new(0),
            refuse_sessions: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_session(&self) -> Result<Box<dyn BrowserSession>, NavigationError> {
        if self.refuse_sessions.load(Ordering::SeqCst) {
            return Err(NavigationError::Other("browser unavailable".to_string()));
        }
        Ok(Box::new(FakeSession {
            site: self.site.clone(),
            current: None,
        }))
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeSession {
    site: Arc<Site>,
    current: Option<(RenderedPage, FakePage)>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn load(
        &mut self,
        url: &str,
        _config: &LoadConfig,
    ) -> Result<PageResponse, NavigationError> {
        let count = {
            let mut loads = self.site.loads.lock().unwrap();
            let count = loads.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let response = match self.site.pages.get(url) {
            Some(responses) => responses[(count - 1).min(responses.len() - 1)].clone(),
            None => status(404),
        };

        if let Some((trigger, token)) = &self.site.cancel_on {
            if trigger == url {
                token.cancel();
            }
        }

        let result = PageResponse {
            status: response.status,
            final_url: url.to_string(),
        };
        self.current = Some((
            RenderedPage {
                url: url.to_string(),
                html: response.html.clone(),
            },
            response,
        ));
        Ok(result)
    }

    fn extract_links(&self) -> Vec<String> {
        self.current
            .as_ref()
            .map(|(_, p)| p.links.clone())
            .unwrap_or_default()
    }

    fn title(&self) -> Option<String> {
        self.current.as_ref().and_then(|(_, p)| p.title.clone())
    }

    fn rendered(&self) -> Option<&RenderedPage> {
        self.current.as_ref().map(|(r, _)| r)
    }
}

fn test_config(dir: &TempDir, start_url: &str, max_depth: u32) -> Config {
    let toml = format!(
        r#"
[crawler]
start-url = "{start_url}"
allowed-domain = "example.edu"
max-depth = {max_depth}
batch-delay-ms = 0
retry-base-delay-ms = 1
persist-interval-secs = 0

[output]
output-dir = "{dir}"

[[terms]]
category = "programs"
terms = ["dei office"]
"#,
        dir = dir.path().display()
    );
    parse_config(&toml).unwrap()
}

fn coordinator(
    config: Config,
    browser: Arc<FakeBrowser>,
    cancel: CancellationToken,
    fresh: bool,
) -> (Coordinator, Arc<AiQueueStore>, StatePaths) {
    let paths = StatePaths::from_config(&config);
    let queue = Arc::new(AiQueueStore::new(paths.ai_queue()));
    let coordinator = Coordinator::new(
        config,
        browser,
        Arc::new(MainContentExtractor::new()),
        queue.clone(),
        cancel,
        fresh,
    )
    .unwrap();
    (coordinator, queue, paths)
}

fn load_snapshot(paths: &StatePaths) -> FrontierSnapshot {
    FrontierSnapshot::load(&paths.frontier()).unwrap().unwrap()
}

#[tokio::test]
async fn test_single_page_stages_match_and_queues_links() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "https://example.edu/a", 1);
    let paths = StatePaths::from_config(&config);

    let seeded = FrontierSnapshot {
        visited: vec![],
        queue: vec![UrlItem::new("https://example.edu/a", 0)],
        in_progress: vec![],
        timestamp: chrono::Utc::now(),
    };
    write_json_atomic(&paths.frontier(), &seeded).unwrap();

    // Stop after the first batch so the discovered link stays queued
    let cancel = CancellationToken::new();
    let site = Site {
        cancel_on: Some(("https://example.edu/a".to_string(), cancel.clone())),
        ..Site::default()
    }
    .with(
        "https://example.edu/a",
        vec![page(
            "<p>Visit the dei office today.</p>",
            &["https://example.edu/b"],
        )],
    );
    let browser = FakeBrowser::new(site);

    let (coordinator, queue, paths) = coordinator(config, browser.clone(), cancel, false);
    let summary = coordinator.run().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.staged, 1);

    let snapshot = load_snapshot(&paths);
    assert!(snapshot.visited.contains(&"https://example.edu/a".to_string()));
    assert_eq!(snapshot.queue.len(), 1);
    assert_eq!(snapshot.queue[0].url, "https://example.edu/b");
    assert_eq!(snapshot.queue[0].depth, 1);
    assert!(snapshot.in_progress.is_empty());

    let items = queue.load().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].url, "https://example.edu/a");
    assert_eq!(items[0].status, ItemStatus::Pending);
    assert_eq!(items[0].matched_terms.len(), 1);
    assert_eq!(items[0].matched_terms[0].term, "dei office");
    assert_eq!(items[0].title.as_deref(), Some("Page"));

    assert_eq!(browser.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_crawl_respects_max_depth() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "https://example.edu/", 1);

    let site = Site::default()
        .with(
            "https://example.edu/",
            vec![page("Home", &["https://example.edu/one", "https://example.edu/two/"])],
        )
        .with(
            "https://example.edu/one",
            vec![page("One", &["https://example.edu/deep"])],
        )
        .with("https://example.edu/two", vec![page("Two", &[])]);
    let browser = FakeBrowser::new(site);

    let (coordinator, queue, paths) =
        coordinator(config, browser.clone(), CancellationToken::new(), false);
    let summary = coordinator.run().await.unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.staged, 0);
    assert_eq!(browser.site.loads("https://example.edu/deep"), 0);

    let snapshot = load_snapshot(&paths);
    assert_eq!(snapshot.visited.len(), 3);
    assert!(snapshot.queue.is_empty());
    assert!(queue.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_skip_statuses_are_not_retried() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "https://example.edu/", 1);

    let site = Site::default()
        .with(
            "https://example.edu/",
            vec![page(
                "Home",
                &["https://example.edu/missing", "https://example.edu/busy"],
            )],
        )
        .with("https://example.edu/busy", vec![status(503)]);
    let browser = FakeBrowser::new(site);

    let (coordinator, _queue, paths) =
        coordinator(config, browser.clone(), CancellationToken::new(), false);
    let summary = coordinator.run().await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(browser.site.loads("https://example.edu/missing"), 1);
    assert_eq!(browser.site.loads("https://example.edu/busy"), 1);

    let snapshot = load_snapshot(&paths);
    assert!(snapshot.visited.contains(&"https://example.edu/missing".to_string()));
    assert!(snapshot.visited.contains(&"https://example.edu/busy".to_string()));
}

#[tokio::test]
async fn test_other_statuses_retry_then_succeed() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "https://example.edu/", 0);

    let site = Site::default().with(
        "https://example.edu/",
        vec![status(500), status(500), page("the DEI Office", &[])],
    );
    let browser = FakeBrowser::new(site);

    let (coordinator, queue, _paths) =
        coordinator(config, browser.clone(), CancellationToken::new(), false);
    let summary = coordinator.run().await.unwrap();

    assert_eq!(browser.site.loads("https://example.edu/"), 3);
    assert_eq!(summary.processed, 1);
    assert_eq!(queue.load().await.unwrap()[0].matched_terms[0].matched_text, "DEI Office");
}

#[tokio::test]
async fn test_retry_budget_degrades_to_skip() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "https://example.edu/", 0);

    let site = Site::default().with("https://example.edu/", vec![status(500)]);
    let browser = FakeBrowser::new(site);

    let (coordinator, _queue, paths) =
        coordinator(config, browser.clone(), CancellationToken::new(), false);
    let summary = coordinator.run().await.unwrap();

    // First attempt plus three retries
    assert_eq!(browser.site.loads("https://example.edu/"), 4);
    assert_eq!(summary.skipped, 1);
    assert_eq!(load_snapshot(&paths).visited, vec!["https://example.edu/"]);
}

#[tokio::test]
async fn test_in_progress_urls_resume_after_restart() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "https://example.edu/", 2);
    let paths = StatePaths::from_config(&config);

    let interrupted = FrontierSnapshot {
        visited: vec!["https://example.edu/".to_string()],
        queue: vec![],
        in_progress: vec!["https://example.edu/programs/office".to_string()],
        timestamp: chrono::Utc::now(),
    };
    write_json_atomic(&paths.frontier(), &interrupted).unwrap();

    let site = Site::default().with(
        "https://example.edu/programs/office",
        vec![page("Our dei office", &[])],
    );
    let browser = FakeBrowser::new(site);

    let (coordinator, queue, paths) =
        coordinator(config, browser.clone(), CancellationToken::new(), false);
    coordinator.run().await.unwrap();

    assert_eq!(browser.site.loads("https://example.edu/programs/office"), 1);
    assert_eq!(browser.site.loads("https://example.edu/"), 0);
    assert_eq!(load_snapshot(&paths).visited.len(), 2);
    assert_eq!(queue.load().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_fresh_ignores_saved_frontier() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "https://example.edu/", 0);
    let paths = StatePaths::from_config(&config);

    let finished = FrontierSnapshot {
        visited: vec!["https://example.edu/".to_string()],
        queue: vec![],
        in_progress: vec![],
        timestamp: chrono::Utc::now(),
    };
    write_json_atomic(&paths.frontier(), &finished).unwrap();

    let site = Site::default().with("https://example.edu/", vec![page("Home", &[])]);
    let browser = FakeBrowser::new(site);

    let (coordinator, _queue, _paths) =
        coordinator(config, browser.clone(), CancellationToken::new(), true);
    coordinator.run().await.unwrap();
    assert_eq!(browser.site.loads("https://example.edu/"), 1);
}

#[tokio::test]
async fn test_confirmed_urls_are_not_restaged() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "https://example.edu/", 0);
    let paths = StatePaths::from_config(&config);

    MatchRecorder::new(&paths)
        .record(&MatchRecord {
            url: "https://example.edu/".to_string(),
            title: None,
            matched_terms: vec![],
            verdict: "AI_Crawler: Content Found".to_string(),
            timestamp: chrono::Utc::now(),
        })
        .unwrap();

    let site = Site::default().with("https://example.edu/", vec![page("the dei office", &[])]);
    let browser = FakeBrowser::new(site);

    let (coordinator, queue, _paths) =
        coordinator(config, browser.clone(), CancellationToken::new(), false);
    let summary = coordinator.run().await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.staged, 0);
    assert!(queue.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "https://example.edu/", 0);
    let browser = FakeBrowser::new(Site::default());

    let (coordinator, _queue, paths) =
        coordinator(config, browser.clone(), CancellationToken::new(), false);
    coordinator.shutdown().await.unwrap();
    coordinator.shutdown().await.unwrap();

    assert_eq!(browser.closes.load(Ordering::SeqCst), 1);
    // The seeded start URL is still queued in the final snapshot
    assert_eq!(load_snapshot(&paths).queue.len(), 1);
}

#[tokio::test]
async fn test_cancel_before_run_leaves_queue_untouched() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "https://example.edu/", 1);
    let browser = FakeBrowser::new(Site::default());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let (coordinator, _queue, paths) = coordinator(config, browser.clone(), cancel, false);
    let summary = coordinator.run().await.unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(browser.site.loads("https://example.edu/"), 0);
    let snapshot = load_snapshot(&paths);
    assert_eq!(snapshot.queue.len(), 1);
    assert!(snapshot.in_progress.is_empty());
}

/// Classifier whose quota is always exhausted
struct ExhaustedClassifier {
    calls: AtomicUsize,
}

#[async_trait]
impl Classifier for ExhaustedClassifier {
    async fn classify(&self, _text: &str, _url: &str) -> Result<Verdict, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ClassifierError::RateLimited("RESOURCE_EXHAUSTED".to_string()))
    }
}

#[tokio::test]
async fn test_open_circuit_stops_idling_crawl() {
    let dir = TempDir::new().unwrap();
    let toml = format!(
        r#"
[crawler]
start-url = "https://example.edu/a"
allowed-domain = "example.edu"
max-depth = 1
batch-delay-ms = 0
persist-interval-secs = 0
stop-when-empty = false
idle-poll-secs = 1

[ai]
request-delay-ms = 0
max-retries = 0
backoff-base-ms = 0
backoff-max-ms = 0
rate-limit-threshold = 1
max-cooldown-attempts = 1
cooldown-base-secs = 0
cooldown-max-secs = 0
poll-interval-secs = 1
stop-when-empty = false

[output]
output-dir = "{dir}"

[[terms]]
category = "programs"
terms = ["dei office"]
"#,
        dir = dir.path().display()
    );
    let config = parse_config(&toml).unwrap();

    let site = Site::default().with(
        "https://example.edu/a",
        vec![page("<p>Visit the dei office today.</p>", &[])],
    );
    let browser = FakeBrowser::new(site);
    let cancel = CancellationToken::new();
    let paths = StatePaths::from_config(&config);
    let queue = Arc::new(AiQueueStore::new(paths.ai_queue()));
    let classifier = Arc::new(ExhaustedClassifier {
        calls: AtomicUsize::new(0),
    });
    let pipeline = AiPipeline::new(
        &config,
        classifier.clone(),
        queue.clone(),
        &paths,
        cancel.child_token(),
    );
    let coordinator = Coordinator::new(
        config,
        browser.clone(),
        Arc::new(MainContentExtractor::new()),
        queue.clone(),
        cancel.clone(),
        false,
    )
    .unwrap();

    // Both halves idle forever unless the open circuit ends the crawl
    let result = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        coordinator.run_with_analyzer(pipeline),
    )
    .await
    .expect("crawl kept idling after the classifier became unavailable");

    assert!(matches!(result, Err(CrawlError::ClassifierUnavailable { attempts: 1 })));
    assert!(cancel.is_cancelled());
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(browser.closes.load(Ordering::SeqCst), 1);

    let snapshot = load_snapshot(&paths);
    assert!(snapshot.visited.contains(&"https://example.edu/a".to_string()));

    let items = queue.load().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].url, "https://example.edu/a");
    assert_eq!(items[0].retry_count, 0);
}

#[tokio::test]
async fn test_page_without_browser_session_is_released() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, "https://example.edu/a", 1);
    config.crawler.max_retries = 1;

    let site = Site::default().with(
        "https://example.edu/a",
        vec![page("<p>Nothing relevant.</p>", &[])],
    );
    let browser = FakeBrowser::new(site);
    browser.refuse_sessions.store(true, Ordering::SeqCst);

    let (first, _queue, paths) =
        coordinator(config.clone(), browser.clone(), CancellationToken::new(), false);
    let summary = first.run().await.unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(browser.site.loads("https://example.edu/a"), 0);

    // Released rather than visited, so the next run seeds it again
    let snapshot = load_snapshot(&paths);
    assert!(snapshot.visited.is_empty());
    assert!(snapshot.queue.is_empty());
    assert!(snapshot.in_progress.is_empty());

    browser.refuse_sessions.store(false, Ordering::SeqCst);
    let (second, _queue, paths) =
        coordinator(config, browser.clone(), CancellationToken::new(), false);
    let summary = second.run().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert!(load_snapshot(&paths)
        .visited
        .contains(&"https://example.edu/a".to_string()));
}
