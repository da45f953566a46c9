//! Sequential classification consumer over the persisted AI queue

use crate::ai::classifier::{Classifier, ClassifierError, Verdict};
use crate::ai::queue::{AiQueueItem, AiQueueStore};
use crate::config::{AiConfig, Config};
use crate::output::{MatchRecord, MatchRecorder};
use crate::state::AiProcessingState;
use crate::storage::StatePaths;
use crate::CrawlError;
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters reported when the pipeline stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Items that received a verdict
    pub classified: usize,
    /// Positive verdicts written to the match log
    pub matches: usize,
    /// Items dropped after exhausting their retry budget
    pub failed: usize,
    /// Pipeline-wide cooldowns taken
    pub cooldowns: u32,
}

enum PassOutcome {
    /// Nothing pending in the queue
    Empty,
    /// Items were handled; the queue may hold more
    Continue,
    /// A cooldown elapsed after sustained rate limiting
    CooledDown,
    Cancelled,
}

/// Classifies queued pages one at a time
///
/// Exactly one classifier call is in flight. Every state change is written
/// back to the queue file and the processing state before the next item.
pub struct AiPipeline {
    config: AiConfig,
    classifier: Arc<dyn Classifier>,
    queue: Arc<AiQueueStore>,
    recorder: MatchRecorder,
    state: AiProcessingState,
    state_path: PathBuf,
    cancel: CancellationToken,
    producer: Option<CancellationToken>,
    last_request: Option<Instant>,
    consecutive_rate_limits: u32,
    cooldown_attempts: u32,
}

impl AiPipeline {
    pub fn new(
        config: &Config,
        classifier: Arc<dyn Classifier>,
        queue: Arc<AiQueueStore>,
        paths: &StatePaths,
        cancel: CancellationToken,
    ) -> Self {
        let state_path = paths.ai_state();
        let state = AiProcessingState::load(&state_path);
        info!(
            "Loaded AI state: {} processed, {} failed",
            state.processed_count(),
            state.failed_count()
        );

        Self {
            config: config.ai.clone(),
            classifier,
            queue,
            recorder: MatchRecorder::new(paths),
            state,
            state_path,
            cancel,
            producer: None,
            last_request: None,
            consecutive_rate_limits: 0,
            cooldown_attempts: 0,
        }
    }

    /// Keeps polling an empty queue until `done` is cancelled
    ///
    /// Used when the crawler runs in the same process: an empty queue only
    /// means the crawler has not staged anything yet.
    pub fn with_producer(mut self, done: CancellationToken) -> Self {
        self.producer = Some(done);
        self
    }

    fn producer_finished(&self) -> bool {
        self.producer.as_ref().map_or(true, |done| done.is_cancelled())
    }

    /// Runs until the queue is drained (or forever when polling), cancellation,
    /// or the circuit breaker opens
    pub async fn run(&mut self) -> Result<PipelineSummary, CrawlError> {
        let mut summary = PipelineSummary::default();
        info!("AI pipeline started");

        loop {
            if self.cancel.is_cancelled() {
                info!("AI pipeline shutdown requested");
                break;
            }

            match self.run_pass(&mut summary).await? {
                PassOutcome::Continue => {}
                PassOutcome::CooledDown => {
                    info!("Cooldown finished, resuming AI queue");
                }
                PassOutcome::Cancelled => break,
                PassOutcome::Empty => {
                    if self.config.stop_when_empty && self.producer_finished() {
                        info!("AI queue empty, stopping");
                        break;
                    }
                    debug!(
                        "AI queue empty, polling again in {:?}",
                        self.config.poll_interval()
                    );
                    if !self.idle().await {
                        break;
                    }
                }
            }
        }

        self.state.save(&self.state_path)?;
        info!(
            "AI pipeline finished: {} classified, {} matches, {} failed",
            summary.classified, summary.matches, summary.failed
        );
        Ok(summary)
    }

    async fn run_pass(&mut self, summary: &mut PipelineSummary) -> Result<PassOutcome, CrawlError> {
        let mut items = self.queue.load().await?;
        let mut known: HashSet<String> = items.iter().map(|i| i.url.clone()).collect();

        let before = items.len();
        items.retain(|item| self.needs_work(item));
        if items.len() != before {
            debug!("Dropped {} finished items from AI queue", before - items.len());
            self.persist(&mut items, &mut known).await?;
        }

        if items.is_empty() {
            return Ok(PassOutcome::Empty);
        }
        info!("AI queue: {} items pending", items.len());

        let mut idx = 0;
        while idx < items.len() {
            if self.cancel.is_cancelled() {
                self.persist(&mut items, &mut known).await?;
                return Ok(PassOutcome::Cancelled);
            }

            if !self.needs_work(&items[idx]) {
                items.remove(idx);
                self.persist(&mut items, &mut known).await?;
                continue;
            }

            let item = items[idx].clone();
            self.state.last_processed = Some(item.url.clone());
            self.state.save(&self.state_path)?;

            debug!(
                "Analyzing {} ({} terms, {} chars)",
                item.url,
                item.matched_terms.len(),
                item.extracted_text.chars().count()
            );

            let Some(result) = self.classify_with_backoff(&item).await else {
                self.persist(&mut items, &mut known).await?;
                return Ok(PassOutcome::Cancelled);
            };

            match result {
                Ok(verdict) => {
                    if verdict.is_positive() {
                        self.record_match(&item, &verdict)?;
                        summary.matches += 1;
                    } else {
                        debug!("No relevant content: {}", item.url);
                    }
                    self.state.mark_processed(&item.url);
                    summary.classified += 1;
                    items.remove(idx);
                }
                Err(ClassifierError::RateLimited(reason)) => {
                    // The item keeps its place and its retry budget
                    self.persist(&mut items, &mut known).await?;

                    if self.consecutive_rate_limits < self.config.rate_limit_threshold {
                        warn!("Rate limited on {}, moving on: {}", item.url, reason);
                        idx += 1;
                        continue;
                    }

                    self.cooldown_attempts += 1;
                    if self.cooldown_attempts >= self.config.max_cooldown_attempts {
                        error!(
                            "Classifier still rate limited after {} cooldowns, shutting down",
                            self.cooldown_attempts
                        );
                        return Err(CrawlError::ClassifierUnavailable {
                            attempts: self.cooldown_attempts,
                        });
                    }

                    let delay = self.config.cooldown_delay(self.cooldown_attempts);
                    summary.cooldowns += 1;
                    warn!(
                        "Sustained rate limiting ({} consecutive), cooling down for {:?} (attempt {}/{})",
                        self.consecutive_rate_limits,
                        delay,
                        self.cooldown_attempts,
                        self.config.max_cooldown_attempts
                    );
                    if !self.sleep(delay).await {
                        return Ok(PassOutcome::Cancelled);
                    }
                    return Ok(PassOutcome::CooledDown);
                }
                Err(ClassifierError::Other(reason)) => {
                    let entry = &mut items[idx];
                    entry.retry_count += 1;
                    if entry.retry_count >= self.config.max_queue_retries {
                        error!(
                            "Classification failed for {} after {} attempts: {}",
                            item.url, entry.retry_count, reason
                        );
                        self.state.mark_failed(&item.url);
                        summary.failed += 1;
                        items.remove(idx);
                    } else {
                        warn!(
                            "Classification failed for {} (attempt {}/{}): {}",
                            item.url, entry.retry_count, self.config.max_queue_retries, reason
                        );
                        idx += 1;
                    }
                }
            }

            self.persist(&mut items, &mut known).await?;
        }

        Ok(PassOutcome::Continue)
    }

    fn needs_work(&self, item: &AiQueueItem) -> bool {
        item.is_pending() && !self.state.is_processed(&item.url) && !self.state.is_failed(&item.url)
    }

    /// Calls the classifier, retrying rate limits with capped exponential backoff
    ///
    /// Returns `None` if cancelled while waiting.
    async fn classify_with_backoff(
        &mut self,
        item: &AiQueueItem,
    ) -> Option<Result<Verdict, ClassifierError>> {
        let mut retry = 0;
        loop {
            if !self.pace().await {
                return None;
            }

            match self
                .classifier
                .classify(&item.extracted_text, &item.url)
                .await
            {
                Ok(verdict) => {
                    self.consecutive_rate_limits = 0;
                    self.cooldown_attempts = 0;
                    return Some(Ok(verdict));
                }
                Err(e) if e.is_rate_limit() => {
                    self.consecutive_rate_limits += 1;
                    if self.consecutive_rate_limits >= self.config.rate_limit_threshold
                        || retry >= self.config.max_retries
                    {
                        return Some(Err(e));
                    }

                    let delay = self.config.backoff_delay(retry);
                    warn!(
                        "Rate limited on {}, retry {}/{} in {:?}",
                        item.url,
                        retry + 1,
                        self.config.max_retries,
                        delay
                    );
                    if !self.sleep(delay).await {
                        return None;
                    }
                    retry += 1;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn record_match(&self, item: &AiQueueItem, verdict: &Verdict) -> Result<(), CrawlError> {
        let record = MatchRecord {
            url: item.url.clone(),
            title: item.title.clone(),
            matched_terms: item.matched_terms.clone(),
            verdict: verdict.text().to_string(),
            timestamp: Utc::now(),
        };
        self.recorder.record(&record)?;
        info!("Relevant content found: {}", item.url);
        Ok(())
    }

    /// Holds requests at least `request-delay-ms` apart
    async fn pace(&mut self) -> bool {
        if let Some(last) = self.last_request {
            let delay = self.config.request_delay();
            let elapsed = last.elapsed();
            if elapsed < delay && !self.sleep(delay - elapsed).await {
                return false;
            }
        }
        self.last_request = Some(Instant::now());
        true
    }

    /// Waits one poll interval, cut short when the producer finishes
    async fn idle(&self) -> bool {
        let Some(done) = self.producer.as_ref().filter(|done| !done.is_cancelled()) else {
            return self.sleep(self.config.poll_interval()).await;
        };
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = done.cancelled() => true,
            _ = tokio::time::sleep(self.config.poll_interval()) => true,
        }
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

    async fn persist(
        &self,
        items: &mut Vec<AiQueueItem>,
        known: &mut HashSet<String>,
    ) -> Result<(), CrawlError> {
        self.queue.save_merged(items, known).await?;
        self.state.save(&self.state_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::TermMatch;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replays scripted results, then answers negative
    struct Scripted {
        results: Mutex<VecDeque<Result<Verdict, ClassifierError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(results: Vec<Result<Verdict, ClassifierError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Classifier for Scripted {
        async fn classify(&self, _text: &str, url: &str) -> Result<Verdict, ClassifierError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Verdict::Negative("no".to_string())))
        }
    }

    fn config(dir: &TempDir) -> Config {
        let toml = format!(
            r#"
[crawler]
start-url = "https://example.edu/"
allowed-domain = "example.edu"

[ai]
request-delay-ms = 0
backoff-base-ms = 0
backoff-max-ms = 0
cooldown-base-secs = 0
cooldown-max-secs = 0
max-retries = 1
rate-limit-threshold = 2
max-queue-retries = 2
max-cooldown-attempts = 2

[output]
output-dir = "{}"

[[terms]]
category = "programs"
terms = ["dei office"]
"#,
            dir.path().display()
        );
        crate::config::parse_config(&toml).unwrap()
    }

    fn item(url: &str) -> AiQueueItem {
        AiQueueItem::new(
            url,
            "the dei office",
            Some("Title".to_string()),
            vec![TermMatch {
                category: "programs".to_string(),
                term: "dei office".to_string(),
                matched_text: "dei office".to_string(),
                context: "...the dei office...".to_string(),
                position: 4,
            }],
        )
    }

    async fn setup(
        dir: &TempDir,
        urls: &[&str],
        classifier: Arc<Scripted>,
    ) -> (AiPipeline, Arc<AiQueueStore>, StatePaths) {
        let config = config(dir);
        let paths = StatePaths::from_config(&config);
        let store = Arc::new(AiQueueStore::new(paths.ai_queue()));
        let recorder = MatchRecorder::new(&paths);
        for url in urls {
            store.stage(item(url), &recorder).await.unwrap();
        }
        let pipeline = AiPipeline::new(
            &config,
            classifier,
            store.clone(),
            &paths,
            CancellationToken::new(),
        );
        (pipeline, store, paths)
    }

    #[tokio::test]
    async fn test_positive_and_negative_verdicts() {
        let dir = TempDir::new().unwrap();
        let classifier = Scripted::new(vec![
            Ok(Verdict::Positive("AI_Crawler: Content Found: yes".to_string())),
            Ok(Verdict::Negative("AI_Crawler: Not the Content".to_string())),
        ]);
        let (mut pipeline, store, paths) = setup(
            &dir,
            &["https://example.edu/a", "https://example.edu/b"],
            classifier.clone(),
        )
        .await;

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.classified, 2);
        assert_eq!(summary.matches, 1);
        assert!(store.load().await.unwrap().is_empty());

        let recorder = MatchRecorder::new(&paths);
        assert!(recorder.contains("https://example.edu/a").unwrap());
        assert!(!recorder.contains("https://example.edu/b").unwrap());

        let state = AiProcessingState::load(&paths.ai_state());
        assert!(state.is_processed("https://example.edu/a"));
        assert!(state.is_processed("https://example.edu/b"));
        assert_eq!(
            state.last_processed.as_deref(),
            Some("https://example.edu/b")
        );
    }

    #[tokio::test]
    async fn test_other_errors_consume_retry_budget() {
        let dir = TempDir::new().unwrap();
        let classifier = Scripted::new(vec![
            Err(ClassifierError::Other("bad gateway".to_string())),
            Err(ClassifierError::Other("bad gateway".to_string())),
        ]);
        let (mut pipeline, store, paths) =
            setup(&dir, &["https://example.edu/a"], classifier.clone()).await;

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(classifier.calls().len(), 2);
        assert!(store.load().await.unwrap().is_empty());
        assert!(AiProcessingState::load(&paths.ai_state()).is_failed("https://example.edu/a"));
    }

    #[tokio::test]
    async fn test_rate_limit_retried_within_call() {
        let dir = TempDir::new().unwrap();
        let classifier = Scripted::new(vec![
            Err(ClassifierError::RateLimited("429".to_string())),
            Ok(Verdict::Negative("no".to_string())),
        ]);
        let (mut pipeline, _store, _paths) =
            setup(&dir, &["https://example.edu/a"], classifier.clone()).await;

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.classified, 1);
        assert_eq!(summary.cooldowns, 0);
        assert_eq!(classifier.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_circuit_breaker_keeps_item() {
        let dir = TempDir::new().unwrap();
        let classifier = Scripted::new(
            (0..10)
                .map(|_| Err(ClassifierError::RateLimited("429".to_string())))
                .collect(),
        );
        let (mut pipeline, store, _paths) =
            setup(&dir, &["https://example.edu/a"], classifier.clone()).await;

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, CrawlError::ClassifierUnavailable { attempts: 2 }));
        assert!(err.is_fatal());

        let remaining = store.load().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_waits_for_producer_before_stopping() {
        let dir = TempDir::new().unwrap();
        let classifier = Scripted::new(Vec::new());
        let (pipeline, store, paths) = setup(&dir, &[], classifier.clone()).await;

        let done = CancellationToken::new();
        let mut pipeline = pipeline.with_producer(done.clone());
        let handle = tokio::spawn(async move { pipeline.run().await });

        let recorder = MatchRecorder::new(&paths);
        store
            .stage(item("https://example.edu/late"), &recorder)
            .await
            .unwrap();
        done.cancel();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.classified, 1);
        assert_eq!(classifier.calls(), vec!["https://example.edu/late"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let classifier = Scripted::new(Vec::new());
        let (mut pipeline, store, _paths) =
            setup(&dir, &["https://example.edu/a"], classifier.clone()).await;

        pipeline.cancel.cancel();
        pipeline.run().await.unwrap();
        assert!(classifier.calls().is_empty());
        assert_eq!(store.load().await.unwrap().len(), 1);
    }
}
