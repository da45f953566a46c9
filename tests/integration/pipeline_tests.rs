//! Integration tests for the AI pipeline
//!
//! A scripted in-process classifier covers the queue and circuit-breaker
//! behaviour; a wiremock server covers the bundled HTTP classifier.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use termscout::ai::{
    AiPipeline, AiQueueItem, AiQueueStore, Classifier, ClassifierError, GeminiClassifier, Verdict,
};
use termscout::config::{parse_config, Config};
use termscout::crawler::TermMatch;
use termscout::output::MatchRecorder;
use termscout::state::AiProcessingState;
use termscout::storage::StatePaths;
use termscout::CrawlError;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct ScriptedClassifier {
    script: Mutex<VecDeque<Result<Verdict, ClassifierError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClassifier {
    fn new(script: Vec<Result<Verdict, ClassifierError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, _text: &str, url: &str) -> Result<Verdict, ClassifierError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Verdict::Negative("AI_Crawler: Not the Content".to_string())))
    }
}

fn test_config(dir: &TempDir, ai: &str) -> Config {
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
{ai}

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

fn queued(url: &str) -> AiQueueItem {
    AiQueueItem::new(
        url,
        "Welcome to the dei office.",
        Some("Office".to_string()),
        vec![TermMatch {
            category: "programs".to_string(),
            term: "dei office".to_string(),
            matched_text: "dei office".to_string(),
            context: "...Welcome to the dei office....".to_string(),
            position: 15,
        }],
    )
}

async fn stage_all(paths: &StatePaths, urls: &[&str]) -> Arc<AiQueueStore> {
    let store = Arc::new(AiQueueStore::new(paths.ai_queue()));
    let recorder = MatchRecorder::new(paths);
    for url in urls {
        assert!(store.stage(queued(url), &recorder).await.unwrap());
    }
    store
}

#[tokio::test]
async fn test_processed_urls_are_never_reclassified() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "");
    let paths = StatePaths::from_config(&config);
    let store = stage_all(&paths, &["https://example.edu/a", "https://example.edu/b"]).await;

    let mut state = AiProcessingState::default();
    state.mark_processed("https://example.edu/a");
    state.save(&paths.ai_state()).unwrap();

    let classifier = ScriptedClassifier::new(Vec::new());
    let mut pipeline = AiPipeline::new(
        &config,
        classifier.clone(),
        store.clone(),
        &paths,
        CancellationToken::new(),
    );
    let summary = pipeline.run().await.unwrap();

    assert_eq!(classifier.calls(), vec!["https://example.edu/b"]);
    assert_eq!(summary.classified, 1);
    assert!(store.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sustained_rate_limit_opens_circuit() {
    let dir = TempDir::new().unwrap();
    let config = test_config(
        &dir,
        "max-retries = 0\nrate-limit-threshold = 1\nmax-cooldown-attempts = 3",
    );
    let paths = StatePaths::from_config(&config);
    let store = stage_all(&paths, &["https://example.edu/a"]).await;

    let classifier = ScriptedClassifier::new(
        (0..3)
            .map(|_| Err(ClassifierError::RateLimited("429 Too Many Requests".to_string())))
            .collect(),
    );
    let mut pipeline = AiPipeline::new(
        &config,
        classifier.clone(),
        store.clone(),
        &paths,
        CancellationToken::new(),
    );

    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(err, CrawlError::ClassifierUnavailable { attempts: 3 }));
    assert!(err.is_fatal());
    assert_eq!(classifier.calls().len(), 3);

    // The in-flight item survives, with its retry budget untouched
    let remaining = store.load().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].url, "https://example.edu/a");
    assert_eq!(remaining[0].retry_count, 0);

    let state = AiProcessingState::load(&paths.ai_state());
    assert_eq!(state.last_processed.as_deref(), Some("https://example.edu/a"));
    assert!(!state.is_processed("https://example.edu/a"));
}

#[tokio::test]
async fn test_restart_after_circuit_break_resumes_item() {
    let dir = TempDir::new().unwrap();
    let config = test_config(
        &dir,
        "max-retries = 0\nrate-limit-threshold = 1\nmax-cooldown-attempts = 1",
    );
    let paths = StatePaths::from_config(&config);
    let store = stage_all(&paths, &["https://example.edu/a"]).await;

    let failing = ScriptedClassifier::new(vec![Err(ClassifierError::RateLimited(
        "quota".to_string(),
    ))]);
    let mut first = AiPipeline::new(
        &config,
        failing,
        store.clone(),
        &paths,
        CancellationToken::new(),
    );
    assert!(first.run().await.is_err());

    let healthy = ScriptedClassifier::new(vec![Ok(Verdict::Positive(
        "AI_Crawler: Content Found: office page".to_string(),
    ))]);
    let mut second = AiPipeline::new(
        &config,
        healthy.clone(),
        store.clone(),
        &paths,
        CancellationToken::new(),
    );
    let summary = second.run().await.unwrap();

    assert_eq!(summary.matches, 1);
    assert!(MatchRecorder::new(&paths)
        .contains("https://example.edu/a")
        .unwrap());
    assert!(store.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_http_classifier_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/test-model:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "AI_Crawler: Content Found:\nA campus office page." }] }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(
        &dir,
        &format!(
            "endpoint = \"{}/v1beta\"\nmodel = \"test-model\"",
            server.uri()
        ),
    );
    let paths = StatePaths::from_config(&config);
    let store = stage_all(&paths, &["https://example.edu/a"]).await;

    let classifier = GeminiClassifier::new(&config.ai, "test-key".to_string()).unwrap();
    let mut pipeline = AiPipeline::new(
        &config,
        Arc::new(classifier),
        store,
        &paths,
        CancellationToken::new(),
    );
    let summary = pipeline.run().await.unwrap();
    assert_eq!(summary.matches, 1);

    let csv = std::fs::read_to_string(paths.matches_csv()).unwrap();
    assert!(csv.starts_with("Date,Time,URL,Title,Matched Terms,AI Analysis,Timestamp"));
    assert!(csv.contains("https://example.edu/a"));
    assert!(csv.contains("AI_Crawler: Content Found: A campus office page."));
}
