use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Termscout
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub ai: AiConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default, rename = "host-override")]
    pub host_overrides: Vec<HostOverride>,
    #[serde(default)]
    pub terms: Vec<TermCategory>,
}

impl Config {
    /// Per-domain directory holding state and logs
    pub fn domain_dir(&self) -> PathBuf {
        let domain = self.crawler.allowed_domain.to_lowercase();
        let domain = domain.strip_prefix("www.").unwrap_or(&domain);
        self.output.output_dir.join(domain)
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// First URL admitted at depth 0 on a fresh frontier
    pub start_url: String,

    /// Host (and its subdomains) the crawl is confined to
    pub allowed_domain: String,

    /// Maximum link depth to follow from the start URL
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Number of pages processed concurrently per batch
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,

    /// Retries for unexpected page errors before the page is skipped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for linear retry backoff (milliseconds)
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Visited-set cap before a batch eviction
    #[serde(default = "default_max_visited")]
    pub max_visited: usize,

    /// Number of oldest visited entries dropped per eviction
    #[serde(default = "default_eviction_batch")]
    pub visited_eviction_batch: usize,

    /// Navigation timeout (milliseconds)
    #[serde(default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,

    /// Navigation wait strategy passed to the browser
    #[serde(default)]
    pub wait_until: WaitStrategy,

    /// Pause between batches (milliseconds)
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Minimum time between periodic frontier snapshots (seconds)
    #[serde(default = "default_persist_interval_secs")]
    pub persist_interval_secs: u64,

    /// Exit once the frontier drains instead of idling
    #[serde(default = "default_true")]
    pub stop_when_empty: bool,

    /// Poll interval while idling on an empty frontier (seconds)
    #[serde(default = "default_idle_poll_secs")]
    pub idle_poll_secs: u64,

    /// User agent sent with every page request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl CrawlerConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs(self.idle_poll_secs)
    }

    /// Linear backoff before retry number `attempt` (zero-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms * (attempt as u64 + 1))
    }
}

/// AI classification pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AiConfig {
    /// Base URL of the generative model API
    pub endpoint: String,

    /// Model identifier
    pub model: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Minimum spacing between classifier requests (milliseconds)
    pub request_delay_ms: u64,

    /// Rate-limit retries inside a single classification call
    pub max_retries: u32,

    /// First in-call backoff delay (milliseconds)
    pub backoff_base_ms: u64,

    /// Cap for in-call backoff (milliseconds)
    pub backoff_max_ms: u64,

    /// Consecutive rate-limit errors that escalate to a pipeline cooldown
    pub rate_limit_threshold: u32,

    /// Failed classifications tolerated per queue item
    pub max_queue_retries: u32,

    /// Pipeline cooldowns tolerated before an orderly shutdown
    pub max_cooldown_attempts: u32,

    /// First pipeline cooldown (seconds)
    pub cooldown_base_secs: u64,

    /// Cap for pipeline cooldowns (seconds)
    pub cooldown_max_secs: u64,

    /// Characters of page text sent to the classifier
    pub content_limit: usize,

    /// Queue poll interval while idle (seconds)
    pub poll_interval_secs: u64,

    /// Exit once no pending items remain instead of polling
    pub stop_when_empty: bool,

    /// Response prefix that marks a positive verdict
    pub positive_marker: String,

    pub prompt_preamble: String,

    pub prompt_instructions: String,
}

impl AiConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// In-call backoff before rate-limit retry number `retry` (zero-based)
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let millis = self.backoff_base_ms.saturating_mul(factor);
        Duration::from_millis(millis.min(self.backoff_max_ms))
    }

    /// Pipeline pause for cooldown number `attempt` (one-based)
    pub fn cooldown_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let secs = self.cooldown_base_secs.saturating_mul(factor);
        Duration::from_secs(secs.min(self.cooldown_max_secs))
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.0-flash-lite".to_string(),
            api_key_env: "GOOGLE_API_KEY".to_string(),
            request_delay_ms: 2000,
            max_retries: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            rate_limit_threshold: 3,
            max_queue_retries: 3,
            max_cooldown_attempts: 3,
            cooldown_base_secs: 60,
            cooldown_max_secs: 960,
            content_limit: 3000,
            poll_interval_secs: 30,
            stop_when_empty: true,
            positive_marker: "AI_Crawler: Content Found".to_string(),
            prompt_preamble: DEFAULT_PREAMBLE.to_string(),
            prompt_instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }
}

const DEFAULT_PREAMBLE: &str = "Analyze this webpage content and decide whether it is \
primarily about the topics the configured term lists describe.\n\nContent to analyze:\n";

const DEFAULT_INSTRUCTIONS: &str = "Format your response EXACTLY as follows:\n\
- If the content is primarily about these topics, start your response with EXACTLY \
\"AI_Crawler: Content Found:\" followed by a short description.\n\
- Otherwise respond with EXACTLY \"AI_Crawler: Not the Content you are looking for.\"";

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Root directory; each allowed domain gets its own subdirectory
    pub output_dir: PathBuf,
}

/// Additions to (or replacements for) the built-in URL block lists
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FilterConfig {
    /// Start from the built-in lists before adding the entries below
    pub use_defaults: bool,
    pub blocked_hosts: Vec<String>,
    pub blocked_extensions: Vec<String>,
    pub blocked_patterns: Vec<String>,
    pub blocked_path_segments: Vec<String>,
    pub blocked_params: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            use_defaults: true,
            blocked_hosts: Vec::new(),
            blocked_extensions: Vec::new(),
            blocked_patterns: Vec::new(),
            blocked_path_segments: Vec::new(),
            blocked_params: Vec::new(),
        }
    }
}

/// Navigation settings for a host that misbehaves with the defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostOverride {
    pub host: String,
    pub timeout_ms: Option<u64>,
    pub wait_until: Option<WaitStrategy>,
    pub intercept_subresources: Option<bool>,
    pub ignore_tls_errors: Option<bool>,
}

/// When a navigation counts as finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitStrategy {
    Load,
    DomContentLoaded,
    #[default]
    NetworkIdle0,
    NetworkIdle2,
}

/// Named list of terms searched for in page text
#[derive(Debug, Clone, Deserialize)]
pub struct TermCategory {
    pub category: String,
    pub terms: Vec<String>,
}

fn default_max_depth() -> u32 {
    3
}

fn default_max_concurrent() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_max_visited() -> usize {
    10_000
}

fn default_eviction_batch() -> usize {
    1000
}

fn default_page_timeout_ms() -> u64 {
    30_000
}

fn default_batch_delay_ms() -> u64 {
    1000
}

fn default_persist_interval_secs() -> u64 {
    30
}

fn default_idle_poll_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("termscout/{}", env!("CARGO_PKG_VERSION"))
}
