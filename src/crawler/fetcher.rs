//! Browser automation collaborator
//!
//! The crawler only needs four things from a browser: open a session, load a
//! URL, list the page's links and hand over the rendered markup. `Browser` and
//! `BrowserSession` describe exactly that, so a headless-browser backend can
//! replace the bundled HTTP implementation without touching the scheduler.

use crate::config::{CrawlerConfig, HostOverride, WaitStrategy};
use crate::crawler::parser::{parse_html, ParsedPage};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use reqwest::{redirect::Policy, Client};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Maximum redirects followed by one navigation
const MAX_REDIRECTS: usize = 5;

/// Navigation settings for one page load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadConfig {
    pub timeout: Duration,
    pub wait_until: WaitStrategy,
    pub intercept_subresources: bool,
    pub ignore_tls_errors: bool,
}

impl LoadConfig {
    /// Crawler defaults with the first matching host override applied
    ///
    /// An override matches its host exactly or any subdomain of it.
    pub fn for_host(config: &CrawlerConfig, overrides: &[HostOverride], host: &str) -> Self {
        let mut load = Self {
            timeout: config.page_timeout(),
            wait_until: config.wait_until,
            intercept_subresources: true,
            ignore_tls_errors: false,
        };

        let host = host.to_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        let matched = overrides
            .iter()
            .find(|o| crate::url::host_matches(host, &o.host.to_lowercase()));

        if let Some(o) = matched {
            if let Some(ms) = o.timeout_ms {
                load.timeout = Duration::from_millis(ms);
            }
            if let Some(wait) = o.wait_until {
                load.wait_until = wait;
            }
            if let Some(intercept) = o.intercept_subresources {
                load.intercept_subresources = intercept;
            }
            if let Some(ignore) = o.ignore_tls_errors {
                load.ignore_tls_errors = ignore;
            }
        }

        load
    }
}

/// Outcome of a completed navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResponse {
    pub status: u16,
    pub final_url: String,
}

/// Markup of the last page loaded by a session
#[derive(Debug, Clone, Default)]
pub struct RenderedPage {
    pub url: String,
    pub html: String,
}

/// Errors raised by the browser collaborator
#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("Navigation timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("{0}")]
    Other(String),
}

impl NavigationError {
    /// Timeouts, network and navigation failures are not worth retrying
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Network(_) | Self::Navigation(_)
        )
    }

    fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            Self::Timeout(timeout)
        } else if e.is_redirect() {
            Self::Navigation(e.to_string())
        } else if e.is_connect() || e.is_request() {
            Self::Network(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }
}

/// Source of page sessions
#[async_trait]
pub trait Browser: Send + Sync {
    /// Opens a session for one page; each concurrent page task gets its own
    async fn new_session(&self) -> Result<Box<dyn BrowserSession>, NavigationError>;

    /// Releases the browser; later calls are no-ops
    async fn close(&self);
}

/// One page's worth of browser state
#[async_trait]
pub trait BrowserSession: Send {
    async fn load(&mut self, url: &str, config: &LoadConfig)
        -> Result<PageResponse, NavigationError>;

    /// Absolute http(s) links of the loaded page
    fn extract_links(&self) -> Vec<String>;

    fn title(&self) -> Option<String>;

    fn rendered(&self) -> Option<&RenderedPage>;
}

/// Browser backed by a plain HTTP client
///
/// Honours timeouts, TLS tolerance and the redirect limit. There is nothing
/// to wait for or intercept without a renderer, so those settings only add
/// no-cache request headers.
pub struct HttpBrowser {
    client: Client,
    insecure_client: Client,
    closed: AtomicBool,
}

impl HttpBrowser {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(user_agent, false)?,
            insecure_client: build_http_client(user_agent, true)?,
            closed: AtomicBool::new(false),
        })
    }
}

/// Builds the HTTP client used for page loads
pub fn build_http_client(user_agent: &str, accept_invalid_certs: bool) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .danger_accept_invalid_certs(accept_invalid_certs)
        .gzip(true)
        .brotli(true)
        .build()
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn new_session(&self) -> Result<Box<dyn BrowserSession>, NavigationError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NavigationError::Other("browser is closed".to_string()));
        }

        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            insecure_client: self.insecure_client.clone(),
            page: None,
            parsed: ParsedPage::default(),
        }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct HttpSession {
    client: Client,
    insecure_client: Client,
    page: Option<RenderedPage>,
    parsed: ParsedPage,
}

#[async_trait]
impl BrowserSession for HttpSession {
    async fn load(
        &mut self,
        url: &str,
        config: &LoadConfig,
    ) -> Result<PageResponse, NavigationError> {
        let client = if config.ignore_tls_errors {
            &self.insecure_client
        } else {
            &self.client
        };

        let mut headers = HeaderMap::new();
        if config.intercept_subresources {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        }

        let response = client
            .get(url)
            .headers(headers)
            .timeout(config.timeout)
            .send()
            .await
            .map_err(|e| NavigationError::from_reqwest(e, config.timeout))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("html"))
            .unwrap_or(true);

        let html = if is_html {
            response
                .text()
                .await
                .map_err(|e| NavigationError::from_reqwest(e, config.timeout))?
        } else {
            String::new()
        };

        self.parsed = parse_html(&html, &final_url);
        self.page = Some(RenderedPage {
            url: final_url.to_string(),
            html,
        });

        Ok(PageResponse {
            status,
            final_url: final_url.to_string(),
        })
    }

    fn extract_links(&self) -> Vec<String> {
        self.parsed.links.clone()
    }

    fn title(&self) -> Option<String> {
        self.parsed.title.clone()
    }

    fn rendered(&self) -> Option<&RenderedPage> {
        self.page.as_ref()
    }
}
