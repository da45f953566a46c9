//! Main-content text extraction

use crate::crawler::fetcher::RenderedPage;
use scraper::{ElementRef, Html, Selector};

/// Number of characters kept in `ExtractedContent::preview`
const PREVIEW_CHARS: usize = 100;

/// Selectors tried in order; the first match is the content region
const MAIN_SELECTORS: &[&str] = &[
    "main",
    "article",
    "#main-content",
    ".main-content",
    "[role=\"main\"]",
    ".entry-content",
    ".post-content",
    ".page-content",
];

/// Never contributes text, wherever it appears
const ALWAYS_SKIPPED: &[&str] = &["script", "style", "noscript", "template", "iframe"];

/// Page chrome skipped when falling back to `<body>`
const BODY_CHROME: &[&str] = &[
    "nav",
    "header",
    "footer",
    ".navigation",
    ".nav",
    ".footer",
    ".menu",
    "#menu",
    ".sidebar",
    "#sidebar",
    "[role=\"navigation\"]",
    "[role=\"complementary\"]",
    ".nondiscrimination",
    "#nondiscrimination",
    ".copyright",
    ".legal",
    ".tertiary-navigation-container",
    ".tribe-events-after-html",
];

/// Plain text pulled from a rendered page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedContent {
    /// Whitespace-collapsed text
    pub text: String,
    /// Length of `text` in characters
    pub length: usize,
    pub preview: String,
}

impl ExtractedContent {
    pub fn from_text(raw: &str) -> Self {
        let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        let length = text.chars().count();
        let preview = text.chars().take(PREVIEW_CHARS).collect();
        Self {
            text,
            length,
            preview,
        }
    }
}

/// Turns a rendered page into plain text
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, page: &RenderedPage) -> ExtractedContent;
}

/// Extractor that prefers the page's main content region
#[derive(Debug)]
pub struct MainContentExtractor {
    main: Vec<Selector>,
    always_skipped: Vec<Selector>,
    body_chrome: Vec<Selector>,
    body: Vec<Selector>,
}

impl MainContentExtractor {
    pub fn new() -> Self {
        Self {
            main: parse_selectors(MAIN_SELECTORS),
            always_skipped: parse_selectors(ALWAYS_SKIPPED),
            body_chrome: parse_selectors(BODY_CHROME),
            body: parse_selectors(&["body"]),
        }
    }
}

impl Default for MainContentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentExtractor for MainContentExtractor {
    fn extract(&self, page: &RenderedPage) -> ExtractedContent {
        let document = Html::parse_document(&page.html);
        let mut raw = String::new();

        let main = self
            .main
            .iter()
            .find_map(|selector| document.select(selector).next());

        if let Some(region) = main {
            collect_text(region, &self.always_skipped, &mut raw);
        } else if let Some(body) = self.body.iter().find_map(|s| document.select(s).next()) {
            let skipped: Vec<Selector> = self
                .always_skipped
                .iter()
                .chain(self.body_chrome.iter())
                .cloned()
                .collect();
            collect_text(body, &skipped, &mut raw);
        }

        ExtractedContent::from_text(&raw)
    }
}

fn parse_selectors(sources: &[&str]) -> Vec<Selector> {
    sources
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
}

/// Appends the text below `element`, skipping subtrees matched by `skip`
fn collect_text(element: ElementRef<'_>, skip: &[Selector], out: &mut String) {
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            if !skip.iter().any(|s| s.matches(&child_element)) {
                collect_text(child_element, skip, out);
            }
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        }
    }
}
