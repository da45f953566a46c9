//! Term matching over extracted page text

use crate::config::TermCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Bytes of surrounding text kept on each side of a match
const CONTEXT_WINDOW: usize = 50;

/// One configured term found in a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermMatch {
    pub category: String,
    /// The term as configured
    pub term: String,
    /// The text as it appears on the page
    #[serde(default)]
    pub matched_text: String,
    /// Surrounding text, wrapped in `...`
    pub context: String,
    /// Byte offset of the match in the extracted text
    pub position: usize,
}

/// Case-insensitive scanner for the configured term lists
#[derive(Debug, Clone)]
pub struct TermMatcher {
    categories: Vec<(String, Vec<(String, String)>)>,
}

impl TermMatcher {
    pub fn new(categories: &[TermCategory]) -> Self {
        let categories = categories
            .iter()
            .map(|c| {
                let mut seen = HashSet::new();
                let terms = c
                    .terms
                    .iter()
                    .map(|t| t.trim())
                    .filter(|t| !t.is_empty())
                    .filter(|t| seen.insert(t.to_ascii_lowercase()))
                    .map(|t| (t.to_string(), t.to_ascii_lowercase()))
                    .collect();
                (c.category.clone(), terms)
            })
            .collect();

        Self { categories }
    }

    pub fn term_count(&self) -> usize {
        self.categories.iter().map(|(_, terms)| terms.len()).sum()
    }

    /// Returns the first occurrence of every distinct term, in configuration order
    pub fn find(&self, text: &str) -> Vec<TermMatch> {
        // ASCII lowercasing keeps byte offsets aligned with `text`
        let lower = text.to_ascii_lowercase();
        let mut matches = Vec::new();

        for (category, terms) in &self.categories {
            for (term, needle) in terms {
                let Some(position) = lower.find(needle.as_str()) else {
                    continue;
                };
                let end = position + needle.len();

                matches.push(TermMatch {
                    category: category.clone(),
                    term: term.clone(),
                    matched_text: text[position..end].to_string(),
                    context: format!("...{}...", context_window(text, position, end)),
                    position,
                });
            }
        }

        matches
    }
}

fn context_window(text: &str, start: usize, end: usize) -> &str {
    let mut from = start.saturating_sub(CONTEXT_WINDOW);
    while !text.is_char_boundary(from) {
        from -= 1;
    }

    let mut to = (end + CONTEXT_WINDOW).min(text.len());
    while !text.is_char_boundary(to) {
        to += 1;
    }

    &text[from..to]
}
