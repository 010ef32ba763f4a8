//! Knowledge retrieval boundary.
//!
//! The agent can ask a reference collaborator about acting technique. The
//! collaborator is opaque: it returns finished prose plus where it came from.

use crate::error::{Result, StoryError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Where a piece of an answer came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Work and author, e.g. "An Actor Prepares by Stanislavski".
    pub source: String,
    /// Page or section within the source.
    pub locator: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl SearchResult {
    /// Tool output: the answer, then a `Sources:` list when there are any.
    #[must_use]
    pub fn render(&self) -> String {
        if self.citations.is_empty() {
            return self.answer.clone();
        }
        let mut out = format!("{}\n\nSources:", self.answer);
        for c in &self.citations {
            out.push_str(&format!("\n- {} ({})", c.source, c.locator));
        }
        out
    }
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResult>;
}

/// Fixed answers keyed by normalized query.
#[derive(Debug, Default, Clone)]
pub struct StaticRetriever {
    answers: HashMap<String, SearchResult>,
}

impl StaticRetriever {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_answer(mut self, query: &str, result: SearchResult) -> Self {
        self.answers.insert(normalize(query), result);
        self
    }
}

fn normalize(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn search(&self, query: &str) -> Result<SearchResult> {
        debug!(query, "static retrieval");
        self.answers
            .get(&normalize(query))
            .cloned()
            .ok_or_else(|| StoryError::Retrieval(format!("no answer for query: {query}")))
    }
}
