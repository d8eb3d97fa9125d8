//! In-process content source for engine and scheduler tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::source::{ContentItem, ContentSource, SearchQuery, SourceError};

pub fn item(id: &str, created_at: i64) -> ContentItem {
    ContentItem {
        id: id.to_string(),
        url: Some(format!("https://media.example.com/{id}.mp4")),
        author: "creator".to_string(),
        created_at,
    }
}

/// Serves fixed pages; unscripted pages are empty.
#[derive(Default)]
pub struct ScriptedSource {
    pages: HashMap<u32, Vec<ContentItem>>,
    fail_on_page: Option<u32>,
    failing_terms: Vec<String>,
    delay: Option<Duration>,
    requests: Mutex<Vec<(SearchQuery, u32)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u32, items: Vec<ContentItem>) -> Self {
        self.pages.insert(page, items);
        self
    }

    pub fn fail_on_page(mut self, page: u32) -> Self {
        self.fail_on_page = Some(page);
        self
    }

    /// Fail every request whose tag set or creator contains `term`.
    pub fn fail_for(mut self, term: &str) -> Self {
        self.failing_terms.push(term.to_string());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requested_pages(&self) -> Vec<u32> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, page)| *page)
            .collect()
    }

    pub fn requested_queries(&self) -> Vec<SearchQuery> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(query, _)| query.clone())
            .collect()
    }
}

#[async_trait]
impl ContentSource for ScriptedSource {
    async fn search(
        &self,
        query: &SearchQuery,
        _count: u32,
        page: u32,
    ) -> Result<Vec<ContentItem>, SourceError> {
        self.requests.lock().unwrap().push((query.clone(), page));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failing = match query {
            SearchQuery::Tags(tags) => tags.iter().any(|t| self.failing_terms.contains(t)),
            SearchQuery::Creator(name) => self.failing_terms.contains(name),
        };
        if failing || self.fail_on_page == Some(page) {
            return Err(SourceError::HttpStatus(503));
        }

        Ok(self.pages.get(&page).cloned().unwrap_or_default())
    }
}
