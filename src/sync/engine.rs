use std::time::Duration;
use thiserror::Error;

use crate::source::{ContentItem, ContentSource, SearchQuery, SourceError};
use crate::storage::{Database, DatabaseError, NewFeedItem, Subscription};

/// Tunables for a single subscription sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Items requested per page
    pub page_size: u32,
    /// Upper bound on pages walked per incremental sync. Caps the work done
    /// when the cursor item has vanished from the source.
    pub max_pages: u32,
    /// Deadline for each individual page request.
    ///
    /// This wraps the whole `search` call, so a source that retries
    /// internally (see `RedgifsClient::retry_budget`) is cut off here and
    /// reported as [`SyncError::Timeout`] once its retries outlast it.
    pub request_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_pages: 5,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Why a subscription sync failed.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Content source error: {0}")]
    Source(#[from] SourceError),
    #[error("Content source request timed out")]
    Timeout,
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    /// Some items could not be stored; the cursor was held back so they are
    /// retried on the next sync.
    #[error("Failed to store {failed} items ({stored} stored)")]
    PartialStore { failed: usize, stored: usize },
}

/// What a successful sync did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Items collected from the source (after dropping URL-less entries)
    pub fetched: usize,
    /// Items now present in the store, whether newly written or already there
    pub stored: usize,
    /// Rows newly written
    pub inserted: usize,
    /// New cursor, or `None` when the cursor was left unchanged
    pub cursor: Option<String>,
}

/// Brings one subscription's stored items up to date with the content source.
#[derive(Clone)]
pub struct SyncEngine {
    db: Database,
    settings: SyncSettings,
}

impl SyncEngine {
    pub fn new(db: Database, settings: SyncSettings) -> Self {
        Self { db, settings }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Synchronize a subscription against `source`.
    ///
    /// An uninitialized subscription is bootstrapped from a single page. An
    /// initialized one walks pages newest-first until it meets its cursor,
    /// runs out of results, or hits `max_pages`.
    ///
    /// Fetching is all-or-nothing: a source error or timeout on any page
    /// discards everything gathered so far and leaves the cursor untouched.
    pub async fn synchronize(
        &self,
        subscription: &Subscription,
        source: &dyn ContentSource,
    ) -> Result<SyncOutcome, SyncError> {
        let query = subscription.query();

        let items = match subscription.cursor() {
            None => self.fetch_page(source, &query, 1).await?,
            Some(cursor) => self.fetch_since(source, &query, cursor).await?,
        };

        let items: Vec<NewFeedItem> = items.into_iter().filter_map(into_feed_item).collect();
        let fetched = items.len();
        if items.is_empty() {
            tracing::debug!(
                subscription_id = %subscription.id,
                initialized = subscription.is_initialized,
                "No new items"
            );
            return Ok(SyncOutcome::default());
        }

        self.store(subscription, items, fetched).await
    }

    async fn fetch_page(
        &self,
        source: &dyn ContentSource,
        query: &SearchQuery,
        page: u32,
    ) -> Result<Vec<ContentItem>, SyncError> {
        let items = tokio::time::timeout(
            self.settings.request_timeout,
            source.search(query, self.settings.page_size, page),
        )
        .await
        .map_err(|_| SyncError::Timeout)??;
        Ok(items)
    }

    /// Collect items newer than `cursor`, newest first.
    async fn fetch_since(
        &self,
        source: &dyn ContentSource,
        query: &SearchQuery,
        cursor: &str,
    ) -> Result<Vec<ContentItem>, SyncError> {
        let mut collected = Vec::new();

        for page in 1..=self.settings.max_pages {
            let items = self.fetch_page(source, query, page).await?;
            if items.is_empty() {
                return Ok(collected);
            }

            for item in items {
                if item.id == cursor {
                    return Ok(collected);
                }
                collected.push(item);
            }
        }

        tracing::warn!(
            cursor = %cursor,
            max_pages = self.settings.max_pages,
            collected = collected.len(),
            "Cursor not found within page bound, remaining items deferred to next sync"
        );
        Ok(collected)
    }

    /// Insert `items` (newest first) and advance the cursor as far as is safe.
    ///
    /// Every item is attempted even if earlier ones fail. The cursor moves to
    /// the newest stored item that has no failed item older than it, so a
    /// failed insert is always re-fetched on the next sync.
    async fn store(
        &self,
        subscription: &Subscription,
        items: Vec<NewFeedItem>,
        fetched: usize,
    ) -> Result<SyncOutcome, SyncError> {
        let mut persisted = Vec::with_capacity(items.len());
        let mut inserted = 0;

        for item in &items {
            match self.db.insert_item_if_absent(subscription, item).await {
                Ok(was_inserted) => {
                    if was_inserted {
                        inserted += 1;
                    }
                    persisted.push(true);
                }
                Err(e) => {
                    tracing::warn!(
                        subscription_id = %subscription.id,
                        item_id = %item.item_id,
                        error = %e,
                        "Failed to store item"
                    );
                    persisted.push(false);
                }
            }
        }

        let failed = persisted.iter().filter(|ok| !**ok).count();
        let stored_count = persisted.len() - failed;
        let first_safe = persisted
            .iter()
            .rposition(|ok| !ok)
            .map_or(0, |oldest_failure| oldest_failure + 1);
        let cursor = items.get(first_safe).map(|item| item.item_id.clone());

        if let Some(cursor) = &cursor {
            self.db.update_cursor(&subscription.id, cursor).await?;
        }

        tracing::info!(
            subscription_id = %subscription.id,
            kind = %subscription.kind,
            term = %subscription.search_term,
            fetched = fetched,
            stored = stored_count,
            inserted = inserted,
            cursor = cursor.as_deref().unwrap_or("-"),
            "Synchronized subscription"
        );

        if failed > 0 {
            return Err(SyncError::PartialStore {
                failed,
                stored: stored_count,
            });
        }

        Ok(SyncOutcome {
            fetched,
            stored: stored_count,
            inserted,
            cursor,
        })
    }
}

/// Items without a playable URL carry no usable media and are dropped.
fn into_feed_item(item: ContentItem) -> Option<NewFeedItem> {
    let url = item.url.filter(|u| !u.is_empty())?;
    Some(NewFeedItem {
        item_id: item.id,
        url,
        username: item.author,
        timestamp: item.created_at,
    })
}
