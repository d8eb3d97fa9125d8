use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::source::SearchQuery;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a lock on the database file
    #[error("Database is locked by another process. Close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A row addressed by id does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Subscription search term was empty after normalization
    #[error("Search term must not be empty")]
    InvalidTerm,

    /// Persisted subscription kind is not one we understand
    #[error("Unknown subscription kind: {0}")]
    InvalidKind(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

/// What a subscription searches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// `|`-delimited tag set
    Tag,
    /// A single creator's catalog
    Creator,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionKind::Tag => "tag",
            SubscriptionKind::Creator => "creator",
        }
    }

    /// Normalize a user-supplied term for this kind.
    ///
    /// Tag terms are split on `|`, trimmed, and rejoined without empty
    /// segments so that `" cats | dogs|"` and `"cats|dogs"` address the same
    /// subscription.
    pub fn normalize_term(&self, term: &str) -> Result<String, DatabaseError> {
        let normalized = match self {
            SubscriptionKind::Tag => term
                .split('|')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("|"),
            SubscriptionKind::Creator => term.trim().to_string(),
        };

        if normalized.is_empty() {
            return Err(DatabaseError::InvalidTerm);
        }
        Ok(normalized)
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionKind {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tag" => Ok(SubscriptionKind::Tag),
            "creator" => Ok(SubscriptionKind::Creator),
            other => Err(DatabaseError::InvalidKind(other.to_string())),
        }
    }
}

/// A user's standing search against the content source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub kind: SubscriptionKind,
    pub search_term: String,
    /// Source id of the newest item already synchronized. Only meaningful
    /// once `is_initialized` is set.
    pub last_item_id: Option<String>,
    pub is_initialized: bool,
    /// Unix milliseconds
    pub created_at: i64,
}

impl Subscription {
    /// Build the source query this subscription stands for.
    pub fn query(&self) -> SearchQuery {
        match self.kind {
            SubscriptionKind::Tag => SearchQuery::Tags(
                self.search_term
                    .split('|')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            SubscriptionKind::Creator => SearchQuery::Creator(self.search_term.clone()),
        }
    }

    /// The cursor, if the subscription has been bootstrapped.
    pub fn cursor(&self) -> Option<&str> {
        if self.is_initialized {
            self.last_item_id.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SubscriptionDbRow {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub search_term: String,
    pub last_item_id: Option<String>,
    pub is_initialized: bool,
    pub created_at: i64,
}

impl SubscriptionDbRow {
    pub(crate) fn into_subscription(self) -> Result<Subscription, DatabaseError> {
        Ok(Subscription {
            id: self.id,
            user_id: self.user_id,
            kind: self.kind.parse()?,
            search_term: self.search_term,
            last_item_id: self.last_item_id,
            is_initialized: self.is_initialized,
            created_at: self.created_at,
        })
    }
}

// ============================================================================
// Feed Items
// ============================================================================

/// An item ready to be stored under a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFeedItem {
    /// Stable id assigned by the content source
    pub item_id: String,
    pub url: String,
    pub username: String,
    /// Unix seconds, as reported by the source
    pub timestamp: i64,
}

/// A stored feed item.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FeedItem {
    pub id: i64,
    pub subscription_id: String,
    pub user_id: String,
    pub item_id: String,
    pub url: String,
    pub username: String,
    /// Unix seconds, as reported by the source
    pub timestamp: i64,
    /// Unix seconds, when this row was written
    pub fetched_at: i64,
}
