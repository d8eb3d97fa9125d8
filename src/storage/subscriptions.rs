use chrono::Utc;
use uuid::Uuid;

use super::schema::Database;
use super::types::{DatabaseError, Subscription, SubscriptionDbRow, SubscriptionKind};

const SUBSCRIPTION_COLUMNS: &str =
    "id, user_id, kind, search_term, last_item_id, is_initialized, created_at";

impl Database {
    // ========================================================================
    // Subscription Store
    // ========================================================================

    /// Create a new, uninitialized subscription.
    ///
    /// No uniqueness check happens here; use [`Database::subscribe`] for the
    /// idempotent contract.
    pub async fn create_subscription(
        &self,
        user_id: &str,
        kind: SubscriptionKind,
        term: &str,
    ) -> Result<Subscription, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().timestamp_millis();

        let row = sqlx::query_as::<_, SubscriptionDbRow>(&format!(
            r#"
            INSERT INTO feed_subscriptions (id, user_id, kind, search_term, is_initialized, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            RETURNING {SUBSCRIPTION_COLUMNS}
        "#
        ))
        .bind(&id)
        .bind(user_id)
        .bind(kind.as_str())
        .bind(term)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            subscription_id = %id,
            user_id = %user_id,
            kind = %kind,
            term = %term,
            "Subscription created"
        );
        row.into_subscription()
    }

    /// Hard-delete a subscription by id.
    ///
    /// Returns `DatabaseError::NotFound` if no row had that id. Feed items
    /// already stored for it are left to retention.
    pub async fn delete_subscription(&self, id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM feed_subscriptions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("subscription {id}")));
        }
        Ok(())
    }

    /// Fetch one subscription by id.
    pub async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>, DatabaseError> {
        let row = sqlx::query_as::<_, SubscriptionDbRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM feed_subscriptions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SubscriptionDbRow::into_subscription).transpose()
    }

    /// A user's subscriptions, most recently created first.
    pub async fn list_subscriptions_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Subscription>, DatabaseError> {
        let rows = sqlx::query_as::<_, SubscriptionDbRow>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM feed_subscriptions
            WHERE user_id = ?
            ORDER BY created_at DESC, rowid DESC
        "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(SubscriptionDbRow::into_subscription)
            .collect()
    }

    /// Every subscription, oldest created first.
    ///
    /// The scheduler walks this order so long-lived subscriptions get fetched
    /// first on every tick.
    pub async fn list_all_subscriptions(&self) -> Result<Vec<Subscription>, DatabaseError> {
        let rows = sqlx::query_as::<_, SubscriptionDbRow>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM feed_subscriptions
            ORDER BY created_at ASC, rowid ASC
        "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(SubscriptionDbRow::into_subscription)
            .collect()
    }

    /// Look up a subscription by its natural key.
    pub async fn find_subscription(
        &self,
        user_id: &str,
        kind: SubscriptionKind,
        term: &str,
    ) -> Result<Option<Subscription>, DatabaseError> {
        let row = sqlx::query_as::<_, SubscriptionDbRow>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM feed_subscriptions
            WHERE user_id = ? AND kind = ? AND search_term = ?
            ORDER BY created_at ASC, rowid ASC
            LIMIT 1
        "#
        ))
        .bind(user_id)
        .bind(kind.as_str())
        .bind(term)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SubscriptionDbRow::into_subscription).transpose()
    }

    /// Record the newest synchronized item and mark the subscription initialized.
    pub async fn update_cursor(&self, id: &str, cursor: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE feed_subscriptions SET last_item_id = ?, is_initialized = 1 WHERE id = ?",
        )
        .bind(cursor)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("subscription {id}")));
        }
        Ok(())
    }

    /// Distinct owners of at least one subscription.
    pub async fn subscription_user_ids(&self) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT user_id FROM feed_subscriptions ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    // ========================================================================
    // Subscribe / Unsubscribe
    // ========================================================================

    /// Subscribe a user, returning the existing subscription if there is one.
    ///
    /// The term is normalized first, so equivalent spellings of the same tag
    /// set resolve to the same row.
    pub async fn subscribe(
        &self,
        user_id: &str,
        kind: SubscriptionKind,
        term: &str,
    ) -> Result<Subscription, DatabaseError> {
        let term = kind.normalize_term(term)?;

        if let Some(existing) = self.find_subscription(user_id, kind, &term).await? {
            tracing::debug!(
                subscription_id = %existing.id,
                user_id = %user_id,
                "Already subscribed"
            );
            return Ok(existing);
        }

        self.create_subscription(user_id, kind, &term).await
    }

    /// Unsubscribe a user. Returns whether a subscription was removed;
    /// unsubscribing from something never subscribed to is not an error.
    pub async fn unsubscribe(
        &self,
        user_id: &str,
        kind: SubscriptionKind,
        term: &str,
    ) -> Result<bool, DatabaseError> {
        let term = match kind.normalize_term(term) {
            Ok(term) => term,
            Err(DatabaseError::InvalidTerm) => return Ok(false),
            Err(e) => return Err(e),
        };

        let result = sqlx::query(
            "DELETE FROM feed_subscriptions WHERE user_id = ? AND kind = ? AND search_term = ?",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(&term)
        .execute(&self.pool)
        .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            tracing::info!(user_id = %user_id, kind = %kind, term = %term, "Unsubscribed");
        }
        Ok(removed)
    }

    /// Whether the user currently holds this subscription.
    pub async fn is_subscribed(
        &self,
        user_id: &str,
        kind: SubscriptionKind,
        term: &str,
    ) -> Result<bool, DatabaseError> {
        let term = match kind.normalize_term(term) {
            Ok(term) => term,
            Err(DatabaseError::InvalidTerm) => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(self.find_subscription(user_id, kind, &term).await?.is_some())
    }
}
