use chrono::Utc;
use std::time::Duration;

use super::schema::Database;
use super::types::{DatabaseError, FeedItem, NewFeedItem, Subscription};

/// Maximum number of items returned from any single feed query (OOM protection)
const MAX_ITEMS: i64 = 500;

impl Database {
    // ========================================================================
    // Item Store
    // ========================================================================

    /// Store an item under a subscription unless it is already there.
    ///
    /// Returns `true` if a row was written. Re-delivering the same
    /// `(subscription, item_id)` is a silent no-op enforced by the table's
    /// UNIQUE constraint, so concurrent callers cannot produce duplicates.
    pub async fn insert_item_if_absent(
        &self,
        subscription: &Subscription,
        item: &NewFeedItem,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO feed_items (subscription_id, user_id, item_id, url, username, timestamp, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(subscription_id, item_id) DO NOTHING
        "#,
        )
        .bind(&subscription.id)
        .bind(&subscription.user_id)
        .bind(&item.item_id)
        .bind(&item.url)
        .bind(&item.username)
        .bind(item.timestamp)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// A page of a user's feed, newest source timestamp first.
    ///
    /// `limit` is capped at 500.
    pub async fn list_items_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FeedItem>, DatabaseError> {
        let limit = limit.clamp(0, MAX_ITEMS);
        let offset = offset.max(0);

        let items = sqlx::query_as::<_, FeedItem>(
            r#"
            SELECT id, subscription_id, user_id, item_id, url, username, timestamp, fetched_at
            FROM feed_items
            WHERE user_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ? OFFSET ?
        "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Total number of items in a user's feed.
    pub async fn count_items_for_user(&self, user_id: &str) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feed_items WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Delete a user's items that are older than `max_age` AND outside the
    /// newest `min_keep` rows. Returns the number of rows removed.
    ///
    /// The newest `min_keep` items survive regardless of age; anything younger
    /// than `max_age` survives regardless of rank.
    pub async fn delete_items_beyond_retention(
        &self,
        user_id: &str,
        min_keep: u32,
        max_age: Duration,
    ) -> Result<u64, DatabaseError> {
        let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp().saturating_sub(max_age_secs);

        let result = sqlx::query(
            r#"
            DELETE FROM feed_items
            WHERE user_id = ?
              AND timestamp < ?
              AND id NOT IN (
                  SELECT id FROM feed_items
                  WHERE user_id = ?
                  ORDER BY timestamp DESC, id DESC
                  LIMIT ?
              )
        "#,
        )
        .bind(user_id)
        .bind(cutoff)
        .bind(user_id)
        .bind(i64::from(min_keep))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Distinct owners of at least one stored item, including users whose
    /// subscriptions have since been removed.
    pub async fn item_user_ids(&self) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT user_id FROM feed_items ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, NewFeedItem, Subscription, SubscriptionKind};
    use chrono::Utc;
    use std::time::Duration;

    const DAY: i64 = 24 * 60 * 60;
    const THIRTY_DAYS: Duration = Duration::from_secs(30 * 24 * 60 * 60);

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    async fn test_subscription(db: &Database, user: &str, term: &str) -> Subscription {
        db.subscribe(user, SubscriptionKind::Tag, term).await.unwrap()
    }

    fn test_item(id: &str, timestamp: i64) -> NewFeedItem {
        NewFeedItem {
            item_id: id.to_string(),
            url: format!("https://media.example.com/{id}.mp4"),
            username: "creator".to_string(),
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_insert_if_absent_is_idempotent() {
        let db = test_db().await;
        let sub = test_subscription(&db, "u", "cats").await;
        let item = test_item("a", 1_700_000_000);

        assert!(db.insert_item_if_absent(&sub, &item).await.unwrap());
        assert!(!db.insert_item_if_absent(&sub, &item).await.unwrap());
        assert_eq!(db.count_items_for_user("u").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_item_under_two_subscriptions() {
        let db = test_db().await;
        let cats = test_subscription(&db, "u", "cats").await;
        let dogs = test_subscription(&db, "u", "dogs").await;
        let item = test_item("shared", 1_700_000_000);

        assert!(db.insert_item_if_absent(&cats, &item).await.unwrap());
        assert!(db.insert_item_if_absent(&dogs, &item).await.unwrap());
        assert_eq!(db.count_items_for_user("u").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_for_user_newest_first_with_paging() {
        let db = test_db().await;
        let sub = test_subscription(&db, "u", "cats").await;
        for (i, id) in ["old", "mid", "new"].iter().enumerate() {
            db.insert_item_if_absent(&sub, &test_item(id, 1_000 + i as i64))
                .await
                .unwrap();
        }

        let page = db.list_items_for_user("u", 2, 0).await.unwrap();
        let ids: Vec<&str> = page.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid"]);

        let page = db.list_items_for_user("u", 2, 2).await.unwrap();
        let ids: Vec<&str> = page.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["old"]);
        assert_eq!(page[0].subscription_id, sub.id);
        assert_eq!(page[0].user_id, "u");
    }

    #[tokio::test]
    async fn test_list_for_user_excludes_other_users() {
        let db = test_db().await;
        let mine = test_subscription(&db, "me", "cats").await;
        let theirs = test_subscription(&db, "them", "cats").await;
        db.insert_item_if_absent(&mine, &test_item("a", 1)).await.unwrap();
        db.insert_item_if_absent(&theirs, &test_item("b", 2)).await.unwrap();

        let items = db.list_items_for_user("me", 20, 0).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_id, "a");
        assert_eq!(db.count_items_for_user("them").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retention_keeps_floor_and_deletes_old_remainder() {
        let db = test_db().await;
        let sub = test_subscription(&db, "u", "cats").await;
        let now = Utc::now().timestamp();

        // 20 recent, 60 older than thirty days
        for i in 0..20 {
            db.insert_item_if_absent(&sub, &test_item(&format!("new-{i}"), now - i))
                .await
                .unwrap();
        }
        for i in 0..60 {
            db.insert_item_if_absent(&sub, &test_item(&format!("old-{i}"), now - 40 * DAY - i))
                .await
                .unwrap();
        }

        let deleted = db
            .delete_items_beyond_retention("u", 50, THIRTY_DAYS)
            .await
            .unwrap();
        assert_eq!(deleted, 30);
        assert_eq!(db.count_items_for_user("u").await.unwrap(), 50);

        // The survivors are exactly the newest fifty
        let kept = db.list_items_for_user("u", 100, 0).await.unwrap();
        assert!(kept.iter().all(|i| i.item_id.starts_with("new-")
            || i.item_id
                .strip_prefix("old-")
                .and_then(|n| n.parse::<i64>().ok())
                .is_some_and(|n| n < 30)));
    }

    #[tokio::test]
    async fn test_retention_below_floor_deletes_nothing() {
        let db = test_db().await;
        let sub = test_subscription(&db, "u", "cats").await;
        let now = Utc::now().timestamp();
        for i in 0..40 {
            db.insert_item_if_absent(&sub, &test_item(&format!("old-{i}"), now - 90 * DAY - i))
                .await
                .unwrap();
        }

        let deleted = db
            .delete_items_beyond_retention("u", 50, THIRTY_DAYS)
            .await
            .unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(db.count_items_for_user("u").await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_retention_keeps_recent_items_beyond_floor() {
        let db = test_db().await;
        let sub = test_subscription(&db, "u", "cats").await;
        let now = Utc::now().timestamp();
        for i in 0..70 {
            db.insert_item_if_absent(&sub, &test_item(&format!("recent-{i}"), now - i * 60))
                .await
                .unwrap();
        }

        let deleted = db
            .delete_items_beyond_retention("u", 50, THIRTY_DAYS)
            .await
            .unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(db.count_items_for_user("u").await.unwrap(), 70);
    }

    #[tokio::test]
    async fn test_retention_only_touches_target_user() {
        let db = test_db().await;
        let a = test_subscription(&db, "a", "cats").await;
        let b = test_subscription(&db, "b", "cats").await;
        let now = Utc::now().timestamp();
        for i in 0..60 {
            let item = test_item(&format!("old-{i}"), now - 60 * DAY - i);
            db.insert_item_if_absent(&a, &item).await.unwrap();
            db.insert_item_if_absent(&b, &item).await.unwrap();
        }

        let deleted = db
            .delete_items_beyond_retention("a", 50, THIRTY_DAYS)
            .await
            .unwrap();
        assert_eq!(deleted, 10);
        assert_eq!(db.count_items_for_user("a").await.unwrap(), 50);
        assert_eq!(db.count_items_for_user("b").await.unwrap(), 60);
    }

    #[tokio::test]
    async fn test_items_survive_unsubscribe() {
        let db = test_db().await;
        let sub = test_subscription(&db, "u", "cats").await;
        db.insert_item_if_absent(&sub, &test_item("a", 1)).await.unwrap();

        db.delete_subscription(&sub.id).await.unwrap();

        assert_eq!(db.count_items_for_user("u").await.unwrap(), 1);
        assert_eq!(db.item_user_ids().await.unwrap(), vec!["u".to_string()]);
    }
}
