use std::collections::BTreeSet;
use std::time::Duration;

use crate::storage::{Database, DatabaseError};

/// How much of each user's feed to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// The newest `min_keep` items survive regardless of age
    pub min_keep: u32,
    /// Items beyond the floor are deleted once older than this
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            min_keep: 50,
            max_age: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Result of one cleanup pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    /// Rows removed per user, including users with nothing to remove
    pub deleted: Vec<(String, u64)>,
    /// Users whose cleanup failed, with the error message
    pub failed: Vec<(String, String)>,
}

impl RetentionReport {
    pub fn total_deleted(&self) -> u64 {
        self.deleted.iter().map(|(_, n)| n).sum()
    }
}

/// Prunes every user's feed under a [`RetentionPolicy`].
#[derive(Clone)]
pub struct RetentionManager {
    db: Database,
    policy: RetentionPolicy,
}

impl RetentionManager {
    pub fn new(db: Database, policy: RetentionPolicy) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Apply the policy to every user who has subscriptions or stored items.
    ///
    /// A failure for one user is recorded and does not stop the others.
    pub async fn run_cleanup(&self) -> RetentionReport {
        let mut report = RetentionReport::default();

        let users = match self.users().await {
            Ok(users) => users,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list users for retention");
                return report;
            }
        };

        for user_id in users {
            match self
                .db
                .delete_items_beyond_retention(&user_id, self.policy.min_keep, self.policy.max_age)
                .await
            {
                Ok(count) => {
                    if count > 0 {
                        tracing::debug!(user_id = %user_id, deleted = count, "Pruned feed items");
                    }
                    report.deleted.push((user_id, count));
                }
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Retention failed for user");
                    report.failed.push((user_id, e.to_string()));
                }
            }
        }

        tracing::info!(
            users = report.deleted.len() + report.failed.len(),
            deleted = report.total_deleted(),
            failed = report.failed.len(),
            "Retention pass complete"
        );
        report
    }

    async fn users(&self) -> Result<BTreeSet<String>, DatabaseError> {
        let mut users: BTreeSet<String> = self.db.subscription_user_ids().await?.into_iter().collect();
        users.extend(self.db.item_user_ids().await?);
        Ok(users)
    }
}
