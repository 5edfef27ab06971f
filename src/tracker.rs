//! What the bot remembers between passes: one record per processed submission
//! and one activity entry per author who posted inside the window.

use crate::error::{BotError, StoreError};
use crate::models::{ActivityRecord, ContentItem, SubmissionRecord};
use crate::store::{DataStore, KeyValueStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Result of looking an item up before deciding on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Unseen,
    Seen(SubmissionRecord),
    /// The store failed for this item; it is skipped and retried next pass.
    Unavailable,
}

pub struct LifecycleTracker {
    submissions: DataStore<SubmissionRecord>,
    activity: DataStore<ActivityRecord>,
    record_ttl: u64,
    window: u64,
}

impl LifecycleTracker {
    /// `window` is the enforcement window; submission records live for
    /// `record_ttl` seconds.
    pub fn new(backend: Arc<dyn KeyValueStore>, record_ttl: u64, window: u64) -> Self {
        Self {
            submissions: DataStore::new(backend.clone()),
            activity: DataStore::new(backend),
            record_ttl,
            window,
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<SubmissionRecord>, StoreError> {
        self.submissions.get(id).await
    }

    /// Looks up every id, aligned with the input. If the bulk read fails each
    /// id is retried on its own so one bad key only costs that item.
    pub async fn lookup_many(&self, ids: &[String]) -> Vec<Lookup> {
        match self.submissions.get_many(ids).await {
            Ok(records) => records
                .into_iter()
                .map(|r| r.map(Lookup::Seen).unwrap_or(Lookup::Unseen))
                .collect(),
            Err(e) => {
                log::warn!("Bulk lookup of {} records failed, falling back: {e}", ids.len());
                let mut out = Vec::with_capacity(ids.len());
                for id in ids {
                    out.push(match self.submissions.get(id).await {
                        Ok(Some(record)) => Lookup::Seen(record),
                        Ok(None) => Lookup::Unseen,
                        Err(e) => {
                            log::error!("Lookup of submission {id} failed: {e}");
                            Lookup::Unavailable
                        }
                    });
                }
                out
            }
        }
    }

    /// First write of a record; it expires `record_ttl` seconds from now.
    pub async fn persist(&self, record: &SubmissionRecord) -> Result<(), StoreError> {
        self.submissions
            .persist(&record.id, record, Some(self.record_ttl))
            .await
    }

    /// Rewrites a record keeping its remaining lifetime.
    pub async fn update(&self, record: &SubmissionRecord) -> Result<(), StoreError> {
        self.submissions.update(&record.id, record).await
    }

    pub async fn last_activity(&self, author: &str) -> Result<Option<ActivityRecord>, StoreError> {
        self.activity.get(author).await
    }

    /// Remembers `item` as the author's latest post if it was created inside
    /// the window. The entry expires when the window closes on it. Returns
    /// whether anything was written.
    pub async fn cache_activity_maybe(
        &self,
        item: &ContentItem,
        author: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, BotError> {
        let window = i64::try_from(self.window)
            .map_err(|_| BotError::Invariant(format!("window {} out of range", self.window)))?;
        // clock skew can put created_at slightly in the future
        let age = item.age_seconds(now).max(0);
        if age >= window {
            log::info!("Not caching activity for post {} outside the time limit", item.id);
            return Ok(false);
        }

        if let Some(existing) = self.activity.get(author).await? {
            if existing.last_post_time > item.created_at {
                log::info!(
                    "Keeping activity for {author}: post {} is newer than {}",
                    existing.last_post_id,
                    item.id
                );
                return Ok(false);
            }
        }

        let ttl = u64::try_from(window - age)
            .map_err(|_| BotError::Invariant(format!("negative activity ttl for {}", item.id)))?;
        let activity = ActivityRecord::from_item(item, author);
        log::info!(
            "Caching activity for {author}: post {} ttl {ttl}s",
            activity.last_post_id
        );
        self.activity.persist(author, &activity, Some(ttl)).await?;
        Ok(true)
    }
}
