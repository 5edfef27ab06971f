//! The poll loop: fetch, decide, act, remember.

use crate::config::Config;
use crate::error::{BotError, PlatformError};
use crate::messages::{englishify_time, MessageBuilder, RemovalLinks, REAPPROVAL_SUBJECT};
use crate::models::{ContentItem, SubmissionRecord};
use crate::platform::{CommentOptions, Platform};
use crate::policy::{Decision, PolicyEngine, PriorPost};
use crate::store::KeyValueStore;
use crate::tracker::{LifecycleTracker, Lookup};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What happened to one item during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Unchanged,
    Promoted,
    Ignored,
    Rejected,
    AcceptedSeries,
    Accepted,
    AuthorGone,
}

impl Outcome {
    /// Newly accepted items are live and can serve as the `before` cursor.
    fn advances_cursor(self) -> bool {
        matches!(self, Outcome::Accepted | Outcome::AcceptedSeries)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub fetched: usize,
    pub accepted: usize,
    pub series: usize,
    pub rejected: usize,
    pub promoted: usize,
    pub unchanged: usize,
    pub ignored: usize,
    pub failed: usize,
}

impl PassSummary {
    fn count(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Promoted => self.promoted += 1,
            Outcome::Ignored | Outcome::AuthorGone => self.ignored += 1,
            Outcome::Rejected => self.rejected += 1,
            Outcome::AcceptedSeries => self.series += 1,
            Outcome::Accepted => self.accepted += 1,
        }
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched={} accepted={} series={} rejected={} promoted={} unchanged={} ignored={} failed={}",
            self.fetched,
            self.accepted,
            self.series,
            self.rejected,
            self.promoted,
            self.unchanged,
            self.ignored,
            self.failed
        )
    }
}

/// Seconds to sleep so passes start on a fixed cadence measured from `elapsed`
/// since the loop began, however long each pass took.
pub fn sleep_interval(elapsed: Duration, interval: u64) -> Duration {
    let interval = interval.max(1);
    Duration::from_secs(interval - elapsed.as_secs() % interval)
}

pub struct AutoBot<'a, P: Platform> {
    config: &'a Config,
    platform: P,
    store: Arc<dyn KeyValueStore>,
    tracker: LifecycleTracker,
    policy: PolicyEngine,
    messages: MessageBuilder,
    /// Newest item accepted so far; `fetch_newest` only returns newer ones.
    cursor: Option<String>,
}

impl<'a, P: Platform> AutoBot<'a, P> {
    pub fn new(config: &'a Config, platform: P, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            tracker: LifecycleTracker::new(store.clone(), config.cache_ttl(), config.post_timelimit),
            policy: PolicyEngine::new(config),
            messages: MessageBuilder::new(platform.forum()),
            config,
            platform,
            store,
            cursor: None,
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn tracker(&self) -> &LifecycleTracker {
        &self.tracker
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Runs one pass, or passes on a fixed cadence until Ctrl-C when
    /// `forever` is set. In forever mode a failed pass is logged and the loop
    /// carries on.
    pub async fn run(&mut self, forever: bool, interval: u64) -> Result<(), BotError> {
        let started = Instant::now();
        loop {
            match self.run_pass(Utc::now()).await {
                Ok(summary) => log::info!("Pass complete: {summary}"),
                Err(e) if !forever => return Err(e),
                Err(e) => log::error!("Pass failed: {e}"),
            }

            if !forever {
                return Ok(());
            }

            let sleep = sleep_interval(started.elapsed(), interval);
            log::info!("Sleeping {}s until next run", sleep.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received Ctrl-C, shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Fetches the newest and recent streams, then decides on every item
    /// oldest first.
    pub async fn run_pass(&mut self, now: DateTime<Utc>) -> Result<PassSummary, BotError> {
        if let Some(id) = self.cursor.clone() {
            if self.platform.is_deleted(&id).await? {
                log::info!("Cursor post {id} was removed, not using it");
                self.cursor = None;
            }
        }

        let newest = self.platform.fetch_newest(self.cursor.as_deref()).await?;
        let recent = self.platform.fetch_recent().await?;
        let items = self.collect_items(newest, recent);

        let mut summary = PassSummary {
            fetched: items.len(),
            ..Default::default()
        };
        log::info!("Processing {} posts for /r/{}", items.len(), self.platform.forum());

        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let lookups = self.tracker.lookup_many(&ids).await;

        // once an item fails, the cursor stays put so the newest stream
        // brings it back next pass
        let mut cursor_blocked = false;
        for (item, lookup) in items.iter().zip(lookups) {
            let cached = match lookup {
                Lookup::Seen(record) => Some(record),
                Lookup::Unseen => None,
                Lookup::Unavailable => {
                    summary.failed += 1;
                    cursor_blocked = true;
                    continue;
                }
            };

            match self.process_item(item, cached, now).await {
                Ok(outcome) => {
                    summary.count(outcome);
                    if outcome.advances_cursor() && !cursor_blocked {
                        self.cursor = Some(item.id.clone());
                    }
                }
                Err(e @ BotError::Invariant(_)) => return Err(e),
                Err(e) => {
                    log::error!("Failed to process post {}: {e}", item.id);
                    summary.failed += 1;
                    cursor_blocked = true;
                }
            }
        }

        if let Err(e) = self.store.checkpoint().await {
            log::warn!("Failed to checkpoint record store: {e}");
        }
        Ok(summary)
    }

    /// Merges both streams, drops duplicates and foreign posts, and sorts
    /// oldest first.
    fn collect_items(&self, newest: Vec<ContentItem>, recent: Vec<ContentItem>) -> Vec<ContentItem> {
        let forum = self.platform.forum();
        let mut seen = HashSet::new();
        let mut items: Vec<ContentItem> = newest
            .into_iter()
            .chain(recent)
            .filter(|i| seen.insert(i.id.clone()))
            .filter(|i| {
                let ours = i.forum.eq_ignore_ascii_case(forum);
                if !ours {
                    log::warn!("Found post {} from other subreddit /r/{}", i.id, i.forum);
                }
                ours
            })
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        items
    }

    async fn process_item(
        &self,
        item: &ContentItem,
        cached: Option<SubmissionRecord>,
        now: DateTime<Utc>,
    ) -> Result<Outcome, BotError> {
        let author = match item.author_name() {
            Some(a) => a,
            None => {
                log::info!("Skipping post {} whose author is gone", item.id);
                return Ok(Outcome::AuthorGone);
            }
        };

        let prior = if cached.is_none() && self.policy.needs_prior_post(item, now) {
            self.prior_post(item, author).await?
        } else {
            None
        };

        let decision = self.policy.decide(item, cached.as_ref(), prior.as_ref(), now);
        match &decision {
            Decision::AlreadyProcessed => log::debug!("Skipping previously seen post {}", item.id),
            d => log::info!("Post {} by {author}: {}", item.id, d.name()),
        }

        match decision {
            Decision::AlreadyProcessed => Ok(Outcome::Unchanged),
            Decision::IgnoreStale { age_seconds } => {
                log::info!("Ignoring older post {} ({age_seconds}s old)", item.id);
                Ok(Outcome::Ignored)
            }
            Decision::PromoteToSeries => {
                let mut record = cached.ok_or_else(|| {
                    BotError::Invariant(format!("promotion of {} without a record", item.id))
                })?;
                log::info!("Post {} was flaired series after the fact", item.id);
                self.post_series_reminder(item, author).await?;
                self.send_series_pm(item, author).await?;
                record.mark_series();
                record.mark_series_notice_sent();
                self.tracker.update(&record).await?;
                Ok(Outcome::Promoted)
            }
            Decision::RejectTimeLimit {
                wait_seconds,
                previous_post_id,
            } => {
                log::info!(
                    "Rejecting post {} by {author}: previous post {previous_post_id}, can post in {wait_seconds}s",
                    item.id
                );
                let msg = self.messages.create_post_a_day_msg(
                    &englishify_time(wait_seconds),
                    &self.platform.build_contact_link(None, None),
                );
                self.platform
                    .comment(item, &msg, CommentOptions::distinguished())
                    .await?;
                self.platform.delete(item).await?;
                self.persist_new(item, author, |r| r.mark_deleted()).await?;
                Ok(Outcome::Rejected)
            }
            Decision::RejectFormatting(meta) => {
                log::info!(
                    "Removing post {} by {author}: tags [{}] nsfw={} codeblocks={} long_paragraphs={}",
                    item.id,
                    meta.bad_tags(),
                    meta.has_nsfw_title,
                    meta.has_codeblocks,
                    meta.has_long_paragraphs
                );
                let links = RemovalLinks {
                    contact: self.platform.build_contact_link(None, None),
                    reapproval: self.platform.build_contact_link(
                        Some(REAPPROVAL_SUBJECT),
                        Some(&self.messages.create_approval_msg(&item.permalink)),
                    ),
                };
                let msg = self
                    .messages
                    .create_deleted_post_msg(&item.permalink, &meta, &links);
                self.platform
                    .comment(item, &msg, CommentOptions::pinned())
                    .await?;
                self.platform.delete(item).await?;
                self.persist_new(item, author, |r| r.mark_deleted()).await?;
                Ok(Outcome::Rejected)
            }
            Decision::AcceptSeries(meta) => {
                self.tracker.cache_activity_maybe(item, author, now).await?;

                match self
                    .platform
                    .apply_taxonomy_label(item, &self.config.series_flair_name)
                    .await
                {
                    Ok(()) => {}
                    Err(PlatformError::LabelNotFound { label, forum }) => {
                        log::error!("Flair class {label} not found for /r/{forum}, post {} left unflaired", item.id);
                    }
                    Err(e) => return Err(e.into()),
                }

                let notify = !meta.is_final;
                if notify {
                    self.post_series_reminder(item, author).await?;
                    self.send_series_pm(item, author).await?;
                } else {
                    log::info!("Post {} is a series finale, not sending reminders", item.id);
                }
                self.persist_new(item, author, |r| {
                    r.mark_series();
                    if notify {
                        r.mark_series_notice_sent();
                    }
                })
                .await?;
                Ok(Outcome::AcceptedSeries)
            }
            Decision::Accept(_) => {
                self.tracker.cache_activity_maybe(item, author, now).await?;
                self.persist_new(item, author, |_| {}).await?;
                Ok(Outcome::Accepted)
            }
        }
    }

    async fn persist_new<F>(&self, item: &ContentItem, author: &str, mark: F) -> Result<(), BotError>
    where
        F: FnOnce(&mut SubmissionRecord),
    {
        let mut record = SubmissionRecord::new(&item.id, author, item.created_at);
        mark(&mut record);
        self.tracker.persist(&record).await?;
        log::debug!("Persisted {record:?}");
        Ok(())
    }

    /// Finds the author's previous live post inside the window: the activity
    /// cache first, then (optionally) the author's recent history.
    async fn prior_post(&self, item: &ContentItem, author: &str) -> Result<Option<PriorPost>, BotError> {
        if let Some(activity) = self.tracker.last_activity(author).await? {
            if activity.last_post_id == item.id {
                // nothing to compare against
            } else if activity.last_post_time.timestamp() > item.created_at.timestamp() {
                log::info!(
                    "Activity for {author} points at newer post {}, not a prior post for {}",
                    activity.last_post_id,
                    item.id
                );
            } else if self.platform.is_deleted(&activity.last_post_id).await? {
                log::info!(
                    "Previous post {} by {author} was removed, not counting it",
                    activity.last_post_id
                );
            } else {
                return Ok(Some(PriorPost {
                    id: activity.last_post_id,
                    created_at: activity.last_post_time,
                }));
            }
        }

        if !self.config.author_history_fallback {
            return Ok(None);
        }

        let window = self.policy.timelimit();
        let mut history = self.platform.fetch_author_recent(author).await?;
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        for candidate in history {
            if candidate.id == item.id
                || !candidate.forum.eq_ignore_ascii_case(self.platform.forum())
                || candidate.created_at >= item.created_at
                || item.created_at.timestamp() - candidate.created_at.timestamp() >= window
            {
                continue;
            }
            if self.platform.is_deleted(&candidate.id).await? {
                continue;
            }
            log::info!("Found previous post {} by {author} in their history", candidate.id);
            return Ok(Some(PriorPost {
                id: candidate.id,
                created_at: candidate.created_at,
            }));
        }
        Ok(None)
    }

    async fn post_series_reminder(&self, item: &ContentItem, author: &str) -> Result<(), PlatformError> {
        let link = self
            .platform
            .build_subscribe_link(&self.messages.series_subscribe_body(author));
        let text = self.messages.create_series_comment(&link);
        log::info!("Adding series subscribe comment to {}", item.id);
        self.platform
            .comment(item, &text, CommentOptions::pinned_locked())
            .await
    }

    async fn send_series_pm(&self, item: &ContentItem, author: &str) -> Result<(), PlatformError> {
        self.platform
            .send_private_message(
                author,
                &self.messages.series_pm_subject(),
                &self.messages.create_series_msg(&item.permalink),
            )
            .await
    }
}
