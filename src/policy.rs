//! Per-item moderation decisions.
//!
//! The engine is pure: it sees one item, its cached record (if any) and the
//! author's prior live post (if the caller found one), and returns what should
//! happen. Carrying out the decision is the driver's job.

use crate::analyzer::{PostAnalyzer, PostMetadata};
use crate::config::Config;
use crate::models::{ContentItem, SubmissionRecord};
use chrono::{DateTime, Utc};

/// The author's most recent other post that still counts against the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorPost {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Seen before and nothing changed.
    AlreadyProcessed,
    /// Seen before as a plain post, since labelled as a series.
    PromoteToSeries,
    /// New but older than the stale cutoff; left alone and not recorded.
    IgnoreStale { age_seconds: i64 },
    RejectTimeLimit {
        wait_seconds: i64,
        previous_post_id: String,
    },
    RejectFormatting(PostMetadata),
    AcceptSeries(PostMetadata),
    Accept(PostMetadata),
}

impl Decision {
    pub fn name(&self) -> &'static str {
        match self {
            Decision::AlreadyProcessed => "already processed",
            Decision::PromoteToSeries => "promote to series",
            Decision::IgnoreStale { .. } => "ignore stale",
            Decision::RejectTimeLimit { .. } => "reject: time limit",
            Decision::RejectFormatting(_) => "reject: formatting",
            Decision::AcceptSeries(_) => "accept: series",
            Decision::Accept(_) => "accept",
        }
    }
}

pub struct PolicyEngine {
    analyzer: PostAnalyzer,
    series_label: String,
    timelimit: i64,
    enforce_timelimit: bool,
    ignore_old_posts: bool,
    ignore_older_than: i64,
}

impl PolicyEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            analyzer: PostAnalyzer::new(&config.series_flair_name),
            series_label: config.series_flair_name.clone(),
            timelimit: secs(config.post_timelimit),
            enforce_timelimit: config.enforce_timelimit,
            ignore_old_posts: config.ignore_old_posts,
            ignore_older_than: secs(config.ignore_older_than),
        }
    }

    pub fn analyzer(&self) -> &PostAnalyzer {
        &self.analyzer
    }

    /// Whether a prior-post lookup can change the outcome for `item`. The
    /// driver skips the lookup (and its deletion probe) otherwise.
    pub fn needs_prior_post(&self, item: &ContentItem, now: DateTime<Utc>) -> bool {
        let age = item.age_seconds(now);
        self.enforce_timelimit && age <= self.timelimit && !self.is_stale(age)
    }

    fn is_stale(&self, age: i64) -> bool {
        self.ignore_old_posts && age > self.ignore_older_than
    }

    pub fn timelimit(&self) -> i64 {
        self.timelimit
    }

    pub fn decide(
        &self,
        item: &ContentItem,
        cached: Option<&SubmissionRecord>,
        prior: Option<&PriorPost>,
        now: DateTime<Utc>,
    ) -> Decision {
        if let Some(record) = cached {
            return self.review_seen(item, record);
        }

        let age = item.age_seconds(now);
        if self.is_stale(age) {
            return Decision::IgnoreStale { age_seconds: age };
        }

        if let Some(wait) = self.time_limit_wait(item, prior, now) {
            return Decision::RejectTimeLimit {
                wait_seconds: wait,
                previous_post_id: prior.map(|p| p.id.clone()).unwrap_or_default(),
            };
        }

        let meta = self.analyzer.analyze_item(item);
        if meta.is_invalid() {
            Decision::RejectFormatting(meta)
        } else if meta.is_serial() {
            Decision::AcceptSeries(meta)
        } else {
            Decision::Accept(meta)
        }
    }

    fn review_seen(&self, item: &ContentItem, record: &SubmissionRecord) -> Decision {
        if !record.deleted && !record.series && item.has_label(&self.series_label) {
            Decision::PromoteToSeries
        } else {
            Decision::AlreadyProcessed
        }
    }

    /// Seconds the author still has to wait, if `item` collides with `prior`.
    fn time_limit_wait(
        &self,
        item: &ContentItem,
        prior: Option<&PriorPost>,
        now: DateTime<Utc>,
    ) -> Option<i64> {
        if !self.needs_prior_post(item, now) {
            return None;
        }
        let prior = prior.filter(|p| p.id != item.id)?;
        let elapsed = item.created_at.timestamp() - prior.created_at.timestamp();
        // a prior that is newer than the item never blocks it
        if elapsed < 0 {
            return None;
        }
        let wait = self.timelimit - elapsed;
        (wait > 0).then_some(wait)
    }
}

fn secs(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn item(id: &str, title: &str, minutes_ago: i64) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            author: Some("pikachu".to_string()),
            created_at: now() - Duration::minutes(minutes_ago),
            title: title.to_string(),
            body: "A perfectly ordinary paragraph.".to_string(),
            forum: "nosleep".to_string(),
            taxonomy_label: None,
            permalink: format!("https://redd.it/{id}"),
        }
    }

    fn engine() -> PolicyEngine {
        PolicyEngine::new(&Config::default())
    }

    fn prior(id: &str, minutes_ago: i64) -> PriorPost {
        PriorPost {
            id: id.to_string(),
            created_at: now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_plain_post_is_accepted() {
        match engine().decide(&item("a", "The Cellar", 5), None, None, now()) {
            Decision::Accept(meta) => assert!(!meta.is_serial()),
            other => panic!("Expected Accept, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_tag_is_rejected() {
        match engine().decide(&item("a", "My Story [Part 1 of 2]", 5), None, None, now()) {
            Decision::RejectFormatting(meta) => {
                assert_eq!(meta.invalid_tags.len(), 1);
                assert_eq!(meta.invalid_tags[0].text, "part 1 of 2");
            }
            other => panic!("Expected RejectFormatting, got {other:?}"),
        }
    }

    #[test]
    fn test_update_tag_is_series() {
        match engine().decide(&item("a", "Truckers Have Some Stories (update)", 5), None, None, now()) {
            Decision::AcceptSeries(meta) => assert!(!meta.is_final),
            other => panic!("Expected AcceptSeries, got {other:?}"),
        }
    }

    #[test]
    fn test_time_limit_wins_over_formatting() {
        let p = prior("old", 120);
        let decision = engine().decide(&item("new", "Bad [True]", 5), None, Some(&p), now());
        match decision {
            Decision::RejectTimeLimit {
                wait_seconds,
                previous_post_id,
            } => {
                // 24h window, posts 115 minutes apart
                assert_eq!(wait_seconds, 86400 - 115 * 60);
                assert_eq!(previous_post_id, "old");
            }
            other => panic!("Expected RejectTimeLimit, got {other:?}"),
        }
    }

    #[test]
    fn test_time_limit_ignores_self_and_elapsed_window() {
        let e = engine();
        let it = item("a", "The Cellar", 5);
        assert!(matches!(
            e.decide(&it, None, Some(&prior("a", 5)), now()),
            Decision::Accept(_)
        ));
        // prior more than a day before the new post
        assert!(matches!(
            e.decide(&it, None, Some(&prior("old", 5 + 24 * 60 + 1)), now()),
            Decision::Accept(_)
        ));
    }

    #[test]
    fn test_newer_prior_does_not_block_older_item() {
        // the author's second post was processed first
        let older = item("older", "The Cellar", 10);
        match engine().decide(&older, None, Some(&prior("newer", 5)), now()) {
            Decision::Accept(_) => {}
            other => panic!("Expected Accept, got {other:?}"),
        }
    }

    #[test]
    fn test_time_limit_disabled() {
        let config = Config {
            enforce_timelimit: false,
            ..Config::default()
        };
        let e = PolicyEngine::new(&config);
        let it = item("b", "The Cellar", 5);
        assert!(!e.needs_prior_post(&it, now()));
        assert!(matches!(
            e.decide(&it, None, Some(&prior("a", 10)), now()),
            Decision::Accept(_)
        ));
    }

    #[test]
    fn test_stale_new_post_is_ignored() {
        let it = item("a", "Bad [True]", 13 * 60);
        match engine().decide(&it, None, None, now()) {
            Decision::IgnoreStale { age_seconds } => assert_eq!(age_seconds, 13 * 3600),
            other => panic!("Expected IgnoreStale, got {other:?}"),
        }

        let config = Config {
            ignore_old_posts: false,
            ..Config::default()
        };
        assert!(matches!(
            PolicyEngine::new(&config).decide(&it, None, None, now()),
            Decision::RejectFormatting(_)
        ));
    }

    #[test]
    fn test_seen_items() {
        let e = engine();
        let mut it = item("a", "The Cellar", 5);
        let mut record = SubmissionRecord::new("a", "pikachu", it.created_at);

        assert_eq!(e.decide(&it, Some(&record), None, now()), Decision::AlreadyProcessed);

        it.taxonomy_label = Some("Series".to_string());
        assert_eq!(e.decide(&it, Some(&record), None, now()), Decision::PromoteToSeries);

        record.mark_series();
        assert_eq!(e.decide(&it, Some(&record), None, now()), Decision::AlreadyProcessed);

        let mut removed = SubmissionRecord::new("a", "pikachu", it.created_at);
        removed.mark_deleted();
        assert_eq!(e.decide(&it, Some(&removed), None, now()), Decision::AlreadyProcessed);
    }

    #[test]
    fn test_seen_items_skip_stale_and_time_checks() {
        let it = item("a", "Bad [True]", 20 * 60);
        let record = SubmissionRecord::new("a", "pikachu", it.created_at);
        assert_eq!(
            engine().decide(&it, Some(&record), Some(&prior("z", 21 * 60)), now()),
            Decision::AlreadyProcessed
        );
    }
}
