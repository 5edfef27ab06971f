//! In-memory [`Platform`] that records every write instead of performing it.
//!
//! Used by `--replay` to dry-run a pass over a YAML file of posts, and by the
//! driver tests.

use crate::error::PlatformError;
use crate::models::ContentItem;
use crate::platform::{CommentOptions, Platform};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

const RECENT_WINDOW_SECS: i64 = 3600;
const AUTHOR_WINDOW_SECS: i64 = 86400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Delete {
        id: String,
    },
    Comment {
        id: String,
        text: String,
        options: CommentOptions,
    },
    PrivateMessage {
        to: String,
        subject: String,
        text: String,
    },
    Label {
        id: String,
        label: String,
    },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Delete { id } => write!(f, "DELETE {id}"),
            Action::Comment { id, text, options } => {
                write!(f, "COMMENT {id} [{options}]\n{text}")
            }
            Action::PrivateMessage { to, subject, text } => {
                write!(f, "MESSAGE /u/{to} \"{subject}\"\n{text}")
            }
            Action::Label { id, label } => write!(f, "LABEL {id} {label}"),
        }
    }
}

/// One post in a replay file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayPost {
    pub id: String,
    pub author: Option<String>,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub created_minutes_ago: i64,
    #[serde(default)]
    pub flair: Option<String>,
    /// Defaults to the replay file's forum.
    #[serde(default)]
    pub forum: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayFile {
    pub forum: Option<String>,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    pub posts: Vec<ReplayPost>,
}

impl ReplayFile {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

#[derive(Default)]
struct State {
    items: Vec<ContentItem>,
    deleted: HashSet<String>,
    labels: Vec<String>,
    actions: Vec<Action>,
    fail_writes_for: HashSet<String>,
    fail_fetches: bool,
}

pub struct ReplayPlatform {
    forum: String,
    state: Mutex<State>,
}

impl ReplayPlatform {
    /// An empty forum whose only label is `series_label`.
    pub fn new(forum: &str, series_label: &str) -> Self {
        Self {
            forum: forum.to_string(),
            state: Mutex::new(State {
                labels: vec![series_label.to_string()],
                ..Default::default()
            }),
        }
    }

    pub fn from_replay(file: ReplayFile, default_forum: &str, series_label: &str, now: DateTime<Utc>) -> Self {
        let forum = file.forum.unwrap_or_else(|| default_forum.to_string());
        let platform = Self::new(&forum, series_label);
        if let Some(labels) = file.labels {
            platform.lock().labels = labels;
        }
        for post in file.posts {
            let deleted = post.deleted;
            let item = ContentItem {
                permalink: format!("https://redd.it/{}", post.id),
                id: post.id,
                author: post.author,
                created_at: now - Duration::minutes(post.created_minutes_ago),
                title: post.title,
                body: post.body,
                forum: post.forum.unwrap_or_else(|| forum.clone()),
                taxonomy_label: post.flair,
            };
            if deleted {
                platform.mark_deleted(&item.id);
            }
            platform.add_item(item);
        }
        platform
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_item(&self, item: ContentItem) {
        self.lock().items.push(item);
    }

    /// Simulates a moderator or the author changing the label.
    pub fn set_label(&self, id: &str, label: Option<&str>) {
        if let Some(item) = self.lock().items.iter_mut().find(|i| i.id == id) {
            item.taxonomy_label = label.map(str::to_string);
        }
    }

    /// Simulates removal outside the bot.
    pub fn mark_deleted(&self, id: &str) {
        self.lock().deleted.insert(id.to_string());
    }

    /// Every write to this item will fail with a rate-limit error.
    pub fn fail_writes_for(&self, id: &str) {
        self.lock().fail_writes_for.insert(id.to_string());
    }

    /// Both listing streams fail with a rate-limit error from now on.
    pub fn fail_fetches(&self) {
        self.lock().fail_fetches = true;
    }

    pub fn actions(&self) -> Vec<Action> {
        self.lock().actions.clone()
    }

    pub fn take_actions(&self) -> Vec<Action> {
        std::mem::take(&mut self.lock().actions)
    }

    fn record(&self, item_id: &str, action: Action) -> Result<(), PlatformError> {
        let mut state = self.lock();
        if state.fail_writes_for.contains(item_id) {
            return Err(PlatformError::RateLimited);
        }
        log::info!("Replay: {}", action.to_string().lines().next().unwrap_or_default());
        state.actions.push(action);
        Ok(())
    }

    fn newest_first(mut items: Vec<ContentItem>) -> Vec<ContentItem> {
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }
}

#[async_trait]
impl Platform for ReplayPlatform {
    fn forum(&self) -> &str {
        &self.forum
    }

    async fn fetch_recent(&self) -> Result<Vec<ContentItem>, PlatformError> {
        let now = Utc::now();
        let state = self.lock();
        if state.fail_fetches {
            return Err(PlatformError::RateLimited);
        }
        let items = state
            .items
            .iter()
            .filter(|i| i.age_seconds(now) <= RECENT_WINDOW_SECS)
            .cloned()
            .collect();
        Ok(Self::newest_first(items))
    }

    async fn fetch_newest(&self, before: Option<&str>) -> Result<Vec<ContentItem>, PlatformError> {
        let state = self.lock();
        if state.fail_fetches {
            return Err(PlatformError::RateLimited);
        }
        let cutoff = before.and_then(|id| state.items.iter().find(|i| i.id == id).map(|i| i.created_at));
        let items = state
            .items
            .iter()
            .filter(|i| i.forum == self.forum)
            .filter(|i| cutoff.map(|c| i.created_at > c).unwrap_or(true))
            .cloned()
            .collect();
        Ok(Self::newest_first(items))
    }

    async fn fetch_author_recent(&self, author: &str) -> Result<Vec<ContentItem>, PlatformError> {
        let now = Utc::now();
        let items = self
            .lock()
            .items
            .iter()
            .filter(|i| i.author_name().map(|a| a.eq_ignore_ascii_case(author)).unwrap_or(false))
            .filter(|i| i.age_seconds(now) <= AUTHOR_WINDOW_SECS)
            .cloned()
            .collect();
        Ok(Self::newest_first(items))
    }

    async fn is_deleted(&self, id: &str) -> Result<bool, PlatformError> {
        let state = self.lock();
        if state.deleted.contains(id) {
            return Ok(true);
        }
        Ok(state
            .items
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.author.is_none())
            .unwrap_or(true))
    }

    async fn delete(&self, item: &ContentItem) -> Result<(), PlatformError> {
        self.record(&item.id, Action::Delete { id: item.id.clone() })?;
        self.mark_deleted(&item.id);
        Ok(())
    }

    async fn comment(
        &self,
        item: &ContentItem,
        text: &str,
        options: CommentOptions,
    ) -> Result<(), PlatformError> {
        self.record(
            &item.id,
            Action::Comment {
                id: item.id.clone(),
                text: text.to_string(),
                options,
            },
        )
    }

    async fn send_private_message(
        &self,
        author: &str,
        subject: &str,
        text: &str,
    ) -> Result<(), PlatformError> {
        self.record(
            "",
            Action::PrivateMessage {
                to: author.to_string(),
                subject: subject.to_string(),
                text: text.to_string(),
            },
        )
    }

    async fn apply_taxonomy_label(&self, item: &ContentItem, label: &str) -> Result<(), PlatformError> {
        let known = self.lock().labels.iter().any(|l| l.eq_ignore_ascii_case(label));
        if !known {
            return Err(PlatformError::LabelNotFound {
                label: label.to_string(),
                forum: self.forum.clone(),
            });
        }
        self.record(
            &item.id,
            Action::Label {
                id: item.id.clone(),
                label: label.to_string(),
            },
        )?;
        self.set_label(&item.id, Some(label));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, author: &str, minutes_ago: i64, forum: &str) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            author: Some(author.to_string()),
            created_at: Utc::now() - Duration::minutes(minutes_ago),
            title: "t".to_string(),
            body: String::new(),
            forum: forum.to_string(),
            taxonomy_label: None,
            permalink: format!("https://redd.it/{id}"),
        }
    }

    #[tokio::test]
    async fn test_newest_respects_cursor_and_forum() {
        let p = ReplayPlatform::new("nosleep", "series");
        p.add_item(item("a", "x", 30, "nosleep"));
        p.add_item(item("b", "y", 20, "nosleep"));
        p.add_item(item("c", "z", 10, "other"));

        let all = p.fetch_newest(None).await.unwrap();
        assert_eq!(all.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);

        let after_a = p.fetch_newest(Some("a")).await.unwrap();
        assert_eq!(after_a.len(), 1);
        assert_eq!(after_a[0].id, "b");

        // the search stream leaks other forums
        assert_eq!(p.fetch_recent().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_recent_is_bounded_to_an_hour() {
        let p = ReplayPlatform::new("nosleep", "series");
        p.add_item(item("old", "x", 90, "nosleep"));
        p.add_item(item("new", "x", 5, "nosleep"));
        let recent = p.fetch_recent().await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "new");
    }

    #[tokio::test]
    async fn test_label_not_found() {
        let p = ReplayPlatform::new("nosleep", "series");
        let it = item("a", "x", 1, "nosleep");
        p.add_item(it.clone());
        match p.apply_taxonomy_label(&it, "finale").await {
            Err(PlatformError::LabelNotFound { label, forum }) => {
                assert_eq!(label, "finale");
                assert_eq!(forum, "nosleep");
            }
            other => panic!("Expected LabelNotFound, got {other:?}"),
        }
        p.apply_taxonomy_label(&it, "SERIES").await.unwrap();
        assert_eq!(p.actions().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_marks_item_deleted() {
        let p = ReplayPlatform::new("nosleep", "series");
        let it = item("a", "x", 1, "nosleep");
        p.add_item(it.clone());
        assert!(!p.is_deleted("a").await.unwrap());
        p.delete(&it).await.unwrap();
        assert!(p.is_deleted("a").await.unwrap());
        assert!(p.is_deleted("unknown").await.unwrap());
        assert_eq!(p.take_actions(), vec![Action::Delete { id: "a".to_string() }]);
        assert!(p.actions().is_empty());
    }

    #[tokio::test]
    async fn test_failed_fetches() {
        let p = ReplayPlatform::new("nosleep", "series");
        p.add_item(item("a", "x", 1, "nosleep"));
        p.fail_fetches();
        assert!(matches!(p.fetch_newest(None).await, Err(PlatformError::RateLimited)));
        assert!(matches!(p.fetch_recent().await, Err(PlatformError::RateLimited)));
    }

    #[test]
    fn test_replay_file_parses() {
        let file: ReplayFile = serde_yaml::from_str(
            "forum: nosleep\nposts:\n  - id: a1\n    author: pikachu\n    title: \"My Story [Part 1 of 2]\"\n    created_minutes_ago: 12\n",
        )
        .unwrap();
        let now = Utc::now();
        let p = ReplayPlatform::from_replay(file, "ignored", "series", now);
        assert_eq!(p.forum(), "nosleep");
        let items = p.lock().items.clone();
        assert_eq!(items[0].created_at, now - Duration::minutes(12));
        assert_eq!(items[0].forum, "nosleep");
    }
}
