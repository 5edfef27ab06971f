//! The seam between the moderation pipeline and the hosting platform.

use crate::error::PlatformError;
use crate::models::ContentItem;
use async_trait::async_trait;
use std::fmt;

pub const COMPOSE_URL: &str = "https://www.reddit.com/message/compose";

/// Account that manages "notify me of the next part" subscriptions.
pub const SUBSCRIPTION_BOT: &str = "UpdateMeBot";
pub const SUBSCRIPTION_SUBJECT: &str = "Subscribe";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommentOptions {
    pub distinguish: bool,
    pub sticky: bool,
    pub lock: bool,
}

impl CommentOptions {
    /// Moderator notice pinned to the top of the thread.
    pub fn pinned() -> Self {
        Self {
            distinguish: true,
            sticky: true,
            lock: false,
        }
    }

    pub fn pinned_locked() -> Self {
        Self {
            lock: true,
            ..Self::pinned()
        }
    }

    pub fn distinguished() -> Self {
        Self {
            distinguish: true,
            ..Default::default()
        }
    }
}

impl fmt::Display for CommentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::new();
        if self.distinguish {
            flags.push("distinguished");
        }
        if self.sticky {
            flags.push("sticky");
        }
        if self.lock {
            flags.push("locked");
        }
        if flags.is_empty() {
            write!(f, "plain")
        } else {
            write!(f, "{}", flags.join("+"))
        }
    }
}

/// Builds a private-message compose link. Absent `subject`/`message` are left
/// out of the query entirely.
pub fn compose_link(to: &str, subject: Option<&str>, message: Option<&str>) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair("to", to);
    if let Some(subject) = subject {
        query.append_pair("subject", subject);
    }
    if let Some(message) = message {
        query.append_pair("message", message);
    }
    format!("{COMPOSE_URL}?{}", query.finish())
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// The forum this client moderates.
    fn forum(&self) -> &str;

    /// Items created in roughly the last hour, from the search index. May
    /// contain items from other forums.
    async fn fetch_recent(&self) -> Result<Vec<ContentItem>, PlatformError>;

    /// Newest items, limited to those newer than `before` when given.
    async fn fetch_newest(&self, before: Option<&str>) -> Result<Vec<ContentItem>, PlatformError>;

    /// The author's items from the last day, newest first.
    async fn fetch_author_recent(&self, author: &str) -> Result<Vec<ContentItem>, PlatformError>;

    /// Whether the item has been removed, lost its author, or is otherwise gone.
    async fn is_deleted(&self, id: &str) -> Result<bool, PlatformError>;

    async fn delete(&self, item: &ContentItem) -> Result<(), PlatformError>;

    async fn comment(
        &self,
        item: &ContentItem,
        text: &str,
        options: CommentOptions,
    ) -> Result<(), PlatformError>;

    async fn send_private_message(
        &self,
        author: &str,
        subject: &str,
        text: &str,
    ) -> Result<(), PlatformError>;

    /// Fails with [`PlatformError::LabelNotFound`] when the forum has no such label.
    async fn apply_taxonomy_label(&self, item: &ContentItem, label: &str) -> Result<(), PlatformError>;

    /// Link that opens a message to the forum's moderators.
    fn build_contact_link(&self, subject: Option<&str>, body: Option<&str>) -> String {
        compose_link(&format!("/r/{}", self.forum()), subject, body)
    }

    /// Link a reader follows to subscribe to the author's next part.
    fn build_subscribe_link(&self, body: &str) -> String {
        compose_link(SUBSCRIPTION_BOT, Some(SUBSCRIPTION_SUBJECT), Some(body))
    }
}
