use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A text submission as returned by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    /// `None` when the account was deleted after posting.
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub forum: String,
    /// Moderator-assignable category (flair CSS class on Reddit).
    #[serde(default)]
    pub taxonomy_label: Option<String>,
    pub permalink: String,
}

impl ContentItem {
    /// Case-insensitive exact match of the item's label against `label`.
    /// A missing label never matches.
    pub fn has_label(&self, label: &str) -> bool {
        self.taxonomy_label
            .as_deref()
            .map(|l| l.eq_ignore_ascii_case(label))
            .unwrap_or(false)
    }

    pub fn author_name(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }
}

/// Types persisted through the key/value store. The namespace prefixes every
/// key so records of different kinds never collide.
pub trait Record: Serialize + DeserializeOwned + Clone {
    const NAMESPACE: &'static str;

    fn key(id: &str) -> String {
        format!("{}.{}", Self::NAMESPACE, id.to_lowercase())
    }
}

/// One per content item ever processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: String,
    pub author: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub submitted: DateTime<Utc>,
    #[serde(default)]
    pub series: bool,
    #[serde(default)]
    pub sent_series_pm: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl SubmissionRecord {
    pub fn new(id: &str, author: &str, submitted: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            author: author.to_string(),
            submitted: truncate_to_seconds(submitted),
            series: false,
            sent_series_pm: false,
            deleted: false,
        }
    }

    // The three flags only ever move from false to true.

    pub fn mark_series(&mut self) {
        self.series = true;
    }

    pub fn mark_series_notice_sent(&mut self) {
        self.sent_series_pm = true;
    }

    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }
}

impl Record for SubmissionRecord {
    const NAMESPACE: &'static str = "submission";
}

/// The last qualifying post of an author inside the enforcement window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub author: String,
    pub subreddit: String,
    pub last_post_id: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_post_time: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn from_item(item: &ContentItem, author: &str) -> Self {
        Self {
            author: author.to_string(),
            subreddit: item.forum.clone(),
            last_post_id: item.id.clone(),
            last_post_time: truncate_to_seconds(item.created_at),
        }
    }
}

impl Record for ActivityRecord {
    const NAMESPACE: &'static str = "activity";
}

/// Records store whole seconds; dropping the fraction up front keeps a
/// persisted record equal to the one that was written.
pub fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(ts.timestamp(), 0).single().unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item(label: Option<&str>) -> ContentItem {
        ContentItem {
            id: "abc123".to_string(),
            author: Some("alexia".to_string()),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            title: "A title".to_string(),
            body: String::new(),
            forum: "nosleep".to_string(),
            taxonomy_label: label.map(str::to_string),
            permalink: "https://redd.it/abc123".to_string(),
        }
    }

    #[test]
    fn test_label_match_is_case_insensitive() {
        assert!(item(Some("Series")).has_label("series"));
        assert!(item(Some("series")).has_label("SERIES"));
        assert!(!item(Some("series-final")).has_label("series"));
        assert!(!item(None).has_label("series"));
    }

    #[test]
    fn test_record_keys_are_namespaced_and_lowercased() {
        assert_eq!(SubmissionRecord::key("AbC"), "submission.abc");
        assert_eq!(ActivityRecord::key("Pikachu"), "activity.pikachu");
    }

    #[test]
    fn test_submission_record_serializes_integer_timestamp() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::milliseconds(250);
        let record = SubmissionRecord::new("abc", "alexia", ts);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"submitted\":1700000000"), "{json}");

        let decoded: SubmissionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_missing_flags_default_to_false() {
        let decoded: SubmissionRecord =
            serde_json::from_str(r#"{"id":"x","author":"y","submitted":10}"#).unwrap();
        assert!(!decoded.series);
        assert!(!decoded.sent_series_pm);
        assert!(!decoded.deleted);
    }

    #[test]
    fn test_activity_from_item() {
        let it = item(None);
        let act = ActivityRecord::from_item(&it, "alexia");
        assert_eq!(act.last_post_id, "abc123");
        assert_eq!(act.subreddit, "nosleep");
        assert_eq!(act.last_post_time, it.created_at);
    }
}
