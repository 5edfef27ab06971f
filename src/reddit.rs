//! Reddit HTTP client implementing [`Platform`].

use crate::config::{Config, RedditConfig};
use crate::error::PlatformError;
use crate::models::ContentItem;
use crate::platform::{CommentOptions, Platform};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const OAUTH_BASE: &str = "https://oauth.reddit.com";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const LISTING_LIMIT: &str = "100";

struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
    error: Option<String>,
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Thing>,
}

#[derive(Deserialize)]
struct Thing {
    data: LinkData,
}

#[derive(Debug, Deserialize)]
struct LinkData {
    id: String,
    author: Option<String>,
    created_utc: f64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    subreddit: String,
    link_flair_css_class: Option<String>,
    #[serde(default)]
    removed: Option<bool>,
    #[serde(default)]
    removed_by_category: Option<String>,
    #[serde(default = "indexable_default")]
    is_robot_indexable: bool,
}

fn indexable_default() -> bool {
    true
}

impl LinkData {
    fn author_gone(&self) -> bool {
        match self.author.as_deref() {
            None | Some("") | Some("[deleted]") => true,
            Some(_) => false,
        }
    }

    fn is_deleted(&self) -> bool {
        self.removed.unwrap_or(false)
            || self.removed_by_category.is_some()
            || self.author_gone()
            || !self.is_robot_indexable
    }

    fn into_item(self) -> Result<ContentItem, PlatformError> {
        let author = if self.author_gone() { None } else { self.author };
        let created_at = Utc
            .timestamp_opt(self.created_utc as i64, 0)
            .single()
            .ok_or_else(|| PlatformError::Decode(format!("bad created_utc on {}", self.id)))?;
        Ok(ContentItem {
            permalink: format!("https://redd.it/{}", self.id),
            id: self.id,
            author,
            created_at,
            title: self.title,
            body: self.selftext,
            forum: self.subreddit,
            taxonomy_label: self.link_flair_css_class.filter(|c| !c.is_empty()),
        })
    }
}

/// Converts every usable child; one bad child only costs itself.
fn items_from_listing(listing: Listing) -> Vec<ContentItem> {
    listing
        .data
        .children
        .into_iter()
        .filter_map(|t| match t.data.into_item() {
            Ok(item) => Some(item),
            Err(e) => {
                log::warn!("Skipping listing entry: {e}");
                None
            }
        })
        .collect()
}

#[derive(Deserialize)]
struct FlairChoices {
    #[serde(default)]
    choices: Vec<FlairChoice>,
}

#[derive(Deserialize)]
struct FlairChoice {
    #[serde(default)]
    flair_css_class: String,
    flair_template_id: String,
}

pub struct RedditClient {
    http: Client,
    credentials: RedditConfig,
    subreddit: String,
    /// Development mode: reads happen, writes are only logged.
    read_only: bool,
    token: Mutex<Option<AccessToken>>,
}

impl RedditClient {
    pub fn new(config: &Config) -> Result<Self, PlatformError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(config.reddit.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            credentials: config.reddit.clone(),
            subreddit: config.subreddit.clone(),
            read_only: config.development_mode,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, PlatformError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        log::debug!("Requesting access token for /u/{}", self.credentials.username);
        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .await?;
        let body: TokenResponse = check_status(response, "access_token")?.json().await?;

        let value = match (body.access_token, body.error) {
            (Some(v), _) => v,
            (None, Some(err)) => return Err(PlatformError::Auth(err)),
            (None, None) => return Err(PlatformError::Auth("no access token returned".to_string())),
        };
        *guard = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        });
        Ok(value)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, PlatformError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{OAUTH_BASE}{path}"))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        let body = check_status(response, path)?.text().await?;
        serde_json::from_str(&body).map_err(|e| PlatformError::Decode(format!("{path}: {e}")))
    }

    async fn post_form(&self, path: &str, form: &[(&str, String)]) -> Result<Value, PlatformError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{OAUTH_BASE}{path}"))
            .bearer_auth(token)
            .form(form)
            .send()
            .await?;
        let body = check_status(response, path)?.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        let value: Value =
            serde_json::from_str(&body).map_err(|e| PlatformError::Decode(format!("{path}: {e}")))?;
        check_api_errors(&value, path)?;
        Ok(value)
    }

    async fn listing(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<ContentItem>, PlatformError> {
        let listing: Listing = self.get_json(path, query).await?;
        Ok(items_from_listing(listing))
    }

    async fn search(&self, query: String, time_filter: &str) -> Result<Vec<ContentItem>, PlatformError> {
        let path = format!("/r/{}/search", self.subreddit);
        self.listing(
            &path,
            &[
                ("q", query),
                ("restrict_sr", "on".to_string()),
                ("sort", "new".to_string()),
                ("t", time_filter.to_string()),
                ("syntax", "lucene".to_string()),
                ("limit", LISTING_LIMIT.to_string()),
            ],
        )
        .await
    }

    /// Whether the bot account moderates the configured subreddit.
    pub async fn check_moderator(&self) -> Result<bool, PlatformError> {
        let about: Value = self
            .get_json(&format!("/r/{}/about", self.subreddit), &[])
            .await?;
        Ok(about["data"]["user_is_moderator"].as_bool().unwrap_or(false))
    }
}

fn check_status(response: Response, endpoint: &str) -> Result<Response, PlatformError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(PlatformError::RateLimited);
    }
    if !status.is_success() {
        return Err(PlatformError::Status {
            status: status.as_u16(),
            endpoint: endpoint.to_string(),
        });
    }
    Ok(response)
}

/// `api_type=json` endpoints report failures as `{"json": {"errors": [[code, msg, field]]}}`.
fn check_api_errors(value: &Value, endpoint: &str) -> Result<(), PlatformError> {
    let errors = match value["json"]["errors"].as_array() {
        Some(errors) if !errors.is_empty() => errors,
        _ => return Ok(()),
    };
    let code = errors[0][0].as_str().unwrap_or_default();
    if code == "RATELIMIT" {
        return Err(PlatformError::RateLimited);
    }
    Err(PlatformError::Decode(format!("{endpoint} returned errors: {value}")))
}

fn fullname(id: &str) -> String {
    format!("t3_{id}")
}

#[async_trait]
impl Platform for RedditClient {
    fn forum(&self) -> &str {
        &self.subreddit
    }

    async fn fetch_recent(&self) -> Result<Vec<ContentItem>, PlatformError> {
        log::info!("Retrieving submissions from the last hour");
        self.search(format!("subreddit:{}", self.subreddit), "hour").await
    }

    async fn fetch_newest(&self, before: Option<&str>) -> Result<Vec<ContentItem>, PlatformError> {
        log::info!("Fetching new submissions before {before:?}");
        let mut query = vec![("limit", LISTING_LIMIT.to_string())];
        if let Some(id) = before {
            query.push(("before", fullname(id)));
        }
        self.listing(&format!("/r/{}/new", self.subreddit), &query).await
    }

    async fn fetch_author_recent(&self, author: &str) -> Result<Vec<ContentItem>, PlatformError> {
        // quoted so hyphenated names are not split by the lucene index
        self.search(format!("author:\"{author}\""), "day").await
    }

    async fn is_deleted(&self, id: &str) -> Result<bool, PlatformError> {
        let listing: Listing = self.get_json("/api/info", &[("id", fullname(id))]).await?;
        Ok(listing
            .data
            .children
            .first()
            .map(|t| t.data.is_deleted())
            .unwrap_or(true))
    }

    async fn delete(&self, item: &ContentItem) -> Result<(), PlatformError> {
        if self.read_only {
            log::info!("Development mode: not deleting post {} by {:?}", item.id, item.author);
            return Ok(());
        }
        self.post_form(
            "/api/remove",
            &[("id", fullname(&item.id)), ("spam", "false".to_string())],
        )
        .await?;
        Ok(())
    }

    async fn comment(
        &self,
        item: &ContentItem,
        text: &str,
        options: CommentOptions,
    ) -> Result<(), PlatformError> {
        if self.read_only {
            log::info!("Development mode: not adding {options} comment to {}", item.id);
            return Ok(());
        }
        log::info!("Creating {options} comment on post {} by {:?}", item.id, item.author);
        let reply = self
            .post_form(
                "/api/comment",
                &[
                    ("api_type", "json".to_string()),
                    ("thing_id", fullname(&item.id)),
                    ("text", text.to_string()),
                ],
            )
            .await?;
        let comment_id = reply["json"]["data"]["things"][0]["data"]["name"]
            .as_str()
            .ok_or_else(|| PlatformError::Decode(format!("comment on {} returned no id", item.id)))?
            .to_string();

        let how = if options.distinguish { "yes" } else { "no" };
        self.post_form(
            "/api/distinguish",
            &[
                ("api_type", "json".to_string()),
                ("id", comment_id.clone()),
                ("how", how.to_string()),
                ("sticky", options.sticky.to_string()),
            ],
        )
        .await?;
        if options.lock {
            self.post_form("/api/lock", &[("id", comment_id)]).await?;
        }
        Ok(())
    }

    async fn send_private_message(
        &self,
        author: &str,
        subject: &str,
        text: &str,
    ) -> Result<(), PlatformError> {
        if self.read_only {
            log::info!("Development mode: not messaging /u/{author} ({subject})");
            return Ok(());
        }
        log::info!("Sending message to /u/{author}: {subject}");
        self.post_form(
            "/api/compose",
            &[
                ("api_type", "json".to_string()),
                ("to", author.to_string()),
                ("subject", subject.to_string()),
                ("text", text.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn apply_taxonomy_label(&self, item: &ContentItem, label: &str) -> Result<(), PlatformError> {
        if self.read_only {
            log::info!("Development mode: not flairing post {} as {label}", item.id);
            return Ok(());
        }
        let path = format!("/r/{}/api/flairselector", self.subreddit);
        let choices: FlairChoices =
            serde_json::from_value(self.post_form(&path, &[("link", fullname(&item.id))]).await?)
                .map_err(|e| PlatformError::Decode(format!("{path}: {e}")))?;

        let choice = choices
            .choices
            .into_iter()
            .find(|c| c.flair_css_class.eq_ignore_ascii_case(label))
            .ok_or_else(|| PlatformError::LabelNotFound {
                label: label.to_string(),
                forum: self.subreddit.clone(),
            })?;

        self.post_form(
            &format!("/r/{}/api/selectflair", self.subreddit),
            &[
                ("api_type", "json".to_string()),
                ("link", fullname(&item.id)),
                ("flair_template_id", choice.flair_template_id),
            ],
        )
        .await?;
        log::info!("Applied flair {label} to post {}", item.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn link(overrides: Value) -> LinkData {
        let mut base = json!({
            "id": "abc123",
            "author": "pikachu",
            "created_utc": 1700000000.0,
            "title": "My Story (part 1)",
            "selftext": "body",
            "subreddit": "nosleep",
            "link_flair_css_class": null,
            "is_robot_indexable": true
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), overrides.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(base).unwrap()
    }

    #[test]
    fn test_listing_decodes_into_items() {
        let raw = json!({
            "kind": "Listing",
            "data": {"children": [
                {"kind": "t3", "data": {
                    "id": "abc123", "author": "pikachu", "created_utc": 1700000000.5,
                    "title": "T", "selftext": "B", "subreddit": "nosleep",
                    "link_flair_css_class": "series"
                }}
            ]}
        });
        let listing: Listing = serde_json::from_value(raw).unwrap();
        let item = listing.data.children.into_iter().next().unwrap().data.into_item().unwrap();
        assert_eq!(item.id, "abc123");
        assert_eq!(item.author.as_deref(), Some("pikachu"));
        assert_eq!(item.created_at.timestamp(), 1_700_000_000);
        assert_eq!(item.forum, "nosleep");
        assert_eq!(item.permalink, "https://redd.it/abc123");
        assert!(item.has_label("Series"));
    }

    #[test]
    fn test_deleted_author_maps_to_none() {
        let item = link(json!({"author": "[deleted]"})).into_item().unwrap();
        assert!(item.author.is_none());
    }

    #[test]
    fn test_empty_flair_is_no_label() {
        let item = link(json!({"link_flair_css_class": ""})).into_item().unwrap();
        assert!(item.taxonomy_label.is_none());
    }

    #[test]
    fn test_deletion_signals() {
        assert!(!link(json!({})).is_deleted());
        assert!(link(json!({"removed": true})).is_deleted());
        assert!(link(json!({"removed_by_category": "moderator"})).is_deleted());
        assert!(link(json!({"author": null})).is_deleted());
        assert!(link(json!({"is_robot_indexable": false})).is_deleted());
    }

    #[test]
    fn test_api_errors() {
        assert!(check_api_errors(&json!({"json": {"errors": []}}), "x").is_ok());
        assert!(check_api_errors(&json!({"success": true}), "x").is_ok());
        assert!(matches!(
            check_api_errors(&json!({"json": {"errors": [["RATELIMIT", "slow down", "ratelimit"]]}}), "x"),
            Err(PlatformError::RateLimited)
        ));
        assert!(matches!(
            check_api_errors(&json!({"json": {"errors": [["USER_DOESNT_EXIST", "nope", "to"]]}}), "x"),
            Err(PlatformError::Decode(_))
        ));
    }

    #[test]
    fn test_contact_link_uses_subreddit() {
        let mut config = Config::default();
        config.subreddit = "nosleep".to_string();
        let client = RedditClient::new(&config).unwrap();
        assert_eq!(
            client.build_contact_link(None, None),
            "https://www.reddit.com/message/compose?to=%2Fr%2Fnosleep"
        );
    }

    #[test]
    fn test_unusable_child_is_skipped() {
        let raw = json!({
            "kind": "Listing",
            "data": {"children": [
                {"kind": "t3", "data": {"id": "broken", "author": "a", "created_utc": 1e20}},
                {"kind": "t3", "data": {"id": "fine", "author": "b", "created_utc": 1700000000.0}}
            ]}
        });
        let listing: Listing = serde_json::from_value(raw).unwrap();
        let items = items_from_listing(listing);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "fine");
    }

    #[tokio::test]
    async fn test_development_mode_suppresses_writes() {
        let config = Config {
            development_mode: true,
            ..Config::default()
        };
        let client = RedditClient::new(&config).unwrap();
        let item = link(json!({})).into_item().unwrap();

        client.delete(&item).await.unwrap();
        client
            .comment(&item, "hello", CommentOptions::pinned_locked())
            .await
            .unwrap();
        client.send_private_message("pikachu", "subject", "text").await.unwrap();
        client.apply_taxonomy_label(&item, "series").await.unwrap();

        // any real request would have needed a token first
        assert!(client.token.lock().await.is_none());
    }
}
