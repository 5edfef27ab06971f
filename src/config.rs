use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "AUTOBOT_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub subreddit: String,
    pub series_flair_name: String,
    /// Seconds an author must wait between posts.
    pub post_timelimit: u64,
    pub enforce_timelimit: bool,
    /// Skip new posts older than this many seconds (when `ignore_old_posts`).
    pub ignore_older_than: u64,
    pub ignore_old_posts: bool,
    /// Log write actions instead of performing them.
    pub development_mode: bool,
    /// Search the author's recent posts when the activity cache has nothing.
    pub author_history_fallback: bool,
    /// Seconds between passes when running forever.
    pub poll_interval: u64,
    pub reddit: RedditConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub user_agent: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

pub const DEFAULT_SNAPSHOT_PATH: &str = "/var/lib/serial-moderator/records.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file the record store is loaded from and saved to on every write.
    /// `null` keeps records in memory only.
    pub snapshot_path: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            snapshot_path: Some(DEFAULT_SNAPSHOT_PATH.to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            subreddit: "nosleep".to_string(),
            series_flair_name: "series".to_string(),
            post_timelimit: 86400,
            enforce_timelimit: true,
            ignore_older_than: 43200,
            ignore_old_posts: true,
            development_mode: false,
            author_history_fallback: false,
            poll_interval: 300,
            reddit: RedditConfig {
                user_agent: format!("serial-moderator/{}", env!("CARGO_PKG_VERSION")),
                ..Default::default()
            },
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Record lifetime: twice the enforcement window, so a record written late
    /// in one window still catches a delayed duplicate from the search index.
    pub fn cache_ttl(&self) -> u64 {
        self.post_timelimit.saturating_mul(2)
    }

    /// Overrides values from `AUTOBOT_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set_string = |name: &str, target: &mut String| {
            if let Some(v) = lookup(name) {
                *target = v;
            }
        };
        set_string("SUBREDDIT", &mut self.subreddit);
        set_string("SERIES_FLAIR_NAME", &mut self.series_flair_name);
        set_string("USER_AGENT", &mut self.reddit.user_agent);
        set_string("CLIENT_ID", &mut self.reddit.client_id);
        set_string("CLIENT_SECRET", &mut self.reddit.client_secret);
        set_string("REDDIT_USERNAME", &mut self.reddit.username);
        set_string("REDDIT_PASSWORD", &mut self.reddit.password);

        if let Some(v) = lookup("SNAPSHOT_PATH") {
            self.store.snapshot_path = Some(v);
        }

        for (name, target) in [
            ("POST_TIMELIMIT", &mut self.post_timelimit),
            ("IGNORE_OLDER_THAN", &mut self.ignore_older_than),
            ("POLL_INTERVAL", &mut self.poll_interval),
        ] {
            if let Some(v) = lookup(name) {
                *target = v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    name: format!("{ENV_PREFIX}{name}"),
                    value: v.clone(),
                })?;
            }
        }

        for (name, target) in [
            ("ENFORCE_TIMELIMIT", &mut self.enforce_timelimit),
            ("IGNORE_OLD_POSTS", &mut self.ignore_old_posts),
            ("DEVELOPMENT_MODE", &mut self.development_mode),
            ("AUTHOR_HISTORY_FALLBACK", &mut self.author_history_fallback),
        ] {
            if let Some(v) = lookup(name) {
                *target = parse_bool(&v).ok_or_else(|| ConfigError::InvalidEnv {
                    name: format!("{ENV_PREFIX}{name}"),
                    value: v.clone(),
                })?;
            }
        }

        Ok(())
    }

    /// Checks the moderation settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subreddit.trim().is_empty() {
            return Err(ConfigError::MissingSubreddit);
        }
        if self.series_flair_name.trim().is_empty() {
            return Err(ConfigError::MissingSeriesLabel);
        }
        if self.post_timelimit == 0 {
            return Err(ConfigError::ZeroTimeLimit);
        }
        if self.poll_interval == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }

    /// A continuous run must be able to reload its records after a restart.
    pub fn validate_persistence(&self, forever: bool) -> Result<(), ConfigError> {
        let configured = self
            .store
            .snapshot_path
            .as_deref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false);
        if forever && !configured {
            return Err(ConfigError::MissingSnapshot);
        }
        Ok(())
    }

    /// Checks that everything needed to talk to Reddit is present.
    pub fn validate_credentials(&self) -> Result<(), ConfigError> {
        let r = &self.reddit;
        for (name, value) in [
            ("user_agent", &r.user_agent),
            ("client_id", &r.client_id),
            ("client_secret", &r.client_secret),
            ("username", &r.username),
            ("password", &r.password),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingCredential(name));
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.post_timelimit, 86400);
        assert_eq!(config.cache_ttl(), 172800);
        assert_eq!(config.ignore_older_than, 43200);
        assert!(config.enforce_timelimit);
        assert!(config.ignore_old_posts);
        assert!(!config.development_mode);
        assert_eq!(config.series_flair_name, "series");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                ("POST_TIMELIMIT", "3600"),
                ("ENFORCE_TIMELIMIT", "false"),
                ("DEVELOPMENT_MODE", "TRUE"),
                ("SUBREDDIT", "shortscarystories"),
                ("REDDIT_PASSWORD", "hunter2"),
            ]))
            .unwrap();
        assert_eq!(config.post_timelimit, 3600);
        assert!(!config.enforce_timelimit);
        assert!(config.development_mode);
        assert_eq!(config.subreddit, "shortscarystories");
        assert_eq!(config.reddit.password, "hunter2");
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup(&[("POST_TIMELIMIT", "a day")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));

        let err = config
            .apply_overrides(lookup(&[("IGNORE_OLD_POSTS", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.post_timelimit = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTimeLimit)));

        let mut config = Config::default();
        config.subreddit = " ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::MissingSubreddit)));

        let config = Config::default();
        assert!(matches!(
            config.validate_credentials(),
            Err(ConfigError::MissingCredential("client_id"))
        ));
    }

    #[test]
    fn test_forever_needs_snapshot() {
        let mut config = Config::default();
        assert!(config.validate_persistence(true).is_ok());

        config.store.snapshot_path = None;
        assert!(config.validate_persistence(false).is_ok());
        assert!(matches!(
            config.validate_persistence(true),
            Err(ConfigError::MissingSnapshot)
        ));

        config.store.snapshot_path = Some("  ".to_string());
        assert!(matches!(
            config.validate_persistence(true),
            Err(ConfigError::MissingSnapshot)
        ));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str(
            "subreddit: nosleep\npost_timelimit: 7200\nreddit:\n  username: bot\n",
        )
        .unwrap();
        assert_eq!(config.post_timelimit, 7200);
        assert_eq!(config.reddit.username, "bot");
        assert_eq!(config.ignore_older_than, 43200);
        assert_eq!(config.store.snapshot_path.as_deref(), Some(DEFAULT_SNAPSHOT_PATH));

        let config: Config = serde_yaml::from_str("store:\n  snapshot_path: null\n").unwrap();
        assert!(config.store.snapshot_path.is_none());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.subreddit = "libraryofshadows".to_string();
        config.to_file(path).unwrap();

        let loaded = Config::from_file(path).unwrap();
        assert_eq!(loaded.subreddit, "libraryofshadows");
        assert_eq!(loaded.post_timelimit, config.post_timelimit);
    }
}
