use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    /// The configured label does not exist on the forum. This needs operator
    /// attention; retrying will not help.
    #[error("Taxonomy label '{label}' not found for /r/{forum}")]
    LabelNotFound { label: String, forum: String },
    #[error("Rate limited by platform API")]
    RateLimited,
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Unexpected HTTP status {status} from {endpoint}")]
    Status { status: u16, endpoint: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Could not decode platform response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to encode record {key}: {source}")]
    Serialize {
        key: String,
        source: serde_json::Error,
    },
    #[error("Failed to decode record {key}: {source}")]
    Deserialize {
        key: String,
        source: serde_json::Error,
    },
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Invariant violated: {0}")]
    Invariant(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("subreddit must be set")]
    MissingSubreddit,
    #[error("post_timelimit must be greater than zero")]
    ZeroTimeLimit,
    #[error("poll_interval must be greater than zero")]
    ZeroInterval,
    #[error("series_flair_name must be set")]
    MissingSeriesLabel,
    #[error("store.snapshot_path is required when running continuously")]
    MissingSnapshot,
    #[error("reddit.{0} is required")]
    MissingCredential(&'static str),
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
}
