pub mod analyzer;
pub mod bot;
pub mod config;
pub mod error;
pub mod messages;
pub mod models;
pub mod platform;
pub mod policy;
pub mod reddit;
pub mod replay;
pub mod store;
pub mod tracker;

pub use analyzer::{PostAnalyzer, PostMetadata};
pub use bot::{AutoBot, PassSummary};
pub use config::Config;
pub use error::{BotError, ConfigError, PlatformError, StoreError};
pub use models::{ActivityRecord, ContentItem, SubmissionRecord};
pub use platform::Platform;
pub use policy::{Decision, PolicyEngine};
pub use reddit::RedditClient;
pub use store::{KeyValueStore, MemoryStore};
