use chrono::Utc;
use clap::{value_parser, Arg, Command};
use log::LevelFilter;
use serial_moderator::messages::{MessageBuilder, RemovalLinks, REAPPROVAL_SUBJECT};
use serial_moderator::platform::compose_link;
use serial_moderator::replay::{ReplayFile, ReplayPlatform};
use serial_moderator::{
    AutoBot, Config, KeyValueStore, MemoryStore, PostAnalyzer, PostMetadata, RedditClient,
};
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let matches = Command::new("serial-moderator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Moderation bot for serial-fiction subreddits")
        .long_about(
            "Polls a subreddit for new stories and enforces its posting rules:\n\
             one post per author per window, title tag grammar, no NSFW in titles,\n\
             readable formatting, and series flair with subscribe reminders.",
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/serial-moderator.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("check-title")
                .long("check-title")
                .value_name("TITLE")
                .help("Show how a title's tags are classified")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-post")
                .long("test-post")
                .value_name("FILE")
                .help("Classify a post file (first line title, rest body)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("replay")
                .long("replay")
                .value_name("FILE")
                .help("Dry-run one pass over a YAML file of posts and print every action")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("forever")
                .long("forever")
                .help("Keep polling instead of running a single pass")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .long("interval")
                .value_name("SECONDS")
                .help("Seconds between passes (overrides poll_interval)")
                .value_parser(value_parser!(u64))
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/serial-moderator.yaml");

    let mut config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };
    if let Some(interval) = matches.get_one::<u64>("interval") {
        config.poll_interval = *interval;
    }

    if matches.get_flag("test-config") {
        test_config(&config);
        return;
    }

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        process::exit(1);
    }

    if let Some(title) = matches.get_one::<String>("check-title") {
        let analyzer = PostAnalyzer::new(&config.series_flair_name);
        print_verdict(title, &analyzer.analyze(title, "", None));
        return;
    }

    if let Some(post_file) = matches.get_one::<String>("test-post") {
        test_post_file(&config, post_file);
        return;
    }

    if let Some(replay_file) = matches.get_one::<String>("replay") {
        if let Err(e) = replay(&config, replay_file).await {
            eprintln!("Replay failed: {e}");
            process::exit(1);
        }
        return;
    }

    if let Err(e) = run_bot(&config, matches.get_flag("forever")).await {
        log::error!("{e}");
        process::exit(1);
    }
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    let mut config = if std::path::Path::new(path).exists() {
        Config::from_file(path)?
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Config::default()
    };
    config.apply_env_overrides()?;
    Ok(config)
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

fn test_config(config: &Config) {
    println!("Testing configuration...");
    println!();
    println!("Subreddit: /r/{}", config.subreddit);
    println!("Series flair: {}", config.series_flair_name);
    println!(
        "Time limit: {}s (enforced: {})",
        config.post_timelimit, config.enforce_timelimit
    );
    println!(
        "Ignore posts older than: {}s (enabled: {})",
        config.ignore_older_than, config.ignore_old_posts
    );
    println!("Record TTL: {}s", config.cache_ttl());
    println!("Poll interval: {}s", config.poll_interval);
    println!("Development mode: {}", config.development_mode);
    match &config.store.snapshot_path {
        Some(path) => println!("Record snapshot: {path}"),
        None => println!("Record snapshot: none (records are lost on restart, --forever refused)"),
    }
    println!();

    if let Err(e) = config.validate().and_then(|_| config.validate_credentials()) {
        println!("Configuration validation failed:");
        println!("Error: {e}");
        process::exit(1);
    }
    println!("Configuration is valid.");
}

fn print_verdict(title: &str, meta: &PostMetadata) {
    println!("Title: {title}");
    println!("  series: {}", meta.is_series);
    println!("  final: {}", meta.is_final);
    println!("  nsfw title: {}", meta.has_nsfw_title);
    println!("  long paragraphs: {}", meta.has_long_paragraphs);
    println!("  codeblocks: {}", meta.has_codeblocks);
    if meta.invalid_tags.is_empty() {
        println!("  invalid tags: none");
    } else {
        for tag in &meta.invalid_tags {
            println!("  invalid tag: {} ({})", tag.span, tag.text);
        }
    }
    let verdict = if meta.is_invalid() {
        "REMOVE"
    } else if meta.is_serial() {
        "ACCEPT (series)"
    } else {
        "ACCEPT"
    };
    println!("Verdict: {verdict}");
}

fn test_post_file(config: &Config, path: &str) {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading post file: {e}");
            process::exit(1);
        }
    };
    let (title, body) = content.split_once('\n').unwrap_or((content.as_str(), ""));
    let title = title.trim();

    let analyzer = PostAnalyzer::new(&config.series_flair_name);
    let meta = analyzer.analyze(title, body, None);
    print_verdict(title, &meta);
    println!("Paragraphs: {}", PostAnalyzer::split_paragraphs(body).len());

    if meta.is_invalid() {
        let builder = MessageBuilder::new(&config.subreddit);
        let post_url = "https://redd.it/example";
        let modmail = format!("/r/{}", config.subreddit);
        let links = RemovalLinks {
            contact: compose_link(&modmail, None, None),
            reapproval: compose_link(
                &modmail,
                Some(REAPPROVAL_SUBJECT),
                Some(&builder.create_approval_msg(post_url)),
            ),
        };
        println!();
        println!("Removal notice:");
        println!("{}", builder.create_deleted_post_msg(post_url, &meta, &links));
    }
}

async fn replay(config: &Config, path: &str) -> anyhow::Result<()> {
    let file = ReplayFile::from_file(path)?;
    let now = Utc::now();
    let platform =
        ReplayPlatform::from_replay(file, &config.subreddit, &config.series_flair_name, now);
    let mut bot = AutoBot::new(config, platform, Arc::new(MemoryStore::new()));
    let summary = bot.run_pass(now).await?;

    for action in bot.platform().actions() {
        println!("{action}");
        println!();
    }
    println!("{summary}");
    Ok(())
}

fn open_store(config: &Config) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    let store = match &config.store.snapshot_path {
        Some(path) => MemoryStore::with_snapshot(path)?,
        None => {
            log::warn!("No store.snapshot_path configured, records will not survive a restart");
            MemoryStore::new()
        }
    };
    Ok(Arc::new(store))
}

async fn run_bot(config: &Config, forever: bool) -> anyhow::Result<()> {
    config.validate_credentials()?;
    config.validate_persistence(forever)?;
    let store = open_store(config)?;
    let client = RedditClient::new(config)?;

    if config.development_mode {
        log::info!("Running in development mode, no changes will be made on Reddit");
    } else if !client.check_moderator().await? {
        anyhow::bail!(
            "/u/{} is not a moderator of /r/{}",
            config.reddit.username,
            config.subreddit
        );
    }

    log::info!(
        "Starting serial-moderator v{} for /r/{}",
        env!("CARGO_PKG_VERSION"),
        config.subreddit
    );
    let mut bot = AutoBot::new(config, client, store);
    bot.run(forever, config.poll_interval).await?;
    Ok(())
}
