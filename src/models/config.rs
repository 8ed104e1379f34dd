//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scraper::Selector;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listing page and HTTP settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Seen-set persistence settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Telegram delivery settings
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Polling settings for the `watch` command
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Override file values with environment-supplied ones.
    ///
    /// `lookup` is usually `std::env::var(..).ok()`. Unparseable numeric
    /// values are ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("TELEGRAM_TOKEN") {
            self.notifier.token = Some(token);
        }
        if let Some(chat_id) = lookup("CHAT_ID") {
            self.notifier.chat_id = Some(chat_id);
        }
        if let Some(url) = lookup("SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(path) = lookup("STATE_FILE") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(capacity) = parse_env(&lookup, "STORE_CAPACITY") {
            self.store.capacity = capacity;
        }
        if let Some(interval) = parse_env(&lookup, "POLL_INTERVAL_SECS") {
            self.schedule.interval_secs = interval;
        }
    }

    /// Validate configuration values for basic sanity.
    ///
    /// Missing Telegram credentials are fatal: nothing should be fetched
    /// when new postings could not be forwarded anywhere.
    pub fn validate(&self) -> Result<()> {
        if self.notifier.token.as_deref().is_none_or(|t| t.trim().is_empty()) {
            return Err(AppError::config("notifier.token (TELEGRAM_TOKEN) is not set"));
        }
        if self
            .notifier
            .chat_id
            .as_deref()
            .is_none_or(|c| c.trim().is_empty())
        {
            return Err(AppError::config("notifier.chat_id (CHAT_ID) is not set"));
        }
        self.validate_source()?;
        if self.store.capacity == 0 {
            return Err(AppError::validation("store.capacity must be > 0"));
        }
        if self.notifier.max_attempts == 0 {
            return Err(AppError::validation("notifier.max_attempts must be > 0"));
        }
        if self.notifier.timeout_secs == 0 {
            return Err(AppError::validation("notifier.timeout_secs must be > 0"));
        }
        if self.schedule.interval_secs == 0 {
            return Err(AppError::validation("schedule.interval_secs must be > 0"));
        }
        Ok(())
    }

    /// Validate only what is needed to scrape the listing.
    pub fn validate_source(&self) -> Result<()> {
        url::Url::parse(&self.source.url)?;
        if self.source.user_agent.trim().is_empty() {
            return Err(AppError::validation("source.user_agent is empty"));
        }
        if self.source.timeout_secs == 0 {
            return Err(AppError::validation("source.timeout_secs must be > 0"));
        }
        if self.source.max_pages == 0 {
            return Err(AppError::validation("source.max_pages must be > 0"));
        }
        self.source.selectors.validate()
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}

/// Listing page and HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Listing page URL
    #[serde(default = "defaults::source_url")]
    pub url: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Listing pages to read per fetch (follows `?page=N`)
    #[serde(default = "defaults::max_pages")]
    pub max_pages: usize,

    /// Keep only the first N postings of a fetch
    #[serde(default)]
    pub max_items: Option<usize>,

    /// CSS selectors describing the listing markup
    #[serde(default)]
    pub selectors: ListingSelectors,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: defaults::source_url(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_pages: defaults::max_pages(),
            max_items: None,
            selectors: ListingSelectors::default(),
        }
    }
}

/// CSS selectors for one posting card on the listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingSelectors {
    #[serde(default = "defaults::container_selector")]
    pub container: String,

    #[serde(default = "defaults::title_selector")]
    pub title: String,

    #[serde(default = "defaults::link_selector")]
    pub link: String,

    #[serde(default = "defaults::company_selector")]
    pub company: String,

    #[serde(default = "defaults::role_selector")]
    pub role: String,

    #[serde(default = "defaults::badge_selector")]
    pub badge: String,

    /// Marker that another listing page follows
    #[serde(default = "defaults::next_page_selector")]
    pub next_page: String,

    /// Attribute on the container holding an explicit posting id
    #[serde(default)]
    pub id_attr: Option<String>,
}

impl ListingSelectors {
    fn validate(&self) -> Result<()> {
        for s in [
            &self.container,
            &self.title,
            &self.link,
            &self.company,
            &self.role,
            &self.badge,
            &self.next_page,
        ] {
            Selector::parse(s).map_err(|e| AppError::selector(s.as_str(), format!("{e:?}")))?;
        }
        Ok(())
    }
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            container: defaults::container_selector(),
            title: defaults::title_selector(),
            link: defaults::link_selector(),
            company: defaults::company_selector(),
            role: defaults::role_selector(),
            badge: defaults::badge_selector(),
            next_page: defaults::next_page_selector(),
            id_attr: None,
        }
    }
}

/// How the seen-set is rewritten after a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdatePolicy {
    /// Store mirrors the latest fetch
    #[default]
    ReplaceAll,
    /// New postings go in front of the previous store
    Accumulate,
}

/// Seen-set persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// State file path
    #[serde(default = "defaults::state_file")]
    pub path: PathBuf,

    /// Maximum number of remembered postings
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,

    #[serde(default)]
    pub policy: UpdatePolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: defaults::state_file(),
            capacity: defaults::capacity(),
            policy: UpdatePolicy::default(),
        }
    }
}

/// Message layout sent for each posting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStyle {
    Short,
    #[default]
    Detailed,
}

/// Telegram delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Bot token (usually from TELEGRAM_TOKEN)
    #[serde(default)]
    pub token: Option<String>,

    /// Destination chat (usually from CHAT_ID)
    #[serde(default)]
    pub chat_id: Option<String>,

    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Attempts per message, rate-limited ones included
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Pause after a rejected or failed attempt
    #[serde(default = "defaults::retry_backoff")]
    pub retry_backoff_secs: u64,

    /// Pause between two consecutive messages
    #[serde(default = "defaults::send_delay")]
    pub send_delay_secs: u64,

    #[serde(default)]
    pub style: MessageStyle,

    #[serde(default)]
    pub disable_preview: bool,
}

impl NotifierConfig {
    pub fn send_delay(&self) -> Duration {
        Duration::from_secs(self.send_delay_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            token: None,
            chat_id: None,
            api_base: defaults::api_base(),
            timeout_secs: defaults::timeout(),
            max_attempts: defaults::max_attempts(),
            retry_backoff_secs: defaults::retry_backoff(),
            send_delay_secs: defaults::send_delay(),
            style: MessageStyle::default(),
            disable_preview: false,
        }
    }
}

/// Polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::interval(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Source defaults
    pub fn source_url() -> String {
        "https://deshimula.com/".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/91.0.4472.124 Safari/537.36"
            .into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_pages() -> usize {
        1
    }

    // Selector defaults
    pub fn container_selector() -> String {
        "div.container.mt-5".into()
    }
    pub fn title_selector() -> String {
        "div.post-title".into()
    }
    pub fn link_selector() -> String {
        "a.hyper-link".into()
    }
    pub fn company_selector() -> String {
        "span.company-name".into()
    }
    pub fn role_selector() -> String {
        "span.reviewer-role".into()
    }
    pub fn badge_selector() -> String {
        "div.badge".into()
    }
    pub fn next_page_selector() -> String {
        "li.paginationjs-next".into()
    }

    // Store defaults
    pub fn state_file() -> PathBuf {
        PathBuf::from("seen_posts.json")
    }
    pub fn capacity() -> usize {
        150
    }

    // Notifier defaults
    pub fn api_base() -> String {
        "https://api.telegram.org".into()
    }
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn retry_backoff() -> u64 {
        2
    }
    pub fn send_delay() -> u64 {
        5
    }

    // Schedule defaults
    pub fn interval() -> u64 {
        300
    }
}
