// src/services/notifier.rs

//! Telegram notification sink.
//!
//! Every message gets at most `max_attempts` tries. A `429` answer carries
//! `parameters.retry_after`, which is slept before the next try; any other
//! failure waits the fixed retry backoff. Both kinds of failure consume the
//! same budget. A message that runs out of attempts is dropped.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{Item, MessageStyle, NotifierConfig};
use crate::utils::http;

/// Wait used when a 429 does not say how long to back off.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Something that forwards new postings.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one posting. `counter` is the 1-based number within the run.
    async fn notify(&self, item: &Item, counter: usize) -> Result<()>;
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    RateLimited(Duration),
    Rejected { status: u16, body: String },
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Classify a Bot API response.
pub fn classify_response(status: u16, retry_after_header: Option<u64>, body: &str) -> Delivery {
    if (200..300).contains(&status) {
        return Delivery::Delivered;
    }

    if status == 429 {
        let advertised = serde_json::from_str::<ApiError>(body)
            .ok()
            .and_then(|e| e.parameters)
            .and_then(|p| p.retry_after)
            .or(retry_after_header);
        return Delivery::RateLimited(
            advertised.map_or(DEFAULT_RETRY_AFTER, Duration::from_secs),
        );
    }

    Delivery::Rejected {
        status,
        body: body.to_string(),
    }
}

/// Run `attempt` until it delivers or `max_attempts` is used up.
///
/// Returns the number of attempts it took.
pub async fn deliver_with_retry<F, Fut>(
    max_attempts: u32,
    backoff: Duration,
    mut attempt: F,
) -> Result<u32>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Delivery>>,
{
    let max_attempts = max_attempts.max(1);
    let mut last_error = String::new();

    for n in 1..=max_attempts {
        let wait = match attempt(n).await {
            Ok(Delivery::Delivered) => return Ok(n),
            Ok(Delivery::RateLimited(retry_after)) => {
                log::warn!(
                    "Rate limited (attempt {}/{}), retrying after {:?}",
                    n,
                    max_attempts,
                    retry_after
                );
                last_error = format!("rate limited, retry after {:?}", retry_after);
                retry_after
            }
            Ok(Delivery::Rejected { status, body }) => {
                log::warn!(
                    "Delivery rejected with HTTP {} (attempt {}/{}): {}",
                    status,
                    n,
                    max_attempts,
                    body
                );
                last_error = format!("HTTP {}: {}", status, body);
                backoff
            }
            Err(e) => {
                log::warn!("Delivery error (attempt {}/{}): {}", n, max_attempts, e);
                last_error = e.to_string();
                backoff
            }
        };

        if n < max_attempts && !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    Err(AppError::notify(max_attempts, last_error))
}

/// Escape characters that legacy Markdown parse mode treats as markup.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Render the message for one posting.
pub fn format_message(item: &Item, counter: usize, style: MessageStyle) -> String {
    let title = escape_markdown(&item.title);

    match style {
        MessageStyle::Short => format!("*New Post:* [{}]({})", title, item.link),
        MessageStyle::Detailed => {
            let mut text = format!("*New Review #{}*\n\n📝 *Title:* {}\n", counter, title);
            if let Some(company) = &item.company {
                text.push_str(&format!("🏢 *Company:* {}\n", escape_markdown(company)));
            }
            if let Some(role) = &item.role {
                text.push_str(&format!("💼 *Role:* {}\n", escape_markdown(role)));
            }
            if !item.badges.is_empty() {
                let badges: Vec<String> = item.badges.iter().map(|b| escape_markdown(b)).collect();
                text.push_str(&format!("🏷 {}\n", badges.join(" · ")));
            }
            text.push_str(&format!("\n🔗 [Read Full]({})", item.link));
            text
        }
    }
}

#[derive(Serialize)]
struct SendMessageForm<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

/// Sends postings to a Telegram chat through the Bot API.
pub struct TelegramNotifier {
    client: Client,
    config: NotifierConfig,
    endpoint: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// Create a notifier. Token and chat id must be configured.
    pub fn new(config: NotifierConfig) -> Result<Self> {
        let client = http::create_notifier_client(&config)?;
        Self::with_client(config, client)
    }

    pub fn with_client(config: NotifierConfig, client: Client) -> Result<Self> {
        let token = config
            .token
            .clone()
            .ok_or_else(|| AppError::config("Telegram token is not set"))?;
        let chat_id = config
            .chat_id
            .clone()
            .ok_or_else(|| AppError::config("Telegram chat id is not set"))?;
        let endpoint = format!(
            "{}/bot{}/sendMessage",
            config.api_base.trim_end_matches('/'),
            token
        );

        Ok(Self {
            client,
            config,
            endpoint,
            chat_id,
        })
    }

    /// One sendMessage call.
    async fn send_once(&self, text: &str) -> Result<Delivery> {
        let form = SendMessageForm {
            chat_id: &self.chat_id,
            text,
            parse_mode: "Markdown",
            disable_web_page_preview: self.config.disable_preview,
        };

        let response = self.client.post(&self.endpoint).form(&form).send().await?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let body = response.text().await.unwrap_or_default();

        Ok(classify_response(status, retry_after, &body))
    }

    /// Send arbitrary text with the configured retry budget.
    pub async fn send_text(&self, text: &str) -> Result<u32> {
        deliver_with_retry(
            self.config.max_attempts,
            self.config.retry_backoff(),
            |_| self.send_once(text),
        )
        .await
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, item: &Item, counter: usize) -> Result<()> {
        let text = format_message(item, counter, self.config.style);
        let attempts = self.send_text(&text).await?;
        log::debug!("Delivered '{}' after {} attempt(s)", item.title, attempts);
        Ok(())
    }
}
