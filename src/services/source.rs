// src/services/source.rs

//! Listing page fetcher.

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Item, SourceConfig};
use crate::services::parser::{ListingParser, ParsedPage};
use crate::utils::{http, page_url};

/// Result of asking the source for the current listing.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Postings in display order (possibly none)
    Fetched(Vec<Item>),
    /// The listing could not be retrieved
    Failed { reason: String },
}

/// Something that can produce the current listing.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self) -> FetchOutcome;
}

/// Reads the listing over HTTP.
pub struct HttpSource {
    config: SourceConfig,
    base_url: Url,
    client: Client,
    parser: ListingParser,
}

impl HttpSource {
    /// Create a source with its own HTTP client.
    pub fn new(config: SourceConfig) -> Result<Self> {
        let client = http::create_source_client(&config)?;
        Self::with_client(config, client)
    }

    pub fn with_client(config: SourceConfig, client: Client) -> Result<Self> {
        let base_url = Url::parse(&config.url)?;
        let parser = ListingParser::new(&config.selectors)?;
        Ok(Self {
            config,
            base_url,
            client,
            parser,
        })
    }

    /// Fetch and parse a single listing page.
    pub async fn fetch_page(&self, page: usize) -> Result<ParsedPage> {
        let url = page_url(&self.base_url, page);
        log::debug!("Fetching listing page {}: {}", page, url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AppError::fetch(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::fetch(url.as_str(), format!("HTTP {}", status)));
        }

        let html = response
            .text()
            .await
            .map_err(|e| AppError::fetch(url.as_str(), e))?;
        log::debug!("Received {} bytes from {}", html.len(), url);

        Ok(self.parser.parse(&html, &url))
    }

    /// Fetch up to `max_pages` listing pages.
    ///
    /// A failure on the first page is an error. Later pages that fail or
    /// come back empty end pagination with what was collected so far.
    pub async fn fetch_pages(&self, max_pages: usize) -> Result<Vec<Item>> {
        let mut items = Vec::new();

        for page in 1..=max_pages.max(1) {
            let parsed = match self.fetch_page(page).await {
                Ok(parsed) => parsed,
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    log::warn!("Stopping pagination at page {}: {}", page, e);
                    break;
                }
            };

            if parsed.items.is_empty() {
                log::debug!("Page {} has no postings", page);
                break;
            }
            items.extend(parsed.items);

            if !parsed.has_next {
                break;
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl ContentSource for HttpSource {
    async fn fetch(&self) -> FetchOutcome {
        match self.fetch_pages(self.config.max_pages).await {
            Ok(mut items) => {
                if let Some(limit) = self.config.max_items {
                    items.truncate(limit);
                }
                log::info!("Fetched {} postings from {}", items.len(), self.base_url);
                FetchOutcome::Fetched(items)
            }
            Err(e) => {
                log::warn!("Fetch failed: {}", e);
                FetchOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
