// src/services/parser.rs

//! Listing page parser.
//!
//! Turns one listing page into postings using the configured selectors.
//! Cards without a title or a link are skipped.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Item, ListingSelectors};
use crate::utils::resolve_url;

/// Postings found on one listing page.
#[derive(Debug, Default)]
pub struct ParsedPage {
    pub items: Vec<Item>,
    /// Whether the page links to a following page
    pub has_next: bool,
}

/// Compiled listing selectors.
#[derive(Debug, Clone)]
pub struct ListingParser {
    container: Selector,
    title: Selector,
    link: Selector,
    company: Selector,
    role: Selector,
    badge: Selector,
    next_page: Selector,
    id_attr: Option<String>,
}

impl ListingParser {
    /// Compile the configured selectors.
    pub fn new(selectors: &ListingSelectors) -> Result<Self> {
        Ok(Self {
            container: Self::parse_selector(&selectors.container)?,
            title: Self::parse_selector(&selectors.title)?,
            link: Self::parse_selector(&selectors.link)?,
            company: Self::parse_selector(&selectors.company)?,
            role: Self::parse_selector(&selectors.role)?,
            badge: Self::parse_selector(&selectors.badge)?,
            next_page: Self::parse_selector(&selectors.next_page)?,
            id_attr: selectors.id_attr.clone(),
        })
    }

    /// Parse a listing page. Links are resolved against `base_url`.
    pub fn parse(&self, html: &str, base_url: &Url) -> ParsedPage {
        let document = Html::parse_document(html);

        let items: Vec<Item> = document
            .select(&self.container)
            .filter_map(|card| self.parse_card(&card, base_url))
            .collect();

        if items.is_empty() {
            log::debug!(
                "No postings matched on {} ({} bytes of HTML)",
                base_url,
                html.len()
            );
        }

        ParsedPage {
            items,
            has_next: document.select(&self.next_page).next().is_some(),
        }
    }

    fn parse_card(&self, card: &ElementRef, base_url: &Url) -> Option<Item> {
        let title = Self::text_of(card, &self.title)?;
        let href = card
            .select(&self.link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|h| !h.is_empty())?;
        let link = resolve_url(base_url, href);

        let source_id = self
            .id_attr
            .as_deref()
            .and_then(|attr| card.value().attr(attr));

        let badges = card
            .select(&self.badge)
            .map(|b| Self::clean(b.text()))
            .filter(|b| !b.is_empty())
            .collect();

        let item = Item::with_source_id(source_id, title, link)?
            .company(Self::text_of(card, &self.company))
            .role(Self::text_of(card, &self.role))
            .badges(badges);
        Some(item)
    }

    /// Whitespace-normalized text of the first match, if non-empty.
    fn text_of(card: &ElementRef, selector: &Selector) -> Option<String> {
        card.select(selector)
            .next()
            .map(|el| Self::clean(el.text()))
            .filter(|t| !t.is_empty())
    }

    fn clean<'a>(parts: impl Iterator<Item = &'a str>) -> String {
        parts
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn parse_selector(s: &str) -> Result<Selector> {
        Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
    }
}
