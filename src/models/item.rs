//! Scraped posting and its identity.

use serde::{Deserialize, Deserializer, Serialize};

/// Derive the dedup identity of a posting.
///
/// An explicit identifier from the source wins. Otherwise the identity is
/// `title + "_" + link`. Returns `None` when title or link is blank, since
/// such an item must never reach the diff or the store.
pub fn identity(source_id: Option<&str>, title: &str, link: &str) -> Option<String> {
    if title.trim().is_empty() || link.trim().is_empty() {
        return None;
    }

    match source_id {
        Some(id) if !id.trim().is_empty() => Some(id.to_string()),
        _ => Some(format!("{}_{}", title, link)),
    }
}

/// A posting scraped from the listing page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    /// Stable dedup identity
    #[serde(default)]
    pub id: String,

    /// Posting title
    pub title: String,

    /// Absolute URL of the posting
    pub link: String,

    /// Reviewed company
    #[serde(default)]
    pub company: Option<String>,

    /// Reviewer role
    #[serde(default)]
    pub role: Option<String>,

    /// Type/status tags in display order
    #[serde(default, deserialize_with = "deserialize_badges")]
    pub badges: Vec<String>,

    /// 0-based position in the most recent fetch
    #[serde(rename = "index", default)]
    pub position: usize,
}

impl Item {
    /// Build an item identified by title and link.
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Option<Self> {
        Self::with_source_id(None, title, link)
    }

    /// Build an item, preferring an identifier supplied by the source.
    pub fn with_source_id(
        source_id: Option<&str>,
        title: impl Into<String>,
        link: impl Into<String>,
    ) -> Option<Self> {
        let title = title.into();
        let link = link.into();
        let id = identity(source_id, &title, &link)?;

        Some(Self {
            id,
            title,
            link,
            company: None,
            role: None,
            badges: Vec::new(),
            position: 0,
        })
    }

    pub fn company(mut self, company: Option<String>) -> Self {
        self.company = company.filter(|c| !c.is_empty());
        self
    }

    pub fn role(mut self, role: Option<String>) -> Self {
        self.role = role.filter(|r| !r.is_empty());
        self
    }

    pub fn badges(mut self, badges: Vec<String>) -> Self {
        self.badges = badges;
        self
    }

    /// Whether the item carries enough content to be tracked.
    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty() && !self.link.trim().is_empty()
    }

    /// Identity used for comparison: the stored `id`, or `title_link` when
    /// the `id` is blank. `None` for an invalid item.
    pub fn effective_id(&self) -> Option<String> {
        identity(Some(&self.id), &self.title, &self.link)
    }

    /// Fill in a missing identity from title and link.
    ///
    /// State files written before identities were persisted carry no `id`.
    /// Returns `false` if the item is invalid and should be discarded.
    pub fn normalize(&mut self) -> bool {
        if !self.is_valid() {
            return false;
        }
        if self.id.trim().is_empty() {
            self.id = format!("{}_{}", self.title, self.link);
        }
        true
    }
}

/// Badges were historically stored either as a list of labels or as a
/// `{kind: label}` map. Map labels keep the order they were written in.
#[derive(Deserialize)]
#[serde(untagged)]
enum BadgeRepr {
    List(Vec<String>),
    Map(serde_json::Map<String, serde_json::Value>),
}

fn deserialize_badges<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let repr: Option<BadgeRepr> = Option::deserialize(deserializer)?;
    Ok(match repr {
        Some(BadgeRepr::List(labels)) => labels,
        Some(BadgeRepr::Map(map)) => map
            .into_iter()
            .filter_map(|(_, label)| label.as_str().map(str::to_string))
            .collect(),
        None => Vec::new(),
    })
}
