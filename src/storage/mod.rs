//! Seen-set persistence.
//!
//! The store keeps an ordered, capacity-bounded list of postings that were
//! already forwarded. Index 0 is the topmost posting of the last successful
//! fetch. Every update replaces the snapshot as a whole.

pub mod local;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Item;

// Re-export for convenience
pub use local::LocalStore;

/// Where a loaded snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
    /// A valid snapshot was read
    Persisted,
    /// No state file exists yet
    Missing,
    /// The state file was corrupt and has been moved aside
    Recovered,
    /// The state file exists but could not be read
    Unreadable,
}

/// Loaded seen-set together with its origin.
#[derive(Debug, Clone)]
pub struct SeenSnapshot {
    pub items: Vec<Item>,
    pub origin: SnapshotOrigin,
}

impl SeenSnapshot {
    pub fn empty(origin: SnapshotOrigin) -> Self {
        Self {
            items: Vec::new(),
            origin,
        }
    }

    /// True when no prior state exists, as opposed to a persisted empty list.
    pub fn is_first_run(&self) -> bool {
        self.origin != SnapshotOrigin::Persisted
    }
}

/// Trait for seen-set storage backends.
#[async_trait]
pub trait SeenStore: Send + Sync {
    /// Load the snapshot, reporting its origin. Never fails.
    async fn load_snapshot(&self) -> SeenSnapshot;

    /// Load the remembered postings. Never fails.
    async fn load(&self) -> Vec<Item> {
        self.load_snapshot().await.items
    }

    /// Replace the snapshot with at most `capacity()` leading items.
    ///
    /// Returns the number of items written.
    async fn save(&self, items: &[Item]) -> Result<usize>;

    /// Maximum number of remembered postings.
    fn capacity(&self) -> usize;
}

/// Cap `items` to `capacity` and renumber positions from zero.
pub fn cap_snapshot(items: &[Item], capacity: usize) -> Vec<Item> {
    items
        .iter()
        .take(capacity)
        .enumerate()
        .map(|(index, item)| Item {
            position: index,
            ..item.clone()
        })
        .collect()
}
