//! Diff calculation between the seen-set and the latest fetch.
//!
//! Identity is the only thing compared: a posting whose title or link
//! changes is a new posting. Items without a stored `id` are compared by
//! `title_link`; items with no identity at all are skipped.

use std::collections::HashSet;

use crate::models::Item;

/// Result of comparing the latest fetch against the seen-set.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    /// Postings not seen before, in fetch order
    pub added: Vec<Item>,
    /// Ids of seen postings that are no longer listed
    pub removed: Vec<String>,
}

fn identities(items: &[Item]) -> HashSet<String> {
    items.iter().filter_map(Item::effective_id).collect()
}

/// Items of `current` whose identity is absent from `seen`, in `current` order.
pub fn find_new(current: &[Item], seen: &[Item]) -> Vec<Item> {
    let seen_ids = identities(seen);

    current
        .iter()
        .filter(|item| {
            item.effective_id()
                .is_some_and(|id| !seen_ids.contains(&id))
        })
        .cloned()
        .collect()
}

/// Calculate additions and removals between `seen` and `current`.
pub fn calculate_diff(seen: &[Item], current: &[Item]) -> DiffResult {
    let current_ids = identities(current);

    let removed = seen
        .iter()
        .filter_map(Item::effective_id)
        .filter(|id| !current_ids.contains(id))
        .collect();

    DiffResult {
        added: find_new(current, seen),
        removed,
    }
}
