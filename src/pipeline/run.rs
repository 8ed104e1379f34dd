// src/pipeline/run.rs

//! Single monitoring pass: load → fetch → diff → notify → persist.
//!
//! A run never fails. Fetch failures count as "no updates", delivery
//! failures drop the affected message, and persist failures leave the
//! previous snapshot in place for the next run.
//!
//! `watch` repeats the pass on a fixed interval until told to stop.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;

use crate::models::{Config, Item, UpdatePolicy};
use crate::pipeline::diff::calculate_diff;
use crate::services::{ContentSource, FetchOutcome, Notifier};
use crate::storage::SeenStore;

/// Knobs the orchestrator needs from the configuration.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub policy: UpdatePolicy,
    /// Pause between two consecutive notifications
    pub send_delay: Duration,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: config.store.policy,
            send_delay: config.notifier.send_delay(),
        }
    }
}

/// Whether the run had prior state to diff against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// No prior state: every fetched posting is new
    Bootstrap,
    /// Diffed against the persisted seen-set
    Incremental,
}

/// What happened during one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: RunMode,
    pub fetch_failed: bool,
    pub fetched: usize,
    pub new_items: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Snapshot was written during this run
    pub persisted: bool,
    /// Postings in the store after the run
    pub stored: usize,
    pub capacity: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Drop invalid and duplicate postings and number them in display order.
pub fn prepare_current(items: Vec<Item>) -> Vec<Item> {
    let mut seen_ids = HashSet::new();

    items
        .into_iter()
        .filter_map(|mut item| {
            if !item.normalize() {
                log::debug!("Skipping posting without title or link: {:?}", item.link);
                return None;
            }
            if !seen_ids.insert(item.id.clone()) {
                log::debug!("Skipping duplicate posting '{}'", item.title);
                return None;
            }
            Some(item)
        })
        .enumerate()
        .map(|(position, item)| Item { position, ..item })
        .collect()
}

/// Contents of the store after this run, or `None` to leave it untouched.
fn next_snapshot(
    policy: UpdatePolicy,
    mode: RunMode,
    seen: &[Item],
    current: &[Item],
    new_items: &[Item],
) -> Option<Vec<Item>> {
    // Nothing listed: keep what we had instead of forgetting everything.
    if current.is_empty() {
        return match mode {
            RunMode::Bootstrap => None,
            RunMode::Incremental => Some(seen.to_vec()),
        };
    }

    match policy {
        UpdatePolicy::ReplaceAll => Some(current.to_vec()),
        UpdatePolicy::Accumulate => Some(new_items.iter().chain(seen).cloned().collect()),
    }
}

/// Notify oldest-first with 1-based counters. Returns (delivered, failed).
async fn notify_all(
    new_items: &[Item],
    notifier: &dyn Notifier,
    send_delay: Duration,
) -> (usize, usize) {
    let total = new_items.len();
    let mut delivered = 0;
    let mut failed = 0;

    for (i, item) in new_items.iter().rev().enumerate() {
        let counter = i + 1;
        log::info!("[{}/{}] Notifying: {}", counter, total, item.title);

        match notifier.notify(item, counter).await {
            Ok(()) => delivered += 1,
            Err(e) => {
                failed += 1;
                log::error!("Dropping notification for '{}': {}", item.title, e);
            }
        }

        if counter < total && !send_delay.is_zero() {
            tokio::time::sleep(send_delay).await;
        }
    }

    (delivered, failed)
}

/// Run one monitoring pass.
pub async fn run_once(
    settings: &RunSettings,
    source: &dyn ContentSource,
    store: &dyn SeenStore,
    notifier: &dyn Notifier,
) -> RunReport {
    let started_at = Utc::now();

    let snapshot = store.load_snapshot().await;
    let mode = if snapshot.is_first_run() {
        RunMode::Bootstrap
    } else {
        RunMode::Incremental
    };
    let seen = snapshot.items;
    log::info!("Loaded {} previously seen postings", seen.len());

    let (current, fetch_failed) = match source.fetch().await {
        FetchOutcome::Fetched(items) => (prepare_current(items), false),
        FetchOutcome::Failed { reason } => {
            log::warn!("No updates this run, fetch failed: {}", reason);
            (Vec::new(), true)
        }
    };

    let new_items = match mode {
        RunMode::Bootstrap => {
            log::info!(
                "No previous state found; treating all {} postings as new",
                current.len()
            );
            current.clone()
        }
        RunMode::Incremental => {
            let diff = calculate_diff(&seen, &current);
            if !diff.removed.is_empty() {
                log::debug!("{} seen postings are no longer listed", diff.removed.len());
            }
            diff.added
        }
    };

    if new_items.is_empty() {
        log::info!("No new postings");
    } else {
        log::info!("Found {} new postings", new_items.len());
    }

    let (delivered, failed) = notify_all(&new_items, notifier, settings.send_delay).await;

    let (persisted, stored) =
        match next_snapshot(settings.policy, mode, &seen, &current, &new_items) {
            Some(next) => match store.save(&next).await {
                Ok(count) => (true, count),
                Err(e) => {
                    log::error!("Failed to save seen postings: {}", e);
                    (false, seen.len())
                }
            },
            None => (false, seen.len()),
        };

    log::info!("Store occupancy: {}/{}", stored, store.capacity());

    RunReport {
        mode,
        fetch_failed,
        fetched: current.len(),
        new_items: new_items.len(),
        delivered,
        failed,
        persisted,
        stored,
        capacity: store.capacity(),
        started_at,
        finished_at: Utc::now(),
    }
}

/// Run a monitoring pass every `every` until `shutdown` completes.
///
/// Passes never overlap; a pass that outlasts the interval delays the next
/// one. A shutdown during a pass abandons it, leaving the last saved
/// snapshot in place. Returns the number of passes that finished.
pub async fn watch<S, R>(
    settings: &RunSettings,
    source: &dyn ContentSource,
    store: &dyn SeenStore,
    notifier: &dyn Notifier,
    every: Duration,
    shutdown: S,
    mut on_report: R,
) -> usize
where
    S: Future<Output = ()>,
    R: FnMut(&RunReport),
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut finished = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("Shutting down after {} passes", finished);
                return finished;
            }
            _ = ticker.tick() => {}
        }

        tokio::select! {
            report = run_once(settings, source, store, notifier) => {
                finished += 1;
                on_report(&report);
            }
            _ = &mut shutdown => {
                log::warn!("Shutdown during a pass; the last saved snapshot is kept");
                return finished;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::error::{AppError, Result};
    use crate::storage::{LocalStore, SeenSnapshot, SnapshotOrigin, cap_snapshot};

    struct StaticSource(std::result::Result<Vec<Item>, String>);

    #[async_trait]
    impl ContentSource for StaticSource {
        async fn fetch(&self) -> FetchOutcome {
            match &self.0 {
                Ok(items) => FetchOutcome::Fetched(items.clone()),
                Err(reason) => FetchOutcome::Failed {
                    reason: reason.clone(),
                },
            }
        }
    }

    struct SlowSource(Duration);

    #[async_trait]
    impl ContentSource for SlowSource {
        async fn fetch(&self) -> FetchOutcome {
            tokio::time::sleep(self.0).await;
            FetchOutcome::Fetched(items(&["A"]))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        items: Mutex<Option<Vec<Item>>>,
        saves: Mutex<usize>,
    }

    #[async_trait]
    impl SeenStore for MemoryStore {
        async fn load_snapshot(&self) -> SeenSnapshot {
            match self.items.lock().unwrap().clone() {
                Some(items) => SeenSnapshot {
                    items,
                    origin: SnapshotOrigin::Persisted,
                },
                None => SeenSnapshot::empty(SnapshotOrigin::Missing),
            }
        }

        async fn save(&self, items: &[Item]) -> Result<usize> {
            let capped = cap_snapshot(items, self.capacity());
            let count = capped.len();
            *self.items.lock().unwrap() = Some(capped);
            *self.saves.lock().unwrap() += 1;
            Ok(count)
        }

        fn capacity(&self) -> usize {
            150
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(usize, String)>>,
        fail_titles: Vec<String>,
    }

    impl RecordingNotifier {
        fn sent(&self) -> Vec<(usize, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, item: &Item, counter: usize) -> Result<()> {
            if self.fail_titles.contains(&item.title) {
                return Err(AppError::notify(3, "rejected"));
            }
            self.sent.lock().unwrap().push((counter, item.title.clone()));
            Ok(())
        }
    }

    fn item(title: &str) -> Item {
        Item::new(title, format!("https://deshimula.com/review/{title}")).unwrap()
    }

    fn items(titles: &[&str]) -> Vec<Item> {
        titles.iter().map(|t| item(t)).collect()
    }

    fn settings(policy: UpdatePolicy) -> RunSettings {
        RunSettings {
            policy,
            send_delay: Duration::ZERO,
        }
    }

    fn store_in(tmp: &TempDir, capacity: usize) -> LocalStore {
        LocalStore::new(tmp.path().join("seen_posts.json"), capacity)
    }

    async fn stored(store: &LocalStore) -> Vec<(String, usize)> {
        store
            .load()
            .await
            .into_iter()
            .map(|i| (i.title, i.position))
            .collect()
    }

    fn expected(titles: &[&str]) -> Vec<(String, usize)> {
        titles
            .iter()
            .enumerate()
            .map(|(i, t)| (t.to_string(), i))
            .collect()
    }

    #[tokio::test]
    async fn test_first_run_notifies_everything_oldest_first() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp, 150);
        let source = StaticSource(Ok(items(&["A", "B", "C"])));
        let notifier = RecordingNotifier::default();

        let report = run_once(&settings(UpdatePolicy::ReplaceAll), &source, &store, &notifier).await;

        assert_eq!(report.mode, RunMode::Bootstrap);
        assert_eq!(
            notifier.sent(),
            vec![(1, "C".into()), (2, "B".into()), (3, "A".into())]
        );
        assert_eq!(stored(&store).await, expected(&["A", "B", "C"]));
        assert!(report.persisted);
        assert_eq!(report.stored, 3);
        assert_eq!(report.capacity, 150);
    }

    #[tokio::test]
    async fn test_steady_state_notifies_only_new() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp, 150);
        store.save(&items(&["A", "B", "C"])).await.unwrap();

        let source = StaticSource(Ok(items(&["D", "A", "B", "C"])));
        let notifier = RecordingNotifier::default();

        let report = run_once(&settings(UpdatePolicy::ReplaceAll), &source, &store, &notifier).await;

        assert_eq!(report.mode, RunMode::Incremental);
        assert_eq!(report.new_items, 1);
        assert_eq!(notifier.sent(), vec![(1, "D".into())]);
        assert_eq!(stored(&store).await, expected(&["D", "A", "B", "C"]));
    }

    #[tokio::test]
    async fn test_new_batch_is_numbered_oldest_first() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp, 150);
        store.save(&items(&["A"])).await.unwrap();

        let source = StaticSource(Ok(items(&["C", "B", "A"])));
        let notifier = RecordingNotifier::default();

        run_once(&settings(UpdatePolicy::ReplaceAll), &source, &store, &notifier).await;

        assert_eq!(notifier.sent(), vec![(1, "B".into()), (2, "C".into())]);
    }

    #[tokio::test]
    async fn test_no_op_run_captures_reordering() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp, 150);
        store.save(&items(&["A", "B", "C"])).await.unwrap();

        let source = StaticSource(Ok(items(&["B", "A", "C"])));
        let notifier = RecordingNotifier::default();

        let report = run_once(&settings(UpdatePolicy::ReplaceAll), &source, &store, &notifier).await;

        assert!(notifier.sent().is_empty());
        assert!(report.persisted);
        assert_eq!(stored(&store).await, expected(&["B", "A", "C"]));
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_state() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp, 150);
        store.save(&items(&["A", "B"])).await.unwrap();

        let source = StaticSource(Err("timed out".into()));
        let notifier = RecordingNotifier::default();

        let report = run_once(&settings(UpdatePolicy::ReplaceAll), &source, &store, &notifier).await;

        assert!(report.fetch_failed);
        assert_eq!(report.new_items, 0);
        assert!(notifier.sent().is_empty());
        assert_eq!(stored(&store).await, expected(&["A", "B"]));
        assert_eq!(report.stored, 2);
    }

    #[tokio::test]
    async fn test_empty_listing_keeps_state() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp, 150);
        store.save(&items(&["A", "B"])).await.unwrap();

        let source = StaticSource(Ok(Vec::new()));
        let notifier = RecordingNotifier::default();

        let report = run_once(&settings(UpdatePolicy::ReplaceAll), &source, &store, &notifier).await;

        assert!(!report.fetch_failed);
        assert_eq!(stored(&store).await, expected(&["A", "B"]));
    }

    #[tokio::test]
    async fn test_first_run_fetch_failure_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp, 150);

        let source = StaticSource(Err("blocked".into()));
        let notifier = RecordingNotifier::default();

        let report = run_once(&settings(UpdatePolicy::ReplaceAll), &source, &store, &notifier).await;

        assert_eq!(report.mode, RunMode::Bootstrap);
        assert!(!report.persisted);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_replace_all_is_capped() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp, 2);

        let source = StaticSource(Ok(items(&["X", "Y", "Z"])));
        let notifier = RecordingNotifier::default();

        let report = run_once(&settings(UpdatePolicy::ReplaceAll), &source, &store, &notifier).await;

        assert_eq!(report.delivered, 3);
        assert_eq!(report.stored, 2);
        assert_eq!(stored(&store).await, expected(&["X", "Y"]));
    }

    #[tokio::test]
    async fn test_replace_all_forgets_removed_postings() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp, 150);
        store.save(&items(&["A", "B", "C"])).await.unwrap();

        let source = StaticSource(Ok(items(&["A", "C"])));
        let notifier = RecordingNotifier::default();

        run_once(&settings(UpdatePolicy::ReplaceAll), &source, &store, &notifier).await;

        assert_eq!(stored(&store).await, expected(&["A", "C"]));
    }

    #[tokio::test]
    async fn test_accumulate_keeps_history() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp, 3);
        store.save(&items(&["A", "B"])).await.unwrap();

        let source = StaticSource(Ok(items(&["D", "C", "A"])));
        let notifier = RecordingNotifier::default();

        let report = run_once(&settings(UpdatePolicy::Accumulate), &source, &store, &notifier).await;

        assert_eq!(report.new_items, 2);
        assert_eq!(stored(&store).await, expected(&["D", "C", "A"]));
    }

    #[tokio::test]
    async fn test_failed_notification_is_dropped() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp, 150);
        store.save(&items(&["A"])).await.unwrap();

        let source = StaticSource(Ok(items(&["C", "B", "A"])));
        let notifier = RecordingNotifier {
            fail_titles: vec!["B".to_string()],
            ..RecordingNotifier::default()
        };

        let report = run_once(&settings(UpdatePolicy::ReplaceAll), &source, &store, &notifier).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(notifier.sent(), vec![(2, "C".into())]);
        assert_eq!(stored(&store).await, expected(&["C", "B", "A"]));
    }

    #[tokio::test]
    async fn test_persist_failure_does_not_crash() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let store = LocalStore::new(blocker.join("seen_posts.json"), 150);

        let source = StaticSource(Ok(items(&["A"])));
        let notifier = RecordingNotifier::default();

        let report = run_once(&settings(UpdatePolicy::ReplaceAll), &source, &store, &notifier).await;

        assert_eq!(report.delivered, 1);
        assert!(!report.persisted);
        assert_eq!(report.stored, 0);
    }

    #[tokio::test]
    async fn test_corrupt_state_bootstraps() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp, 150);
        std::fs::write(store.path(), "[{broken").unwrap();

        let source = StaticSource(Ok(items(&["A", "B"])));
        let notifier = RecordingNotifier::default();

        let report = run_once(&settings(UpdatePolicy::ReplaceAll), &source, &store, &notifier).await;

        assert_eq!(report.mode, RunMode::Bootstrap);
        assert_eq!(report.delivered, 2);
        assert!(store.backup_path().exists());
        assert_eq!(stored(&store).await, expected(&["A", "B"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_runs_on_interval_until_shutdown() {
        let store = MemoryStore::default();
        let source = StaticSource(Ok(items(&["A"])));
        let notifier = RecordingNotifier::default();
        let mut modes = Vec::new();

        let finished = watch(
            &settings(UpdatePolicy::ReplaceAll),
            &source,
            &store,
            &notifier,
            Duration::from_secs(100),
            tokio::time::sleep(Duration::from_secs(250)),
            |report| modes.push(report.mode),
        )
        .await;

        assert_eq!(finished, 3);
        assert_eq!(
            modes,
            vec![RunMode::Bootstrap, RunMode::Incremental, RunMode::Incremental]
        );
        assert_eq!(notifier.sent(), vec![(1, "A".into())]);
        assert_eq!(*store.saves.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_shutdown_interrupts_running_pass() {
        let store = MemoryStore::default();
        let source = SlowSource(Duration::from_secs(60));
        let notifier = RecordingNotifier::default();
        let start = tokio::time::Instant::now();

        let finished = watch(
            &settings(UpdatePolicy::ReplaceAll),
            &source,
            &store,
            &notifier,
            Duration::from_secs(300),
            tokio::time::sleep(Duration::from_secs(10)),
            |_| panic!("no pass should finish"),
        )
        .await;

        assert_eq!(finished, 0);
        assert!(start.elapsed() < Duration::from_secs(60));
        assert!(notifier.sent().is_empty());
        assert_eq!(*store.saves.lock().unwrap(), 0);
    }

    #[test]
    fn test_prepare_current_drops_invalid_and_duplicates() {
        let blank = Item {
            title: "   ".to_string(),
            ..item("X")
        };
        let prepared = prepare_current(vec![item("A"), blank, item("B"), item("A")]);

        let titles: Vec<_> = prepared
            .iter()
            .map(|i| (i.title.as_str(), i.position))
            .collect();
        assert_eq!(titles, vec![("A", 0), ("B", 1)]);
    }
}
