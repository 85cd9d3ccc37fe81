//! Local-first learning record store.
//!
//! The store owns the authoritative list of captured vocabulary records,
//! persists it wholesale to a JSON file, and mirrors mutations to the cloud
//! gateway when sync is enabled. Local mutations always complete before any
//! remote outcome is known; remote failures land in the sync monitor's
//! status, never on the mutating caller.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::settings;
use crate::sync::gateway::RecordGateway;
use crate::sync::SyncMonitor;

/// Two rapid recognitions of the same object collapse into one record when
/// they land within this window.
const MERGE_WINDOW_SECONDS: i64 = 180;

const BLOCKED_MESSAGE: &str = "Cannot sync right now; check network or account status.";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

/// One captured object together with its two-language translation pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub object_name: String,
    pub native_translation: String,
    pub learning_translation: String,
    pub native_language_code: String,
    pub learning_language_code: String,
}

impl LearningRecord {
    /// Recency-dedup key: lowercased name plus the language pair. Not an
    /// identity; `id` is.
    pub fn normalized_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.object_name.to_lowercase(),
            self.native_language_code,
            self.learning_language_code
        )
    }
}

/// Filesystem locations the store reads and writes.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub records_path: PathBuf,
    pub settings_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let dir = settings::app_config_dir();
        Self {
            records_path: dir.join("records.json"),
            settings_path: dir.join("settings.json"),
        }
    }
}

fn load_records_from(path: &Path) -> Result<Vec<LearningRecord>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let contents = std::fs::read_to_string(path)?;
    let mut records: Vec<LearningRecord> = serde_json::from_str(&contents)?;
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(records)
}

fn save_records_to(path: &Path, records: &[LearningRecord]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = serde_json::to_string_pretty(records)?;
    std::fs::write(path, contents)?;
    Ok(())
}

/// Last-write-wins merge by `created_at`, keyed on `id`. Local records seed
/// the map; a remote record displaces its local counterpart only when it is
/// strictly newer. Idempotent by construction.
pub(crate) fn merge_by_newest(
    local: &[LearningRecord],
    remote: Vec<LearningRecord>,
) -> Vec<LearningRecord> {
    let mut combined: HashMap<Uuid, LearningRecord> =
        local.iter().map(|r| (r.id, r.clone())).collect();

    for record in remote {
        match combined.get(&record.id) {
            Some(existing) if record.created_at <= existing.created_at => {}
            _ => {
                combined.insert(record.id, record);
            }
        }
    }

    let mut merged: Vec<LearningRecord> = combined.into_values().collect();
    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    merged
}

/// Single source of truth for the user's local record list.
pub struct RecordStore {
    config: StoreConfig,
    records: Mutex<Vec<LearningRecord>>,
    sync_enabled: AtomicBool,
    gateway: Arc<dyn RecordGateway>,
    monitor: Arc<SyncMonitor>,
    changes: broadcast::Sender<Vec<LearningRecord>>,
}

impl RecordStore {
    /// Loads the persisted record list. A missing or unreadable file yields
    /// an empty list; this is a best-effort cache, not a transactional store.
    pub fn open(
        config: StoreConfig,
        gateway: Arc<dyn RecordGateway>,
        monitor: Arc<SyncMonitor>,
        sync_enabled: bool,
    ) -> Self {
        let records = load_records_from(&config.records_path).unwrap_or_else(|e| {
            log::warn!("Failed to load records from {:?}: {}", config.records_path, e);
            Vec::new()
        });

        let (changes, _) = broadcast::channel(32);

        Self {
            config,
            records: Mutex::new(records),
            sync_enabled: AtomicBool::new(sync_enabled),
            gateway,
            monitor,
            changes,
        }
    }

    /// Completes startup: configures the monitor with the persisted sync
    /// preference and, when sync was already enabled, absorbs the remote set
    /// once.
    pub async fn bootstrap(&self) {
        let enabled = self.sync_enabled.load(Ordering::SeqCst);
        self.monitor.configure(enabled).await;
        if enabled {
            self.pull_and_merge(false).await;
        }
    }

    fn guard(&self) -> MutexGuard<'_, Vec<LearningRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the current list, newest first.
    pub fn records(&self) -> Vec<LearningRecord> {
        self.guard().clone()
    }

    pub fn total_entries(&self) -> usize {
        self.guard().len()
    }

    /// Count of distinct object/language-pair combinations.
    pub fn unique_items(&self) -> usize {
        self.guard()
            .iter()
            .map(LearningRecord::normalized_key)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn recent_records(&self, limit: usize) -> Vec<LearningRecord> {
        self.guard().iter().take(limit).cloned().collect()
    }

    pub fn is_cloud_sync_enabled(&self) -> bool {
        self.sync_enabled.load(Ordering::SeqCst)
    }

    /// Record-list observers receive a full snapshot after every mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<LearningRecord>> {
        self.changes.subscribe()
    }

    /// Adds a captured recognition. An empty or whitespace-only object name
    /// is dropped without error. When the newest record carries the same
    /// normalized key and is younger than the merge window, it is refreshed
    /// in place instead of a new record being prepended.
    pub async fn add_record(
        &self,
        object_name: &str,
        native_translation: &str,
        learning_translation: &str,
        native_language_code: &str,
        learning_language_code: &str,
    ) {
        let trimmed = object_name.trim();
        if trimmed.is_empty() {
            log::debug!("Dropping record with empty object name");
            return;
        }

        let candidate = LearningRecord {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            object_name: trimmed.to_string(),
            native_translation: native_translation.to_string(),
            learning_translation: learning_translation.to_string(),
            native_language_code: native_language_code.to_string(),
            learning_language_code: learning_language_code.to_string(),
        };

        {
            let mut records = self.guard();
            let merge_with_latest = records.first().is_some_and(|latest| {
                latest.normalized_key() == candidate.normalized_key()
                    && Utc::now().signed_duration_since(latest.created_at)
                        < chrono::Duration::seconds(MERGE_WINDOW_SECONDS)
            });

            if merge_with_latest {
                // Same id and object name, refreshed timestamp and translations.
                let latest = &mut records[0];
                latest.created_at = Utc::now();
                latest.native_translation = candidate.native_translation;
                latest.learning_translation = candidate.learning_translation;
                latest.native_language_code = candidate.native_language_code;
                latest.learning_language_code = candidate.learning_language_code;
            } else {
                records.insert(0, candidate);
            }

            self.persist(&records);
            self.emit(&records);
        }

        self.spawn_push();
    }

    /// Removes the first record equal to `record`. No-op when absent. A
    /// remote delete for that id is scheduled when sync is enabled.
    pub async fn remove(&self, record: &LearningRecord) {
        let removed = {
            let mut records = self.guard();
            match records.iter().position(|r| r == record) {
                Some(index) => {
                    records.remove(index);
                    self.persist(&records);
                    self.emit(&records);
                    true
                }
                None => false,
            }
        };

        if removed && self.sync_enabled.load(Ordering::SeqCst) {
            let gateway = Arc::clone(&self.gateway);
            let monitor = Arc::clone(&self.monitor);
            let id = record.id;
            tokio::spawn(async move {
                if !monitor.can_sync() {
                    return;
                }
                match gateway.delete_records(&[id]).await {
                    Ok(()) => monitor.report_sync_success(),
                    Err(e) => {
                        monitor.report_sync_failure(format!("Failed to delete cloud records: {e}"))
                    }
                }
            });
        }
    }

    /// Flips the sync preference. Enabling pulls and merges the remote set
    /// once, then pushes the full local list. Disabling leaves remote data
    /// untouched.
    pub async fn set_cloud_sync_enabled(&self, enabled: bool) {
        if self.sync_enabled.load(Ordering::SeqCst) == enabled {
            return;
        }
        self.sync_enabled.store(enabled, Ordering::SeqCst);

        if let Err(e) =
            settings::update_cloud_sync_preference_at(&self.config.settings_path, enabled)
        {
            log::warn!("Failed to persist sync preference: {e}");
        }

        self.monitor.configure(enabled).await;
        if enabled {
            self.pull_and_merge(false).await;
            self.push_now(true).await;
        }
    }

    /// Manual sync trigger. No-op unless sync is enabled; a blocked
    /// precondition is surfaced as a recorded failure because the caller
    /// asked for a sync explicitly.
    pub async fn sync_with_cloud(&self) {
        if !self.sync_enabled.load(Ordering::SeqCst) {
            return;
        }
        self.push_now(true).await;
    }

    /// One-way absorb of the remote set: merge by newest timestamp, persist,
    /// and notify observers. Deliberately does not push back, otherwise every
    /// pull would trigger another sync.
    async fn pull_and_merge(&self, explicit: bool) {
        if !self.monitor.can_sync() {
            if explicit {
                self.monitor.report_blocked(BLOCKED_MESSAGE);
            }
            return;
        }

        match self.gateway.fetch_all().await {
            Ok(remote) => {
                if remote.is_empty() {
                    return;
                }
                let mut records = self.guard();
                let merged = merge_by_newest(&records, remote);
                *records = merged;
                self.persist(&records);
                self.emit(&records);
            }
            Err(e) => {
                self.monitor
                    .report_fetch_failure(format!("Failed to fetch cloud records: {e}"));
            }
        }
    }

    /// Fire-and-forget mirror of the full list after a local mutation. A
    /// blocked precondition is skipped silently here; the mutation itself
    /// already succeeded locally.
    fn spawn_push(&self) {
        if !self.sync_enabled.load(Ordering::SeqCst) {
            return;
        }
        let snapshot = self.records();
        let gateway = Arc::clone(&self.gateway);
        let monitor = Arc::clone(&self.monitor);
        tokio::spawn(async move {
            push_records(gateway, monitor, snapshot, false).await;
        });
    }

    async fn push_now(&self, explicit: bool) {
        let snapshot = self.records();
        push_records(
            Arc::clone(&self.gateway),
            Arc::clone(&self.monitor),
            snapshot,
            explicit,
        )
        .await;
    }

    fn persist(&self, records: &[LearningRecord]) {
        if let Err(e) = save_records_to(&self.config.records_path, records) {
            log::warn!(
                "Failed to persist records to {:?}: {}",
                self.config.records_path,
                e
            );
        }
    }

    fn emit(&self, records: &[LearningRecord]) {
        self.changes.send(records.to_vec()).ok();
    }

    #[cfg(test)]
    fn age_latest(&self, seconds: i64) {
        let mut records = self.guard();
        if let Some(latest) = records.first_mut() {
            latest.created_at = latest.created_at - chrono::Duration::seconds(seconds);
        }
    }
}

async fn push_records(
    gateway: Arc<dyn RecordGateway>,
    monitor: Arc<SyncMonitor>,
    records: Vec<LearningRecord>,
    explicit: bool,
) {
    if !monitor.can_sync() {
        if explicit {
            monitor.report_blocked(BLOCKED_MESSAGE);
        }
        return;
    }

    monitor.begin_sync();
    match gateway.save_records(&records).await {
        Ok(()) => monitor.report_sync_success(),
        Err(e) => monitor.report_sync_failure(format!("Cloud sync failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::gateway::{AccountProbe, GatewayError};
    use crate::sync::AccountState;
    use async_trait::async_trait;

    struct NullGateway;

    #[async_trait]
    impl RecordGateway for NullGateway {
        async fn save_records(&self, _records: &[LearningRecord]) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn delete_records(&self, _ids: &[Uuid]) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn fetch_all(&self) -> Result<Vec<LearningRecord>, GatewayError> {
            Ok(Vec::new())
        }
    }

    struct OfflineProbe;

    #[async_trait]
    impl AccountProbe for OfflineProbe {
        async fn account_state(&self) -> Result<AccountState, GatewayError> {
            Ok(AccountState::NoAccount)
        }
    }

    fn temp_config() -> StoreConfig {
        let dir = std::env::temp_dir().join(format!("lexilens-store-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        StoreConfig {
            records_path: dir.join("records.json"),
            settings_path: dir.join("settings.json"),
        }
    }

    fn test_store() -> RecordStore {
        RecordStore::open(
            temp_config(),
            Arc::new(NullGateway),
            SyncMonitor::new(Arc::new(OfflineProbe)),
            false,
        )
    }

    fn record(name: &str, minutes_ago: i64) -> LearningRecord {
        LearningRecord {
            id: Uuid::new_v4(),
            created_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
            object_name: name.to_string(),
            native_translation: format!("{name}-native"),
            learning_translation: format!("{name}-learning"),
            native_language_code: "zh".to_string(),
            learning_language_code: "en".to_string(),
        }
    }

    #[tokio::test]
    async fn records_stay_newest_first_with_unique_ids() {
        let store = test_store();
        store.add_record("apple", "苹果", "Apple", "zh", "en").await;
        store.add_record("book", "书", "Book", "zh", "en").await;
        store.add_record("cup", "杯子", "Cup", "zh", "en").await;

        let records = store.records();
        assert_eq!(records.len(), 3);
        assert!(records.windows(2).all(|w| w[0].created_at >= w[1].created_at));
        let ids: HashSet<Uuid> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(records[0].object_name, "cup");
    }

    #[tokio::test]
    async fn rapid_repeat_recognition_refreshes_in_place() {
        let store = test_store();
        store.add_record("apple", "苹果", "Apple", "zh", "en").await;
        let first_id = store.records()[0].id;

        store.add_record("Apple", "苹果!", "Apple!", "zh", "en").await;

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, first_id);
        assert_eq!(records[0].object_name, "apple");
        assert_eq!(records[0].native_translation, "苹果!");
        assert_eq!(records[0].learning_translation, "Apple!");
    }

    #[tokio::test]
    async fn repeat_recognition_outside_window_appends() {
        let store = test_store();
        store.add_record("apple", "苹果", "Apple", "zh", "en").await;
        store.age_latest(MERGE_WINDOW_SECONDS + 1);

        store.add_record("apple", "苹果", "Apple", "zh", "en").await;
        assert_eq!(store.total_entries(), 2);
    }

    #[tokio::test]
    async fn different_language_pair_is_not_merged() {
        let store = test_store();
        store.add_record("apple", "苹果", "Apple", "zh", "en").await;
        store.add_record("apple", "Apfel", "Apple", "de", "en").await;
        assert_eq!(store.total_entries(), 2);
    }

    #[tokio::test]
    async fn empty_object_name_is_dropped() {
        let store = test_store();
        store.add_record("", "x", "y", "zh", "en").await;
        store.add_record("   \t\n", "x", "y", "zh", "en").await;
        assert_eq!(store.total_entries(), 0);
    }

    #[tokio::test]
    async fn remove_is_noop_for_unknown_record() {
        let store = test_store();
        store.add_record("apple", "苹果", "Apple", "zh", "en").await;
        store.remove(&record("pear", 0)).await;
        assert_eq!(store.total_entries(), 1);

        let existing = store.records()[0].clone();
        store.remove(&existing).await;
        assert_eq!(store.total_entries(), 0);
    }

    #[tokio::test]
    async fn store_reloads_persisted_records_sorted() {
        let config = temp_config();
        let store = RecordStore::open(
            config.clone(),
            Arc::new(NullGateway),
            SyncMonitor::new(Arc::new(OfflineProbe)),
            false,
        );
        store.add_record("apple", "苹果", "Apple", "zh", "en").await;
        store.add_record("book", "书", "Book", "zh", "en").await;

        let reopened = RecordStore::open(
            config,
            Arc::new(NullGateway),
            SyncMonitor::new(Arc::new(OfflineProbe)),
            false,
        );
        let records = reopened.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].object_name, "book");
    }

    #[tokio::test]
    async fn derived_stats_count_unique_keys() {
        let store = test_store();
        store.add_record("apple", "苹果", "Apple", "zh", "en").await;
        store.age_latest(MERGE_WINDOW_SECONDS + 1);
        store.add_record("apple", "苹果", "Apple", "zh", "en").await;
        store.add_record("book", "书", "Book", "zh", "en").await;

        assert_eq!(store.total_entries(), 3);
        assert_eq!(store.unique_items(), 2);
        assert_eq!(store.recent_records(2).len(), 2);
    }

    #[tokio::test]
    async fn subscribers_see_mutations() {
        let store = test_store();
        let mut rx = store.subscribe();
        store.add_record("apple", "苹果", "Apple", "zh", "en").await;
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn merge_prefers_newer_timestamp_per_id() {
        let local = vec![record("apple", 10)];
        let mut newer = local[0].clone();
        newer.created_at = Utc::now();
        newer.native_translation = "updated".to_string();

        let merged = merge_by_newest(&local, vec![newer.clone()]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].native_translation, "updated");

        // Symmetric case: a stale remote copy never wins.
        let mut stale = local[0].clone();
        stale.created_at = Utc::now() - chrono::Duration::minutes(60);
        stale.native_translation = "stale".to_string();
        let merged = merge_by_newest(&local, vec![stale]);
        assert_eq!(merged[0].native_translation, local[0].native_translation);
    }

    #[test]
    fn merge_is_idempotent() {
        let local = vec![record("apple", 5), record("book", 20)];
        let remote = vec![record("cup", 1), local[0].clone()];

        let once = merge_by_newest(&local, remote.clone());
        let twice = merge_by_newest(&once, remote);
        assert_eq!(once, twice);
        assert!(once.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }

    #[test]
    fn merge_inserts_unknown_remote_records() {
        let local = vec![record("apple", 5)];
        let remote = vec![record("book", 2), record("cup", 8)];
        let merged = merge_by_newest(&local, remote);
        assert_eq!(merged.len(), 3);
    }
}
