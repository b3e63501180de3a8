// 🗄️ Dataset Repository - offline cache + stale-while-revalidate
//
// Holds the single active park dataset in memory and one persisted pack per
// park in the durable store. Per park: Empty → Cached → (Refreshing) → Cached.
//
// Every commit persists first and swaps memory second, under one commit
// gate, so a pack that could not be stored is never served and the last
// committed pack is both in memory and on disk. There is no version guard:
// a slow background refresh that commits after a manual import wins.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::coerce::{coerce_json_rows, coerce_rows, CoercionReport};
use crate::deduplication::dedupe_by_tk;
use crate::error::{Error, Result};
use crate::fetch::PackFetcher;
use crate::model::{park_key, today, Pack, ParkDescriptor, RawPackHeader, PACK_VERSION};
use crate::parser::parse_table;
use crate::store::PackStore;

/// Settings key remembering the last loaded park
pub const LAST_PARK_SETTING: &str = "last_park";

// ============================================================================
// OUTCOMES
// ============================================================================

/// The park currently held in memory
#[derive(Debug, Clone)]
pub struct ActiveDataset {
    pub park_id: String,
    pub pack: Arc<Pack>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadSource {
    /// Served from the durable store, refresh running in background
    Cache,
    /// No cached pack, fetched in foreground
    Network,
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub park_id: String,
    pub source: LoadSource,
    pub trackers: usize,
    /// Present when served from cache
    pub background: Option<BackgroundRefresh>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    pub park_id: String,
    pub trackers: usize,
    /// Content differs from what was stored before
    pub changed: bool,
    /// The refreshed park was active, so memory was updated too
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub park_id: String,
    pub trackers: usize,
    pub skipped_rows: usize,
    pub duplicates_collapsed: usize,
    pub updated: String,
    pub applied: bool,
}

/// Handle on a refresh started by `load_park`.
///
/// Its failure is never surfaced: `finish` logs and returns `None`.
#[derive(Debug)]
pub struct BackgroundRefresh {
    park_id: String,
    handle: JoinHandle<Result<RefreshOutcome>>,
}

impl BackgroundRefresh {
    pub fn park_id(&self) -> &str {
        &self.park_id
    }

    pub async fn finish(self) -> Option<RefreshOutcome> {
        match self.handle.await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                debug!(park = %self.park_id, error = %e, "background refresh failed");
                None
            }
            Err(e) => {
                debug!(park = %self.park_id, error = %e, "background refresh task did not complete");
                None
            }
        }
    }

    /// Like `finish`, but gives up waiting after `limit` (the task keeps
    /// running on the runtime)
    pub async fn finish_within(self, limit: Duration) -> Option<RefreshOutcome> {
        let park_id = self.park_id.clone();
        match tokio::time::timeout(limit, self.finish()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(park = %park_id, "background refresh still running, not waiting");
                None
            }
        }
    }
}

// ============================================================================
// REPOSITORY
// ============================================================================

struct Inner {
    store: Arc<dyn PackStore>,
    fetcher: Arc<dyn PackFetcher>,
    active: RwLock<Option<ActiveDataset>>,
    commit_gate: Mutex<()>,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DatasetRepository {
    inner: Arc<Inner>,
}

impl DatasetRepository {
    pub fn new(store: Arc<dyn PackStore>, fetcher: Arc<dyn PackFetcher>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                fetcher,
                active: RwLock::new(None),
                commit_gate: Mutex::new(()),
            }),
        }
    }

    fn read_active(&self) -> RwLockReadGuard<'_, Option<ActiveDataset>> {
        self.inner
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_active(&self) -> RwLockWriteGuard<'_, Option<ActiveDataset>> {
        self.inner
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn active(&self) -> Option<ActiveDataset> {
        self.read_active().clone()
    }

    pub fn active_park_id(&self) -> Option<String> {
        self.read_active().as_ref().map(|a| a.park_id.clone())
    }

    /// Snapshot of the active pack for queries
    pub fn active_pack(&self) -> Result<Arc<Pack>> {
        self.read_active()
            .as_ref()
            .map(|a| Arc::clone(&a.pack))
            .ok_or(Error::NoActivePark)
    }

    fn activate(&self, park_id: &str, pack: Arc<Pack>) {
        *self.write_active() = Some(ActiveDataset {
            park_id: park_id.to_string(),
            pack,
        });
    }

    /// Persist, then swap memory if `park_id` is active (or nothing is).
    async fn commit(&self, park_id: &str, pack: Pack) -> Result<(Arc<Pack>, bool)> {
        let _gate = self.inner.commit_gate.lock().await;

        self.inner.store.set(&park_key(park_id), &pack).await?;

        let pack = Arc::new(pack);
        let applied = {
            let mut active = self.write_active();
            match active.as_ref() {
                Some(current) if current.park_id != park_id => false,
                _ => {
                    *active = Some(ActiveDataset {
                        park_id: park_id.to_string(),
                        pack: Arc::clone(&pack),
                    });
                    true
                }
            }
        };

        Ok((pack, applied))
    }

    // ------------------------------------------------------------------------
    // Loading & refresh
    // ------------------------------------------------------------------------

    /// Make `park` the active park.
    ///
    /// Cached pack: active immediately, refresh started in background.
    /// No cached pack: foreground refresh; on failure the park stays active
    /// with an empty, unpersisted dataset and the error is returned.
    pub async fn load_park(&self, park: &ParkDescriptor) -> Result<LoadOutcome> {
        let cached = self.inner.store.get(&park_key(&park.id)).await?;
        self.remember_park(&park.id).await;

        match cached {
            Some(pack) => {
                let trackers = pack.len();
                self.activate(&park.id, Arc::new(pack));
                info!(park = %park.id, trackers, "loaded park from cache");

                let background = self.spawn_refresh(&park.id, &park.data_location);
                Ok(LoadOutcome {
                    park_id: park.id.clone(),
                    source: LoadSource::Cache,
                    trackers,
                    background: Some(background),
                })
            }
            None => {
                self.activate(&park.id, Arc::new(Pack::default()));

                let outcome = self
                    .refresh(&park.id, &park.data_location)
                    .await
                    .inspect_err(|e| warn!(park = %park.id, error = %e, "could not load park from network"))?;

                Ok(LoadOutcome {
                    park_id: park.id.clone(),
                    source: LoadSource::Network,
                    trackers: outcome.trackers,
                    background: None,
                })
            }
        }
    }

    /// Fetch the park's pack from `location` and commit it.
    ///
    /// Fetch or shape failures come back as `Error::Refresh` and leave memory
    /// and store untouched. Memory is only updated when `park_id` is still the
    /// active park.
    pub async fn refresh(&self, park_id: &str, location: &str) -> Result<RefreshOutcome> {
        let refresh_failed = |reason: String| Error::Refresh {
            park_id: park_id.to_string(),
            reason,
        };

        let value = self
            .inner
            .fetcher
            .fetch_json(location)
            .await
            .map_err(|e| refresh_failed(e.to_string()))?;

        let (header, rows) = Pack::split_raw(value).map_err(|e| refresh_failed(e.to_string()))?;
        let report = coerce_json_rows(&rows);
        let dedup = dedupe_by_tk(report.trackers);
        let pack = header.into_pack(dedup.trackers);

        // Best effort: only feeds the `changed` flag
        let previous = self.inner.store.get(&park_key(park_id)).await.ok().flatten();
        let changed = previous.map_or(true, |p| p.fingerprint() != pack.fingerprint());

        let (pack, applied) = self.commit(park_id, pack).await?;
        info!(park = %park_id, trackers = pack.len(), changed, applied, "refreshed park from network");

        Ok(RefreshOutcome {
            park_id: park_id.to_string(),
            trackers: pack.len(),
            changed,
            applied,
        })
    }

    /// Run `refresh` on the runtime without waiting for it
    pub fn spawn_refresh(&self, park_id: &str, location: &str) -> BackgroundRefresh {
        let repo = self.clone();
        let task_park = park_id.to_string();
        let location = location.to_string();

        let handle = tokio::spawn(async move { repo.refresh(&task_park, &location).await });

        BackgroundRefresh {
            park_id: park_id.to_string(),
            handle,
        }
    }

    // ------------------------------------------------------------------------
    // Import
    // ------------------------------------------------------------------------

    /// Import a JSON document: a bare list of tracker rows, or a pack object.
    pub async fn import_pack(&self, park_id: &str, raw: Value) -> Result<ImportSummary> {
        let raw = match raw {
            Value::Array(rows) => json!({
                "version": PACK_VERSION,
                "updated": "",
                "trackers": rows,
            }),
            other => other,
        };

        let (header, rows) = Pack::split_raw(raw)?;
        let report = coerce_json_rows(&rows);
        self.commit_import(park_id, header, report).await
    }

    pub async fn import_json_text(&self, park_id: &str, text: &str) -> Result<ImportSummary> {
        let raw: Value = serde_json::from_str(text)
            .map_err(|e| Error::malformed(format!("invalid JSON: {}", e)))?;
        self.import_pack(park_id, raw).await
    }

    /// Import CSV text; the pack is stamped with today's date
    pub async fn import_csv_text(&self, park_id: &str, text: &str) -> Result<ImportSummary> {
        let table = parse_table(text);
        let report = coerce_rows(&table.rows);
        let header = RawPackHeader {
            version: PACK_VERSION,
            updated: today(),
            extra: Map::new(),
        };
        self.commit_import(park_id, header, report).await
    }

    /// `.json` files are JSON, everything else is CSV
    pub async fn import_file(&self, park_id: &str, path: &Path) -> Result<ImportSummary> {
        let text = tokio::fs::read_to_string(path).await?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        if is_json {
            self.import_json_text(park_id, &text).await
        } else {
            self.import_csv_text(park_id, &text).await
        }
    }

    async fn commit_import(
        &self,
        park_id: &str,
        header: RawPackHeader,
        report: CoercionReport,
    ) -> Result<ImportSummary> {
        let dedup = dedupe_by_tk(report.trackers);
        let pack = header.into_pack(dedup.trackers);
        let (pack, applied) = self.commit(park_id, pack).await?;

        info!(
            park = %park_id,
            trackers = pack.len(),
            skipped = report.skipped,
            collapsed = dedup.collapsed,
            "imported park dataset"
        );

        Ok(ImportSummary {
            park_id: park_id.to_string(),
            trackers: pack.len(),
            skipped_rows: report.skipped,
            duplicates_collapsed: dedup.collapsed,
            updated: pack.updated.clone(),
            applied,
        })
    }

    // ------------------------------------------------------------------------
    // Forget / reset
    // ------------------------------------------------------------------------

    /// Delete the park's persisted pack. Memory is left alone.
    pub async fn forget(&self, park_id: &str) -> Result<()> {
        self.inner.store.delete(&park_key(park_id)).await?;
        info!(park = %park_id, "forgot cached park dataset");
        Ok(())
    }

    /// Replace the park's dataset with an empty pack dated today
    pub async fn reset_empty(&self, park_id: &str) -> Result<Arc<Pack>> {
        let (pack, _) = self.commit(park_id, Pack::empty_today()).await?;
        info!(park = %park_id, "reset park dataset to empty");
        Ok(pack)
    }

    // ------------------------------------------------------------------------
    // Last park
    // ------------------------------------------------------------------------

    pub async fn last_park(&self) -> Result<Option<String>> {
        self.inner.store.get_setting(LAST_PARK_SETTING).await
    }

    async fn remember_park(&self, park_id: &str) {
        if let Err(e) = self.inner.store.set_setting(LAST_PARK_SETTING, park_id).await {
            warn!(park = %park_id, error = %e, "could not remember last park");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::OfflineFetcher;
    use crate::model::TrackerRecord;
    use crate::store::MemoryPackStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    // ========================================================================
    // Test doubles
    // ========================================================================

    /// Serves canned JSON per location, optionally waiting on a gate first
    #[derive(Default)]
    struct FakeFetcher {
        responses: std::sync::Mutex<HashMap<String, std::result::Result<Value, String>>>,
        gate: Option<Arc<Notify>>,
    }

    impl FakeFetcher {
        fn serve(self, location: &str, value: Value) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(location.to_string(), Ok(value));
            self
        }

        fn fail(self, location: &str, reason: &str) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(location.to_string(), Err(reason.to_string()));
            self
        }

        fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }
    }

    #[async_trait]
    impl PackFetcher for FakeFetcher {
        async fn fetch_json(&self, location: &str) -> Result<Value> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let response = self.responses.lock().unwrap().get(location).cloned();
            match response {
                Some(Ok(v)) => Ok(v),
                Some(Err(reason)) => Err(Error::Fetch {
                    location: location.to_string(),
                    reason,
                }),
                None => Err(Error::Fetch {
                    location: location.to_string(),
                    reason: "HTTP 404".to_string(),
                }),
            }
        }
    }

    /// Memory store whose writes can be switched off
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryPackStore,
        broken: AtomicBool,
    }

    #[async_trait]
    impl PackStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<Pack>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, pack: &Pack) -> Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(Error::Store("quota exceeded".to_string()));
            }
            self.inner.set(key, pack).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(Error::Store("store unavailable".to_string()));
            }
            self.inner.delete(key).await
        }
    }

    fn park(id: &str) -> ParkDescriptor {
        ParkDescriptor {
            id: id.to_string(),
            name: format!("Parque {}", id),
            data_location: format!("data/{}.json", id),
        }
    }

    fn network_pack(tks: &[i64]) -> Value {
        let trackers: Vec<Value> = tks
            .iter()
            .map(|tk| {
                json!({
                    "tk": tk, "plataforma": 1, "controlbox_id": tk, "channel": 10,
                    "strings": [format!("01_01_{:02}", tk)], "string_orders": [1]
                })
            })
            .collect();
        json!({"version": 1, "updated": "2024-06-01", "trackers": trackers})
    }

    fn cached_pack(tks: &[i64]) -> Pack {
        Pack::new(
            "2024-01-01",
            tks.iter().map(|&tk| TrackerRecord::new(tk, 9, 9, 9)).collect(),
        )
    }

    fn tks(pack: &Pack) -> Vec<i64> {
        pack.trackers.iter().map(|t| t.tk).collect()
    }

    // ========================================================================
    // Load & refresh
    // ========================================================================

    #[tokio::test]
    async fn test_load_without_cache_fetches_in_foreground() {
        let store = Arc::new(MemoryPackStore::new());
        let fetcher = FakeFetcher::default().serve("data/norte.json", network_pack(&[3, 1, 2]));
        let repo = DatasetRepository::new(store.clone(), Arc::new(fetcher));

        let outcome = repo.load_park(&park("norte")).await.unwrap();

        assert_eq!(outcome.source, LoadSource::Network);
        assert_eq!(outcome.trackers, 3);
        assert!(outcome.background.is_none());
        assert_eq!(tks(&repo.active_pack().unwrap()), vec![1, 2, 3]);
        assert!(store.get("park:norte").await.unwrap().is_some());
        assert_eq!(repo.last_park().await.unwrap(), Some("norte".to_string()));
    }

    #[tokio::test]
    async fn test_load_without_cache_and_offline_fails() {
        let repo = DatasetRepository::new(Arc::new(MemoryPackStore::new()), Arc::new(OfflineFetcher));

        let err = repo.load_park(&park("norte")).await.unwrap_err();

        assert!(err.is_refresh_failure());
        assert_eq!(repo.active_park_id(), Some("norte".to_string()));
        assert!(repo.active_pack().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_serves_cache_then_revalidates() {
        let store = Arc::new(MemoryPackStore::new());
        store.set("park:norte", &cached_pack(&[1])).await.unwrap();

        let fetcher = FakeFetcher::default().serve("data/norte.json", network_pack(&[1, 2]));
        let repo = DatasetRepository::new(store.clone(), Arc::new(fetcher));

        let outcome = repo.load_park(&park("norte")).await.unwrap();
        assert_eq!(outcome.source, LoadSource::Cache);

        // Rendered from cache before the refresh ran
        assert_eq!(tks(&repo.active_pack().unwrap()), vec![1]);

        let refreshed = outcome.background.unwrap().finish().await.unwrap();
        assert!(refreshed.changed);
        assert!(refreshed.applied);
        assert_eq!(tks(&repo.active_pack().unwrap()), vec![1, 2]);
        assert_eq!(tks(&store.get("park:norte").await.unwrap().unwrap()), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_background_failure_is_silent_and_harmless() {
        let store = Arc::new(MemoryPackStore::new());
        let cached = cached_pack(&[4, 5]);
        store.set("park:norte", &cached).await.unwrap();

        let fetcher = FakeFetcher::default().fail("data/norte.json", "connection refused");
        let repo = DatasetRepository::new(store.clone(), Arc::new(fetcher));

        let outcome = repo.load_park(&park("norte")).await.unwrap();
        assert!(outcome.background.unwrap().finish().await.is_none());

        assert_eq!(*repo.active_pack().unwrap(), cached);
        assert_eq!(store.get("park:norte").await.unwrap(), Some(cached));
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_state_unchanged() {
        let store = Arc::new(MemoryPackStore::new());
        let cached = cached_pack(&[7]);
        store.set("park:norte", &cached).await.unwrap();

        let fetcher = FakeFetcher::default()
            .fail("down.json", "timeout")
            .serve("shapeless.json", json!({"version": 1}))
            .serve("list.json", json!([1, 2]));
        let repo = DatasetRepository::new(store.clone(), Arc::new(fetcher));
        repo.activate("norte", Arc::new(cached.clone()));

        for location in ["down.json", "shapeless.json", "list.json", "missing.json"] {
            let err = repo.refresh("norte", location).await.unwrap_err();
            assert!(matches!(err, Error::Refresh { .. }), "{}: {}", location, err);
            assert_eq!(*repo.active_pack().unwrap(), cached);
            assert_eq!(store.get("park:norte").await.unwrap(), Some(cached.clone()));
        }
    }

    #[tokio::test]
    async fn test_refresh_unchanged_content() {
        let store = Arc::new(MemoryPackStore::new());
        let fetcher = FakeFetcher::default().serve("data/norte.json", network_pack(&[1]));
        let repo = DatasetRepository::new(store, Arc::new(fetcher));

        let first = repo.refresh("norte", "data/norte.json").await.unwrap();
        let second = repo.refresh("norte", "data/norte.json").await.unwrap();

        assert!(first.changed);
        assert!(!second.changed);
    }

    #[tokio::test]
    async fn test_refresh_store_failure_rejects() {
        let store = Arc::new(FlakyStore::default());
        let fetcher = FakeFetcher::default().serve("data/norte.json", network_pack(&[1]));
        let repo = DatasetRepository::new(store.clone(), Arc::new(fetcher));
        repo.activate("norte", Arc::new(Pack::default()));

        store.broken.store(true, Ordering::SeqCst);
        let err = repo.refresh("norte", "data/norte.json").await.unwrap_err();

        assert!(matches!(err, Error::Store(_)));
        assert!(repo.active_pack().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_background_refresh_after_park_switch() {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(MemoryPackStore::new());
        store.set("park:norte", &cached_pack(&[1])).await.unwrap();
        store.set("park:sur", &cached_pack(&[50])).await.unwrap();

        let fetcher = FakeFetcher::default()
            .serve("data/norte.json", network_pack(&[1, 2, 3]))
            .gated(gate.clone());
        let repo = DatasetRepository::new(store.clone(), Arc::new(fetcher));

        let norte = repo.load_park(&park("norte")).await.unwrap();

        // Switch parks while norte's refresh is still in flight
        repo.activate("sur", Arc::new(cached_pack(&[50])));
        gate.notify_one();

        let outcome = norte.background.unwrap().finish().await.unwrap();
        assert!(!outcome.applied);

        assert_eq!(repo.active_park_id(), Some("sur".to_string()));
        assert_eq!(tks(&repo.active_pack().unwrap()), vec![50]);
        assert_eq!(tks(&store.get("park:norte").await.unwrap().unwrap()), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_slow_refresh_clobbers_newer_import() {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(MemoryPackStore::new());
        store.set("park:norte", &cached_pack(&[1])).await.unwrap();

        let fetcher = FakeFetcher::default()
            .serve("data/norte.json", network_pack(&[8, 9]))
            .gated(gate.clone());
        let repo = DatasetRepository::new(store.clone(), Arc::new(fetcher));

        let outcome = repo.load_park(&park("norte")).await.unwrap();
        repo.import_csv_text("norte", "TK,Plataforma,ID,CH\n100,1,1,1")
            .await
            .unwrap();
        assert_eq!(tks(&repo.active_pack().unwrap()), vec![100]);

        gate.notify_one();
        outcome.background.unwrap().finish().await.unwrap();

        // Last completed commit wins, in memory and on disk
        assert_eq!(tks(&repo.active_pack().unwrap()), vec![8, 9]);
        assert_eq!(tks(&store.get("park:norte").await.unwrap().unwrap()), vec![8, 9]);
    }

    #[tokio::test]
    async fn test_finish_within_gives_up() {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(MemoryPackStore::new());
        store.set("park:norte", &cached_pack(&[1])).await.unwrap();
        let fetcher = FakeFetcher::default()
            .serve("data/norte.json", network_pack(&[2]))
            .gated(gate);
        let repo = DatasetRepository::new(store, Arc::new(fetcher));

        let outcome = repo.load_park(&park("norte")).await.unwrap();
        let background = outcome.background.unwrap();
        assert_eq!(background.park_id(), "norte");
        assert!(background.finish_within(Duration::from_millis(20)).await.is_none());
        assert_eq!(tks(&repo.active_pack().unwrap()), vec![1]);
    }

    // ========================================================================
    // Import
    // ========================================================================

    #[tokio::test]
    async fn test_import_dedup_keeps_later_row() {
        let store = Arc::new(MemoryPackStore::new());
        let repo = DatasetRepository::new(store.clone(), Arc::new(OfflineFetcher));

        let summary = repo
            .import_pack(
                "norte",
                json!([
                    {"tk": 5, "plataforma": 1, "controlbox_id": 1, "channel": 1},
                    {"tk": 2, "plataforma": 1, "controlbox_id": 2, "channel": 2},
                    {"tk": 5, "plataforma": 3, "controlbox_id": 7, "channel": 9, "strings": ["1-1-1"]}
                ]),
            )
            .await
            .unwrap();

        assert_eq!(summary.trackers, 2);
        assert_eq!(summary.duplicates_collapsed, 1);
        assert_eq!(summary.updated, "");

        let pack = repo.active_pack().unwrap();
        assert_eq!(tks(&pack), vec![2, 5]);
        assert_eq!(
            pack.trackers[1],
            TrackerRecord::new(5, 3, 7, 9).with_strings(["01_01_01"])
        );
        assert_eq!(store.get("park:norte").await.unwrap().as_ref(), Some(&*pack));
    }

    #[tokio::test]
    async fn test_import_rejects_malformed_without_mutation() {
        let store = Arc::new(MemoryPackStore::new());
        let repo = DatasetRepository::new(store.clone(), Arc::new(OfflineFetcher));
        let existing = cached_pack(&[1]);
        store.set("park:norte", &existing).await.unwrap();
        repo.activate("norte", Arc::new(existing.clone()));

        let err = repo.import_json_text("norte", "{not json").await.unwrap_err();
        assert!(matches!(err, Error::MalformedImport(_)));

        let err = repo
            .import_pack("norte", json!({"version": 1, "updated": "2024-01-01"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedImport(_)));

        assert_eq!(*repo.active_pack().unwrap(), existing);
        assert_eq!(store.get("park:norte").await.unwrap(), Some(existing));
    }

    #[tokio::test]
    async fn test_import_pack_object_keeps_header() {
        let repo = DatasetRepository::new(Arc::new(MemoryPackStore::new()), Arc::new(OfflineFetcher));

        repo.import_pack(
            "norte",
            json!({"version": 1, "updated": "2024-04-04", "site": "N1", "trackers": [
                {"tk": 1, "plataforma": 1, "controlbox_id": 1, "channel": 1}
            ]}),
        )
        .await
        .unwrap();

        let pack = repo.active_pack().unwrap();
        assert_eq!(pack.updated, "2024-04-04");
        assert_eq!(pack.extra.get("site"), Some(&json!("N1")));
    }

    #[tokio::test]
    async fn test_csv_import_skips_rows_without_channel() {
        let repo = DatasetRepository::new(Arc::new(MemoryPackStore::new()), Arc::new(OfflineFetcher));

        let csv = "TK,Plataforma,ControlBox_ID,Channel,Strings\n\
                   1,1,1,10,01_01_01\n\
                   2,1,2,,01_01_02\n\
                   3,1,3,30,01_01_03";
        let summary = repo.import_csv_text("norte", csv).await.unwrap();

        assert_eq!(summary.trackers, 2);
        assert_eq!(summary.skipped_rows, 1);
        assert_eq!(summary.updated, today());
        assert_eq!(tks(&repo.active_pack().unwrap()), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_csv_import_with_byte_order_mark() {
        let repo = DatasetRepository::new(Arc::new(MemoryPackStore::new()), Arc::new(OfflineFetcher));

        let csv = "\u{feff}TK,Plataforma,ControlBox_ID,Channel,Strings\n141,3,4,50,01_02_03";
        let summary = repo.import_csv_text("norte", csv).await.unwrap();

        assert_eq!(summary.trackers, 1);
        assert_eq!(summary.skipped_rows, 0);
        assert_eq!(tks(&repo.active_pack().unwrap()), vec![141]);
    }

    #[tokio::test]
    async fn test_csv_without_channel_column() {
        let repo = DatasetRepository::new(Arc::new(MemoryPackStore::new()), Arc::new(OfflineFetcher));

        let summary = repo
            .import_csv_text("norte", "TK,Plataforma,ControlBox_ID\n1,1,1\n2,1,2")
            .await
            .unwrap();

        assert_eq!(summary.trackers, 0);
        assert_eq!(summary.skipped_rows, 2);
    }

    #[tokio::test]
    async fn test_import_store_failure_does_not_report_success() {
        let store = Arc::new(FlakyStore::default());
        let repo = DatasetRepository::new(store.clone(), Arc::new(OfflineFetcher));
        repo.activate("norte", Arc::new(cached_pack(&[1])));

        store.broken.store(true, Ordering::SeqCst);
        let err = repo
            .import_csv_text("norte", "TK,Plataforma,ID,CH\n2,1,1,1")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Store(_)));
        assert_eq!(tks(&repo.active_pack().unwrap()), vec![1]);
    }

    #[tokio::test]
    async fn test_import_for_inactive_park_only_persists() {
        let store = Arc::new(MemoryPackStore::new());
        let repo = DatasetRepository::new(store.clone(), Arc::new(OfflineFetcher));
        repo.activate("norte", Arc::new(cached_pack(&[1])));

        let summary = repo
            .import_csv_text("sur", "TK,Plataforma,ID,CH\n2,1,1,1")
            .await
            .unwrap();

        assert!(!summary.applied);
        assert_eq!(repo.active_park_id(), Some("norte".to_string()));
        assert!(store.get("park:sur").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_import_file_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("norte_trackers.JSON");
        let csv_path = dir.path().join("norte_trackers.txt");
        std::fs::write(
            &json_path,
            r#"[{"tk": 1, "plataforma": 1, "controlbox_id": 1, "channel": 1}]"#,
        )
        .unwrap();
        std::fs::write(&csv_path, "TK;Plataforma;ID;Canal\n1;1;1;1\n2;1;1;1").unwrap();

        let repo = DatasetRepository::new(Arc::new(MemoryPackStore::new()), Arc::new(OfflineFetcher));

        assert_eq!(repo.import_file("norte", &json_path).await.unwrap().trackers, 1);
        assert_eq!(repo.import_file("norte", &csv_path).await.unwrap().trackers, 2);

        let err = repo
            .import_file("norte", &dir.path().join("missing.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    // ========================================================================
    // Forget / reset
    // ========================================================================

    #[tokio::test]
    async fn test_forget_only_deletes_persisted_entry() {
        let store = Arc::new(MemoryPackStore::new());
        store.set("park:norte", &cached_pack(&[1])).await.unwrap();
        store.set("park:sur", &cached_pack(&[2])).await.unwrap();

        let repo = DatasetRepository::new(store.clone(), Arc::new(OfflineFetcher));
        repo.activate("norte", Arc::new(cached_pack(&[1])));

        repo.forget("norte").await.unwrap();

        assert!(store.get("park:norte").await.unwrap().is_none());
        assert!(store.get("park:sur").await.unwrap().is_some());
        assert_eq!(tks(&repo.active_pack().unwrap()), vec![1]);
    }

    #[tokio::test]
    async fn test_forget_store_failure_propagates() {
        let store = Arc::new(FlakyStore::default());
        store.broken.store(true, Ordering::SeqCst);
        let repo = DatasetRepository::new(store, Arc::new(OfflineFetcher));

        assert!(matches!(repo.forget("norte").await, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn test_reset_empty() {
        let store = Arc::new(MemoryPackStore::new());
        let repo = DatasetRepository::new(store.clone(), Arc::new(OfflineFetcher));
        repo.activate("norte", Arc::new(cached_pack(&[1, 2])));

        let pack = repo.reset_empty("norte").await.unwrap();

        assert!(pack.is_empty());
        assert_eq!(pack.updated, today());
        assert!(repo.active_pack().unwrap().is_empty());
        assert!(store.get("park:norte").await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_active_park() {
        let repo = DatasetRepository::new(Arc::new(MemoryPackStore::new()), Arc::new(OfflineFetcher));
        assert!(matches!(repo.active_pack(), Err(Error::NoActivePark)));
        assert!(repo.active().is_none());
    }
}
