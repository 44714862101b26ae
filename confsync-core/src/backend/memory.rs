//! In-process store client with native change notification.

use super::{BackendCapabilities, KeyValueMap, StoreClient, key_prefix, strip_wildcard};
use crate::error::{FetchError, StoreError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Deletions remembered for watchers. Older ones are compacted away.
pub const MAX_TOMBSTONES: usize = 1024;

#[derive(Debug, Default)]
struct MemoryState {
    /// key -> (value, revision of last modification)
    entries: BTreeMap<String, (String, u64)>,
    /// key -> revision of deletion
    tombstones: BTreeMap<String, u64>,
    /// Highest deletion revision dropped from `tombstones`. Watchers waiting
    /// from an older index may have missed it and are woken immediately.
    compacted: u64,
    revision: u64,
}

impl MemoryState {
    fn record_deletion(&mut self, key: &str, revision: u64) {
        self.tombstones.insert(key.to_string(), revision);
        if self.tombstones.len() <= MAX_TOMBSTONES {
            return;
        }
        let oldest = self
            .tombstones
            .iter()
            .min_by_key(|(_, rev)| **rev)
            .map(|(k, rev)| (k.clone(), *rev));
        if let Some((key, rev)) = oldest {
            self.tombstones.remove(&key);
            self.compacted = self.compacted.max(rev);
        }
    }
}

/// Whether `key` is `watched` itself or lies beneath it. A trailing `/*` on
/// `watched` is ignored.
fn watches_key(watched: &str, key: &str) -> bool {
    let watched = strip_wildcard(watched);
    key == watched || key.starts_with(&key_prefix(watched))
}

/// A key/value store held in memory.
///
/// Every mutation bumps a global revision; `watch_prefix` waits on that
/// revision and returns once a relevant key changed past the caller's index.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    revision_tx: watch::Sender<u64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (revision_tx, _) = watch::channel(0);
        Self {
            state: Mutex::new(MemoryState::default()),
            revision_tx,
        }
    }

    /// Create a store pre-populated with `entries` at revision 1.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        {
            let mut state = store.lock();
            state.revision = 1;
            for (k, v) in entries {
                state.entries.insert(k.into(), (v.into(), 1));
            }
        }
        store.revision_tx.send_replace(1);
        store
    }

    /// Current global revision.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Highest revision past `wait_index` among keys the watcher cares about.
    fn changed_since(&self, prefix: &str, keys: &[String], wait_index: u64) -> Option<u64> {
        let state = self.lock();
        if wait_index < state.compacted {
            return Some(state.revision);
        }
        let relevant = |key: &str| {
            key.starts_with(prefix) && (keys.is_empty() || keys.iter().any(|k| watches_key(k, key)))
        };
        state
            .entries
            .iter()
            .map(|(k, (_, rev))| (k, *rev))
            .chain(state.tombstones.iter().map(|(k, rev)| (k, *rev)))
            .filter(|(k, rev)| *rev > wait_index && relevant(k.as_str()))
            .map(|(_, rev)| rev)
            .max()
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_watch: true,
        }
    }

    async fn get_values(&self, keys: &[String]) -> Result<KeyValueMap, FetchError> {
        let state = self.lock();
        let mut values = KeyValueMap::new();
        for key in keys {
            let key = strip_wildcard(key);
            if let Some((value, _)) = state.entries.get(key) {
                values.insert(key.to_string(), value.clone());
                continue;
            }
            let prefix = key_prefix(key);
            values.extend(
                state
                    .entries
                    .range(prefix.clone()..)
                    .take_while(|(k, _)| k.starts_with(&prefix))
                    .map(|(k, (v, _))| (k.clone(), v.clone())),
            );
        }
        Ok(values)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let revision = {
            let mut state = self.lock();
            state.revision += 1;
            let revision = state.revision;
            state.tombstones.remove(key);
            state
                .entries
                .insert(key.to_string(), (value.to_string(), revision));
            revision
        };
        self.revision_tx.send_replace(revision);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let revision = {
            let mut state = self.lock();
            if state.entries.remove(key).is_none() {
                return Err(StoreError::NotFound {
                    key: key.to_string(),
                });
            }
            state.revision += 1;
            let revision = state.revision;
            state.record_deletion(key, revision);
            revision
        };
        self.revision_tx.send_replace(revision);
        Ok(())
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        keys: &[String],
        wait_index: u64,
        stop: &CancellationToken,
    ) -> Result<u64, StoreError> {
        if wait_index == 0 {
            return Ok(self.revision());
        }
        // Subscribe before the first check so no change slips between them.
        let mut rx = self.revision_tx.subscribe();
        loop {
            if let Some(revision) = self.changed_since(prefix, keys, wait_index) {
                return Ok(revision);
            }
            tokio::select! {
                _ = stop.cancelled() => return Ok(wait_index),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Ok(wait_index);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_point_and_prefix_lookup() {
        let store = MemoryStore::with_entries([
            ("/app/db", "pg"),
            ("/app/cache/host", "redis"),
            ("/application", "other"),
        ]);
        let values = store.get_values(&keys(&["/app/db"])).await.unwrap();
        assert_eq!(values.len(), 1);

        let values = store.get_values(&keys(&["/app/"])).await.unwrap();
        let found: Vec<_> = values.keys().cloned().collect();
        assert_eq!(found, vec!["/app/cache/host", "/app/db"]);
    }

    #[tokio::test]
    async fn test_root_lists_all() {
        let store = MemoryStore::with_entries([("/a", "1"), ("/b/c", "2")]);
        let values = store.get_values(&keys(&["/"])).await.unwrap();
        assert_eq!(values.len(), 2);
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryStore::new();
        store.set("/k", "v").await.unwrap();
        assert_eq!(store.get_values(&keys(&["/k"])).await.unwrap()["/k"], "v");
        store.remove("/k").await.unwrap();
        assert!(store.remove("/k").await.unwrap_err().is_not_found());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_watch_initial_index_returns_immediately() {
        let store = MemoryStore::with_entries([("/a", "1")]);
        let stop = CancellationToken::new();
        assert!(store.capabilities().supports_watch);
        assert_eq!(store.watch_prefix("/", &[], 0, &stop).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_watch_wakes_on_relevant_change() {
        let store = Arc::new(MemoryStore::with_entries([("/app/a", "1")]));
        let stop = CancellationToken::new();

        let watcher = {
            let store = store.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                store
                    .watch_prefix("/app", &keys(&["/app/a"]), 1, &stop)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.set("/other", "x").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!watcher.is_finished());

        store.set("/app/a", "2").await.unwrap();
        let index = tokio::time::timeout(Duration::from_secs(2), watcher)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(index, 3);
    }

    #[tokio::test]
    async fn test_watch_sees_deletions() {
        let store = MemoryStore::with_entries([("/app/a", "1")]);
        store.remove("/app/a").await.unwrap();
        let stop = CancellationToken::new();
        assert_eq!(store.watch_prefix("/app", &[], 1, &stop).await.unwrap(), 2);
    }

    #[test]
    fn test_watches_key() {
        assert!(watches_key("/app/*", "/app/a"));
        assert!(watches_key("/app", "/app"));
        assert!(watches_key("/app/", "/app/db/host"));
        assert!(watches_key("/", "/anything"));
        assert!(!watches_key("/app/*", "/application"));
        assert!(!watches_key("/app", "/apple"));
    }

    #[tokio::test]
    async fn test_watch_wildcard_key_wakes_on_change() {
        let store = Arc::new(MemoryStore::with_entries([("/app/a", "1")]));
        let stop = CancellationToken::new();

        let watcher = {
            let store = store.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                store
                    .watch_prefix("/", &keys(&["/app/*"]), 1, &stop)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.set("/app/a", "2").await.unwrap();
        let index = tokio::time::timeout(Duration::from_millis(500), watcher)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(index, 2);
    }

    #[tokio::test]
    async fn test_tombstones_are_bounded() {
        let store = MemoryStore::new();
        for i in 0..MAX_TOMBSTONES + 10 {
            let key = format!("/churn/{i}");
            store.set(&key, "v").await.unwrap();
            store.remove(&key).await.unwrap();
        }
        let state = store.lock();
        assert_eq!(state.tombstones.len(), MAX_TOMBSTONES);
        assert!(!state.tombstones.contains_key("/churn/0"));
        assert!(state.compacted > 0);
    }

    #[tokio::test]
    async fn test_watch_from_compacted_index_wakes_immediately() {
        let store = MemoryStore::with_entries([("/app/a", "1")]);
        for i in 0..MAX_TOMBSTONES + 1 {
            let key = format!("/churn/{i}");
            store.set(&key, "v").await.unwrap();
            store.remove(&key).await.unwrap();
        }
        let stop = CancellationToken::new();
        let index = tokio::time::timeout(
            Duration::from_millis(500),
            store.watch_prefix("/app", &keys(&["/app/a"]), 1, &stop),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(index, store.revision());
    }

    #[tokio::test]
    async fn test_watch_returns_on_stop() {
        let store = MemoryStore::with_entries([("/app/a", "1")]);
        let stop = CancellationToken::new();
        let canceller = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        assert_eq!(store.watch_prefix("/app", &[], 1, &stop).await.unwrap(), 1);
    }
}
