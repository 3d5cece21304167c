//! In-memory host primitives for testing and light embeddings

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use websettings_core::{
    DoneCallback, DurableDatabase, DurableOp, DurablePath, ErrorCallback, HostKeyValueStore,
    ResultCallback, SettingsError, SettingsResult,
};

use crate::event_loop::LoopHandle;

/// In-memory synchronous key-value store with an optional byte quota
pub struct MemoryHostStore {
    items: RwLock<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryHostStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            quota_bytes: None,
        }
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn with_items(items: Vec<(String, String)>) -> Self {
        let store = Self::new();
        store.items.write().extend(items);
        store
    }

    /// Bytes currently used by keys and values
    pub fn used_bytes(&self) -> usize {
        self.items
            .read()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    /// Copy of every stored item
    pub fn items(&self) -> BTreeMap<String, String> {
        self.items.read().clone()
    }
}

impl Default for MemoryHostStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HostKeyValueStore for MemoryHostStore {
    fn length(&self) -> usize {
        self.items.read().len()
    }

    fn key(&self, index: usize) -> Option<String> {
        self.items.read().keys().nth(index).cloned()
    }

    fn get_item(&self, key: &str) -> Option<String> {
        self.items.read().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> SettingsResult<()> {
        let mut items = self.items.write();
        if let Some(quota) = self.quota_bytes {
            let used: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let requested = key.len() + value.len();
            let available = quota.saturating_sub(used);
            if requested > available {
                return Err(SettingsError::QuotaExceeded {
                    requested,
                    available,
                });
            }
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        self.items.write().remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.items.read().keys().cloned().collect()
    }
}

/// In-memory durable database.
///
/// Operations take effect when called; their completions are posted to the
/// event loop. Failures can be injected per operation kind.
pub struct MemoryDurableDatabase {
    blobs: DashMap<DurablePath, Vec<u8>>,
    events: LoopHandle,
    failing: Mutex<HashSet<DurableOp>>,
}

impl MemoryDurableDatabase {
    pub fn new(events: LoopHandle) -> Self {
        Self {
            blobs: DashMap::new(),
            events,
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make every future `op` fail until `heal` is called
    pub fn fail_on(&self, op: DurableOp) {
        self.failing.lock().insert(op);
    }

    pub fn heal(&self, op: DurableOp) {
        self.failing.lock().remove(&op);
    }

    /// Seed a blob directly, bypassing the event loop
    pub fn insert(&self, path: DurablePath, bytes: Vec<u8>) {
        self.blobs.insert(path, bytes);
    }

    pub fn blob(&self, path: &DurablePath) -> Option<Vec<u8>> {
        self.blobs.get(path).map(|b| b.value().clone())
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    fn injected_failure(&self, op: DurableOp) -> Option<SettingsError> {
        if self.failing.lock().contains(&op) {
            Some(SettingsError::database(op, "injected failure"))
        } else {
            None
        }
    }
}

impl DurableDatabase for MemoryDurableDatabase {
    fn exists_async(
        &self,
        path: &DurablePath,
        on_result: ResultCallback<bool>,
        on_error: ErrorCallback,
    ) {
        if let Some(err) = self.injected_failure(DurableOp::Exists) {
            self.events.post(move || on_error(err));
            return;
        }
        let found = self.blobs.contains_key(path);
        self.events.post(move || on_result(found));
    }

    fn load_async(
        &self,
        path: &DurablePath,
        on_result: ResultCallback<Vec<u8>>,
        on_error: ErrorCallback,
    ) {
        if let Some(err) = self.injected_failure(DurableOp::Load) {
            self.events.post(move || on_error(err));
            return;
        }
        match self.blob(path) {
            Some(bytes) => self.events.post(move || on_result(bytes)),
            None => {
                let err = SettingsError::database(DurableOp::Load, format!("no entry at {}", path));
                self.events.post(move || on_error(err));
            }
        }
    }

    fn store_async(
        &self,
        path: &DurablePath,
        bytes: Vec<u8>,
        on_success: DoneCallback,
        on_error: ErrorCallback,
    ) {
        if let Some(err) = self.injected_failure(DurableOp::Store) {
            self.events.post(move || on_error(err));
            return;
        }
        self.blobs.insert(path.clone(), bytes);
        self.events.post(on_success);
    }

    fn delete_async(&self, path: &DurablePath, on_success: DoneCallback, on_error: ErrorCallback) {
        if let Some(err) = self.injected_failure(DurableOp::Delete) {
            self.events.post(move || on_error(err));
            return;
        }
        self.blobs.remove(path);
        self.events.post(on_success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_memory_host_store_basic() {
        let store = MemoryHostStore::new();

        store.set_item("key1", "value1").unwrap();
        assert_eq!(store.get_item("key1"), Some("value1".to_string()));
        assert_eq!(store.length(), 1);
        assert_eq!(store.key(0), Some("key1".to_string()));
        assert_eq!(store.key(1), None);

        store.remove_item("key1");
        assert_eq!(store.get_item("key1"), None);
        assert_eq!(store.length(), 0);
    }

    #[test]
    fn test_memory_host_store_quota() {
        let store = MemoryHostStore::with_quota(16);

        store.set_item("k", "0123456789").unwrap();
        // Overwriting an item only counts the new size
        store.set_item("k", "0123456789abcd").unwrap();

        let result = store.set_item("other", "0123456789");
        assert!(matches!(result, Err(SettingsError::QuotaExceeded { .. })));
        assert_eq!(store.get_item("other"), None);
        assert_eq!(store.used_bytes(), 15);
    }

    #[test]
    fn test_durable_completions_are_deferred() {
        let events = EventLoop::new();
        let db = MemoryDurableDatabase::new(events.handle());
        let path = DurablePath::new("/home/web_user", ".config/Acme/Widget.json");

        let stored = Arc::new(AtomicBool::new(false));
        let s = stored.clone();
        db.store_async(
            &path,
            b"{}".to_vec(),
            Box::new(move || s.store(true, Ordering::SeqCst)),
            Box::new(|_| panic!("store failed")),
        );
        assert!(!stored.load(Ordering::SeqCst));

        events.run_until_idle();
        assert!(stored.load(Ordering::SeqCst));
        assert_eq!(db.blob(&path), Some(b"{}".to_vec()));
    }

    #[test]
    fn test_durable_injected_failure() {
        let events = EventLoop::new();
        let db = MemoryDurableDatabase::new(events.handle());
        let path = DurablePath::new("/home/web_user", "settings.json");
        db.fail_on(DurableOp::Exists);

        let failed = Arc::new(AtomicBool::new(false));
        let f = failed.clone();
        db.exists_async(
            &path,
            Box::new(|_| panic!("exists should fail")),
            Box::new(move |err| {
                assert!(matches!(err, SettingsError::Database { op: DurableOp::Exists, .. }));
                f.store(true, Ordering::SeqCst);
            }),
        );
        events.run_until_idle();
        assert!(failed.load(Ordering::SeqCst));
    }
}
