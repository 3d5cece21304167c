//! Persistent host primitives backed by a sled database

use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;
use websettings_core::{
    DoneCallback, DurableDatabase, DurableOp, DurablePath, ErrorCallback, HostKeyValueStore,
    ResultCallback, SettingsError, SettingsResult,
};

use crate::event_loop::LoopHandle;

const LOCAL_TREE: &str = "local";
const DURABLE_TREE: &str = "durable";

/// One sled database holding both host primitives
pub struct SledHost {
    db: Db,
    local: Tree,
    durable: Tree,
}

impl SledHost {
    pub fn open<P: AsRef<Path>>(path: P) -> SettingsResult<Self> {
        let db = sled::open(path).map_err(|e| SettingsError::Host(e.to_string()))?;
        let local = db
            .open_tree(LOCAL_TREE)
            .map_err(|e| SettingsError::Host(e.to_string()))?;
        let durable = db
            .open_tree(DURABLE_TREE)
            .map_err(|e| SettingsError::Host(e.to_string()))?;
        Ok(Self { db, local, durable })
    }

    /// Synchronous key-value store over the `local` tree
    pub fn key_value_store(&self, quota_bytes: Option<usize>) -> SledHostStore {
        SledHostStore {
            tree: self.local.clone(),
            quota_bytes,
        }
    }

    /// Durable database over the `durable` tree, completing on `events`
    pub fn durable_database(&self, events: LoopHandle) -> SledDurableDatabase {
        SledDurableDatabase {
            tree: self.durable.clone(),
            events,
        }
    }

    /// Flush both trees to disk
    pub fn flush(&self) -> SettingsResult<()> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| SettingsError::Host(e.to_string()))
    }
}

/// Synchronous host store over a sled tree
pub struct SledHostStore {
    tree: Tree,
    quota_bytes: Option<usize>,
}

impl SledHostStore {
    fn used_bytes_except(&self, key: &str) -> usize {
        self.tree
            .iter()
            .filter_map(Result::ok)
            .filter(|(k, _)| &k[..] != key.as_bytes())
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl HostKeyValueStore for SledHostStore {
    fn length(&self) -> usize {
        self.tree.len()
    }

    fn key(&self, index: usize) -> Option<String> {
        let key = self.tree.iter().keys().nth(index)?.ok()?;
        String::from_utf8(key.to_vec()).ok()
    }

    fn get_item(&self, key: &str) -> Option<String> {
        match self.tree.get(key) {
            Ok(value) => value.and_then(|v| String::from_utf8(v.to_vec()).ok()),
            Err(e) => {
                warn!("Host store read of {:?} failed: {}", key, e);
                None
            }
        }
    }

    fn set_item(&self, key: &str, value: &str) -> SettingsResult<()> {
        if let Some(quota) = self.quota_bytes {
            let requested = key.len() + value.len();
            let available = quota.saturating_sub(self.used_bytes_except(key));
            if requested > available {
                return Err(SettingsError::QuotaExceeded {
                    requested,
                    available,
                });
            }
        }
        self.tree
            .insert(key, value.as_bytes())
            .map_err(|e| SettingsError::Host(e.to_string()))?;
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        if let Err(e) = self.tree.remove(key) {
            warn!("Host store removal of {:?} failed: {}", key, e);
        }
    }

    fn keys(&self) -> Vec<String> {
        self.tree
            .iter()
            .keys()
            .filter_map(Result::ok)
            .filter_map(|k| String::from_utf8(k.to_vec()).ok())
            .collect()
    }
}

/// Durable database over a sled tree.
///
/// sled answers synchronously; the answer is posted to the event loop so
/// callers observe the same ordering as with a truly asynchronous host.
pub struct SledDurableDatabase {
    tree: Tree,
    events: LoopHandle,
}

impl SledDurableDatabase {
    fn blob_key(path: &DurablePath) -> Vec<u8> {
        let mut key = path.root.as_bytes().to_vec();
        key.push(0);
        key.extend_from_slice(path.item.as_bytes());
        key
    }

    fn fail(&self, op: DurableOp, on_error: ErrorCallback, err: sled::Error) {
        let err = SettingsError::database(op, err);
        self.events.post(move || on_error(err));
    }
}

impl DurableDatabase for SledDurableDatabase {
    fn exists_async(
        &self,
        path: &DurablePath,
        on_result: ResultCallback<bool>,
        on_error: ErrorCallback,
    ) {
        match self.tree.contains_key(Self::blob_key(path)) {
            Ok(found) => self.events.post(move || on_result(found)),
            Err(e) => self.fail(DurableOp::Exists, on_error, e),
        }
    }

    fn load_async(
        &self,
        path: &DurablePath,
        on_result: ResultCallback<Vec<u8>>,
        on_error: ErrorCallback,
    ) {
        match self.tree.get(Self::blob_key(path)) {
            Ok(Some(bytes)) => {
                let bytes = bytes.to_vec();
                self.events.post(move || on_result(bytes));
            }
            Ok(None) => {
                let err = SettingsError::database(DurableOp::Load, format!("no entry at {}", path));
                self.events.post(move || on_error(err));
            }
            Err(e) => self.fail(DurableOp::Load, on_error, e),
        }
    }

    fn store_async(
        &self,
        path: &DurablePath,
        bytes: Vec<u8>,
        on_success: DoneCallback,
        on_error: ErrorCallback,
    ) {
        let result = self
            .tree
            .insert(Self::blob_key(path), bytes)
            .and_then(|_| self.tree.flush().map(|_| ()));
        match result {
            Ok(()) => self.events.post(on_success),
            Err(e) => self.fail(DurableOp::Store, on_error, e),
        }
    }

    fn delete_async(&self, path: &DurablePath, on_success: DoneCallback, on_error: ErrorCallback) {
        let result = self
            .tree
            .remove(Self::blob_key(path))
            .and_then(|_| self.tree.flush().map(|_| ()));
        match result {
            Ok(()) => self.events.post(on_success),
            Err(e) => self.fail(DurableOp::Delete, on_error, e),
        }
    }
}

/// Thread-safe sled host wrapper
pub type SharedSledHost = Arc<SledHost>;

/// Open a shared sled host
pub fn create_sled_host<P: AsRef<Path>>(path: P) -> SettingsResult<SharedSledHost> {
    Ok(Arc::new(SledHost::open(path)?))
}
