//! Core traits defining websettings interfaces
//!
//! The host primitives (`HostKeyValueStore`, `DurableDatabase`,
//! `PersistenceProbe`) are implemented by the embedding environment. Every
//! settings backend implements `SettingsBackend`.

use crate::error::SettingsError;
use crate::types::*;
use std::path::PathBuf;

/// Result type for websettings operations
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Completion callback carrying the operation's result
pub type ResultCallback<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// Completion callback for operations without a result
pub type DoneCallback = Box<dyn FnOnce() + Send + 'static>;

/// Completion callback for failed operations
pub type ErrorCallback = Box<dyn FnOnce(SettingsError) + Send + 'static>;

/// Synchronous, capacity-bounded host key-value store.
///
/// Enumeration order is only stable while the store is not mutated.
pub trait HostKeyValueStore: Send + Sync {
    /// Number of stored items
    fn length(&self) -> usize;

    /// Key at position `index`, if any
    fn key(&self, index: usize) -> Option<String>;

    /// Value stored under `key`
    fn get_item(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`. Fails when the host refuses the write.
    fn set_item(&self, key: &str, value: &str) -> SettingsResult<()>;

    /// Remove `key`; removing a missing key is not an error
    fn remove_item(&self, key: &str);

    /// Snapshot of every key currently stored
    fn keys(&self) -> Vec<String> {
        (0..self.length()).filter_map(|i| self.key(i)).collect()
    }
}

/// Asynchronous durable database.
///
/// Every call returns immediately. Exactly one of the two callbacks runs
/// later, on the host's event loop, never before the call has returned.
pub trait DurableDatabase: Send + Sync {
    fn exists_async(
        &self,
        path: &DurablePath,
        on_result: ResultCallback<bool>,
        on_error: ErrorCallback,
    );

    fn load_async(
        &self,
        path: &DurablePath,
        on_result: ResultCallback<Vec<u8>>,
        on_error: ErrorCallback,
    );

    fn store_async(
        &self,
        path: &DurablePath,
        bytes: Vec<u8>,
        on_success: DoneCallback,
        on_error: ErrorCallback,
    );

    fn delete_async(&self, path: &DurablePath, on_success: DoneCallback, on_error: ErrorCallback);
}

/// Whether the host permits persistent storage for this session
pub trait PersistenceProbe: Send + Sync {
    fn can_persist(&self) -> bool;
}

/// Probe with a fixed answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticProbe(pub bool);

impl PersistenceProbe for StaticProbe {
    fn can_persist(&self) -> bool {
        self.0
    }
}

impl<F> PersistenceProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn can_persist(&self) -> bool {
        self()
    }
}

/// Converts setting values to and from the strings the host stores
pub trait ValueCodec: Send + Sync {
    fn encode(&self, value: &SettingValue) -> String;

    fn decode(&self, raw: &str) -> SettingValue;
}

/// Settings backend as seen by the settings façade.
///
/// Failures never cross this boundary as errors: they are recorded in
/// `status()`, which callers check after an operation.
pub trait SettingsBackend: Send + Sync {
    fn format(&self) -> Format;

    fn scope(&self) -> Scope;

    fn get(&self, key: &str) -> Option<SettingValue>;

    fn set(&self, key: &str, value: SettingValue);

    /// Remove `key` and everything nested below it
    fn remove(&self, key: &str);

    fn children(&self, prefix: &str, spec: ChildSpec) -> Vec<String>;

    fn clear(&self);

    fn sync(&self);

    fn flush(&self);

    fn is_writable(&self) -> bool;

    /// Backing file, if the backend is file-backed
    fn file_name(&self) -> Option<PathBuf>;

    fn status(&self) -> Status;

    fn fallbacks_enabled(&self) -> bool;

    fn set_fallbacks_enabled(&self, enabled: bool);

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}
