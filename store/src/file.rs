//! File-backed settings
//!
//! Settings are held in memory and written to a single JSON file on
//! `sync`. Besides serving the `File` format, a `FileStore` is the staging
//! buffer under the durable backend and the ephemeral fallback when the host
//! cannot persist.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use tracing::{debug, warn};
use websettings_core::{
    key_in_subtree, ChildSpec, Format, Scope, ScopeSelector, SettingValue, SettingsBackend,
    SettingsConfig, SettingsError, SettingsResult, Status,
};

/// Settings stored in one file
pub struct FileStore {
    format: Format,
    selector: ScopeSelector,
    path: PathBuf,
    entries: RwLock<BTreeMap<String, SettingValue>>,
    dirty: AtomicBool,
    status: RwLock<Status>,
    fallbacks: AtomicBool,
    // Keeps the temporary directory of ephemeral stores alive
    _scratch: Option<TempDir>,
}

impl FileStore {
    /// Open the file at `path` and read its settings
    pub fn open(format: Format, selector: ScopeSelector, path: PathBuf) -> Self {
        let store = Self::deferred(format, selector, path);
        store.init_access();
        store
    }

    /// Store over `path` that reads nothing until `init_access` is called
    pub fn deferred(format: Format, selector: ScopeSelector, path: PathBuf) -> Self {
        Self {
            format,
            selector,
            path,
            entries: RwLock::new(BTreeMap::new()),
            dirty: AtomicBool::new(false),
            status: RwLock::new(Status::NoError),
            fallbacks: AtomicBool::new(true),
            _scratch: None,
        }
    }

    /// Store whose file lives in a fresh temporary directory, removed when
    /// the store is dropped
    pub fn ephemeral(selector: ScopeSelector, config: &SettingsConfig) -> SettingsResult<Self> {
        let scratch = tempfile::tempdir()?;
        let path = scratch.path().join(config.settings_file(&selector)?);
        let mut store = Self::deferred(Format::File, selector, path);
        store._scratch = Some(scratch);
        store.init_access();
        Ok(store)
    }

    /// Attach a temporary directory that must outlive the store
    pub fn with_scratch(mut self, scratch: TempDir) -> Self {
        self._scratch = Some(scratch);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// (Re)read the backing file, replacing in-memory settings
    pub fn init_access(&self) {
        match self.read_entries() {
            Ok(entries) => {
                debug!("Read {} settings from {}", entries.len(), self.path.display());
                *self.entries.write() = entries;
                self.dirty.store(false, Ordering::Release);
                *self.status.write() = Status::NoError;
            }
            Err(e) => {
                warn!("Cannot read settings from {}: {}", self.path.display(), e);
                *self.status.write() = e.status();
            }
        }
    }

    fn read_entries(&self) -> SettingsResult<BTreeMap<String, SettingValue>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        let entries = serde_json::from_slice(&bytes)?;
        Ok(entries)
    }

    /// Raw contents of the backing file
    pub fn read_bytes(&self) -> SettingsResult<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    /// Replace the backing file with `bytes`. In-memory settings are not
    /// touched until the next `init_access`.
    pub fn write_bytes(&self, bytes: &[u8]) -> SettingsResult<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, bytes)?;
        Ok(())
    }

    /// Delete the backing file, if any
    pub fn discard_file(&self) -> SettingsResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_entries(&self) -> SettingsResult<()> {
        let bytes = serde_json::to_vec_pretty(&*self.entries.read())
            .map_err(|e| SettingsError::Staging(e.to_string()))?;
        self.write_bytes(&bytes)
    }

    fn record(&self, result: SettingsResult<()>) {
        match result {
            Ok(()) => *self.status.write() = Status::NoError,
            Err(e) => {
                warn!("Settings file {}: {}", self.path.display(), e);
                *self.status.write() = e.status();
            }
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

fn nearest_existing_ancestor(path: &Path) -> Option<fs::Metadata> {
    path.ancestors().skip(1).find_map(|dir| {
        let dir = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };
        fs::metadata(dir).ok()
    })
}

impl SettingsBackend for FileStore {
    fn format(&self) -> Format {
        self.format
    }

    fn scope(&self) -> Scope {
        self.selector.scope
    }

    fn get(&self, key: &str) -> Option<SettingValue> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: SettingValue) {
        if key.is_empty() {
            return;
        }
        self.entries.write().insert(key.to_string(), value);
        self.mark_dirty();
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|stored, _| !key_in_subtree(stored, key));
        if entries.len() != before {
            self.mark_dirty();
        }
    }

    fn children(&self, prefix: &str, spec: ChildSpec) -> Vec<String> {
        let entries = self.entries.read();
        let nodes: BTreeSet<String> = entries
            .keys()
            .filter_map(|key| key.strip_prefix(prefix))
            .filter_map(|relative| spec.select(relative))
            .map(str::to_string)
            .collect();
        nodes.into_iter().collect()
    }

    fn clear(&self) {
        self.entries.write().clear();
        self.mark_dirty();
    }

    fn sync(&self) {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return;
        }
        let result = self.write_entries();
        if result.is_err() {
            self.mark_dirty();
        }
        self.record(result);
    }

    fn flush(&self) {
        self.sync();
    }

    fn is_writable(&self) -> bool {
        match fs::metadata(&self.path) {
            Ok(meta) => !meta.permissions().readonly(),
            // The file would be created under its nearest existing ancestor
            Err(_) => nearest_existing_ancestor(&self.path)
                .map(|meta| meta.is_dir() && !meta.permissions().readonly())
                .unwrap_or(false),
        }
    }

    fn file_name(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }

    fn status(&self) -> Status {
        *self.status.read()
    }

    fn fallbacks_enabled(&self) -> bool {
        self.fallbacks.load(Ordering::Relaxed)
    }

    fn set_fallbacks_enabled(&self, enabled: bool) {
        self.fallbacks.store(enabled, Ordering::Relaxed);
    }
}
