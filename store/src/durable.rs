//! Durable settings mirrored to an asynchronous host database
//!
//! Reads and writes go to a staging `FileStore`. The staging file is loaded
//! from the durable database once at construction and written back in full
//! on every `sync`. Until that first round-trip completes the store is not
//! ready: reads see nothing and writes are refused.
//!
//! Completions reach the instance only through its correlation token, so a
//! completion arriving after the instance was dropped does nothing.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use websettings_core::{
    ChildSpec, CorrelationToken, DurableDatabase, DurableOp, DurablePath, Format, LoadState, Scope,
    ScopeSelector, SettingValue, SettingsBackend, SettingsError, SettingsResult, Status,
};

use crate::file::FileStore;
use crate::registry::HandleTable;

/// Mutable state of one durable store instance
pub struct DurableState {
    load_state: LoadState,
    status: Status,
    staging: FileStore,
}

impl DurableState {
    fn new(staging: FileStore) -> Self {
        Self {
            load_state: LoadState::Unchecked,
            // No access until the durable database has answered
            status: Status::AccessError,
            staging,
        }
    }

    fn transition(&mut self, next: LoadState) {
        debug!("Durable store {} -> {}", self.load_state, next);
        self.load_state = next;
    }

    fn mark_ready(&mut self) {
        self.transition(LoadState::Ready);
        self.staging.init_access();
        self.status = self.staging.status();
    }

    fn mark_failed(&mut self) {
        self.transition(LoadState::Failed);
        self.status = Status::AccessError;
    }

    fn require_ready(&self) -> SettingsResult<()> {
        if self.load_state.is_ready() {
            Ok(())
        } else {
            Err(SettingsError::NotReady(self.load_state))
        }
    }
}

/// Live durable store instances, keyed by correlation token
pub type DurableInstances = HandleTable<Mutex<DurableState>>;

/// Routes a durable database completion back to its instance
#[derive(Clone)]
struct Completion {
    instances: Arc<DurableInstances>,
    token: CorrelationToken,
    database: Arc<dyn DurableDatabase>,
    path: DurablePath,
}

impl Completion {
    fn instance(&self) -> Option<Arc<Mutex<DurableState>>> {
        let instance = self.instances.lookup(self.token);
        if instance.is_none() {
            debug!("Completion for released durable store {} ignored", self.token);
        }
        instance
    }

    fn check_exists(self) {
        let on_error = self.clone();
        let database = self.database.clone();
        let path = self.path.clone();
        database.exists_async(
            &path,
            Box::new(move |found| self.on_checked(found)),
            Box::new(move |err| on_error.on_failed(DurableOp::Exists, err)),
        );
    }

    fn on_checked(self, found: bool) {
        let Some(instance) = self.instance() else {
            return;
        };

        if !found {
            let mut state = instance.lock();
            if let Err(e) = state.staging.discard_file() {
                warn!("Cannot discard stale staging file for {}: {}", self.path, e);
            }
            state.mark_ready();
            info!("No durable settings at {}, starting empty", self.path);
            return;
        }

        instance.lock().transition(LoadState::Loading);
        drop(instance);

        let on_error = self.clone();
        let database = self.database.clone();
        let path = self.path.clone();
        database.load_async(
            &path,
            Box::new(move |bytes| self.on_loaded(bytes)),
            Box::new(move |err| on_error.on_failed(DurableOp::Load, err)),
        );
    }

    fn on_loaded(self, bytes: Vec<u8>) {
        let Some(instance) = self.instance() else {
            return;
        };
        let mut state = instance.lock();
        match state.staging.write_bytes(&bytes) {
            Ok(()) => {
                state.mark_ready();
                info!("Loaded {} bytes of durable settings from {}", bytes.len(), self.path);
            }
            Err(e) => {
                warn!("Cannot stage durable settings from {}: {}", self.path, e);
                state.mark_failed();
            }
        }
    }

    fn on_stored(self, op: DurableOp) {
        let Some(instance) = self.instance() else {
            return;
        };
        debug!("Durable {} of {} completed", op, self.path);
        instance.lock().status = Status::NoError;
    }

    fn on_failed(self, op: DurableOp, err: SettingsError) {
        let Some(instance) = self.instance() else {
            return;
        };
        warn!("Durable settings at {}: {}", self.path, err);
        let mut state = instance.lock();
        match op {
            // Bootstrap failures are terminal for this instance
            DurableOp::Exists | DurableOp::Load => state.mark_failed(),
            // Local state is kept; only the durability status reflects it
            DurableOp::Store | DurableOp::Delete => state.status = err.status(),
        }
    }
}

/// Settings backend over an asynchronous durable database
pub struct DurableStore {
    selector: ScopeSelector,
    state: Arc<Mutex<DurableState>>,
    completion: Completion,
    fallbacks: AtomicBool,
}

impl DurableStore {
    /// Create the store and start its bootstrap. The store becomes ready
    /// once the host delivers the exists (and load) completions.
    pub fn open(
        selector: ScopeSelector,
        staging: FileStore,
        path: DurablePath,
        database: Arc<dyn DurableDatabase>,
        instances: Arc<DurableInstances>,
    ) -> Self {
        let state = Arc::new(Mutex::new(DurableState::new(staging)));
        let token = instances.register(state.clone());
        let completion = Completion {
            instances,
            token,
            database,
            path,
        };
        let store = Self {
            selector,
            state,
            completion,
            fallbacks: AtomicBool::new(true),
        };

        if store.selector.organization.is_empty() {
            warn!("{}", SettingsError::EmptyOrganization);
            store.state.lock().mark_failed();
            return store;
        }

        debug!("Durable store {} checking {}", token, store.completion.path);
        store.state.lock().transition(LoadState::Checking);
        store.completion.clone().check_exists();
        store
    }

    pub fn load_state(&self) -> LoadState {
        self.state.lock().load_state
    }

    pub fn token(&self) -> CorrelationToken {
        self.completion.token
    }

    pub fn durable_path(&self) -> &DurablePath {
        &self.completion.path
    }

    /// Run `op` on the staging buffer if the store is ready, recording a
    /// refusal in the status otherwise
    fn write_guarded<F>(&self, what: &str, op: F) -> bool
    where
        F: FnOnce(&FileStore),
    {
        let mut state = self.state.lock();
        match state.require_ready() {
            Ok(()) => {
                op(&state.staging);
                true
            }
            Err(e) => {
                warn!("Refusing {} on {}: {}", what, self.completion.path, e);
                state.status = e.status();
                false
            }
        }
    }

    /// Bytes to mirror to the durable database, or None when there is
    /// nothing to store
    fn stage_for_store(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        if !state.load_state.is_ready() {
            debug!("Skipping sync of {} while {}", self.completion.path, state.load_state);
            return None;
        }

        state.staging.sync();
        let staged = state.staging.status();
        if !staged.is_ok() {
            state.status = staged;
            return None;
        }

        match state.staging.read_bytes() {
            Ok(bytes) => Some(bytes),
            Err(SettingsError::Staging(reason)) if !state.staging.path().exists() => {
                debug!("Nothing staged for {}: {}", self.completion.path, reason);
                None
            }
            Err(e) => {
                warn!("Cannot read staging file for {}: {}", self.completion.path, e);
                state.status = e.status();
                None
            }
        }
    }
}

impl SettingsBackend for DurableStore {
    fn format(&self) -> Format {
        Format::Durable
    }

    fn scope(&self) -> Scope {
        self.selector.scope
    }

    fn get(&self, key: &str) -> Option<SettingValue> {
        let state = self.state.lock();
        if !state.load_state.is_ready() {
            return None;
        }
        state.staging.get(key)
    }

    fn set(&self, key: &str, value: SettingValue) {
        self.write_guarded("set", |staging| staging.set(key, value));
    }

    fn remove(&self, key: &str) {
        self.write_guarded("remove", |staging| staging.remove(key));
    }

    fn children(&self, prefix: &str, spec: ChildSpec) -> Vec<String> {
        self.state.lock().staging.children(prefix, spec)
    }

    fn clear(&self) {
        if !self.write_guarded("clear", |staging| staging.clear()) {
            return;
        }

        let on_done = self.completion.clone();
        let on_error = self.completion.clone();
        self.completion.database.delete_async(
            &self.completion.path,
            Box::new(move || on_done.on_stored(DurableOp::Delete)),
            Box::new(move |err| on_error.on_failed(DurableOp::Delete, err)),
        );
    }

    fn sync(&self) {
        let Some(bytes) = self.stage_for_store() else {
            return;
        };

        debug!("Storing {} bytes to {}", bytes.len(), self.completion.path);
        let on_done = self.completion.clone();
        let on_error = self.completion.clone();
        self.completion.database.store_async(
            &self.completion.path,
            bytes,
            Box::new(move || on_done.on_stored(DurableOp::Store)),
            Box::new(move |err| on_error.on_failed(DurableOp::Store, err)),
        );
    }

    fn flush(&self) {
        self.sync();
    }

    fn is_writable(&self) -> bool {
        let state = self.state.lock();
        state.load_state.is_ready() && state.staging.is_writable()
    }

    fn file_name(&self) -> Option<PathBuf> {
        self.state.lock().staging.file_name()
    }

    fn status(&self) -> Status {
        self.state.lock().status
    }

    fn fallbacks_enabled(&self) -> bool {
        self.fallbacks.load(Ordering::Relaxed)
    }

    fn set_fallbacks_enabled(&self, enabled: bool) {
        self.fallbacks.store(enabled, Ordering::Relaxed);
        self.state.lock().staging.set_fallbacks_enabled(enabled);
    }
}

impl Drop for DurableStore {
    fn drop(&mut self) {
        self.completion.instances.release(self.completion.token);
        debug!("Durable store {} released", self.completion.token);
    }
}
