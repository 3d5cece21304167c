//! Backend selection
//!
//! Maps a requested format onto a concrete backend, taking into account
//! whether the host lets this session persist anything at all.

use std::sync::Arc;
use tracing::{debug, warn};
use websettings_core::{
    DurableDatabase, DurablePath, Format, HostKeyValueStore, PersistenceProbe, Scope,
    ScopeSelector, SettingsBackend, SettingsConfig, SettingsResult, StaticProbe, ValueCodec,
};

use crate::codec::JsonCodec;
use crate::durable::{DurableInstances, DurableStore};
use crate::event_loop::EventLoop;
use crate::file::FileStore;
use crate::local::NamespacedStore;
use crate::memory::{MemoryDurableDatabase, MemoryHostStore};
use crate::prefix::PrefixChainBuilder;

/// Host primitives available to the backends
#[derive(Clone)]
pub struct HostEnvironment {
    pub local: Arc<dyn HostKeyValueStore>,
    pub durable: Arc<dyn DurableDatabase>,
    pub probe: Arc<dyn PersistenceProbe>,
    pub codec: Arc<dyn ValueCodec>,
}

impl HostEnvironment {
    pub fn new(
        local: Arc<dyn HostKeyValueStore>,
        durable: Arc<dyn DurableDatabase>,
        probe: Arc<dyn PersistenceProbe>,
    ) -> Self {
        Self {
            local,
            durable,
            probe,
            codec: Arc::new(JsonCodec),
        }
    }

    /// Environment over in-memory primitives completing on `events`
    pub fn in_memory(events: &EventLoop, config: &SettingsConfig) -> Self {
        Self::new(
            Arc::new(MemoryHostStore::with_quota(config.local_quota_bytes)),
            Arc::new(MemoryDurableDatabase::new(events.handle())),
            Arc::new(StaticProbe(true)),
        )
    }

    pub fn with_probe(mut self, probe: Arc<dyn PersistenceProbe>) -> Self {
        self.probe = probe;
        self
    }
}

/// Concrete backend a format resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Namespaced,
    Durable,
    File,
    /// File backend in a temporary directory
    Ephemeral,
}

/// Creates settings backends for one host environment
pub struct BackendSelector {
    env: HostEnvironment,
    config: SettingsConfig,
    chains: PrefixChainBuilder,
    instances: Arc<DurableInstances>,
}

impl BackendSelector {
    pub fn new(env: HostEnvironment, config: SettingsConfig) -> Self {
        let chains = PrefixChainBuilder::new(&config.namespace, &config.format_version);
        Self {
            env,
            config,
            chains,
            instances: Arc::new(DurableInstances::new()),
        }
    }

    /// Live durable store instances
    pub fn instances(&self) -> &Arc<DurableInstances> {
        &self.instances
    }

    /// Backend kind for `requested`, or None for an unusable format
    pub fn resolve(&self, requested: Format) -> Option<BackendKind> {
        let format = match requested {
            Format::Native => self.config.native_format,
            other => other,
        };

        if format.requires_persistence() && !self.env.probe.can_persist() {
            warn!(
                "{} format requires persistent storage, falling back to file format with temporary file",
                format
            );
            return Some(BackendKind::Ephemeral);
        }

        match format {
            Format::KeyValue => Some(BackendKind::Namespaced),
            Format::Durable => Some(BackendKind::Durable),
            Format::File => Some(BackendKind::File),
            Format::Native | Format::Invalid => None,
        }
    }

    /// Create the backend for `format`, or None when no backend can be
    /// constructed
    pub fn create(
        &self,
        format: Format,
        scope: Scope,
        organization: &str,
        application: &str,
    ) -> Option<Box<dyn SettingsBackend>> {
        let selector = ScopeSelector::new(scope, organization, application);
        let kind = self.resolve(format)?;
        debug!("Creating {:?} backend for {}", kind, selector);

        let backend: SettingsResult<Box<dyn SettingsBackend>> = match kind {
            BackendKind::Namespaced => Ok(Box::new(self.create_namespaced(selector))),
            BackendKind::Durable => self
                .create_durable(selector)
                .map(|store| Box::new(store) as Box<dyn SettingsBackend>),
            BackendKind::File => self
                .create_file(selector)
                .map(|store| Box::new(store) as Box<dyn SettingsBackend>),
            BackendKind::Ephemeral => FileStore::ephemeral(selector, &self.config)
                .map(|store| Box::new(store) as Box<dyn SettingsBackend>),
        };

        match backend {
            Ok(backend) => Some(backend),
            Err(e) => {
                warn!("Cannot create {:?} settings backend: {}", kind, e);
                None
            }
        }
    }

    pub fn create_namespaced(&self, selector: ScopeSelector) -> NamespacedStore {
        NamespacedStore::new(
            self.env.local.clone(),
            self.env.codec.clone(),
            &self.chains,
            selector,
        )
    }

    /// Durable store whose staging file lives in the configured staging
    /// directory, or in a temporary directory owned by the store
    pub fn create_durable(&self, selector: ScopeSelector) -> SettingsResult<DurableStore> {
        let relative = self.config.settings_file(&selector)?;
        let path = DurablePath::new(
            self.config.durable_root.clone(),
            relative.to_string_lossy().into_owned(),
        );

        let staging = match &self.config.staging_dir {
            Some(dir) => FileStore::deferred(Format::Durable, selector.clone(), dir.join(&relative)),
            None => {
                let scratch = tempfile::tempdir()?;
                let file = scratch.path().join(&relative);
                FileStore::deferred(Format::Durable, selector.clone(), file).with_scratch(scratch)
            }
        };

        Ok(DurableStore::open(
            selector,
            staging,
            path,
            self.env.durable.clone(),
            self.instances.clone(),
        ))
    }

    pub fn create_file(&self, selector: ScopeSelector) -> SettingsResult<FileStore> {
        let path = self.config.settings_root.join(self.config.settings_file(&selector)?);
        Ok(FileStore::open(Format::File, selector, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use websettings_core::{ChildSpec, Status};

    struct Fixture {
        events: EventLoop,
        selector: BackendSelector,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_probe(true)
        }

        fn with_probe(can_persist: bool) -> Self {
            let events = EventLoop::new();
            let config = SettingsConfig::default();
            let env = HostEnvironment::in_memory(&events, &config)
                .with_probe(Arc::new(StaticProbe(can_persist)));
            Self {
                events,
                selector: BackendSelector::new(env, config),
            }
        }

        fn open(&self, format: Format, org: &str, app: &str) -> Box<dyn SettingsBackend> {
            let backend = self.selector.create(format, Scope::User, org, app).unwrap();
            self.events.run_until_idle();
            backend
        }
    }

    #[test]
    fn test_native_resolves_to_key_value() {
        let f = Fixture::new();
        assert_eq!(f.selector.resolve(Format::Native), Some(BackendKind::Namespaced));
        assert_eq!(f.selector.resolve(Format::Durable), Some(BackendKind::Durable));
        assert_eq!(f.selector.resolve(Format::File), Some(BackendKind::File));
        assert_eq!(f.selector.resolve(Format::Invalid), None);
    }

    #[test]
    fn test_configured_native_format() {
        let events = EventLoop::new();
        let config = SettingsConfig {
            native_format: Format::Durable,
            ..SettingsConfig::default()
        };
        let env = HostEnvironment::in_memory(&events, &config);
        let selector = BackendSelector::new(env, config);
        assert_eq!(selector.resolve(Format::Native), Some(BackendKind::Durable));
    }

    #[test]
    fn test_no_persistence_falls_back_to_ephemeral() {
        let f = Fixture::with_probe(false);
        assert_eq!(f.selector.resolve(Format::Native), Some(BackendKind::Ephemeral));
        assert_eq!(f.selector.resolve(Format::Durable), Some(BackendKind::Ephemeral));
        assert_eq!(f.selector.resolve(Format::File), Some(BackendKind::File));

        let backend = f.open(Format::KeyValue, "Acme", "Widget");
        assert_eq!(backend.format(), Format::File);
        assert!(backend.file_name().is_some());
        backend.set("color", json!("blue"));
        assert_eq!(backend.get("color"), Some(json!("blue")));
    }

    #[test]
    fn test_invalid_format_yields_no_backend() {
        let f = Fixture::new();
        assert!(f.selector.create(Format::Invalid, Scope::User, "Acme", "Widget").is_none());
    }

    #[test]
    fn test_file_backend_uses_settings_root() {
        let tmp = TempDir::new().unwrap();
        let events = EventLoop::new();
        let config = SettingsConfig {
            settings_root: tmp.path().to_path_buf(),
            ..SettingsConfig::default()
        };
        let env = HostEnvironment::in_memory(&events, &config);
        let selector = BackendSelector::new(env, config);

        let backend = selector.create(Format::File, Scope::User, "Acme", "Widget").unwrap();
        assert_eq!(
            backend.file_name(),
            Some(tmp.path().join(".config/Acme/Widget.json"))
        );
        backend.set("color", json!("blue"));
        backend.sync();
        assert!(tmp.path().join(".config/Acme/Widget.json").exists());
    }

    #[test]
    fn test_names_escaping_settings_root_yield_no_backend() {
        let f = Fixture::new();
        for format in [Format::File, Format::Durable] {
            assert!(f.selector.create(format, Scope::User, "../x", "Widget").is_none());
            assert!(f.selector.create(format, Scope::User, "Acme", "a/b").is_none());
        }
        assert_eq!(f.selector.instances().len(), 0);
    }

    #[test]
    fn test_durable_staging_in_configured_dir() {
        let tmp = TempDir::new().unwrap();
        let events = EventLoop::new();
        let config = SettingsConfig {
            staging_dir: Some(tmp.path().to_path_buf()),
            ..SettingsConfig::default()
        };
        let env = HostEnvironment::in_memory(&events, &config);
        let selector = BackendSelector::new(env, config);

        let store = selector.create_durable(ScopeSelector::new(Scope::User, "Acme", "Widget")).unwrap();
        assert_eq!(
            store.durable_path(),
            &DurablePath::new("/home/web_user", ".config/Acme/Widget.json")
        );
        assert_eq!(
            store.file_name(),
            Some(tmp.path().join(".config/Acme/Widget.json"))
        );
        assert_eq!(selector.instances().len(), 1);
        drop(store);
        assert!(selector.instances().is_empty());
    }

    #[test]
    fn test_acme_widget_scenario() {
        let f = Fixture::new();

        let widget = f.open(Format::KeyValue, "Acme", "Widget");
        widget.set("color", json!("blue"));
        assert_eq!(widget.get("color"), Some(json!("blue")));

        let other = f.open(Format::KeyValue, "Acme", "Other");
        assert_eq!(other.get("color"), None);

        let all_apps = f.open(Format::KeyValue, "Acme", "");
        all_apps.set("theme", json!("dark"));
        assert_eq!(widget.get("theme"), Some(json!("dark")));
    }

    #[test]
    fn test_fresh_durable_scenario() {
        let f = Fixture::new();
        let store = f.open(Format::Durable, "Acme", "Widget");

        assert!(store.is_writable());
        assert_eq!(store.status(), Status::NoError);
        assert_eq!(store.get("x"), None);
    }

    #[test]
    fn test_round_trip_both_backends() {
        let f = Fixture::new();
        for format in [Format::KeyValue, Format::Durable] {
            let backend = f.open(format, "Acme", "Widget");
            let values = [
                ("color", json!("blue")),
                ("window/width", json!(640)),
                ("flags", json!([true, false])),
                ("nested/deep/key", json!({ "a": 1 })),
            ];
            for (key, value) in values.iter() {
                backend.set(key, value.clone());
                assert_eq!(backend.get(key).as_ref(), Some(value), "{} {}", format, key);
            }
            backend.clear();
            f.events.run_until_idle();
        }
    }

    #[test]
    fn test_durable_isolation_by_path() {
        let f = Fixture::new();
        let widget = f.open(Format::Durable, "Acme", "Widget");
        widget.set("color", json!("blue"));
        widget.sync();
        f.events.run_until_idle();

        let other = f.open(Format::Durable, "Acme", "Other");
        assert_eq!(other.get("color"), None);
        assert!(other.children("", ChildSpec::AllKeys).is_empty());

        let again = f.open(Format::Durable, "Acme", "Widget");
        assert_eq!(again.get("color"), Some(json!("blue")));
    }

    #[test]
    fn test_clear_scope_across_backends() {
        let f = Fixture::new();
        let widget = f.open(Format::KeyValue, "Acme", "Widget");
        let other = f.open(Format::KeyValue, "Acme", "Other");
        widget.set("a", json!(1));
        widget.set("b/c", json!(2));
        other.set("a", json!(3));

        widget.clear();

        assert!(widget.children("", ChildSpec::AllKeys).is_empty());
        assert_eq!(other.get("a"), Some(json!(3)));
    }
}
