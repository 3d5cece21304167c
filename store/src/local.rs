//! Settings namespaced inside a shared synchronous key-value store
//!
//! Every setting is one host item whose key is the logical key behind a
//! prefix from the instance's `KeyPrefixChain`. Nothing is buffered: each
//! `set` and `remove` reaches the host immediately.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use websettings_core::{
    key_in_subtree, ChildSpec, Format, HostKeyValueStore, Scope, ScopeSelector, SettingValue,
    SettingsBackend, SettingsError, SettingsResult, Status, ValueCodec,
};

use crate::prefix::{KeyPrefixChain, PrefixChainBuilder};

/// Settings backend over a shared host key-value store
pub struct NamespacedStore {
    host: Arc<dyn HostKeyValueStore>,
    codec: Arc<dyn ValueCodec>,
    selector: ScopeSelector,
    /// None when the chain could not be built; the store is then unusable
    chain: Option<KeyPrefixChain>,
    status: RwLock<Status>,
    fallbacks: AtomicBool,
}

impl NamespacedStore {
    pub fn new(
        host: Arc<dyn HostKeyValueStore>,
        codec: Arc<dyn ValueCodec>,
        builder: &PrefixChainBuilder,
        selector: ScopeSelector,
    ) -> Self {
        let (chain, status) = match builder.build(&selector) {
            Ok(chain) => (Some(chain), Status::NoError),
            Err(e) => {
                warn!("Cannot namespace settings for {}: {}", selector, e);
                (None, e.status())
            }
        };
        Self {
            host,
            codec,
            selector,
            chain,
            status: RwLock::new(status),
            fallbacks: AtomicBool::new(true),
        }
    }

    pub fn chain(&self) -> Option<&KeyPrefixChain> {
        self.chain.as_ref()
    }

    /// Number of chain tiers reads may consult
    fn readable_tiers(&self, chain: &KeyPrefixChain) -> usize {
        if self.fallbacks_enabled() {
            chain.len()
        } else {
            1
        }
    }

    /// Host keys of the primary tier that lie in the subtree of `key`
    fn primary_keys_under(&self, chain: &KeyPrefixChain, key: &str) -> Vec<String> {
        self.host
            .keys()
            .into_iter()
            .filter(|raw| match chain.split(raw) {
                Some((0, logical)) => key_in_subtree(logical, key),
                _ => false,
            })
            .collect()
    }

    /// Primary-tier host key of `key`. Keys whose host key would fall under
    /// a longer prefix of the chain belong to another tier and are refused.
    fn primary_key(&self, chain: &KeyPrefixChain, key: &str) -> SettingsResult<String> {
        let raw = chain.storage_key(0, key);
        if chain.owning_tier(&raw) == Some(0) {
            Ok(raw)
        } else {
            Err(SettingsError::ReservedKey(key.to_string()))
        }
    }

    fn record(&self, result: SettingsResult<()>) {
        match result {
            Ok(()) => *self.status.write() = Status::NoError,
            Err(e) => {
                warn!("Settings for {}: {}", self.selector, e);
                *self.status.write() = e.status();
            }
        }
    }
}

impl SettingsBackend for NamespacedStore {
    fn format(&self) -> Format {
        Format::KeyValue
    }

    fn scope(&self) -> Scope {
        self.selector.scope
    }

    fn get(&self, key: &str) -> Option<SettingValue> {
        let chain = self.chain.as_ref()?;
        if key.is_empty() {
            return None;
        }

        for tier in 0..self.readable_tiers(chain) {
            let raw = chain.storage_key(tier, key);
            // The raw key may belong to a longer prefix of the same chain
            if chain.owning_tier(&raw) != Some(tier) {
                continue;
            }
            if let Some(value) = self.host.get_item(&raw) {
                return Some(self.codec.decode(&value));
            }
        }
        None
    }

    fn set(&self, key: &str, value: SettingValue) {
        let Some(chain) = self.chain.as_ref() else {
            return;
        };
        if key.is_empty() {
            return;
        }
        let result = self
            .primary_key(chain, key)
            .and_then(|raw| self.host.set_item(&raw, &self.codec.encode(&value)));
        self.record(result);
    }

    fn remove(&self, key: &str) {
        let Some(chain) = self.chain.as_ref() else {
            return;
        };

        let own = if key.is_empty() {
            None
        } else {
            match self.primary_key(chain, key) {
                Ok(raw) => Some(raw),
                Err(e) => {
                    self.record(Err(e));
                    return;
                }
            }
        };

        // Collect first: host enumeration is unstable under mutation
        let mut doomed = self.primary_keys_under(chain, key);
        doomed.extend(own);
        doomed.sort();
        doomed.dedup();

        debug!("Removing {} host keys for {:?} under {}", doomed.len(), key, self.selector);
        for raw in &doomed {
            self.host.remove_item(raw);
        }
        self.record(Ok(()));
    }

    fn children(&self, prefix: &str, spec: ChildSpec) -> Vec<String> {
        let Some(chain) = self.chain.as_ref() else {
            return Vec::new();
        };
        let tiers = self.readable_tiers(chain);

        let mut nodes = BTreeSet::new();
        for raw in self.host.keys() {
            let Some((tier, logical)) = chain.split(&raw) else {
                continue;
            };
            if tier >= tiers {
                continue;
            }
            if let Some(child) = logical.strip_prefix(prefix).and_then(|rel| spec.select(rel)) {
                nodes.insert(child.to_string());
            }
        }
        nodes.into_iter().collect()
    }

    fn clear(&self) {
        let Some(chain) = self.chain.as_ref() else {
            return;
        };

        // Snapshot every host key before deleting any
        let snapshot = self.host.keys();
        let mut removed = 0;
        for raw in &snapshot {
            if matches!(chain.split(raw), Some((0, _))) {
                self.host.remove_item(raw);
                removed += 1;
            }
        }
        debug!("Cleared {} host keys under {}", removed, self.selector);
    }

    fn sync(&self) {}

    fn flush(&self) {}

    fn is_writable(&self) -> bool {
        self.chain.is_some()
    }

    fn file_name(&self) -> Option<PathBuf> {
        None
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::memory::MemoryHostStore;
    use serde_json::json;

    fn open(host: &Arc<MemoryHostStore>, scope: Scope, org: &str, app: &str) -> NamespacedStore {
        NamespacedStore::new(
            host.clone(),
            Arc::new(JsonCodec),
            &PrefixChainBuilder::default(),
            ScopeSelector::new(scope, org, app),
        )
    }

    #[test]
    fn test_set_writes_primary_tier_only() {
        let host = Arc::new(MemoryHostStore::new());
        let store = open(&host, Scope::User, "Acme", "Widget");

        store.set("color", json!("blue"));

        assert_eq!(store.get("color"), Some(json!("blue")));
        assert_eq!(
            host.items().keys().collect::<Vec<_>>(),
            vec!["ws-v0-Acme-Widget-color"]
        );
        assert_eq!(store.status(), Status::NoError);
    }

    #[test]
    fn test_isolation_between_applications() {
        let host = Arc::new(MemoryHostStore::new());
        let widget = open(&host, Scope::User, "Acme", "Widget");
        let other = open(&host, Scope::User, "Acme", "Other");
        let rival = open(&host, Scope::User, "Rival", "Widget");

        widget.set("color", json!("blue"));

        assert_eq!(other.get("color"), None);
        assert_eq!(rival.get("color"), None);
        assert!(other.children("", ChildSpec::AllKeys).is_empty());
        assert!(rival.children("", ChildSpec::AllKeys).is_empty());
    }

    #[test]
    fn test_fallback_to_all_apps() {
        let host = Arc::new(MemoryHostStore::new());
        let widget = open(&host, Scope::User, "Acme", "Widget");
        let all_apps = open(&host, Scope::User, "Acme", "");

        all_apps.set("theme", json!("dark"));
        assert_eq!(widget.get("theme"), Some(json!("dark")));

        widget.set_fallbacks_enabled(false);
        assert_eq!(widget.get("theme"), None);
        assert!(widget.children("", ChildSpec::AllKeys).is_empty());
    }

    #[test]
    fn test_most_specific_tier_wins() {
        let host = Arc::new(MemoryHostStore::new());
        let widget = open(&host, Scope::User, "Acme", "Widget");
        let system = open(&host, Scope::System, "Acme", "Widget");

        system.set("color", json!("grey"));
        assert_eq!(widget.get("color"), Some(json!("grey")));

        widget.set("color", json!("blue"));
        assert_eq!(widget.get("color"), Some(json!("blue")));
        assert_eq!(system.get("color"), Some(json!("grey")));
    }

    #[test]
    fn test_system_keys_not_visible_as_user_keys() {
        let host = Arc::new(MemoryHostStore::new());
        let widget = open(&host, Scope::User, "Acme", "Widget");
        let system = open(&host, Scope::System, "Acme", "Widget");

        system.set("color", json!("grey"));

        assert_eq!(widget.get("sys-tem-color"), None);
        assert_eq!(widget.children("", ChildSpec::AllKeys), vec!["color"]);

        widget.clear();
        assert_eq!(system.get("color"), Some(json!("grey")));
    }

    #[test]
    fn test_keys_reaching_into_system_tier_are_refused() {
        let host = Arc::new(MemoryHostStore::new());
        let widget = open(&host, Scope::User, "Acme", "Widget");
        let all_apps = open(&host, Scope::User, "Acme", "");
        let system = open(&host, Scope::System, "Acme", "Widget");
        system.set("color", json!("grey"));

        widget.set("sys-tem-color", json!("blue"));
        assert_eq!(widget.status(), Status::AccessError);
        assert_eq!(widget.get("sys-tem-color"), None);
        assert_eq!(system.get("color"), Some(json!("grey")));

        all_apps.set("sys-tem-theme", json!("dark"));
        assert_eq!(all_apps.status(), Status::AccessError);
        assert_eq!(host.length(), 1);

        widget.remove("sys-tem-color");
        assert_eq!(widget.status(), Status::AccessError);
        assert_eq!(system.get("color"), Some(json!("grey")));

        // Ordinary keys still round-trip and clear the error
        widget.set("system-color", json!("blue"));
        assert_eq!(widget.status(), Status::NoError);
        assert_eq!(widget.get("system-color"), Some(json!("blue")));
    }

    #[test]
    fn test_remove_subtree_with_boundary() {
        let host = Arc::new(MemoryHostStore::new());
        let store = open(&host, Scope::User, "Acme", "Widget");
        store.set("a", json!(1));
        store.set("a/b", json!(2));
        store.set("a/b/c", json!(3));
        store.set("ab", json!(4));

        store.remove("a");

        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("a/b"), None);
        assert_eq!(store.get("a/b/c"), None);
        assert_eq!(store.get("ab"), Some(json!(4)));
    }

    #[test]
    fn test_remove_does_not_touch_fallback_tiers() {
        let host = Arc::new(MemoryHostStore::new());
        let widget = open(&host, Scope::User, "Acme", "Widget");
        let all_apps = open(&host, Scope::User, "Acme", "");
        all_apps.set("theme", json!("dark"));
        widget.set("theme", json!("light"));

        widget.remove("theme");

        // The shared value shows through again
        assert_eq!(widget.get("theme"), Some(json!("dark")));
    }

    #[test]
    fn test_children_specs() {
        let host = Arc::new(MemoryHostStore::new());
        let widget = open(&host, Scope::User, "Acme", "Widget");
        let all_apps = open(&host, Scope::User, "Acme", "");
        widget.set("window/width", json!(640));
        widget.set("window/height", json!(480));
        widget.set("color", json!("blue"));
        all_apps.set("color", json!("red"));
        all_apps.set("theme", json!("dark"));

        assert_eq!(
            widget.children("", ChildSpec::ImmediateChildren),
            vec!["color", "theme", "window"]
        );
        assert_eq!(widget.children("", ChildSpec::ChildKeys), vec!["color", "theme"]);
        assert_eq!(widget.children("", ChildSpec::ChildGroups), vec!["window"]);
        assert_eq!(
            widget.children("window/", ChildSpec::AllKeys),
            vec!["height", "width"]
        );
    }

    #[test]
    fn test_clear_leaves_foreign_keys() {
        let host = Arc::new(MemoryHostStore::with_items(vec![
            ("unrelated".to_string(), "keep".to_string()),
        ]));
        let widget = open(&host, Scope::User, "Acme", "Widget");
        let other = open(&host, Scope::User, "Acme", "Other");
        let all_apps = open(&host, Scope::User, "Acme", "");
        widget.set("a", json!(1));
        widget.set("b/c", json!(2));
        other.set("a", json!(3));
        all_apps.set("theme", json!("dark"));

        widget.clear();

        assert_eq!(widget.children("", ChildSpec::AllKeys), vec!["theme"]);
        assert_eq!(other.get("a"), Some(json!(3)));
        assert_eq!(all_apps.get("theme"), Some(json!("dark")));
        assert_eq!(host.get_item("unrelated"), Some("keep".to_string()));
    }

    #[test]
    fn test_empty_organization_is_unusable() {
        let host = Arc::new(MemoryHostStore::new());
        let store = open(&host, Scope::User, "", "Widget");

        assert_eq!(store.status(), Status::AccessError);
        assert!(!store.is_writable());
        store.set("color", json!("blue"));
        assert_eq!(store.get("color"), None);
        assert_eq!(host.length(), 0);
    }

    #[test]
    fn test_quota_exceeded_sets_access_error() {
        let host = Arc::new(MemoryHostStore::with_quota(40));
        let store = open(&host, Scope::User, "Acme", "Widget");

        store.set("big", json!("x".repeat(64)));
        assert_eq!(store.status(), Status::AccessError);
        assert_eq!(store.get("big"), None);

        store.set("ok", json!(1));
        assert_eq!(store.status(), Status::NoError);
    }

    #[test]
    fn test_foreign_values_decode_as_strings() {
        let host = Arc::new(MemoryHostStore::with_items(vec![(
            "ws-v0-Acme-Widget-legacy".to_string(),
            "plain text".to_string(),
        )]));
        let store = open(&host, Scope::User, "Acme", "Widget");
        assert_eq!(store.get("legacy"), Some(json!("plain text")));
    }
}
