//! Key prefix chains for namespaced host storage
//!
//! Every key written to a shared host store carries a prefix naming the
//! namespace, key format version, organization, application and scope tier.
//! Reads walk the chain from the most specific tier to the least specific.

use websettings_core::{Scope, ScopeSelector, SettingsError, SettingsResult};

/// Separator between prefix components
pub const SEPARATOR: char = '-';

const ESCAPED_SEPARATOR: &str = "--";
const ALL_APPS: &str = "all-apps";
const SYSTEM: &str = "sys-tem";

/// Escape the separator inside a name by doubling it
pub fn escape_name(name: &str) -> String {
    name.replace(SEPARATOR, ESCAPED_SEPARATOR)
}

/// Ordered prefixes, most specific first. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPrefixChain {
    prefixes: Vec<String>,
}

impl KeyPrefixChain {
    /// Most specific prefix; the only tier ever written to
    pub fn primary(&self) -> &str {
        &self.prefixes[0]
    }

    pub fn tiers(&self) -> &[String] {
        &self.prefixes
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Raw host key of `key` at `tier`
    pub fn storage_key(&self, tier: usize, key: &str) -> String {
        let mut raw = String::with_capacity(self.prefixes[tier].len() + key.len());
        raw.push_str(&self.prefixes[tier]);
        raw.push_str(key);
        raw
    }

    /// Tier a raw host key belongs to.
    ///
    /// Prefixes of one chain overlap (`<org>-<app>-` is a prefix of
    /// `<org>-<app>-sys-tem-`), so a key belongs to the longest prefix it
    /// starts with.
    pub fn owning_tier(&self, raw: &str) -> Option<usize> {
        self.prefixes
            .iter()
            .enumerate()
            .filter(|(_, prefix)| raw.starts_with(prefix.as_str()))
            .max_by_key(|(_, prefix)| prefix.len())
            .map(|(tier, _)| tier)
    }

    /// Logical key of `raw` with its tier, if the key belongs to this chain.
    /// A raw key equal to a bare prefix has no logical key.
    pub fn split<'a>(&self, raw: &'a str) -> Option<(usize, &'a str)> {
        let tier = self.owning_tier(raw)?;
        let key = &raw[self.prefixes[tier].len()..];
        if key.is_empty() {
            None
        } else {
            Some((tier, key))
        }
    }
}

/// Builds prefix chains for a fixed namespace and key format version
#[derive(Debug, Clone)]
pub struct PrefixChainBuilder {
    namespace: String,
    version: String,
}

impl PrefixChainBuilder {
    pub fn new(namespace: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            version: version.into(),
        }
    }

    /// Chain for `selector`:
    ///
    /// 1. `<ns>-<ver>-<org>-<app>-` (user scope, with application)
    /// 2. `<ns>-<ver>-<org>-all-apps-` (user scope)
    /// 3. `<ns>-<ver>-<org>-<app>-sys-tem-` (with application)
    /// 4. `<ns>-<ver>-<org>-all-apps-sys-tem-`
    pub fn build(&self, selector: &ScopeSelector) -> SettingsResult<KeyPrefixChain> {
        if selector.organization.is_empty() {
            return Err(SettingsError::EmptyOrganization);
        }

        let organization = escape_name(&selector.organization);
        let application = escape_name(&selector.application);
        let base = format!(
            "{ns}{sep}{ver}{sep}{org}{sep}",
            ns = self.namespace,
            ver = self.version,
            org = organization,
            sep = SEPARATOR
        );
        let tier = |parts: &[&str]| {
            let mut prefix = base.clone();
            for part in parts {
                prefix.push_str(part);
                prefix.push(SEPARATOR);
            }
            prefix
        };

        let mut prefixes = Vec::with_capacity(4);
        if selector.scope == Scope::User {
            if !application.is_empty() {
                prefixes.push(tier(&[application.as_str()]));
            }
            prefixes.push(tier(&[ALL_APPS]));
        }
        if !application.is_empty() {
            prefixes.push(tier(&[application.as_str(), SYSTEM]));
        }
        prefixes.push(tier(&[ALL_APPS, SYSTEM]));

        Ok(KeyPrefixChain { prefixes })
    }
}

impl Default for PrefixChainBuilder {
    fn default() -> Self {
        Self::new("ws", "v0")
    }
}
