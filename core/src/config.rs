//! Configuration types for websettings

use crate::error::SettingsError;
use crate::traits::SettingsResult;
use crate::types::{Format, Scope, ScopeSelector};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Extension of settings files written by the file backend
pub const SETTINGS_FILE_EXTENSION: &str = "json";

/// Settings backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Tag separating our keys from other users of the host store
    pub namespace: String,

    /// Key format version, bumped when the key layout changes
    pub format_version: String,

    /// Root path of the durable database
    pub durable_root: String,

    /// Directory of user-scope settings files, relative to the root
    pub user_config_dir: PathBuf,

    /// Directory of system-scope settings files, relative to the root
    pub system_config_dir: PathBuf,

    /// Base directory for `File` format settings
    pub settings_root: PathBuf,

    /// Directory for durable staging files; a temporary directory per
    /// instance when unset
    pub staging_dir: Option<PathBuf>,

    /// Backend used when `Format::Native` is requested
    pub native_format: Format,

    /// Capacity of the host key-value store
    pub local_quota_bytes: usize,

    /// Logging level
    pub log_level: String,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            namespace: "ws".to_string(),
            format_version: "v0".to_string(),
            durable_root: "/home/web_user".to_string(),
            user_config_dir: PathBuf::from(".config"),
            system_config_dir: PathBuf::from("etc/xdg"),
            settings_root: PathBuf::from("."),
            staging_dir: None,
            native_format: Format::KeyValue,
            local_quota_bytes: 5 * 1024 * 1024, // 5 MiB, like browser storage
            log_level: "info".to_string(),
        }
    }
}

impl SettingsConfig {
    pub fn from_json(content: &str) -> SettingsResult<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| SettingsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SettingsError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> SettingsResult<()> {
        if self.namespace.is_empty() {
            return Err(SettingsError::Config("namespace must not be empty".into()));
        }
        if self.format_version.is_empty() {
            return Err(SettingsError::Config("format_version must not be empty".into()));
        }
        if matches!(self.native_format, Format::Native | Format::Invalid) {
            return Err(SettingsError::Config(format!(
                "native_format cannot be {}",
                self.native_format
            )));
        }
        Ok(())
    }

    /// Settings file of `selector`, relative to a settings root.
    ///
    /// `<scope dir>/<org>/<app>.json`, or `<scope dir>/<org>.json` for
    /// organization-wide settings.
    ///
    /// Fails when the organization or application is not a single plain
    /// path component.
    pub fn settings_file(&self, selector: &ScopeSelector) -> SettingsResult<PathBuf> {
        check_path_component(&selector.organization)?;
        check_path_component(&selector.application)?;

        let dir = match selector.scope {
            Scope::User => &self.user_config_dir,
            Scope::System => &self.system_config_dir,
        };
        let file = if selector.has_application() {
            dir.join(&selector.organization)
                .join(format!("{}.{}", selector.application, SETTINGS_FILE_EXTENSION))
        } else {
            dir.join(format!("{}.{}", selector.organization, SETTINGS_FILE_EXTENSION))
        };
        Ok(file)
    }
}

fn check_path_component(name: &str) -> SettingsResult<()> {
    if name.contains(|c: char| c == '/' || c == '\\') || name.contains("..") {
        return Err(SettingsError::InvalidName(name.to_string()));
    }
    Ok(())
}
