//! Core types for websettings
//!
//! Defines the data structures shared by the backends and their callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Value type exchanged with the settings façade
pub type SettingValue = serde_json::Value;

/// Logical key separator inside a settings tree
pub const GROUP_SEPARATOR: char = '/';

/// Whether settings apply per-user or system-wide
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    #[default]
    User,
    System,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::User => write!(f, "user"),
            Scope::System => write!(f, "system"),
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Scope::User),
            "system" => Ok(Scope::System),
            other => Err(format!("unknown scope: {}", other)),
        }
    }
}

/// Storage format requested by the caller
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    /// Whatever the environment considers its native format
    Native,
    /// Synchronous host key-value store, namespaced by prefix chain
    KeyValue,
    /// Asynchronous durable database mirrored through a staging file
    Durable,
    /// Plain settings file on the local filesystem
    File,
    Invalid,
}

impl Format {
    /// Formats that need the host to permit persistent storage
    pub fn requires_persistence(&self) -> bool {
        matches!(self, Format::KeyValue | Format::Durable)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Native => "native",
            Format::KeyValue => "key-value",
            Format::Durable => "durable",
            Format::File => "file",
            Format::Invalid => "invalid",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(Format::Native),
            "key-value" | "keyvalue" | "local" => Ok(Format::KeyValue),
            "durable" | "idb" => Ok(Format::Durable),
            "file" | "json" => Ok(Format::File),
            other => Err(format!("unknown format: {}", other)),
        }
    }
}

/// Outcome of the most recent operation on a backend
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize, Default)]
pub enum Status {
    #[default]
    NoError,
    AccessError,
    FormatError,
}

impl Status {
    pub fn is_ok(&self) -> bool {
        *self == Status::NoError
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::NoError => write!(f, "no error"),
            Status::AccessError => write!(f, "access error"),
            Status::FormatError => write!(f, "format error"),
        }
    }
}

/// Which children of a group to enumerate
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ChildSpec {
    /// First path segment of every key below the prefix (keys and groups)
    ImmediateChildren,
    /// Leaf keys directly below the prefix
    ChildKeys,
    /// Groups directly below the prefix
    ChildGroups,
    /// Full relative path of every key below the prefix
    AllKeys,
}

impl ChildSpec {
    /// Select the part of `relative` this spec reports, if any.
    ///
    /// `relative` is a logical key with the requested group prefix already
    /// stripped.
    pub fn select<'a>(&self, relative: &'a str) -> Option<&'a str> {
        if relative.is_empty() {
            return None;
        }
        let first = relative.split(GROUP_SEPARATOR).next().unwrap_or(relative);
        let is_group = first.len() < relative.len();
        match self {
            ChildSpec::AllKeys => Some(relative),
            ChildSpec::ImmediateChildren => Some(first).filter(|s| !s.is_empty()),
            ChildSpec::ChildKeys if !is_group => Some(relative),
            ChildSpec::ChildGroups if is_group => Some(first).filter(|s| !s.is_empty()),
            _ => None,
        }
    }
}

/// True when `candidate` is `key` itself or a key nested below it.
///
/// Nesting requires a group separator boundary: `a/b` is below `a`, `ab`
/// is not. An empty `key` is the root and contains everything.
pub fn key_in_subtree(candidate: &str, key: &str) -> bool {
    if key.is_empty() {
        return true;
    }
    match candidate.strip_prefix(key) {
        Some(rest) => rest.is_empty() || rest.starts_with(GROUP_SEPARATOR),
        None => false,
    }
}

/// Scope, organization and application a backend is built for
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct ScopeSelector {
    pub scope: Scope,
    pub organization: String,
    /// Empty means "all applications of the organization"
    pub application: String,
}

impl ScopeSelector {
    pub fn new(scope: Scope, organization: impl Into<String>, application: impl Into<String>) -> Self {
        Self {
            scope,
            organization: organization.into(),
            application: application.into(),
        }
    }

    pub fn has_application(&self) -> bool {
        !self.application.is_empty()
    }
}

impl fmt::Display for ScopeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_application() {
            write!(f, "{}:{}/{}", self.scope, self.organization, self.application)
        } else {
            write!(f, "{}:{}/*", self.scope, self.organization)
        }
    }
}

/// Bootstrap state of an asynchronous durable backend
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum LoadState {
    #[default]
    Unchecked,
    Checking,
    Loading,
    Ready,
    Failed,
}

impl LoadState {
    pub fn is_ready(&self) -> bool {
        *self == LoadState::Ready
    }

    /// Ready and Failed end the bootstrap
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadState::Ready | LoadState::Failed)
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadState::Unchecked => "unchecked",
            LoadState::Checking => "checking",
            LoadState::Loading => "loading",
            LoadState::Ready => "ready",
            LoadState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Opaque handle correlating async completions with a live backend instance.
/// Tokens are never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrelationToken(pub u64);

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationToken({})", self.0)
    }
}

/// Location of a blob in the durable database
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct DurablePath {
    pub root: String,
    pub item: String,
}

impl DurablePath {
    pub fn new(root: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            item: item.into(),
        }
    }
}

impl fmt::Display for DurablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.root.trim_end_matches('/'), self.item)
    }
}

/// Operations offered by the durable database
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DurableOp {
    Exists,
    Load,
    Store,
    Delete,
}

impl fmt::Display for DurableOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DurableOp::Exists => "exists",
            DurableOp::Load => "load",
            DurableOp::Store => "store",
            DurableOp::Delete => "delete",
        };
        write!(f, "{}", name)
    }
}
