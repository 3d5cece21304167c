//! Handle table correlating async completions with live instances

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use websettings_core::CorrelationToken;

/// Maps correlation tokens to live instances.
///
/// Tokens come from a monotonically increasing counter and are never
/// reissued, so a completion carrying the token of a released instance
/// finds nothing instead of reaching a different instance.
pub struct HandleTable<T> {
    next: AtomicU64,
    live: DashMap<CorrelationToken, Arc<T>>,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            live: DashMap::new(),
        }
    }

    pub fn register(&self, instance: Arc<T>) -> CorrelationToken {
        let token = CorrelationToken(self.next.fetch_add(1, Ordering::Relaxed));
        self.live.insert(token, instance);
        token
    }

    pub fn lookup(&self, token: CorrelationToken) -> Option<Arc<T>> {
        self.live.get(&token).map(|entry| entry.value().clone())
    }

    pub fn release(&self, token: CorrelationToken) -> Option<Arc<T>> {
        self.live.remove(&token).map(|(_, instance)| instance)
    }

    pub fn contains(&self, token: CorrelationToken) -> bool {
        self.live.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        let table = HandleTable::new();
        let a = table.register(Arc::new("a"));
        let b = table.register(Arc::new("b"));

        assert_ne!(a, b);
        assert_eq!(*table.lookup(a).unwrap(), "a");
        assert_eq!(*table.lookup(b).unwrap(), "b");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_released_token_never_resolves() {
        let table = HandleTable::new();
        let first = table.register(Arc::new(1));
        table.release(first);

        let second = table.register(Arc::new(2));
        assert_ne!(first, second);
        assert!(table.lookup(first).is_none());
        assert!(!table.contains(first));
        assert_eq!(*table.lookup(second).unwrap(), 2);
    }
}
