//! A named-cache multiplexer over a single shared `CacheStore` (§4.6).

use std::collections::HashMap;
use std::sync::Arc;

use async_lock::RwLock;

use crate::core::CacheCore;
use crate::key::PartDefiners;
use crate::policy::PolicyAdapter;

/// The cache name new `CacheRegistry`s hand out when a caller doesn't ask
/// for one by name; the default cache's keys are never prefixed (§4.1 step 4).
pub const DEFAULT_CACHE_NAME: &str = "default";

/// A mapping from cache name to `CacheCore` instance, all sharing one
/// backing `CacheStore` (§3's `CacheRegistry`, §4.6).
///
/// Ownership runs one way: the registry owns its caches; a `CacheCore`
/// never references the registry back (§9's "cyclic registration of named
/// caches" redesign note). There is no process-wide ambient instance —
/// callers construct one `CacheRegistry` explicitly and hold it, e.g. in
/// application state (§9's "global ambient cache" note).
pub struct CacheRegistry<S> {
    store: S,
    caches: RwLock<HashMap<String, Arc<CacheCore<S>>>>,
}

impl<S> std::fmt::Debug for CacheRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry").finish_non_exhaustive()
    }
}

impl<S: crate::store::CacheStore + Clone + Send + Sync + 'static> CacheRegistry<S> {
    /// Builds a registry over `store` with no caches open yet.
    pub fn new(store: S) -> Self {
        Self { store, caches: RwLock::new(HashMap::new()) }
    }

    /// Returns the existing cache bound to `name`, or creates and retains
    /// one on first use (§4.6: "instances are created on first `open` and
    /// retained for process lifetime").
    pub async fn open(&self, name: &str) -> Arc<CacheCore<S>> {
        if let Some(existing) = self.caches.read().await.get(name) {
            return existing.clone();
        }
        let mut caches = self.caches.write().await;
        caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CacheCore::new(self.store.clone(), name, DEFAULT_CACHE_NAME)))
            .clone()
    }

    /// Returns the existing cache bound to `name`, or creates one using a
    /// custom `PolicyAdapter` (e.g. an injected clock) and part-definer
    /// table, for callers that need those on first open.
    pub async fn open_with(&self, name: &str, policy: PolicyAdapter, part_definers: PartDefiners) -> Arc<CacheCore<S>> {
        if let Some(existing) = self.caches.read().await.get(name) {
            return existing.clone();
        }
        let mut caches = self.caches.write().await;
        caches
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CacheCore::with_policy_and_definers(
                    self.store.clone(),
                    name,
                    DEFAULT_CACHE_NAME,
                    policy,
                    part_definers,
                ))
            })
            .clone()
    }

    /// Opens the default cache, equivalent to `open(DEFAULT_CACHE_NAME)`.
    pub async fn open_default(&self) -> Arc<CacheCore<S>> {
        self.open(DEFAULT_CACHE_NAME).await
    }

    /// Removes the in-memory binding for `name`. This does not purge
    /// anything from the underlying `CacheStore` — backend purging is out
    /// of scope (§4.6) and remains the KV backend's own concern (its TTL,
    /// or whatever administrative tooling it offers). Returns whether a
    /// binding actually existed.
    pub async fn delete(&self, name: &str) -> bool {
        self.caches.write().await.remove(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn open_retains_the_same_instance() {
        let registry = CacheRegistry::new(MemoryStore::new());
        let a = registry.open("images").await;
        let b = registry.open("images").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn open_with_different_names_yields_distinct_instances() {
        let registry = CacheRegistry::new(MemoryStore::new());
        let a = registry.open("images").await;
        let b = registry.open("api").await;
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn delete_removes_the_binding_but_reports_existence() {
        let registry = CacheRegistry::new(MemoryStore::new());
        registry.open("images").await;
        assert!(registry.delete("images").await);
        assert!(!registry.delete("images").await);
    }

    #[tokio::test]
    async fn default_cache_name_is_unprefixed() {
        let registry = CacheRegistry::new(MemoryStore::new());
        let default_cache = registry.open_default().await;
        let named_cache = registry.open("images").await;
        assert!(!std::ptr::eq(default_cache.as_ref(), named_cache.as_ref()));
    }
}
