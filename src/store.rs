//! The abstract KV backend interface (§6.1) and a reference in-memory
//! implementation for tests and as a documented starting point.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::entry::Entry;
use crate::error::Result;
use crate::vary::VaryDescriptor;

/// The storage contract this crate depends on. Implementations are
/// expected to round-trip values faithfully; TTL is honored best-effort —
/// values may be evicted earlier than their TTL, but must never outlive it
/// silently in a way this crate can observe as "still fresh".
///
/// This crate ships no production backend; §1 keeps the concrete KV
/// technology (Redis, a CDN's edge KV, etc.) out of scope. Implement this
/// trait against whatever store the host application already operates.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads the entry stored at `key`, or `None` if absent or expired.
    async fn get_entry(&self, key: &str) -> Result<Option<Entry>>;
    /// Stores `entry` at `key` with the given TTL, overwriting any prior value.
    async fn put_entry(&self, key: &str, entry: Entry, ttl: Duration) -> Result<()>;
    /// Reads the vary descriptor stored at `key`, or `None` if absent or expired.
    async fn get_vary(&self, key: &str) -> Result<Option<VaryDescriptor>>;
    /// Stores `descriptor` at `key` with the given TTL.
    async fn put_vary(&self, key: &str, descriptor: VaryDescriptor, ttl: Duration) -> Result<()>;
    /// Removes whatever is stored at `key`. Returns whether a value was
    /// actually present.
    async fn delete(&self, key: &str) -> Result<bool>;
}

#[derive(Clone)]
enum StoredValue {
    Entry(Entry),
    Vary(VaryDescriptor),
}

struct Slot {
    value: StoredValue,
    expires_at: Instant,
}

/// A reference `CacheStore` backed by an in-process `HashMap`, with lazy
/// expiry on read (an expired slot is dropped the first time it's looked up
/// rather than on a background sweep). Suitable for tests, single-process
/// deployments, or as a template for a real backend.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: std::sync::Arc<Mutex<HashMap<String, Slot>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Option<StoredValue> {
        let mut guard = self.inner.lock().expect("MemoryStore mutex poisoned");
        match guard.get(key) {
            Some(slot) if slot.expires_at > Instant::now() => Some(slot.value.clone()),
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: String, value: StoredValue, ttl: Duration) {
        let mut guard = self.inner.lock().expect("MemoryStore mutex poisoned");
        guard.insert(key, Slot { value, expires_at: Instant::now() + ttl });
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_entry(&self, key: &str) -> Result<Option<Entry>> {
        Ok(match self.get(key) {
            Some(StoredValue::Entry(entry)) => Some(entry),
            _ => None,
        })
    }

    async fn put_entry(&self, key: &str, entry: Entry, ttl: Duration) -> Result<()> {
        self.put(key.to_string(), StoredValue::Entry(entry), ttl);
        Ok(())
    }

    async fn get_vary(&self, key: &str) -> Result<Option<VaryDescriptor>> {
        Ok(match self.get(key) {
            Some(StoredValue::Vary(descriptor)) => Some(descriptor),
            _ => None,
        })
    }

    async fn put_vary(&self, key: &str, descriptor: VaryDescriptor, ttl: Duration) -> Result<()> {
        self.put(key.to_string(), StoredValue::Vary(descriptor), ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut guard = self.inner.lock().expect("MemoryStore mutex poisoned");
        Ok(guard.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(body: &str) -> Entry {
        Entry { status: 200, status_text: None, body_bytes: body.as_bytes().to_vec(), policy_blob: vec![] }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryStore::new();
        store.put_entry("k", entry("hello"), Duration::from_secs(60)).await.unwrap();
        let got = store.get_entry("k").await.unwrap().unwrap();
        assert_eq!(got.body_bytes, b"hello");
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let store = MemoryStore::new();
        store.put_entry("k", entry("hello"), Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get_entry("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let store = MemoryStore::new();
        assert!(!store.delete("missing").await.unwrap());
        store.put_entry("k", entry("hello"), Duration::from_secs(60)).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(store.get_entry("k").await.unwrap().is_none());
    }
}
