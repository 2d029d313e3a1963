//! S4 from §8: `max-age=3, s-maxage=1` — a shared cache's TTL is governed by
//! `s-maxage`, not `max-age`. Immediately after the MISS, a HIT is served;
//! after the `s-maxage` window elapses, the next fetch is a MISS again.

mod common;

use std::time::Duration;

use shared_http_cache::{CacheRegistry, FetchOptions, Fetcher, InlineDispatcher, MemoryStore};

#[tokio::test]
async fn s_maxage_governs_ttl_over_max_age() {
    let transport = common::StubTransport::new();
    transport.push(common::cacheable_response("max-age=3, s-maxage=1", b"v1"));
    transport.push(common::cacheable_response("max-age=3, s-maxage=1", b"v2"));

    let registry = CacheRegistry::new(MemoryStore::new());
    let cache = registry.open_default().await;
    let fetcher = Fetcher::new((*cache).clone(), transport.clone(), InlineDispatcher);

    let first = fetcher.fetch(common::get("http://x/"), &FetchOptions::default()).await.unwrap();
    assert_eq!(common::cache_status(&first), "MISS");

    let second = fetcher.fetch(common::get("http://x/"), &FetchOptions::default()).await.unwrap();
    assert_eq!(common::cache_status(&second), "HIT");
    assert_eq!(second.body().as_ref(), b"v1");

    tokio::time::sleep(Duration::from_millis(1050)).await;

    let third = fetcher.fetch(common::get("http://x/"), &FetchOptions::default()).await.unwrap();
    assert_eq!(common::cache_status(&third), "MISS");
    assert_eq!(third.body().as_ref(), b"v2");
}
