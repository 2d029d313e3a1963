//! S1 from §8: first fetch is a MISS that stores the response; the second
//! fetch for the same request is a HIT serving the stored body.

mod common;

use shared_http_cache::{CacheRegistry, FetchOptions, Fetcher, InlineDispatcher, MemoryStore};

#[tokio::test]
async fn miss_then_hit() {
    let transport = common::StubTransport::new();
    transport.push(common::cacheable_response("max-age=300", b"lol"));

    let registry = CacheRegistry::new(MemoryStore::new());
    let cache = registry.open_default().await;
    let fetcher = Fetcher::new((*cache).clone(), transport.clone(), InlineDispatcher);

    let first = fetcher.fetch(common::get("http://x/"), &FetchOptions::default()).await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(first.body().as_ref(), b"lol");
    assert_eq!(common::cache_status(&first), "MISS");

    let second = fetcher.fetch(common::get("http://x/"), &FetchOptions::default()).await.unwrap();
    assert_eq!(common::cache_status(&second), "HIT");
    assert_eq!(second.body().as_ref(), b"lol");

    // Only the first request should ever have reached the "origin".
    assert_eq!(transport.request_count(), 1);
}
