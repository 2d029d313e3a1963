//! Targeted coverage for §8 testable properties not already exercised by
//! one of the named S1-S7 scenarios.

mod common;

use http::Response;
use shared_http_cache::{CacheCore, CacheableRequest, FetchOptions, MemoryStore};
use url::Url;

/// Property 10: a response carrying `Vary: *` is rejected outright rather
/// than stored — RFC 7234 treats it as never matchable, so storing it
/// would be pure waste at best.
#[tokio::test]
async fn put_rejects_vary_star() {
    let cache = CacheCore::new(MemoryStore::new(), "default", "default");
    let url = Url::parse("http://x/").unwrap();
    let request = http::Request::builder().method("GET").uri("http://x/").body(()).unwrap();
    let (parts, _) = request.into_parts();
    let cacheable = CacheableRequest::new(&parts, &url);

    let response = Response::builder()
        .status(200)
        .header("cache-control", "max-age=300")
        .header("vary", "*")
        .body(())
        .unwrap();
    let (response_parts, _) = response.into_parts();

    let result = cache.put(&cacheable, &response_parts, bytes::Bytes::from_static(b"body"), &FetchOptions::default()).await;
    assert!(result.is_err());

    // Nothing should have been stored: a lookup sees a plain MISS.
    let outcome = cache
        .match_request(&cacheable, &FetchOptions::default(), |_owned, _headers| async move {
            Err::<(http::response::Parts, bytes::Bytes), _>(shared_http_cache::CacheError::MissingBackend)
        })
        .await
        .unwrap();
    assert!(matches!(outcome, shared_http_cache::MatchOutcome::Miss));
}

/// Property 7: applying the same `cacheControlOverride` directive twice
/// produces the same merged `cache-control` as applying it once — the
/// merge dedupes by directive name rather than appending blindly.
#[tokio::test]
async fn cache_control_override_is_idempotent() {
    use shared_http_cache::{CacheRegistry, CacheRequestMode, Fetcher, InlineDispatcher};

    let transport = common::StubTransport::new();
    transport.push(common::cacheable_response("max-age=60", b"body"));

    let registry = CacheRegistry::new(MemoryStore::new());
    let cache = registry.open_default().await;
    let fetcher = Fetcher::new((*cache).clone(), transport.clone(), InlineDispatcher);

    let mut options = FetchOptions::new(CacheRequestMode::NoStore);
    options.cache_control_override = vec!["max-age=60".to_string(), "max-age=60".to_string()];

    let response = fetcher.fetch(common::get("http://x/"), &options).await.unwrap();
    let cache_control = response.headers().get("cache-control").and_then(|v| v.to_str().ok()).unwrap_or("");
    let max_age_occurrences = cache_control.split(',').filter(|d| d.trim().starts_with("max-age=")).count();
    assert_eq!(max_age_occurrences, 1);
}
