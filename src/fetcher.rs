//! `Fetcher` ties a `Transport`, a `CacheCore`, and a `BackgroundDispatcher`
//! together into the single public entry point most callers use (§4.5).

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Request, Response};
use log::debug;

use crate::background::BackgroundDispatcher;
use crate::core::{CacheCore, MatchOutcome};
use crate::entry::CachedResponse;
use crate::error::{CacheError, Result};
use crate::options::{CacheRequestMode, FetchOptions};
use crate::request::{CacheableRequest, OwnedRequest};
use crate::store::CacheStore;
use crate::vary::merge_vary;

/// One response header this library ever sets: the decision tag a caller
/// can use for observability (§6.5). Authority-of-first-write: once set,
/// `Fetcher` never overwrites it.
pub const X_CACHE_STATUS: &str = "x-cache-status";

/// The decision tag written to `x-cache-status` (§3's `CacheStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from cache without contacting the origin.
    Hit,
    /// No usable cache entry; served a fresh origin response and stored it.
    Miss,
    /// A synchronous revalidation found the stored entry outdated.
    Expired,
    /// A stale entry was served while revalidation happens in the background.
    Stale,
    /// The response was neither read from nor written to the cache.
    Bypass,
    /// A synchronous revalidation confirmed the stored entry was still valid.
    Revalidated,
    /// The response's cache-control made it impossible to classify as storable
    /// or not up front; served fresh with no caching decision recorded.
    Dynamic,
}

impl CacheStatus {
    fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Expired => "EXPIRED",
            CacheStatus::Stale => "STALE",
            CacheStatus::Bypass => "BYPASS",
            CacheStatus::Revalidated => "REVALIDATED",
            CacheStatus::Dynamic => "DYNAMIC",
        }
    }
}

/// The abstract HTTP client collaborator (§1, §4.5.1). No concrete
/// transport is bundled; implement this against whatever client the host
/// application already uses.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` to the origin and returns its response.
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>>;
}

/// Orchestrates a single cache-aware fetch: cache lookup, origin call,
/// response-header overrides, and `x-cache-status` tagging.
pub struct Fetcher<S, T, D> {
    cache: CacheCore<S>,
    transport: T,
    dispatcher: D,
}

impl<S, T, D> std::fmt::Debug for Fetcher<S, T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher").finish_non_exhaustive()
    }
}

impl<S, T, D> Fetcher<S, T, D>
where
    S: CacheStore + Clone + Send + Sync + 'static,
    T: Transport + Clone + Send + Sync + 'static,
    D: BackgroundDispatcher,
{
    /// Builds a fetcher over the given cache, transport, and background dispatcher.
    pub fn new(cache: CacheCore<S>, transport: T, dispatcher: D) -> Self {
        Self { cache, transport, dispatcher }
    }

    /// Performs a cache-aware fetch, following §4.5's decision order.
    pub async fn fetch(&self, request: Request<Bytes>, options: &FetchOptions) -> Result<Response<Bytes>> {
        let (parts, body) = request.into_parts();
        let url = url::Url::parse(&parts.uri.to_string())?;
        let body_slice = if body.is_empty() { None } else { Some(body.as_ref()) };
        let mut cacheable = CacheableRequest::new(&parts, &url);
        if let Some(slice) = body_slice {
            cacheable = cacheable.with_body(slice);
        }

        if matches!(options.mode, CacheRequestMode::NoStore) {
            debug!("bypassing cache for {url} (no-store)");
            let request = Request::from_parts(parts, body);
            let response = self.transport.send(request).await?;
            return Ok(tag(apply_overrides(response, options), CacheStatus::Bypass));
        }

        let transport = self.transport.clone();
        let outcome = self
            .cache
            .match_request(&cacheable, options, move |owned: OwnedRequest, revalidation_headers: HeaderMap| {
                let transport = transport.clone();
                async move { send_conditional(&transport, owned, revalidation_headers).await }
            })
            .await?;

        match outcome {
            MatchOutcome::Hit(cached) => Ok(tag(to_http_response(cached), CacheStatus::Hit)),
            MatchOutcome::Revalidated(cached) => Ok(tag(to_http_response(cached), CacheStatus::Revalidated)),
            MatchOutcome::Expired(cached) => Ok(tag(to_http_response(cached), CacheStatus::Expired)),
            MatchOutcome::Stale { response, revalidate } => {
                self.dispatcher.spawn(revalidate).await;
                Ok(tag(to_http_response(response), CacheStatus::Stale))
            }
            MatchOutcome::StaleIfError(cached) => Ok(tag(to_http_response(cached), CacheStatus::Stale)),
            MatchOutcome::OriginError(origin) => Ok(tag(to_http_response(origin), CacheStatus::Dynamic)),
            MatchOutcome::Miss => {
                if matches!(options.mode, CacheRequestMode::OnlyIfCached) {
                    return Err(CacheError::OnlyIfCachedMiss);
                }
                let origin_request = Request::from_parts(parts, body);
                let response = self.transport.send(origin_request).await?;
                let response = apply_overrides(response, options);
                let (response_parts, response_body) = split(response);

                let status = response_tag_for_response(&response_parts);
                if status == CacheStatus::Miss {
                    if let Err(err) = self
                        .cache
                        .put(&cacheable, &response_parts, response_body.clone(), options)
                        .await
                    {
                        debug!("failed to store response: {err}");
                        return Ok(tag(join(response_parts, response_body), CacheStatus::Dynamic));
                    }
                }
                Ok(tag(join(response_parts, response_body), status))
            }
        }
    }
}

async fn send_conditional<T: Transport>(
    transport: &T,
    owned: OwnedRequest,
    revalidation_headers: HeaderMap,
) -> Result<(http::response::Parts, Bytes)> {
    let view = owned.as_cacheable();
    let mut builder = Request::builder().method(view.parts.method.clone()).uri(view.parts.uri.clone());
    for (name, value) in view.parts.headers.iter() {
        builder = builder.header(name, value);
    }
    for (name, value) in revalidation_headers.iter() {
        builder = builder.header(name, value);
    }
    let body = view.body.map(Bytes::copy_from_slice).unwrap_or_default();
    let request = builder.body(body).map_err(CacheError::Http)?;
    let response = transport.send(request).await.map_err(|e| CacheError::Transport(Box::new(e)))?;
    Ok(split(response))
}

fn split(response: Response<Bytes>) -> (http::response::Parts, Bytes) {
    let (parts, body) = response.into_parts();
    (parts, body)
}

fn join(parts: http::response::Parts, body: Bytes) -> Response<Bytes> {
    Response::from_parts(parts, body)
}

fn to_http_response(cached: CachedResponse) -> Response<Bytes> {
    let mut builder = Response::builder().status(cached.status);
    if let Some(headers) = builder.headers_mut() {
        *headers = cached.headers;
    }
    builder.body(cached.body).expect("reconstructing cached response")
}

/// Applies `cacheControlOverride`/`varyOverride` (§6.2) to a successful
/// (status < 400) response; left untouched otherwise.
fn apply_overrides(response: Response<Bytes>, options: &FetchOptions) -> Response<Bytes> {
    if response.status().as_u16() >= 400 {
        return response;
    }
    let (mut parts, body) = response.into_parts();

    if !options.cache_control_override.is_empty() {
        let existing = parts
            .headers
            .get(http::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let mut directives: Vec<String> = existing
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let existing_lower: Vec<String> = directives.iter().map(|d| d.to_ascii_lowercase()).collect();
        for addition in &options.cache_control_override {
            let addition_name = addition.split('=').next().unwrap_or(addition).trim().to_ascii_lowercase();
            if !existing_lower.iter().any(|d| d.split('=').next().unwrap_or(d) == addition_name) {
                directives.push(addition.clone());
            }
        }
        if let Ok(value) = HeaderValue::from_str(&directives.join(", ")) {
            parts.headers.insert(http::header::CACHE_CONTROL, value);
        }
    }

    if !options.vary_override.is_empty() {
        let existing = parts.headers.get(http::header::VARY).and_then(|v| v.to_str().ok());
        if let Some(merged) = merge_vary(existing, &options.vary_override) {
            if let Ok(value) = HeaderValue::from_str(&merged) {
                parts.headers.insert(http::header::VARY, value);
            }
        }
    }

    Response::from_parts(parts, body)
}

/// Classifies a freshly fetched response per §4.5 step 6: missing
/// `cache-control` is DYNAMIC, a bypass-shaped `cache-control` is BYPASS,
/// otherwise it's a MISS (eligible for storage).
fn response_tag_for_response(parts: &http::response::Parts) -> CacheStatus {
    let Some(cache_control) = parts.headers.get(http::header::CACHE_CONTROL).and_then(|v| v.to_str().ok()) else {
        return CacheStatus::Dynamic;
    };
    let directives: Vec<String> = cache_control.split(',').map(|s| s.trim().to_ascii_lowercase()).collect();
    let has = |name: &str| directives.iter().any(|d| d == name || d.starts_with(&format!("{name}=")));

    let bypass = has("no-store")
        || has("no-cache")
        || has("private")
        || has("s-maxage=0")
        || (has("max-age=0") && !directives.iter().any(|d| d.starts_with("s-maxage")));

    if bypass {
        CacheStatus::Bypass
    } else {
        CacheStatus::Miss
    }
}

fn tag(response: Response<Bytes>, status: CacheStatus) -> Response<Bytes> {
    let (mut parts, body) = response.into_parts();
    if !parts.headers.contains_key(X_CACHE_STATUS) {
        if let Ok(value) = HeaderValue::from_str(status.as_str()) {
            parts.headers.insert(X_CACHE_STATUS, value);
        }
    }
    Response::from_parts(parts, body)
}
