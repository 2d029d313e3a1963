//! Wraps `http_cache_semantics::CachePolicy` with the RFC 5861 stale-window
//! layer that crate doesn't provide, and an injectable clock for tests.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use http::{response, HeaderMap};
use http_cache_semantics::{AfterResponse, BeforeRequest, CacheOptions, CachePolicy, Privacy};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::request::CacheableRequest;

/// A source of the current time, injectable so tests can assert freshness
/// transitions without sleeping (§4.3's "optional injected clock").
#[derive(Clone)]
pub struct Clock(Arc<dyn Fn() -> SystemTime + Send + Sync>);

impl Clock {
    /// Wraps an arbitrary time source.
    pub fn new(f: impl Fn() -> SystemTime + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Returns the current time according to this clock.
    pub fn now(&self) -> SystemTime {
        (self.0)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(SystemTime::now)
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock").finish_non_exhaustive()
    }
}

/// The opaque snapshot persisted in `Entry::policy_blob` (§4.3.1). Bundles
/// `http_cache_semantics::CachePolicy` with the raw `cache-control` strings
/// seen on the request and response, since the wrapped crate parses
/// directives into a private map and doesn't expose `stale-while-revalidate`
/// / `stale-if-error`, which this crate layers on top itself.
#[derive(Serialize, Deserialize)]
struct PolicyBlob {
    policy: CachePolicy,
    request_cache_control: String,
    response_cache_control: String,
    /// `max-age` (or heuristic equivalent) in effect when this blob was
    /// written, in seconds. `CachePolicy::time_to_live` saturates to zero
    /// once a response goes stale, which makes it useless for measuring
    /// *how* stale an entry is; this crate needs that to bound the
    /// `stale-while-revalidate`/`stale-if-error` windows (RFC 5861), so it
    /// is captured here instead, from `ttl(now) + age(now)` at write time
    /// (before either directive could have saturated it).
    max_age_seconds: u64,
}

/// Outcome of evaluating a cached policy against an incoming request
/// (§4.3's `evaluate` contract).
#[derive(Debug)]
pub struct Evaluation {
    /// The response is fresh and can be served without contacting the origin.
    pub fresh: bool,
    /// The entry is stale but within its `stale-while-revalidate` window.
    pub can_stale_while_revalidate: bool,
    /// The entry may be served stale if revalidation fails with a transport error.
    pub can_stale_if_error: bool,
    /// Seconds remaining until the entry becomes stale (zero if already stale).
    pub ttl_seconds: u64,
    /// Headers to use on the reconstructed response when serving this entry
    /// without revalidation, or (when stale) on the outgoing revalidation request.
    pub response_headers: HeaderMap,
}

/// Outcome of deriving a policy for a freshly fetched response (§4.3's
/// `derive` contract).
#[derive(Debug)]
pub struct Derivation {
    /// Whether the response is storable at all per RFC 7234 §3.
    pub storable: bool,
    /// Seconds until the entry becomes stale; zero skips storage entirely.
    pub ttl_seconds: u64,
    /// Seconds the KV backend should actually retain the entry for — the
    /// freshness `ttl_seconds` extended by any `stale-while-revalidate`/
    /// `stale-if-error` window, so a stale-but-servable entry isn't evicted
    /// by the backend before its stale window closes (§4.4's `stale-swr`/
    /// `stale-hard` states assume the entry is still readable while stale).
    pub store_ttl_seconds: u64,
    /// The opaque, serialized policy blob to persist alongside the entry.
    pub blob: Vec<u8>,
}

/// Outcome of revalidating a stored policy against an origin's 304/200
/// response (§4.3's `revalidate` contract).
#[derive(Debug)]
pub struct Revalidation {
    /// Whether the origin sent a new representation (`false` on 304 with a matching validator).
    pub modified: bool,
    /// The refreshed, serialized policy blob.
    pub new_blob: Vec<u8>,
    /// Headers to use on the response served back to the caller.
    pub response_headers: HeaderMap,
    /// Seconds until the refreshed entry becomes stale again.
    pub ttl_seconds: u64,
    /// Seconds the KV backend should retain the refreshed entry for, same
    /// stale-window extension as [`Derivation::store_ttl_seconds`].
    pub store_ttl_seconds: u64,
}

/// Adapts `http_cache_semantics::CachePolicy` to this crate's request/entry
/// shapes, and layers RFC 5861 stale-window accounting on top.
#[derive(Debug, Clone)]
pub struct PolicyAdapter {
    clock: Clock,
}

impl Default for PolicyAdapter {
    fn default() -> Self {
        Self { clock: Clock::default() }
    }
}

impl PolicyAdapter {
    /// Builds an adapter using the given clock instead of the system clock.
    pub fn with_clock(clock: Clock) -> Self {
        Self { clock }
    }

    /// Derives a fresh policy for a response about to be stored.
    ///
    /// `ignore_request_cache_control` resolves Open Question (a) from §9:
    /// when `true` (the `FetchOptions` default), the request's own
    /// `cache-control`/`pragma` are stripped before the policy engine sees
    /// them, so a client's `no-cache` can't force this shared cache to
    /// revalidate on every lookup.
    pub fn derive(
        &self,
        request: &CacheableRequest<'_>,
        response_parts: &response::Parts,
        ignore_request_cache_control: bool,
    ) -> Result<Derivation> {
        let now = self.clock.now();
        let request_parts = policy_request_parts(request.parts, ignore_request_cache_control);
        let policy = CachePolicy::new_options(
            &request_parts,
            response_parts,
            now,
            CacheOptions::default().privacy(Privacy::Shared),
        );
        let storable = policy.is_storable();
        let ttl = policy.time_to_live(now);
        let max_age_seconds = (ttl + policy.age(now)).as_secs();
        let response_cache_control = header_value(&response_parts.headers, http::header::CACHE_CONTROL);
        let store_ttl = ttl + StaleWindows::parse(&response_cache_control).widest();
        let blob = PolicyBlob {
            request_cache_control: header_value(&request_parts.headers, http::header::CACHE_CONTROL),
            response_cache_control,
            policy,
            max_age_seconds,
        };
        Ok(Derivation {
            storable,
            ttl_seconds: ttl.as_secs(),
            store_ttl_seconds: store_ttl.as_secs(),
            blob: postcard::to_allocvec(&blob)?,
        })
    }

    /// Evaluates a stored policy blob against an incoming request.
    pub fn evaluate(
        &self,
        request: &CacheableRequest<'_>,
        policy_blob: &[u8],
        ignore_request_cache_control: bool,
    ) -> Result<Evaluation> {
        let blob: PolicyBlob = postcard::from_bytes(policy_blob)?;
        let now = self.clock.now();
        let request_parts = policy_request_parts(request.parts, ignore_request_cache_control);
        // RFC 5861 §3/§4: the response's directive takes precedence over the request's.
        let stale_windows = StaleWindows::parse(&blob.response_cache_control)
            .or(StaleWindows::parse(&blob.request_cache_control));

        match blob.policy.before_request(&request_parts, now) {
            BeforeRequest::Fresh(parts) => Ok(Evaluation {
                fresh: true,
                can_stale_while_revalidate: false,
                can_stale_if_error: false,
                ttl_seconds: blob.policy.time_to_live(now).as_secs(),
                response_headers: parts.headers,
            }),
            BeforeRequest::Stale { request: revalidation, .. } => {
                let overage = blob
                    .policy
                    .age(now)
                    .saturating_sub(Duration::from_secs(blob.max_age_seconds));
                Ok(Evaluation {
                    fresh: false,
                    can_stale_while_revalidate: stale_windows
                        .stale_while_revalidate
                        .map(|window| overage <= window)
                        .unwrap_or(false),
                    can_stale_if_error: stale_windows
                        .stale_if_error
                        .map(|window| overage <= window)
                        .unwrap_or(false),
                    ttl_seconds: 0,
                    response_headers: revalidation.headers,
                })
            }
        }
    }

    /// Builds the conditional-request headers (`If-None-Match` etc.) to send
    /// to the origin when revalidating a stale entry.
    pub fn revalidation_headers(
        &self,
        request: &CacheableRequest<'_>,
        policy_blob: &[u8],
        ignore_request_cache_control: bool,
    ) -> Result<HeaderMap> {
        let blob: PolicyBlob = postcard::from_bytes(policy_blob)?;
        let now = self.clock.now();
        let request_parts = policy_request_parts(request.parts, ignore_request_cache_control);
        match blob.policy.before_request(&request_parts, now) {
            BeforeRequest::Stale { request: revalidation, .. } => Ok(revalidation.headers),
            BeforeRequest::Fresh(parts) => Ok(parts.headers),
        }
    }

    /// Combines the prior policy with the origin's revalidation response.
    pub fn revalidate(
        &self,
        request: &CacheableRequest<'_>,
        prior_blob: &[u8],
        revalidation_response: &response::Parts,
        ignore_request_cache_control: bool,
    ) -> Result<Revalidation> {
        let prior: PolicyBlob = postcard::from_bytes(prior_blob)?;
        let now = self.clock.now();
        let request_parts = policy_request_parts(request.parts, ignore_request_cache_control);
        let new_cache_control = header_value(&revalidation_response.headers, http::header::CACHE_CONTROL);
        let (modified, policy, parts) =
            match prior.policy.after_response(&request_parts, revalidation_response, now) {
                AfterResponse::NotModified(policy, parts) => (false, policy, parts),
                AfterResponse::Modified(policy, parts) => (true, policy, parts),
            };
        let ttl_seconds = new_blob_policy_ttl(&policy, now);
        let max_age_seconds = ttl_seconds + policy.age(now).as_secs();
        let response_cache_control = if modified { new_cache_control } else { prior.response_cache_control };
        let store_ttl_seconds = ttl_seconds + StaleWindows::parse(&response_cache_control).widest().as_secs();
        let new_blob = PolicyBlob {
            request_cache_control: header_value(&request_parts.headers, http::header::CACHE_CONTROL),
            response_cache_control,
            policy,
            max_age_seconds,
        };
        Ok(Revalidation {
            modified,
            new_blob: postcard::to_allocvec(&new_blob)?,
            response_headers: parts.headers,
            ttl_seconds,
            store_ttl_seconds,
        })
    }
}

fn header_value(headers: &HeaderMap, name: http::HeaderName) -> String {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("").to_string()
}

/// Rebuilds `parts` with extensions dropped (mirrors `OwnedRequest::capture`
/// — `http::request::Parts` isn't `Clone` because `Extensions` isn't), and,
/// when `ignore_request_cache_control` is set, strips the request's own
/// `cache-control`/`pragma` so the policy engine evaluates freshness purely
/// from the stored response's directives.
fn policy_request_parts(parts: &http::request::Parts, ignore_request_cache_control: bool) -> http::request::Parts {
    let mut built = http::Request::builder()
        .method(parts.method.clone())
        .uri(parts.uri.clone())
        .version(parts.version)
        .body(())
        .expect("rebuilding request parts for policy evaluation")
        .into_parts()
        .0;
    built.headers = parts.headers.clone();
    if ignore_request_cache_control {
        built.headers.remove(http::header::CACHE_CONTROL);
        built.headers.remove(http::header::PRAGMA);
    }
    built
}

fn new_blob_policy_ttl(policy: &CachePolicy, now: SystemTime) -> u64 {
    policy.time_to_live(now).as_secs()
}

/// `stale-while-revalidate=N` / `stale-if-error=N` windows (RFC 5861),
/// which `http_cache_semantics::CachePolicy` doesn't model — it only
/// distinguishes fresh from stale.
#[derive(Default)]
struct StaleWindows {
    stale_while_revalidate: Option<Duration>,
    stale_if_error: Option<Duration>,
}

impl StaleWindows {
    fn parse(cache_control: &str) -> Self {
        let mut windows = Self::default();
        for directive in cache_control.split(',') {
            let directive = directive.trim();
            let Some((name, value)) = directive.split_once('=') else { continue };
            let name = name.trim();
            let Ok(seconds) = value.trim().trim_matches('"').parse::<u64>() else { continue };
            if name.eq_ignore_ascii_case("stale-while-revalidate") {
                windows.stale_while_revalidate = Some(Duration::from_secs(seconds));
            } else if name.eq_ignore_ascii_case("stale-if-error") {
                windows.stale_if_error = Some(Duration::from_secs(seconds));
            }
        }
        windows
    }

    /// Response-side directives take precedence; only fall back to
    /// request-side ones the response didn't set.
    fn or(self, fallback: Self) -> Self {
        Self {
            stale_while_revalidate: self.stale_while_revalidate.or(fallback.stale_while_revalidate),
            stale_if_error: self.stale_if_error.or(fallback.stale_if_error),
        }
    }

    /// The longer of the two stale windows, i.e. how much past the
    /// freshness `ttl` a stale entry might still legitimately be read.
    fn widest(&self) -> Duration {
        self.stale_while_revalidate.unwrap_or_default().max(self.stale_if_error.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_windows_parses_both_directives() {
        let windows = StaleWindows::parse("max-age=60, stale-while-revalidate=30, stale-if-error=300");
        assert_eq!(windows.stale_while_revalidate, Some(Duration::from_secs(30)));
        assert_eq!(windows.stale_if_error, Some(Duration::from_secs(300)));
    }

    #[test]
    fn stale_windows_response_side_wins() {
        let response = StaleWindows::parse("stale-while-revalidate=10");
        let request = StaleWindows::parse("stale-while-revalidate=999");
        let merged = response.or(request);
        assert_eq!(merged.stale_while_revalidate, Some(Duration::from_secs(10)));
    }

    #[test]
    fn stale_windows_falls_back_to_request_side() {
        let response = StaleWindows::parse("max-age=60");
        let request = StaleWindows::parse("stale-if-error=120");
        let merged = response.or(request);
        assert_eq!(merged.stale_if_error, Some(Duration::from_secs(120)));
    }
}
