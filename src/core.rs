//! The per-cache engine tying `KeyBuilder`, `VaryIndirection`, and
//! `PolicyAdapter` together over a `CacheStore` (§4.4).

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http::{response, HeaderMap, Method, StatusCode};
use log::{debug, trace, warn};

use crate::background::{logged, PendingRevalidation};
use crate::entry::{CachedResponse, Entry};
use crate::error::{CacheError, Result};
use crate::key::{default_rules, KeyBuilder, KeyBuilderConfig, PartDefiners};
use crate::options::FetchOptions;
use crate::policy::PolicyAdapter;
use crate::request::{CacheableRequest, OwnedRequest};
use crate::store::CacheStore;
use crate::vary::VaryIndirection;

/// The result of looking a request up against a `CacheCore` (§4.4.1).
#[derive(Debug)]
pub enum MatchOutcome {
    /// Nothing usable was stored for this request.
    Miss,
    /// A fresh entry was found and can be served without contacting the origin.
    Hit(CachedResponse),
    /// A stale-but-revalidatable entry was served; the caller should hand
    /// `revalidate` to its `BackgroundDispatcher`.
    Stale { response: CachedResponse, revalidate: PendingRevalidation },
    /// A synchronous revalidation could not be completed (the origin was
    /// unreachable or returned a 5xx) but `stale-if-error` (§8 S6) still
    /// covers the entry; the prior response is served as-is, with nothing
    /// left to hand to a `BackgroundDispatcher`.
    StaleIfError(CachedResponse),
    /// A synchronous revalidation confirmed the stored entry was still valid.
    Revalidated(CachedResponse),
    /// A synchronous revalidation found the stored entry outdated and
    /// replaced it with a fresh one from the origin.
    Expired(CachedResponse),
    /// A synchronous revalidation reached the origin but got a 5xx back
    /// outside the `stale-if-error` window; the origin's own error response
    /// is served directly instead of the (now unusable) prior entry.
    OriginError(CachedResponse),
}

/// What a synchronous revalidation produced.
struct RevalidationResult {
    response: CachedResponse,
    modified: bool,
}

/// What `revalidate_and_store` produced: either a normal 304/200 outcome, or
/// a 5xx from the origin that must never be cached.
enum RevalidationOutcome {
    Applied(RevalidationResult),
    OriginError(CachedResponse),
}

/// `stale-if-error` (RFC 5861 §4) masks these origin statuses in addition to
/// transport failures; anything else is a normal (possibly unwelcome) response.
fn is_origin_error_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Per-cache engine: one `CacheCore` exists per named cache in a
/// `CacheRegistry` (§4.6), all sharing the same backing `CacheStore`.
///
/// `CacheCore` has no `Transport` of its own (§4.4/§4.5 keep the origin call
/// a `Fetcher` concern); wherever it needs to revalidate, it's handed a
/// `fetch` callback that issues the conditional request and returns the
/// parsed response. This keeps `CacheCore` free of any HTTP client or
/// runtime dependency, matching §9's executor-agnostic design note.
#[derive(Clone)]
pub struct CacheCore<S> {
    store: S,
    policy: PolicyAdapter,
    cache_name: String,
    default_cache_name: String,
    part_definers: PartDefiners,
}

impl<S> std::fmt::Debug for CacheCore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCore")
            .field("cache_name", &self.cache_name)
            .field("default_cache_name", &self.default_cache_name)
            .finish_non_exhaustive()
    }
}

impl<S: CacheStore + Clone + Send + Sync + 'static> CacheCore<S> {
    /// Builds a cache bound to `store` under `cache_name`. `default_cache_name`
    /// is the name that never prefixes generated keys (§4.1 step 4); callers
    /// constructing through `CacheRegistry` pass the registry's notion of
    /// "default" through unchanged.
    pub fn new(store: S, cache_name: impl Into<String>, default_cache_name: impl Into<String>) -> Self {
        Self {
            store,
            policy: PolicyAdapter::default(),
            cache_name: cache_name.into(),
            default_cache_name: default_cache_name.into(),
            part_definers: PartDefiners::new(),
        }
    }

    /// Builds a cache with a custom policy adapter (e.g. an injected clock)
    /// and a table of user-defined cache-key part definers.
    pub fn with_policy_and_definers(
        store: S,
        cache_name: impl Into<String>,
        default_cache_name: impl Into<String>,
        policy: PolicyAdapter,
        part_definers: PartDefiners,
    ) -> Self {
        Self { store, policy, cache_name: cache_name.into(), default_cache_name: default_cache_name.into(), part_definers }
    }

    fn primary_key(&self, request: &CacheableRequest<'_>, options: &FetchOptions) -> Result<String> {
        let fallback_rules = default_rules();
        let rules = options.cache_key_rules.as_ref().unwrap_or(&fallback_rules);
        let config = KeyBuilderConfig {
            rules,
            cache_name: &self.cache_name,
            default_cache_name: &self.default_cache_name,
            part_definers: &self.part_definers,
        };
        KeyBuilder::build(request, &config)
    }

    /// Looks a request up, following §4.4's `match` contract. `fetch` issues
    /// a conditional revalidation request given the owned request snapshot
    /// and the headers `PolicyAdapter` computed (`If-None-Match` etc.) and
    /// returns the origin's response parts and buffered body.
    pub async fn match_request<F, Fut>(
        &self,
        request: &CacheableRequest<'_>,
        options: &FetchOptions,
        fetch: F,
    ) -> Result<MatchOutcome>
    where
        F: Fn(OwnedRequest, HeaderMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(response::Parts, Bytes)>> + Send + 'static,
    {
        if request.parts.method != Method::GET && !options.ignore_method {
            return Ok(MatchOutcome::Miss);
        }

        let primary_key = self.primary_key(request, options)?;
        let effective_key = if options.ignore_vary {
            primary_key.clone()
        } else {
            VaryIndirection::resolve_read(&self.store, request, &primary_key).await?
        };
        trace!("cache key resolved: {effective_key}");

        let Some(entry) = self.store.get_entry(&effective_key).await? else {
            debug!("MISS for {effective_key}");
            return Ok(MatchOutcome::Miss);
        };

        let cached_response = reconstruct_response(&entry);

        if options.force_cache {
            debug!("HIT (force-cache) for {effective_key}");
            return Ok(MatchOutcome::Hit(cached_response));
        }

        let evaluation = self.policy.evaluate(request, &entry.policy_blob, options.ignore_request_cache_control)?;
        if evaluation.fresh {
            debug!("HIT for {effective_key}");
            let mut response = cached_response;
            response.headers = evaluation.response_headers;
            return Ok(MatchOutcome::Hit(response));
        }

        if evaluation.can_stale_while_revalidate {
            debug!("STALE (stale-while-revalidate) for {effective_key}");
            let owned_request = OwnedRequest::capture(request);
            let store = self.store.clone();
            let policy = self.policy.clone();
            let background_key = effective_key.clone();
            let ignore_request_cache_control = options.ignore_request_cache_control;
            let revalidate = logged(effective_key.clone(), async move {
                let view = owned_request.as_cacheable();
                revalidate_and_store(&store, &policy, &view, &background_key, &entry, ignore_request_cache_control, fetch)
                    .await
                    .map(|_| ())
            });
            return Ok(MatchOutcome::Stale { response: cached_response, revalidate });
        }

        match revalidate_and_store(
            &self.store,
            &self.policy,
            request,
            &effective_key,
            &entry,
            options.ignore_request_cache_control,
            fetch,
        )
        .await
        {
            Ok(RevalidationOutcome::Applied(result)) if result.modified => {
                debug!("EXPIRED for {effective_key}");
                Ok(MatchOutcome::Expired(result.response))
            }
            Ok(RevalidationOutcome::Applied(result)) => {
                debug!("REVALIDATED for {effective_key}");
                Ok(MatchOutcome::Revalidated(result.response))
            }
            Ok(RevalidationOutcome::OriginError(origin_response)) if evaluation.can_stale_if_error => {
                debug!("STALE (stale-if-error, origin returned {}) for {effective_key}", origin_response.status);
                Ok(MatchOutcome::StaleIfError(cached_response))
            }
            Ok(RevalidationOutcome::OriginError(origin_response)) => {
                debug!("DYNAMIC (origin returned {}, past stale-if-error) for {effective_key}", origin_response.status);
                Ok(MatchOutcome::OriginError(origin_response))
            }
            Err(CacheError::Transport(_)) if evaluation.can_stale_if_error => {
                debug!("STALE (stale-if-error) for {effective_key}");
                Ok(MatchOutcome::StaleIfError(cached_response))
            }
            Err(err) => Err(err),
        }
    }

    /// Stores a response, following §4.4's `put` contract.
    pub async fn put(
        &self,
        request: &CacheableRequest<'_>,
        response_parts: &response::Parts,
        body: Bytes,
        options: &FetchOptions,
    ) -> Result<()> {
        if request.parts.method != Method::GET && !options.ignore_method {
            return Err(CacheError::NonGetStore(request.parts.method.clone()));
        }
        if response_parts.status == StatusCode::PARTIAL_CONTENT {
            return Err(CacheError::PartialContentStore);
        }
        let vary_header = response_parts
            .headers
            .get(http::header::VARY)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if vary_header.as_deref() == Some("*") {
            return Err(CacheError::VaryStarStore);
        }

        let derivation = self.policy.derive(request, response_parts, options.ignore_request_cache_control)?;
        if !derivation.storable || derivation.ttl_seconds == 0 {
            return Ok(());
        }

        let entry = Entry {
            status: response_parts.status.as_u16(),
            status_text: None,
            body_bytes: body.to_vec(),
            policy_blob: derivation.blob,
        };
        let primary_key = self.primary_key(request, options)?;
        let ttl = Duration::from_secs(derivation.store_ttl_seconds);
        match VaryIndirection::write_with_vary(&self.store, request, &primary_key, entry, ttl, vary_header.as_deref()).await {
            Ok(()) => {
                debug!("stored entry for {primary_key}");
                Ok(())
            }
            Err(err @ CacheError::VaryStarStore) => Err(err),
            Err(err) => {
                warn!("failed to store entry for {primary_key}: {err}");
                Ok(())
            }
        }
    }

    /// Deletes whatever is stored for a request, following §4.4's `delete` contract.
    pub async fn delete(&self, request: &CacheableRequest<'_>, options: &FetchOptions) -> Result<bool> {
        if request.parts.method != Method::GET && !options.ignore_method {
            return Ok(false);
        }
        let primary_key = self.primary_key(request, options)?;
        let removed = VaryIndirection::delete(&self.store, request, &primary_key).await?;
        debug!("delete {primary_key}: removed={removed}");
        Ok(removed)
    }
}

/// Issues a conditional request via `fetch`, combines it with the prior
/// policy, and persists the refreshed entry under `effective_key`. Shared by
/// `CacheCore::match_request`'s synchronous-revalidation path and the boxed
/// future it hands to the background dispatcher for the stale-while-revalidate path.
async fn revalidate_and_store<S, F, Fut>(
    store: &S,
    policy: &PolicyAdapter,
    request: &CacheableRequest<'_>,
    effective_key: &str,
    prior: &Entry,
    ignore_request_cache_control: bool,
    fetch: F,
) -> Result<RevalidationOutcome>
where
    S: CacheStore,
    F: Fn(OwnedRequest, HeaderMap) -> Fut,
    Fut: Future<Output = Result<(response::Parts, Bytes)>>,
{
    let revalidation_headers =
        policy.revalidation_headers(request, &prior.policy_blob, ignore_request_cache_control)?;
    let owned_request = OwnedRequest::capture(request);
    let (response_parts, new_body) = match fetch(owned_request, revalidation_headers).await {
        Ok(pair) => pair,
        Err(err) => return Err(err),
    };

    if is_origin_error_status(response_parts.status) {
        debug!("origin returned {} revalidating {effective_key}; leaving prior entry untouched", response_parts.status);
        return Ok(RevalidationOutcome::OriginError(CachedResponse {
            status: response_parts.status,
            headers: response_parts.headers.clone(),
            body: new_body,
        }));
    }

    let revalidation =
        policy.revalidate(request, &prior.policy_blob, &response_parts, ignore_request_cache_control)?;
    let body = if revalidation.modified { new_body } else { Bytes::from(prior.body_bytes.clone()) };
    let status = if revalidation.modified { response_parts.status.as_u16() } else { prior.status };

    let new_entry = Entry {
        status,
        status_text: None,
        body_bytes: body.to_vec(),
        policy_blob: revalidation.new_blob,
    };

    if revalidation.store_ttl_seconds > 0 {
        store
            .put_entry(effective_key, new_entry, Duration::from_secs(revalidation.store_ttl_seconds))
            .await?;
    }

    Ok(RevalidationOutcome::Applied(RevalidationResult {
        response: CachedResponse { status: StatusCode::from_u16(status).unwrap_or(StatusCode::OK), headers: revalidation.response_headers, body },
        modified: revalidation.modified,
    }))
}

fn reconstruct_response(entry: &Entry) -> CachedResponse {
    CachedResponse {
        status: StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK),
        headers: HeaderMap::new(),
        body: Bytes::from(entry.body_bytes.clone()),
    }
}
