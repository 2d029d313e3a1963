#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]
#![allow(clippy::doc_lazy_continuation)]
//! A shared (proxy-class) HTTP cache engine conformant with RFC 7234 (HTTP
//! caching), RFC 5861 (`stale-while-revalidate`, `stale-if-error`), and the
//! cacheability rules of RFC 7231.
//!
//! This crate implements the caching engine itself — the cache-key
//! composition algorithm, per-entry freshness/stale-window policy
//! evaluation (delegated to
//! [`http-cache-semantics`](https://github.com/kornelski/rusty-http-cache-semantics)),
//! `Vary`-aware secondary key indirection, and the orchestration that turns
//! a lookup into a HIT, STALE-with-background-revalidation, synchronous
//! revalidation, or an origin MISS. It is parameterized over an abstract
//! key-value backend ([`CacheStore`]) and an abstract HTTP transport
//! ([`Transport`]); this crate ships no production backend or client.
//!
//! ## Basic usage
//!
//! ```rust
//! use shared_http_cache::{CacheRegistry, Fetcher, FetchOptions, InlineDispatcher, MemoryStore};
//!
//! # async fn run(transport: impl shared_http_cache::Transport + Clone + Send + Sync + 'static) {
//! let registry = CacheRegistry::new(MemoryStore::new());
//! let cache = registry.open_default().await;
//! let fetcher = Fetcher::new((*cache).clone(), transport, InlineDispatcher);
//!
//! let request = http::Request::get("https://example.com/").body(bytes::Bytes::new()).unwrap();
//! let response = fetcher.fetch(request, &FetchOptions::default()).await.unwrap();
//! assert_eq!(response.headers().get("x-cache-status").unwrap(), "MISS");
//! # }
//! ```
//!
//! ## Cache modes
//!
//! [`CacheRequestMode`] mirrors the Fetch API's `cache` modes: `Default`
//! follows the stored policy, `NoStore` bypasses the cache entirely,
//! `ForceCache` serves a stored entry without revalidating it regardless of
//! freshness, and `OnlyIfCached` fails rather than contact the origin on a
//! miss.
//!
//! ## Custom cache keys
//!
//! [`CacheKeyRules`]/[`PartFilter`] let a caller narrow or widen which
//! request parts participate in the cache key, including registering
//! [`PartDefiner`]s for application-specific parts beyond the built-ins
//! (`host`, `pathname`, `search`, `method`, `cookie`, `device`, `header`).

mod background;
mod core;
mod entry;
mod error;
mod fetcher;
mod key;
mod options;
mod policy;
mod registry;
mod request;
mod store;
mod vary;

pub use background::{BackgroundDispatcher, InlineDispatcher, PendingRevalidation};
pub use core::{CacheCore, MatchOutcome};
pub use entry::{CachedResponse, Entry};
pub use error::{CacheError, Result};
pub use fetcher::{CacheStatus, Fetcher, Transport, X_CACHE_STATUS};
pub use key::{
    classify_device, default_rules, CacheKeyRules, DeviceClass, KeyBuilder, KeyBuilderConfig, PartDefiner,
    PartDefiners, PartFilter, FORBIDDEN_KEY_HEADERS,
};
pub use options::{CacheRequestMode, FetchOptions};
pub use policy::{Clock, PolicyAdapter};
pub use registry::{CacheRegistry, DEFAULT_CACHE_NAME};
pub use request::{CacheableRequest, OwnedRequest};
pub use store::{CacheStore, MemoryStore};
pub use vary::{merge_vary, VaryDescriptor, VaryIndirection};
