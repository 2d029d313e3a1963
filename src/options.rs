//! Request-time configuration (§6.2) shared between [`crate::core::CacheCore`]
//! and [`crate::fetcher::Fetcher`].

use crate::key::CacheKeyRules;

/// The four cache modes recognized on a per-fetch basis (§4.5.1). There is
/// no ambient `cache` property to sniff here the way a browser `Request`
/// carries one — callers set this explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheRequestMode {
    /// Standard HTTP caching rules.
    #[default]
    Default,
    /// Never read from or write to the cache.
    NoStore,
    /// Serve a cached response without revalidation whenever one exists.
    ForceCache,
    /// Only ever serve from cache; fail rather than contact the origin.
    OnlyIfCached,
}

/// Per-fetch configuration (§6.2/§6.2.1).
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Which of the four cache modes this fetch should use.
    pub mode: CacheRequestMode,
    /// Directives to merge into the response's `cache-control` (§6.2).
    pub cache_control_override: Vec<String>,
    /// Header names to merge into the response's `Vary` (§6.3).
    pub vary_override: Vec<String>,
    /// Per-request override of the cache-key rules; `None` uses the cache's default.
    pub cache_key_rules: Option<CacheKeyRules>,
    /// When `true` (the default), the request's own `cache-control`/`pragma`
    /// are stripped before the policy engine sees them, so a client can't
    /// force this shared cache to revalidate on every lookup. Resolves Open
    /// Question (a) from §9.
    pub ignore_request_cache_control: bool,
    /// When `true`, the Vary indirection is skipped on read.
    pub ignore_vary: bool,
    /// When `true`, non-GET requests are still looked up/stored/deleted.
    pub ignore_method: bool,
    /// Derived internally from `mode`; never set directly by callers.
    pub(crate) force_cache: bool,
}

impl FetchOptions {
    /// Builds options for the given mode, deriving `force_cache` and
    /// defaulting everything else per §6.6.
    pub fn new(mode: CacheRequestMode) -> Self {
        Self {
            mode,
            cache_control_override: Vec::new(),
            vary_override: Vec::new(),
            cache_key_rules: None,
            ignore_request_cache_control: true,
            ignore_vary: false,
            ignore_method: false,
            force_cache: matches!(mode, CacheRequestMode::ForceCache | CacheRequestMode::OnlyIfCached),
        }
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::new(CacheRequestMode::Default)
    }
}
