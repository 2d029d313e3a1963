use miette::Diagnostic;
use thiserror::Error;

/// A `Result` typedef to use with the [`CacheError`] type.
pub type Result<T> = std::result::Result<T, CacheError>;

/// The single error type surfaced by this crate.
///
/// Most internal failures (a KV `get` failing, an entry missing) are degraded
/// in place to a miss or a `DYNAMIC` status rather than raised here — see the
/// error handling design notes in `DESIGN.md`. `CacheError` carries only the
/// failures that must propagate to the caller: configuration mistakes,
/// `put`/`delete` validation failures, and backend failures that aren't safe
/// to swallow.
#[derive(Error, Diagnostic, Debug)]
pub enum CacheError {
    /// A cache-key rule named a part with no built-in or user-supplied definer.
    #[error("no definer registered for cache key part `{0}`")]
    #[diagnostic(code(shared_cache::invalid_part))]
    InvalidPart(String),

    /// A cache-key rule tried to include a header from the denylist in §6.4.
    #[error("header `{0}` cannot be included in a cache key")]
    #[diagnostic(code(shared_cache::forbidden_header))]
    ForbiddenHeader(String),

    /// `CacheRegistry`/`Fetcher` was asked to operate with no backend configured.
    #[error("no cache store backend configured")]
    #[diagnostic(code(shared_cache::missing_backend))]
    MissingBackend,

    /// `Fetcher::fetch` was called with `CacheRequestMode::OnlyIfCached` and
    /// the cache had nothing usable stored for the request.
    #[error("no cache entry available for an only-if-cached request")]
    #[diagnostic(code(shared_cache::only_if_cached_miss))]
    OnlyIfCachedMiss,

    /// `put` was called with a non-GET request and `ignore_method` was not set.
    #[error("refusing to store a response to a {0} request")]
    #[diagnostic(code(shared_cache::non_get_store))]
    NonGetStore(http::Method),

    /// `put` was called with a 206 Partial Content response.
    #[error("refusing to store a 206 Partial Content response")]
    #[diagnostic(code(shared_cache::partial_content_store))]
    PartialContentStore,

    /// `put` was called with a response whose `Vary` header is exactly `*`.
    #[error("refusing to store a response with `Vary: *`")]
    #[diagnostic(code(shared_cache::vary_star_store))]
    VaryStarStore,

    /// `put` was called with a body that was already buffered/consumed elsewhere.
    #[error("response body was already consumed")]
    #[diagnostic(code(shared_cache::body_already_consumed))]
    BodyAlreadyConsumed,

    /// A KV backend operation failed in a way that must propagate (e.g. `delete`).
    #[error("cache store backend error: {0}")]
    #[diagnostic(code(shared_cache::backend))]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// An HTTP transport call to the origin failed on the initial (non-revalidation) fetch.
    #[error("origin request failed: {0}")]
    #[diagnostic(code(shared_cache::transport))]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// There was an error parsing or constructing an HTTP header value.
    #[error(transparent)]
    #[diagnostic(code(shared_cache::invalid_header_value))]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// There was an error parsing an HTTP header name.
    #[error(transparent)]
    #[diagnostic(code(shared_cache::invalid_header_name))]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// There was an error converting a header value to a `str`.
    #[error(transparent)]
    #[diagnostic(code(shared_cache::header_to_str))]
    HeaderToStr(#[from] http::header::ToStrError),

    /// There was an error building an `http::Response`/`http::Request`.
    #[error(transparent)]
    #[diagnostic(code(shared_cache::http))]
    Http(#[from] http::Error),

    /// There was an error parsing a request URL.
    #[error(transparent)]
    #[diagnostic(code(shared_cache::invalid_url))]
    InvalidUrl(#[from] url::ParseError),

    /// The entry or vary descriptor failed to (de)serialize for storage.
    #[error("failed to serialize cache entry: {0}")]
    #[diagnostic(code(shared_cache::serialization))]
    Serialization(#[from] postcard::Error),
}
