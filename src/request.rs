//! A borrowed view over an outbound request, used throughout key building and
//! policy evaluation so that those modules don't need to know how the caller
//! represents a request body.

use bytes::Bytes;
use http::request;
use url::Url;

/// The pieces of a request the cache engine needs: its `http` parts, the
/// fully-qualified URL (hosts/paths/query live on the URL, not on `http::Uri`
/// alone once a `Host` header is involved), and — only for methods that carry
/// one — the request body bytes, used by the `method` key part's body
/// fingerprint (§4.1 step 3).
#[derive(Debug, Clone, Copy)]
pub struct CacheableRequest<'a> {
    /// The request's method/uri/headers/version/extensions.
    pub parts: &'a request::Parts,
    /// The fully-qualified URL this request targets.
    pub url: &'a Url,
    /// The request body, when present and already buffered.
    pub body: Option<&'a [u8]>,
}

impl<'a> CacheableRequest<'a> {
    /// Builds a view with no body, the common case for GET/HEAD requests.
    pub fn new(parts: &'a request::Parts, url: &'a Url) -> Self {
        Self { parts, url, body: None }
    }

    /// Attaches a buffered body, used for POST/PATCH/PUT key fingerprinting.
    pub fn with_body(mut self, body: &'a [u8]) -> Self {
        self.body = Some(body);
        self
    }
}

/// An owned snapshot of a request, used where a borrowed [`CacheableRequest`]
/// can't outlive the call that produced it — specifically, the background
/// revalidation future handed to a `BackgroundDispatcher` (§5.1).
#[derive(Debug, Clone)]
pub struct OwnedRequest {
    parts: request::Parts,
    url: Url,
    body: Option<Bytes>,
}

impl OwnedRequest {
    /// Captures an owned copy of `request`. Extensions are not preserved —
    /// revalidation only needs method/uri/headers/version, and `Parts`'
    /// `Extensions` are `!Clone`.
    pub fn capture(request: &CacheableRequest<'_>) -> Self {
        let mut parts = http::Request::builder()
            .method(request.parts.method.clone())
            .uri(request.parts.uri.clone())
            .version(request.parts.version)
            .body(())
            .expect("rebuilding request parts from method/uri/version")
            .into_parts()
            .0;
        parts.headers = request.parts.headers.clone();
        Self { parts, url: request.url.clone(), body: request.body.map(Bytes::copy_from_slice) }
    }

    /// Borrows this snapshot as a [`CacheableRequest`].
    pub fn as_cacheable(&self) -> CacheableRequest<'_> {
        let mut view = CacheableRequest::new(&self.parts, &self.url);
        if let Some(body) = &self.body {
            view = view.with_body(body);
        }
        view
    }
}
