//! The stored representation of a cached response (§3's `Entry`) and the
//! reconstructed response handed back to callers on a hit.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

/// What a `CacheStore` actually persists: the response's status, buffered
/// body, and the opaque policy snapshot `PolicyAdapter` needs to re-derive
/// freshness on a later read. Mirrors the teacher's `Store { response,
/// policy }` pairing (see `managers/moka.rs`), collapsed into one struct
/// since this crate doesn't keep headers and body/policy in separate types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// The stored response's status code, as `u16` for straightforward
    /// (de)serialization.
    pub status: u16,
    /// The stored response's reason phrase, when the origin sent a
    /// non-standard one worth preserving; `None` reconstructs from `status`.
    pub status_text: Option<String>,
    /// The fully buffered response body (§3: "Entry body is fully
    /// materialized before storage").
    pub body_bytes: Vec<u8>,
    /// `PolicyAdapter`'s opaque serialization of the cache policy. Callers
    /// must not introspect this; only `PolicyAdapter` knows its shape.
    pub policy_blob: Vec<u8>,
}

/// A response reconstructed from a stored [`Entry`], ready to hand back to
/// a caller or splice a status header into.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// The response status.
    pub status: StatusCode,
    /// The response headers, already filtered/updated by `PolicyAdapter`
    /// (hop-by-hop headers stripped, `Age` recomputed).
    pub headers: HeaderMap,
    /// The buffered response body.
    pub body: Bytes,
}
