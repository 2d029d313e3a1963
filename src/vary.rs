//! Secondary-key indirection for `Vary`-bearing responses (§4.2).
//!
//! A response without `Vary` is stored directly under its primary key. A
//! response with `Vary` instead stores a [`VaryDescriptor`] at `vary:<P>` and
//! the actual entry at `<P>:<fingerprint>`, where the fingerprint is derived
//! from the nominated request headers. This lets two requests that share a
//! primary key (same URL) but differ in a varying header resolve to distinct
//! stored entries.

use std::time::Duration;

use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::key::fingerprint6;
use crate::request::CacheableRequest;
use crate::store::CacheStore;

/// The set of request headers a stored response's `Vary` nominated.
///
/// `Everything` corresponds to a literal `Vary: *`, which RFC 7234 treats as
/// "never reusable" rather than as an indirection target; `put` rejects
/// `Vary: *` outright (§4.4 step 1), so this variant exists for
/// round-tripping a descriptor that predates a later partial-overwrite, not
/// as a value this crate ever writes itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum VaryDescriptor {
    /// `Vary: *` was observed; no request can ever match.
    Everything,
    /// The lowercased header names nominated by `Vary`.
    Names(Vec<String>),
}

impl VaryDescriptor {
    /// Builds a descriptor from a response's raw `Vary` header value.
    pub fn from_header_value(value: &str) -> Self {
        let mut names: Vec<String> = value
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if names.iter().any(|n| n == "*") {
            return VaryDescriptor::Everything;
        }
        names.sort();
        names.dedup();
        VaryDescriptor::Names(names)
    }

    /// Computes the fingerprint segment appended to the primary key, built
    /// from `name=<6-hex-prefix>` pairs over the nominated headers' values
    /// in the incoming request, sorted by name (mirrors the `header` cache
    /// key part's fingerprinting so the two stay visually consistent).
    fn fingerprint(&self, headers: &HeaderMap) -> String {
        let names: &[String] = match self {
            VaryDescriptor::Everything => return "everything".to_string(),
            VaryDescriptor::Names(names) => names,
        };
        let parts: Vec<String> = names
            .iter()
            .map(|name| {
                let value = headers.get(name.as_str()).and_then(|v| v.to_str().ok()).unwrap_or("");
                format!("{name}={}", fingerprint6(value.as_bytes()))
            })
            .collect();
        parts.join("&")
    }
}

/// Merges two `Vary` header value sets per §6.3: `*` on either side
/// collapses the result to `*`; otherwise the result is the union,
/// preserving the first-seen casing of each token and its relative order.
pub fn merge_vary(base: Option<&str>, addition: &[String]) -> Option<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut seen_lower: Vec<String> = Vec::new();

    let mut push = |token: &str| {
        let token = token.trim();
        if token.is_empty() {
            return;
        }
        let lower = token.to_ascii_lowercase();
        if !seen_lower.contains(&lower) {
            seen_lower.push(lower);
            tokens.push(token.to_string());
        }
    };

    if let Some(base) = base {
        for token in base.split(',') {
            push(token);
        }
    }
    for token in addition {
        push(token);
    }

    if tokens.iter().any(|t| t == "*") {
        return Some("*".to_string());
    }
    if tokens.is_empty() {
        return None;
    }
    Some(tokens.join(", "))
}

/// Orchestrates the primary-key/vary-descriptor/effective-key dance over a
/// [`CacheStore`]. Holds no state of its own: every method takes the store
/// it operates against, matching `KeyBuilder`'s stateless-namespace shape.
#[derive(Debug, Default, Clone, Copy)]
pub struct VaryIndirection;

impl VaryIndirection {
    /// Resolves the key a `match` read should actually use: reads `vary:<P>`
    /// to see whether the stored response varies; if absent, the effective
    /// key is `P` itself; if present, it's `P:<fingerprint>`.
    pub async fn resolve_read<S: CacheStore>(
        store: &S,
        request: &CacheableRequest<'_>,
        primary_key: &str,
    ) -> Result<String> {
        match store.get_vary(&vary_key(primary_key)).await? {
            None => Ok(primary_key.to_string()),
            Some(descriptor) => {
                let fingerprint = descriptor.fingerprint(&request.parts.headers);
                Ok(format!("{primary_key}:{fingerprint}"))
            }
        }
    }

    /// Writes an entry, accounting for the response's `Vary` header. When
    /// `vary_header` is `None` the entry is stored directly under the
    /// primary key; when present, the descriptor and entry are written
    /// alongside each other so a later `resolve_read` can find both.
    pub async fn write_with_vary<S: CacheStore>(
        store: &S,
        request: &CacheableRequest<'_>,
        primary_key: &str,
        entry: crate::entry::Entry,
        ttl: Duration,
        vary_header: Option<&str>,
    ) -> Result<()> {
        let Some(raw_vary) = vary_header else {
            return store.put_entry(primary_key, entry, ttl).await;
        };

        let descriptor = VaryDescriptor::from_header_value(raw_vary);
        if descriptor == VaryDescriptor::Everything {
            return Err(CacheError::VaryStarStore);
        }

        let fingerprint = descriptor.fingerprint(&request.parts.headers);
        store.put_vary(&vary_key(primary_key), descriptor, ttl).await?;
        store
            .put_entry(&format!("{primary_key}:{fingerprint}"), entry, ttl)
            .await
    }

    /// Deletes whatever is stored under `primary_key`: both the vary
    /// descriptor and its associated entry when one exists, otherwise just
    /// the primary key. Returns whether anything was actually removed.
    pub async fn delete<S: CacheStore>(
        store: &S,
        request: &CacheableRequest<'_>,
        primary_key: &str,
    ) -> Result<bool> {
        match store.get_vary(&vary_key(primary_key)).await? {
            Some(descriptor) => {
                let fingerprint = descriptor.fingerprint(&request.parts.headers);
                let vary_removed = store.delete(&vary_key(primary_key)).await?;
                let entry_removed =
                    store.delete(&format!("{primary_key}:{fingerprint}")).await?;
                Ok(vary_removed || entry_removed)
            }
            None => store.delete(primary_key).await,
        }
    }
}

fn vary_key(primary_key: &str) -> String {
    format!("vary:{primary_key}")
}
