//! Deterministic cache-key derivation (§4.1).
//!
//! `KeyBuilder` projects a request through a [`CacheKeyRules`] map into a
//! single canonical string. The projection is a pure function of its inputs:
//! same request shape, same rules, same bytes out, every time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sha1::{Digest, Sha1};

use crate::error::{CacheError, Result};
use crate::request::CacheableRequest;

/// Header names a cache-key `header` part may never include (§6.4). These
/// are either high-cardinality content-negotiation headers (which would
/// fragment the cache into one entry per client) or headers the cache
/// already accounts for through other means (`cookie`, `host`) or must never
/// echo back into a key (`cache-control`, conditional-request headers).
pub const FORBIDDEN_KEY_HEADERS: &[&str] = &[
    "accept",
    "accept-charset",
    "accept-encoding",
    "accept-datetime",
    "accept-language",
    "referer",
    "user-agent",
    "connection",
    "content-length",
    "cache-control",
    "if-match",
    "if-modified-since",
    "if-none-match",
    "if-unmodified-since",
    "range",
    "upgrade",
    "cookie",
    "host",
    "vary",
    "x-cache-status",
];

/// The three fixed-order URL-derived key parts.
const URL_PART_ORDER: [&str; 3] = ["host", "pathname", "search"];

/// Per-part filtering behavior (§3's `CacheKeyRules` filter spec).
///
/// Modeled as a tagged sum rather than the distilled spec's
/// `absent|true|false|object` shape — see the REDESIGN FLAGS note on
/// "dynamic part-definer dispatch" for why a stringly-typed filter object
/// doesn't fit a statically typed target.
#[derive(Debug, Clone, Default)]
pub enum PartFilter {
    /// Include the part's full contents (the default when a part is enabled).
    #[default]
    Include,
    /// Disable this part entirely. Equivalent to leaving it out of
    /// [`CacheKeyRules`] — provided so per-request overrides can explicitly
    /// turn a base rule off rather than needing to reconstruct the whole map.
    Omit,
    /// Include a filtered subset. For multi-valued parts (`search`, `cookie`,
    /// `header`) `include`/`exclude` name the sub-keys to keep; for scalar
    /// parts (`host`, `pathname`) they have no effect. `check_presence`
    /// replaces every surviving value with an empty string, so the key
    /// records that the field was present without encoding its contents.
    Filtered {
        /// Allowlist of sub-key names. Mutually narrows with `exclude`.
        include: Option<Vec<String>>,
        /// Denylist of sub-key names.
        exclude: Option<Vec<String>>,
        /// Fingerprint presence only, discarding the value.
        check_presence: bool,
    },
}

impl PartFilter {
    fn is_omitted(&self) -> bool {
        matches!(self, PartFilter::Omit)
    }

    fn survives(&self, name: &str) -> bool {
        match self {
            PartFilter::Include | PartFilter::Omit => true,
            PartFilter::Filtered { include, exclude, .. } => {
                let included = include
                    .as_ref()
                    .map(|list| list.iter().any(|i| i.eq_ignore_ascii_case(name)))
                    .unwrap_or(true);
                let excluded = exclude
                    .as_ref()
                    .map(|list| list.iter().any(|e| e.eq_ignore_ascii_case(name)))
                    .unwrap_or(false);
                included && !excluded
            }
        }
    }

    fn check_presence(&self) -> bool {
        matches!(self, PartFilter::Filtered { check_presence: true, .. })
    }

    fn included_names(&self) -> Option<&[String]> {
        match self {
            PartFilter::Filtered { include: Some(list), .. } => Some(list),
            _ => None,
        }
    }
}

/// Mapping from cache-key part name to its [`PartFilter`] (§3's
/// `CacheKeyRules`). Built-in names are `host`, `pathname`, `search`,
/// `method`, `cookie`, `device`, `header`; any other name must have a
/// matching entry in the [`PartDefiners`] table passed to [`KeyBuilder`].
pub type CacheKeyRules = HashMap<String, PartFilter>;

/// The default rules from §6.6: host, method, pathname, and search are
/// included; nothing else participates in the key.
pub fn default_rules() -> CacheKeyRules {
    let mut rules = CacheKeyRules::new();
    rules.insert("host".to_string(), PartFilter::Include);
    rules.insert("method".to_string(), PartFilter::Include);
    rules.insert("pathname".to_string(), PartFilter::Include);
    rules.insert("search".to_string(), PartFilter::Include);
    rules
}

/// A user-supplied cache-key fragment part.
///
/// Implementations receive the request and their own filter spec and return
/// the string to splice into the key's fragment segment. Implementations
/// are responsible for their own determinism and for applying `filter` if
/// it's meaningful to them.
pub trait PartDefiner: Send + Sync {
    /// Computes this part's contribution to the cache key fragment.
    fn define(&self, request: &CacheableRequest<'_>, filter: &PartFilter) -> Result<String>;
}

impl<F> PartDefiner for F
where
    F: Fn(&CacheableRequest<'_>, &PartFilter) -> Result<String> + Send + Sync,
{
    fn define(&self, request: &CacheableRequest<'_>, filter: &PartFilter) -> Result<String> {
        self(request, filter)
    }
}

/// Table of user-defined part definers, keyed by part name.
pub type PartDefiners = HashMap<String, Arc<dyn PartDefiner>>;

/// Per-build configuration: which rules apply, which cache name (if any)
/// prefixes the key, and which user part-definers are registered.
pub struct KeyBuilderConfig<'a> {
    /// The active cache-key rules for this build.
    pub rules: &'a CacheKeyRules,
    /// The owning cache's name; the default cache's name does not prefix keys.
    pub cache_name: &'a str,
    /// The name under which the default (unprefixed) cache is registered.
    pub default_cache_name: &'a str,
    /// User-supplied definers for non-built-in part names.
    pub part_definers: &'a PartDefiners,
}

/// Stateless cache-key derivation (§4.1). `KeyBuilder` holds no data of its
/// own; it's a namespace for the `build` algorithm, mirroring the teacher's
/// preference for free functions wrapped in a small struct only where a
/// trait impl is useful (see `PartDefiner` above).
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyBuilder;

impl KeyBuilder {
    /// Projects `request` through `config` into a canonical cache-key string.
    pub fn build(request: &CacheableRequest<'_>, config: &KeyBuilderConfig<'_>) -> Result<String> {
        let mut url_segment = String::new();
        for part_name in URL_PART_ORDER {
            let Some(filter) = config.rules.get(part_name) else { continue };
            if filter.is_omitted() {
                continue;
            }
            url_segment.push_str(&match part_name {
                "host" => build_host(request, filter),
                "pathname" => build_pathname(request, filter),
                "search" => build_search(request, filter),
                _ => unreachable!(),
            });
        }

        let mut fragment_names: Vec<&String> = config
            .rules
            .keys()
            .filter(|name| !URL_PART_ORDER.contains(&name.as_str()))
            .filter(|name| !config.rules[*name].is_omitted())
            .collect();
        fragment_names.sort();

        let mut fragment_segments = Vec::with_capacity(fragment_names.len());
        for name in fragment_names {
            let filter = &config.rules[name];
            let segment = match name.as_str() {
                "cookie" => build_cookie(request, filter)?,
                "device" => build_device(request, filter),
                "header" => build_header(request, filter)?,
                "method" => build_method(request, filter),
                custom => match config.part_definers.get(custom) {
                    Some(definer) => definer.define(request, filter)?,
                    None => return Err(CacheError::InvalidPart(custom.to_string())),
                },
            };
            if !segment.is_empty() {
                fragment_segments.push(segment);
            }
        }

        let mut key = url_segment;
        if !fragment_segments.is_empty() {
            key.push('#');
            key.push_str(&fragment_segments.join(":"));
        }

        if config.cache_name != config.default_cache_name {
            key = format!("{}/{}", config.cache_name, key);
        }
        Ok(key)
    }
}

/// `hex(SHA-1(value))[..6]` — a 6-hex-char (3-byte) presence/value
/// fingerprint, used by the `cookie`, `header`, and `method` body parts.
/// This is a cardinality-reducing fingerprint, not a security primitive
/// (§4.1's determinism invariant is explicit about that).
pub(crate) fn fingerprint6(value: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(value);
    let digest = hasher.finalize();
    hex::encode(&digest[..3])
}

fn build_host(request: &CacheableRequest<'_>, filter: &PartFilter) -> String {
    if filter.check_presence() {
        return String::new();
    }
    request.url.host_str().unwrap_or("").to_string()
}

fn build_pathname(request: &CacheableRequest<'_>, filter: &PartFilter) -> String {
    if filter.check_presence() {
        return String::new();
    }
    request.url.path().to_string()
}

fn build_search(request: &CacheableRequest<'_>, filter: &PartFilter) -> String {
    let mut pairs: Vec<(String, String)> = request
        .url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .filter(|(name, _)| filter.survives(name))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    if pairs.is_empty() {
        return String::new();
    }
    let mut out = String::from("?");
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in &pairs {
        if filter.check_presence() {
            serializer.append_pair(name, "");
        } else {
            serializer.append_pair(name, value);
        }
    }
    out.push_str(&serializer.finish());
    out
}

fn parse_cookie_header(request: &CacheableRequest<'_>) -> Vec<(String, String)> {
    let mut cookies = Vec::new();
    for value in request.parts.headers.get_all(http::header::COOKIE) {
        let Ok(text) = value.to_str() else { continue };
        for pair in text.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            if let Some((name, value)) = pair.split_once('=') {
                cookies.push((name.trim().to_string(), value.trim().to_string()));
            }
        }
    }
    cookies
}

fn build_cookie(request: &CacheableRequest<'_>, filter: &PartFilter) -> Result<String> {
    let mut cookies: Vec<(String, String)> = parse_cookie_header(request)
        .into_iter()
        .filter(|(name, _)| filter.survives(name))
        .collect();
    cookies.sort_by(|a, b| a.0.cmp(&b.0));
    let parts: Vec<String> = cookies
        .into_iter()
        .map(|(name, value)| {
            let hashed = if filter.check_presence() {
                fingerprint6(b"")
            } else {
                fingerprint6(value.as_bytes())
            };
            format!("{name}={hashed}")
        })
        .collect();
    Ok(parts.join("&"))
}

/// A coarse device class derived from `User-Agent` and Client Hints. This is
/// a pure header heuristic, not an authoritative UA parser (§1 scopes the
/// device classifier out as a utility, not a correctness-critical module).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceClass::Mobile => "mobile",
            DeviceClass::Tablet => "tablet",
            DeviceClass::Desktop => "desktop",
        })
    }
}

/// Classifies a request's device type from `Sec-CH-UA-Mobile` when present,
/// falling back to a `User-Agent` substring heuristic.
pub fn classify_device(request: &CacheableRequest<'_>) -> DeviceClass {
    if let Some(mobile_hint) = request
        .parts
        .headers
        .get("sec-ch-ua-mobile")
        .and_then(|v| v.to_str().ok())
    {
        if mobile_hint.trim() == "?1" {
            return DeviceClass::Mobile;
        }
        if mobile_hint.trim() == "?0" {
            return DeviceClass::Desktop;
        }
    }

    let ua = request
        .parts
        .headers
        .get(http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let ua_lower = ua.to_ascii_lowercase();
    if ua_lower.contains("ipad")
        || (ua_lower.contains("tablet") && !ua_lower.contains("mobile"))
        || (ua_lower.contains("android") && !ua_lower.contains("mobile"))
    {
        DeviceClass::Tablet
    } else if ua_lower.contains("mobi") || ua_lower.contains("iphone") {
        DeviceClass::Mobile
    } else {
        DeviceClass::Desktop
    }
}

fn build_device(request: &CacheableRequest<'_>, _filter: &PartFilter) -> String {
    classify_device(request).to_string()
}

fn build_header(request: &CacheableRequest<'_>, filter: &PartFilter) -> Result<String> {
    if let Some(included) = filter.included_names() {
        for name in included {
            if FORBIDDEN_KEY_HEADERS
                .iter()
                .any(|forbidden| forbidden.eq_ignore_ascii_case(name))
            {
                return Err(CacheError::ForbiddenHeader(name.clone()));
            }
        }
    }

    let mut entries: Vec<(String, String)> = request
        .parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().to_ascii_lowercase();
            value.to_str().ok().map(|v| (name, v.to_string()))
        })
        .filter(|(name, _)| {
            !FORBIDDEN_KEY_HEADERS.iter().any(|f| f.eq_ignore_ascii_case(name))
        })
        .filter(|(name, _)| filter.survives(name))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let parts: Vec<String> = entries
        .into_iter()
        .map(|(name, value)| {
            let hashed = if filter.check_presence() {
                fingerprint6(b"")
            } else {
                fingerprint6(value.as_bytes())
            };
            format!("{name}={hashed}")
        })
        .collect();
    Ok(parts.join("&"))
}

fn build_method(request: &CacheableRequest<'_>, _filter: &PartFilter) -> String {
    let method = request.parts.method.as_str().to_string();
    let fingerprints_body = matches!(
        request.parts.method,
        http::Method::POST | http::Method::PATCH | http::Method::PUT
    );
    match (fingerprints_body, request.body) {
        (true, Some(body)) if !body.is_empty() => {
            format!("{method}={}", fingerprint6(body))
        }
        _ => method,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, Request};
    use url::Url;

    fn request_parts(method: Method, uri: &str, headers: &[(&str, &str)]) -> (http::request::Parts, Url) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        let url = Url::parse(uri).unwrap();
        (parts, url)
    }

    fn config<'a>(rules: &'a CacheKeyRules, definers: &'a PartDefiners) -> KeyBuilderConfig<'a> {
        KeyBuilderConfig {
            rules,
            cache_name: "default",
            default_cache_name: "default",
            part_definers: definers,
        }
    }

    #[test]
    fn determinism_same_request_same_key() {
        let (parts, url) = request_parts(
            Method::GET,
            "https://example.com/a?b=1&a=2",
            &[("accept-language", "en")],
        );
        let req = CacheableRequest::new(&parts, &url);
        let rules = default_rules();
        let definers = PartDefiners::new();
        let cfg = config(&rules, &definers);
        let k1 = KeyBuilder::build(&req, &cfg).unwrap();
        let k2 = KeyBuilder::build(&req, &cfg).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn search_params_are_sorted() {
        let (parts, url) = request_parts(Method::GET, "https://example.com/?b=2&a=1", &[]);
        let req = CacheableRequest::new(&parts, &url);
        let mut rules = CacheKeyRules::new();
        rules.insert("search".to_string(), PartFilter::Include);
        let definers = PartDefiners::new();
        let cfg = config(&rules, &definers);
        let key = KeyBuilder::build(&req, &cfg).unwrap();
        assert_eq!(key, "?a=1&b=2");
    }

    #[test]
    fn excluded_part_does_not_change_key() {
        let (parts1, url1) = request_parts(
            Method::GET,
            "https://example.com/a",
            &[("x-request-id", "1")],
        );
        let (parts2, url2) = request_parts(
            Method::GET,
            "https://example.com/a",
            &[("x-request-id", "2")],
        );
        let req1 = CacheableRequest::new(&parts1, &url1);
        let req2 = CacheableRequest::new(&parts2, &url2);
        let rules = default_rules();
        let definers = PartDefiners::new();
        let cfg = config(&rules, &definers);
        assert_eq!(
            KeyBuilder::build(&req1, &cfg).unwrap(),
            KeyBuilder::build(&req2, &cfg).unwrap()
        );
    }

    #[test]
    fn included_header_changes_key() {
        let (parts1, url1) =
            request_parts(Method::GET, "https://example.com/a", &[("x-client", "1")]);
        let (parts2, url2) =
            request_parts(Method::GET, "https://example.com/a", &[("x-client", "2")]);
        let req1 = CacheableRequest::new(&parts1, &url1);
        let req2 = CacheableRequest::new(&parts2, &url2);
        let mut rules = default_rules();
        rules.insert(
            "header".to_string(),
            PartFilter::Filtered { include: Some(vec!["x-client".into()]), exclude: None, check_presence: false },
        );
        let definers = PartDefiners::new();
        let cfg = config(&rules, &definers);
        assert_ne!(
            KeyBuilder::build(&req1, &cfg).unwrap(),
            KeyBuilder::build(&req2, &cfg).unwrap()
        );
    }

    #[test]
    fn denylisted_header_include_errors() {
        let (parts, url) = request_parts(Method::GET, "https://example.com/a", &[]);
        let req = CacheableRequest::new(&parts, &url);
        let mut rules = default_rules();
        rules.insert(
            "header".to_string(),
            PartFilter::Filtered { include: Some(vec!["accept-language".into()]), exclude: None, check_presence: false },
        );
        let definers = PartDefiners::new();
        let cfg = config(&rules, &definers);
        let err = KeyBuilder::build(&req, &cfg).unwrap_err();
        assert!(matches!(err, CacheError::ForbiddenHeader(_)));
    }

    #[test]
    fn unknown_part_without_definer_errors() {
        let (parts, url) = request_parts(Method::GET, "https://example.com/a", &[]);
        let req = CacheableRequest::new(&parts, &url);
        let mut rules = default_rules();
        rules.insert("region".to_string(), PartFilter::Include);
        let definers = PartDefiners::new();
        let cfg = config(&rules, &definers);
        let err = KeyBuilder::build(&req, &cfg).unwrap_err();
        assert!(matches!(err, CacheError::InvalidPart(name) if name == "region"));
    }

    #[test]
    fn custom_part_definer_is_used() {
        let (parts, url) = request_parts(Method::GET, "https://example.com/a", &[]);
        let req = CacheableRequest::new(&parts, &url);
        let mut rules = default_rules();
        rules.insert("region".to_string(), PartFilter::Include);
        let mut definers = PartDefiners::new();
        definers.insert(
            "region".to_string(),
            Arc::new(|_: &CacheableRequest<'_>, _: &PartFilter| Ok("us-east".to_string())),
        );
        let cfg = config(&rules, &definers);
        let key = KeyBuilder::build(&req, &cfg).unwrap();
        assert!(key.ends_with("#us-east"));
    }

    #[test]
    fn method_fingerprints_post_body() {
        let (parts, url) = request_parts(Method::POST, "https://example.com/a", &[]);
        let req_empty = CacheableRequest::new(&parts, &url);
        let req_body = CacheableRequest::new(&parts, &url).with_body(b"hello");
        let mut rules = CacheKeyRules::new();
        rules.insert("method".to_string(), PartFilter::Include);
        let definers = PartDefiners::new();
        let cfg = config(&rules, &definers);
        let k_empty = KeyBuilder::build(&req_empty, &cfg).unwrap();
        let k_body = KeyBuilder::build(&req_body, &cfg).unwrap();
        assert_ne!(k_empty, k_body);
        assert!(k_body.starts_with("#POST="));
    }

    #[test]
    fn non_default_cache_name_prefixes_key() {
        let (parts, url) = request_parts(Method::GET, "https://example.com/a", &[]);
        let req = CacheableRequest::new(&parts, &url);
        let rules = default_rules();
        let definers = PartDefiners::new();
        let cfg = KeyBuilderConfig {
            rules: &rules,
            cache_name: "images",
            default_cache_name: "default",
            part_definers: &definers,
        };
        let key = KeyBuilder::build(&req, &cfg).unwrap();
        assert!(key.starts_with("images/"));
    }
}
