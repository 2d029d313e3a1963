//! Shared scenario-test harness: a scripted [`Transport`] stub and small
//! request/response builders, matching §8.1's test harness description.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{Request, Response};

use shared_http_cache::{CacheError, Transport};

enum Scripted {
    Response(Response<Bytes>),
    Failure,
}

/// A [`Transport`] that replays a scripted queue of responses (or
/// simulated transport failures) and records every request it was handed,
/// standing in for a real origin HTTP client in scenario tests (§8.1).
#[derive(Clone, Default)]
pub struct StubTransport {
    responses: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<Request<Bytes>>>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response to be returned by the next `send` call.
    pub fn push(&self, response: Response<Bytes>) {
        self.responses.lock().unwrap().push_back(Scripted::Response(response));
    }

    /// Queues a genuine transport failure (connection refused, timeout,
    /// etc.) for the next `send` call — distinct from an HTTP error
    /// response, which is a successful `send` carrying a non-2xx status.
    pub fn push_failure(&self) {
        self.responses.lock().unwrap().push_back(Scripted::Failure);
    }

    /// Returns how many requests this transport has seen so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Returns a clone of the most recently sent request, if any.
    pub fn last_request(&self) -> Option<Request<Bytes>> {
        let guard = self.requests.lock().unwrap();
        guard.last().map(clone_request)
    }
}

#[async_trait::async_trait]
impl Transport for StubTransport {
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, CacheError> {
        self.requests.lock().unwrap().push(clone_request(&request));
        match self.responses.lock().unwrap().pop_front() {
            Some(Scripted::Response(response)) => Ok(response),
            Some(Scripted::Failure) => Err(CacheError::Transport(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "StubTransport: simulated origin failure",
            )))),
            None => Err(CacheError::Transport(Box::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "StubTransport: no scripted response queued",
            )))),
        }
    }
}

fn clone_request(request: &Request<Bytes>) -> Request<Bytes> {
    let mut builder = Request::builder().method(request.method().clone()).uri(request.uri().clone());
    for (name, value) in request.headers() {
        builder = builder.header(name, value);
    }
    builder.body(request.body().clone()).unwrap()
}

/// Builds a simple `GET <url>` request with an empty body.
pub fn get(url: &str) -> Request<Bytes> {
    Request::builder().method("GET").uri(url).body(Bytes::new()).unwrap()
}

/// Builds a `GET <url>` request carrying the given headers.
pub fn get_with_headers(url: &str, headers: &[(&str, &str)]) -> Request<Bytes> {
    let mut builder = Request::builder().method("GET").uri(url);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Bytes::new()).unwrap()
}

/// Builds a `<method> <url>` request carrying a body.
pub fn request_with_body(method: &str, url: &str, body: &'static [u8]) -> Request<Bytes> {
    Request::builder().method(method).uri(url).body(Bytes::from_static(body)).unwrap()
}

/// Builds a 200 response with the given `cache-control` value and body.
pub fn cacheable_response(cache_control: &str, body: &'static [u8]) -> Response<Bytes> {
    Response::builder()
        .status(200)
        .header("cache-control", cache_control)
        .body(Bytes::from_static(body))
        .unwrap()
}

/// Builds a response with an arbitrary status and no `cache-control`.
pub fn response_with_status(status: u16, body: &'static [u8]) -> Response<Bytes> {
    Response::builder().status(status).body(Bytes::from_static(body)).unwrap()
}

/// Reads the `x-cache-status` header off a response as a `&str`.
pub fn cache_status(response: &Response<Bytes>) -> &str {
    response.headers().get("x-cache-status").and_then(|v| v.to_str().ok()).unwrap_or("")
}
