//! Scriptable in-process backend.
//!
//! Routes are keyed by method and full URL (query string included). Each
//! route has a queue of one-shot replies, consumed first, and a fallback
//! reply used once the queue is empty. Unknown routes answer 404.

use super::{Method, Request, Response, Transport};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// How a route answers one request.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// 200 with a JSON body.
    Json(Value),
    /// Given status, empty body.
    Status(u16),
    /// Given status and raw body bytes.
    Raw(u16, Vec<u8>),
    /// The request never reaches the backend.
    TransportError(String),
    /// Never settles; only cancellation ends it.
    Hang,
}

impl Reply {
    pub fn json(body: Value) -> Self {
        Reply::Json(body)
    }

    pub fn status(status: u16) -> Self {
        Reply::Status(status)
    }

    pub fn raw(status: u16, body: Vec<u8>) -> Self {
        Reply::Raw(status, body)
    }

    pub fn transport_error(message: impl Into<String>) -> Self {
        Reply::TransportError(message.into())
    }

    async fn resolve(self, latency: Duration) -> Result<Response> {
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match self {
            Reply::Json(body) => Ok(Response::new(200, serde_json::to_vec(&body)?)),
            Reply::Status(status) => Ok(Response::new(status, Vec::new())),
            Reply::Raw(status, body) => Ok(Response::new(status, body)),
            Reply::TransportError(message) => Err(StoreError::Transport(message)),
            Reply::Hang => futures::future::pending().await,
        }
    }
}

struct Route {
    scripted: VecDeque<Reply>,
    fallback: Reply,
}

impl Route {
    fn not_found() -> Self {
        Self {
            scripted: VecDeque::new(),
            fallback: Reply::Status(404),
        }
    }
}

/// In-memory [`Transport`] with configurable latency and failure scripts.
pub struct MemoryTransport {
    routes: Mutex<HashMap<(Method, String), Route>>,
    latency: Mutex<Duration>,
    requests: Mutex<Vec<Request>>,
    completed: AtomicUsize,
    aborted: AtomicUsize,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            latency: Mutex::new(Duration::ZERO),
            requests: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
            aborted: AtomicUsize::new(0),
        }
    }

    /// Delay every reply by `latency`.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Set the reply used once a route's script is exhausted.
    pub fn route(&self, method: Method, url: impl Into<String>, reply: Reply) {
        let mut routes = self.routes.lock();
        let route = routes.entry((method, url.into())).or_insert_with(Route::not_found);
        route.fallback = reply;
    }

    /// Queue one-shot replies, answered in order before the fallback.
    pub fn script(&self, method: Method, url: impl Into<String>, replies: impl IntoIterator<Item = Reply>) {
        let mut routes = self.routes.lock();
        let route = routes.entry((method, url.into())).or_insert_with(Route::not_found);
        route.scripted.extend(replies);
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Number of requests received for one route.
    pub fn request_count(&self, method: Method, url: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.method == method && request.url == url)
            .count()
    }

    /// Requests that ran to a reply (success or failure).
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Requests abandoned before their reply was produced.
    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Requests received but neither completed nor aborted yet.
    pub fn in_flight(&self) -> usize {
        self.requests
            .lock()
            .len()
            .saturating_sub(self.completed() + self.aborted())
    }

    fn next_reply(&self, request: &Request) -> Reply {
        let mut routes = self.routes.lock();
        match routes.get_mut(&(request.method, request.url.clone())) {
            Some(route) => route
                .scripted
                .pop_front()
                .unwrap_or_else(|| route.fallback.clone()),
            None => Reply::Status(404),
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts the request as aborted unless it settles.
struct InFlight<'a> {
    aborted: &'a AtomicUsize,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.aborted.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, request: Request, cancel: CancellationToken) -> Result<Response> {
        trace!(method = %request.method, url = %request.url, "memory transport request");
        let reply = self.next_reply(&request);
        let latency = *self.latency.lock();
        self.requests.lock().push(request);

        let mut guard = InFlight {
            aborted: &self.aborted,
            settled: false,
        };
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Transport("request aborted".into())),
            outcome = reply.resolve(latency) => outcome,
        };
        guard.settled = true;
        self.completed.fetch_add(1, Ordering::SeqCst);
        outcome
    }
}
