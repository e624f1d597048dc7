//! Transport layer abstraction for outbound operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Status of the synthesized "no cached data while offline" response.
pub const STATUS_OFFLINE_UNAVAILABLE: u16 = 503;

/// Status of the synthesized "write accepted for later delivery" response.
pub const STATUS_ACCEPTED_PENDING: u16 = 202;

/// Error marker carried by the offline-unavailable sentinel body.
pub const OFFLINE_UNAVAILABLE: &str = "offline-unavailable";

/// HTTP method of a logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Replace.
    Put,
    /// Partial update.
    Patch,
    /// Delete.
    Delete,
}

impl Method {
    /// Returns the canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Returns true for every method except GET.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(SyncError::InvalidMethod(s.to_string())),
        }
    }
}

/// The mutating subset of [`Method`]; the only methods the write queue holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WriteMethod {
    /// Create.
    Post,
    /// Replace.
    Put,
    /// Partial update.
    Patch,
    /// Delete.
    Delete,
}

impl From<WriteMethod> for Method {
    fn from(method: WriteMethod) -> Self {
        match method {
            WriteMethod::Post => Method::Post,
            WriteMethod::Put => Method::Put,
            WriteMethod::Patch => Method::Patch,
            WriteMethod::Delete => Method::Delete,
        }
    }
}

impl TryFrom<Method> for WriteMethod {
    type Error = SyncError;

    fn try_from(method: Method) -> Result<Self, Self::Error> {
        match method {
            Method::Get => Err(SyncError::NotMutating(method.to_string())),
            Method::Post => Ok(WriteMethod::Post),
            Method::Put => Ok(WriteMethod::Put),
            Method::Patch => Ok(WriteMethod::Patch),
            Method::Delete => Ok(WriteMethod::Delete),
        }
    }
}

impl fmt::Display for WriteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Method::from(*self).fmt(f)
    }
}

/// An outbound request as handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Method.
    pub method: Method,
    /// Logical resource address, as given by the caller.
    pub target: String,
    /// Optional JSON body.
    pub body: Option<Value>,
}

impl Request {
    /// Creates a new request.
    pub fn new(method: Method, target: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            target: target.into(),
            body,
        }
    }
}

/// A structurally valid response, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Decoded JSON body (`Value::Null` when empty).
    pub body: Value,
}

impl Response {
    /// Creates a response.
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Creates a 200 response.
    pub fn ok_with(body: Value) -> Self {
        Self::new(200, body)
    }

    /// The sentinel for an offline GET with no cached data.
    pub fn offline_unavailable() -> Self {
        Self::new(
            STATUS_OFFLINE_UNAVAILABLE,
            json!({ "error": OFFLINE_UNAVAILABLE }),
        )
    }

    /// The sentinel for a write admitted to the queue.
    pub fn accepted_pending(id: impl fmt::Display) -> Self {
        Self::new(
            STATUS_ACCEPTED_PENDING,
            json!({ "queued": true, "id": id.to_string() }),
        )
    }

    /// Returns true for 2xx statuses.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the JSON body.
    pub fn json(&self) -> &Value {
        &self.body
    }

    /// Returns true if this is the offline-unavailable sentinel.
    pub fn is_offline_sentinel(&self) -> bool {
        self.status == STATUS_OFFLINE_UNAVAILABLE
            && self.body.get("error").and_then(Value::as_str) == Some(OFFLINE_UNAVAILABLE)
    }
}

/// A transport executes requests against the remote system.
///
/// Implementations report network-level failures (DNS, refused connection,
/// timeout) as [`SyncError::Transport`] or [`SyncError::Timeout`]. Any
/// response the server actually produced, including 4xx/5xx, is returned as
/// `Ok(Response)`. Timeouts are the transport's responsibility.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Executes a single request.
    async fn execute(&self, request: &Request) -> SyncResult<Response>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn execute(&self, request: &Request) -> SyncResult<Response> {
        (**self).execute(request).await
    }
}

/// A scripted reply for [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Return this response.
    Respond(Response),
    /// Fail with a retryable transport error carrying this message.
    Fail(String),
    /// Fail with a non-retryable transport error carrying this message.
    Fatal(String),
}

impl MockReply {
    /// Shorthand for a response with the given status and body.
    pub fn status(status: u16, body: Value) -> Self {
        MockReply::Respond(Response::new(status, body))
    }

    /// Shorthand for a network failure.
    pub fn fail(message: impl Into<String>) -> Self {
        MockReply::Fail(message.into())
    }

    /// Shorthand for a failure that retrying cannot fix.
    pub fn fatal(message: impl Into<String>) -> Self {
        MockReply::Fatal(message.into())
    }
}

/// A scriptable transport for testing.
///
/// Replies are looked up by `(method, target)`: one-shot replies queued
/// with [`push_reply`](Self::push_reply) are consumed first, then the
/// sticky reply from [`set_reply`](Self::set_reply), then the fallback
/// (404 by default). Every executed request is recorded.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    once: Mutex<HashMap<(Method, String), VecDeque<MockReply>>>,
    sticky: Mutex<HashMap<(Method, String), MockReply>>,
    fallback: Mutex<MockReply>,
    calls: Mutex<Vec<Request>>,
    delay: Mutex<Option<Duration>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            once: Mutex::new(HashMap::new()),
            sticky: Mutex::new(HashMap::new()),
            fallback: Mutex::new(MockReply::status(404, json!({ "error": "not found" }))),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    /// Queues a one-shot reply for `(method, target)`.
    pub fn push_reply(&self, method: Method, target: impl Into<String>, reply: MockReply) {
        self.once
            .lock()
            .entry((method, target.into()))
            .or_default()
            .push_back(reply);
    }

    /// Sets the sticky reply for `(method, target)`.
    pub fn set_reply(&self, method: Method, target: impl Into<String>, reply: MockReply) {
        self.sticky.lock().insert((method, target.into()), reply);
    }

    /// Sets the reply used when nothing else matches.
    pub fn set_fallback(&self, reply: MockReply) {
        *self.fallback.lock() = reply;
    }

    /// Makes every call fail with a transport error while disconnected.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Delays every call by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Returns every request executed so far, in order.
    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().clone()
    }

    /// Returns the number of executed requests.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns `(method, target)` of every executed request, in order.
    pub fn call_log(&self) -> Vec<(Method, String)> {
        self.calls
            .lock()
            .iter()
            .map(|r| (r.method, r.target.clone()))
            .collect()
    }

    fn next_reply(&self, method: Method, target: &str) -> MockReply {
        let key = (method, target.to_string());
        if let Some(reply) = self.once.lock().get_mut(&key).and_then(VecDeque::pop_front) {
            return reply;
        }
        if let Some(reply) = self.sticky.lock().get(&key) {
            return reply.clone();
        }
        self.fallback.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: &Request) -> SyncResult<Response> {
        self.calls.lock().push(request.clone());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("connection refused"));
        }

        match self.next_reply(request.method, &request.target) {
            MockReply::Respond(response) => Ok(response),
            MockReply::Fail(message) => Err(SyncError::transport_retryable(message)),
            MockReply::Fatal(message) => Err(SyncError::transport_fatal(message)),
        }
    }
}
