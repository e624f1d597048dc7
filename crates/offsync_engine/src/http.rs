//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so the engine
//! does not depend on a particular HTTP library. Bodies travel as JSON.

use crate::error::{SyncError, SyncResult};
use crate::transport::{Method, Request, Response, Transport};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use url::Url;

/// A raw HTTP exchange result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// Status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. Return `Err`
/// only when no response was received (DNS, refused connection, timeout);
/// every status the server sends back is an `Ok`.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request with an optional JSON body.
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpReply, String>;
}

/// HTTP-based transport.
///
/// Resource addresses are resolved below `base_url`, keeping its path;
/// absolute `http` and `https` URLs are used as-is.
pub struct HttpTransport<C: HttpClient> {
    base_url: Url,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTarget`] if `base_url` is not an absolute
    /// hierarchical URL.
    pub fn new(base_url: &str, client: C) -> SyncResult<Self> {
        let invalid =
            |reason: String| SyncError::InvalidTarget(format!("{base_url}: {reason}"));
        let mut base = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(invalid("not a hierarchical URL".to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            base_url: base,
            client,
            last_error: RwLock::new(None),
        })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the last network error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn url_for(&self, target: &str) -> SyncResult<Url> {
        match Url::parse(target) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
            _ => self
                .base_url
                .join(&format!("./{}", target.trim_start_matches('/')))
                .map_err(|e| SyncError::InvalidTarget(format!("{target}: {e}"))),
        }
    }
}

fn decode_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[async_trait]
impl<C: HttpClient> Transport for HttpTransport<C> {
    async fn execute(&self, request: &Request) -> SyncResult<Response> {
        let body = request.body.as_ref().map(serde_json::to_vec).transpose()?;
        let url = self.url_for(&request.target)?;

        let reply = self
            .client
            .send(request.method, url.as_str(), body)
            .await
            .map_err(|e| {
                *self.last_error.write() = Some(e.clone());
                SyncError::transport_retryable(e)
            })?;

        *self.last_error.write() = None;
        Ok(Response::new(reply.status, decode_body(&reply.body)))
    }
}
