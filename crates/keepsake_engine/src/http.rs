//! HTTP implementations of the remote ports.
//!
//! The actual HTTP client is abstracted via a trait so any library
//! (reqwest, hyper, ureq, ...) can be plugged in.

use crate::clock::{Clock, SystemClock};
use crate::error::{SyncError, SyncResult};
use crate::queue::QueuedOperation;
use crate::remote::{Manifest, RemoteBackend};
use crate::transport::OperationTransport;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Returns the method name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unknown HTTP method {other:?}")),
        }
    }
}

/// An outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpRequest {
    fn new(method: HttpMethod, url: String) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Returns the first header with the given name (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A received HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response without headers.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the first header with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. An `Err`
/// means no response was received.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// A long-lived bearer token.
///
/// Zeroized on drop. `Debug` and `Display` only show the last four
/// characters.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wraps a token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token. Only for building the Authorization header.
    pub fn expose(&self) -> &str {
        &self.0
    }

    fn masked(&self) -> String {
        let tail: String = {
            let chars: Vec<char> = self.0.chars().collect();
            if chars.len() > 4 {
                chars[chars.len() - 4..].iter().collect()
            } else {
                String::new()
            }
        };
        format!("****{tail}")
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthToken({})", self.masked())
    }
}

impl std::fmt::Display for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Maps an HTTP status to the engine's error taxonomy.
pub(crate) fn check_status(
    response: &HttpResponse,
    context: &str,
    body_len: usize,
    now: u64,
) -> SyncResult<()> {
    match response.status {
        200..=299 => Ok(()),
        401 | 403 => Err(SyncError::Unauthorized),
        404 => Err(SyncError::NotFound(context.to_string())),
        413 => Err(SyncError::PayloadTooLarge {
            size: body_len as u64,
        }),
        429 => {
            let wait_secs = response
                .header("Retry-After")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(60);
            Err(SyncError::RateLimited {
                retry_at: now.saturating_add(wait_secs.saturating_mul(1000)),
            })
        }
        500..=599 => Err(SyncError::network_retryable(format!(
            "{context}: server error {}",
            response.status
        ))),
        status => Err(SyncError::network_fatal(format!(
            "{context}: unexpected status {status}"
        ))),
    }
}

/// State shared by the HTTP ports.
struct HttpConnection<C: HttpClient> {
    base_url: String,
    client: C,
    token: RwLock<Option<AuthToken>>,
    clock: Arc<dyn Clock>,
}

impl<C: HttpClient> HttpConnection<C> {
    fn new(base_url: String, client: C) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            token: RwLock::new(None),
            clock: Arc::new(SystemClock),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: HttpRequest, context: &str) -> SyncResult<HttpResponse> {
        let token = self.token.read().clone().ok_or(SyncError::NoCredentials)?;
        let request = request.header("Authorization", format!("Bearer {}", token.expose()));
        let body_len = request.body.len();

        debug!(method = %request.method, url = %request.url, body_len, "http request");
        let response = self
            .client
            .send(request)
            .await
            .map_err(SyncError::network_retryable)?;
        check_status(&response, context, body_len, self.clock.now_millis())?;
        Ok(response)
    }
}

/// Remote backup storage over HTTP.
///
/// Layout below the base URL: `manifest` and `chunks/<path>`.
pub struct HttpBackend<C: HttpClient> {
    conn: HttpConnection<C>,
}

impl<C: HttpClient> HttpBackend<C> {
    /// Creates a backend rooted at `base_url`.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            conn: HttpConnection::new(base_url.into(), client),
        }
    }

    /// Uses `clock` to resolve `Retry-After` headers.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.conn.clock = clock;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.conn.base_url
    }
}

#[async_trait]
impl<C: HttpClient> RemoteBackend for HttpBackend<C> {
    async fn upload_chunk(&self, path: &str, bytes: &[u8], checksum: &str) -> SyncResult<String> {
        let request = HttpRequest::new(HttpMethod::Put, self.conn.url(&format!("chunks/{path}")))
            .header("Content-Type", "application/octet-stream")
            .header("X-Checksum-Sha256", checksum)
            .body(bytes.to_vec());
        self.conn.send(request, path).await?;
        Ok(path.to_string())
    }

    async fn fetch_manifest(&self) -> SyncResult<Option<Manifest>> {
        let request = HttpRequest::new(HttpMethod::Get, self.conn.url("manifest"));
        match self.conn.send(request, "manifest").await {
            Ok(response) => serde_json::from_slice(&response.body)
                .map(Some)
                .map_err(|e| SyncError::integrity(format!("unreadable manifest: {e}"))),
            Err(SyncError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn publish_manifest(&self, manifest: &Manifest) -> SyncResult<()> {
        let body = serde_json::to_vec(manifest)
            .map_err(|e| SyncError::network_fatal(format!("manifest encoding: {e}")))?;
        let request = HttpRequest::new(HttpMethod::Put, self.conn.url("manifest"))
            .header("Content-Type", "application/json")
            .body(body);
        self.conn.send(request, "manifest").await?;
        Ok(())
    }

    async fn download_chunk(&self, path: &str) -> SyncResult<Vec<u8>> {
        let request = HttpRequest::new(HttpMethod::Get, self.conn.url(&format!("chunks/{path}")));
        Ok(self.conn.send(request, path).await?.body)
    }

    async fn delete_chunk(&self, path: &str) -> SyncResult<()> {
        let request =
            HttpRequest::new(HttpMethod::Delete, self.conn.url(&format!("chunks/{path}")));
        match self.conn.send(request, path).await {
            Ok(_) | Err(SyncError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn set_auth_token(&self, token: Option<AuthToken>) {
        *self.conn.token.write() = token;
    }
}

/// Operation delivery over HTTP.
///
/// Sends `method base_url/endpoint` with the JSON payload and the
/// operation id as `Idempotency-Key`.
pub struct HttpOperationTransport<C: HttpClient> {
    conn: HttpConnection<C>,
}

impl<C: HttpClient> HttpOperationTransport<C> {
    /// Creates a transport for the API at `base_url`.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            conn: HttpConnection::new(base_url.into(), client),
        }
    }

    /// Uses `clock` to resolve `Retry-After` headers.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.conn.clock = clock;
        self
    }
}

#[async_trait]
impl<C: HttpClient> OperationTransport for HttpOperationTransport<C> {
    async fn deliver(&self, operation: &QueuedOperation) -> SyncResult<()> {
        let body = serde_json::to_vec(&operation.payload)
            .map_err(|e| SyncError::network_fatal(format!("payload encoding: {e}")))?;
        let request = HttpRequest::new(operation.method, self.conn.url(&operation.endpoint))
            .header("Content-Type", "application/json")
            .header("Idempotency-Key", operation.id.to_string())
            .body(body);
        self.conn.send(request, &operation.endpoint).await?;
        Ok(())
    }

    fn set_auth_token(&self, token: Option<AuthToken>) {
        *self.conn.token.write() = token;
    }
}
