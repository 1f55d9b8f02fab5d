//! # HTTP Retrieval Utilities
//!
//! The transport seam of the request pipeline. A transport executes exactly one
//! HTTP exchange and reports either the raw response or a connection-level
//! failure; status classification and retries live above it in the dispatcher.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, Url};
use std::time::Duration;
use thiserror::Error;

/// A fully built request, ready to hit the wire.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// The HTTP verb (GET, POST).
    pub method: Method,
    /// Absolute URL including the query string.
    pub url: Url,
    /// Every header to send, static and per-request.
    pub headers: HeaderMap,
    /// Serialized JSON body, if any.
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url, headers: HeaderMap, body: Option<String>) -> Self {
        Self {
            method,
            url,
            headers,
            body,
        }
    }
}

/// Status code and raw body of a received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// The numeric HTTP status code.
    pub status: u16,
    /// The body as text, undecoded.
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Where in the exchange a connection-level failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Could not establish the connection.
    Connect,
    /// Connection dropped or reset while reading.
    Read,
    /// The peer violated the protocol (e.g. closed mid-response).
    Protocol,
    /// The per-call deadline elapsed.
    Timeout,
    /// Anything else the client library reports.
    Other,
}

impl TransportKind {
    /// Connect, read and protocol failures are re-issued by the dispatcher.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Connect | Self::Read | Self::Protocol)
    }
}

/// A failure before any HTTP status was received.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?} failure: {message}")]
pub struct TransportFailure {
    pub kind: TransportKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: TransportKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            TransportKind::Timeout,
            format!("no response within {} ms", after.as_millis()),
        )
    }
}

impl From<reqwest::Error> for TransportFailure {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportKind::Timeout
        } else if err.is_connect() {
            TransportKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportKind::Read
        } else if err.is_request() {
            TransportKind::Protocol
        } else {
            TransportKind::Other
        };
        Self::new(kind, err.to_string())
    }
}

/// Settings shared by the reqwest-backed transports.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Verify the server's TLS certificate.
    pub tls_verify: bool,
    /// Deadline for one complete exchange.
    pub timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            tls_verify: true,
            timeout: Duration::from_secs(100),
        }
    }
}

/// Executes one HTTP exchange on the cooperative (async) execution model.
#[async_trait]
pub trait AsyncTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure>;
}

/// `reqwest::Client` transport.
///
/// Redirects are not followed; the upstream answers API calls directly.
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds the underlying client.
    ///
    /// # Errors
    /// Returns a `TransportFailure` if the TLS backend cannot be initialised.
    pub fn new(options: &TransportOptions) -> Result<Self, TransportFailure> {
        let inner = reqwest::Client::builder()
            .danger_accept_invalid_certs(!options.tls_verify)
            .timeout(options.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl AsyncTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
        let mut req = self
            .inner
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            req = req.body(body);
        }

        let response: reqwest::Response = req.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}
