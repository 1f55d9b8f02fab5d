//! Blocking counterpart of [`ky_http`](super::ky_http): same request and
//! response types, executed on the calling thread.

use super::ky_http::{HttpRequest, HttpResponse, TransportFailure, TransportOptions};

/// Executes one HTTP exchange, occupying the calling thread until it completes.
pub trait BlockingTransport: Send + Sync {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure>;
}

/// `reqwest::blocking::Client` transport.
///
/// Must not be constructed or dropped inside an async runtime.
pub struct ReqwestBlockingTransport {
    inner: reqwest::blocking::Client,
}

impl ReqwestBlockingTransport {
    pub fn new(options: &TransportOptions) -> Result<Self, TransportFailure> {
        let inner = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(!options.tls_verify)
            .timeout(options.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { inner })
    }
}

impl BlockingTransport for ReqwestBlockingTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
        let mut req = self
            .inner
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            req = req.body(body);
        }

        let response = req.send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        Ok(HttpResponse { status, body })
    }
}
