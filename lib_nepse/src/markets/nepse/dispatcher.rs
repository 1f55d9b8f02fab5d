//! # Request Dispatcher
//!
//! Issues authenticated GET and POST calls. Each logical request runs a
//! bounded loop: retryable transport failures and 401s are re-issued after a
//! backoff delay (a 401 first refreshes the token), everything else propagates
//! to the caller unchanged.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::response::{classify, BodyMasker};
use super::salts::{Credentials, Salts};
use super::token_manager::TokenManager;
use crate::errors::{NepseError, Result};
use crate::retrieve::backoff::{Backoff, RetrySettings};
use crate::retrieve::ky_http::{AsyncTransport, HttpRequest, HttpResponse, TransportFailure};

/// What to do after a failed attempt.
pub(crate) enum Step {
    Retry {
        delay: Duration,
        refresh: bool,
        cause: NepseError,
    },
    Fail(NepseError),
}

/// Attempt bookkeeping shared by the async and blocking dispatchers.
pub(crate) struct RetryLoop {
    backoff: Backoff,
    attempts: u32,
}

impl RetryLoop {
    pub(crate) fn new(settings: &RetrySettings) -> Self {
        Self {
            backoff: settings.backoff(),
            attempts: 0,
        }
    }

    /// Starts the next attempt and returns its 1-based number.
    pub(crate) fn begin(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub(crate) fn max_attempts(&self) -> u32 {
        self.backoff.max_attempts()
    }

    pub(crate) fn on_failure(&self, err: NepseError) -> Step {
        if !err.is_recoverable() {
            return Step::Fail(err);
        }
        match self.backoff.delay_after(self.attempts) {
            Some(delay) => Step::Retry {
                delay,
                refresh: err.is_authentication(),
                cause: err,
            },
            None => Step::Fail(NepseError::RetriesExhausted {
                attempts: self.attempts,
                last: Box::new(err),
            }),
        }
    }
}

/// Joins an endpoint path (query string included) onto the base URL.
pub(crate) fn endpoint_url(base: &Url, path: &str) -> Result<Url> {
    Ok(base.join(path)?)
}

/// Static headers plus, when `credentials` is given, the Salter authorization.
/// A token that cannot travel in a header is an authentication failure.
pub(crate) fn request_headers(static_headers: &HeaderMap, credentials: Option<&Credentials>) -> Result<HeaderMap> {
    let mut headers = static_headers.clone();
    if let Some(credentials) = credentials {
        let value = HeaderValue::from_str(&format!("Salter {}", credentials.access_token)).map_err(|_| {
            NepseError::Authentication {
                status: 0,
                body: "access token is not a valid header value".to_string(),
            }
        })?;
        headers.insert(AUTHORIZATION, value);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    Ok(headers)
}

pub(crate) fn post_body(payload: i64) -> String {
    json!({ "id": payload }).to_string()
}

/// Where one attempt leaves the request loop.
#[derive(Debug)]
pub(crate) enum Next {
    Done(Result<Value>),
    /// Sleep `delay`, first refreshing past the rejected generation if any.
    Retry { delay: Duration, refresh: Option<u64> },
}

/// Settings shared by both dispatchers.
#[derive(Clone)]
pub(crate) struct DispatchContext {
    pub(crate) base: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) retry: RetrySettings,
    pub(crate) timeout: Duration,
    pub(crate) masker: BodyMasker,
    pub(crate) cancel: CancellationToken,
}

impl DispatchContext {
    /// Builds the request of the current attempt. `payload_id` becomes the
    /// `{"id": ..}` body.
    pub(crate) fn prepare(
        &self,
        method: &Method,
        url: &Url,
        attempt: u32,
        payload_id: Option<i64>,
        credentials: Option<&Credentials>,
    ) -> Result<HttpRequest> {
        let body = payload_id.map(post_body);
        self.log_request(method, url, attempt, body.as_deref());
        let headers = request_headers(&self.headers, credentials)?;
        Ok(HttpRequest::new(method.clone(), url.clone(), headers, body))
    }

    /// Classifies the outcome of the current attempt and decides whether the
    /// loop stops. Only credentials that were actually sent get refreshed.
    pub(crate) fn settle(
        &self,
        retry: &RetryLoop,
        method: &Method,
        url: &Url,
        outcome: Result<HttpResponse>,
        credentials: Option<&Credentials>,
    ) -> Next {
        let err = match outcome {
            Ok(response) => {
                debug!(%method, %url, status = response.status, "Response received");
                match classify(response, &self.masker) {
                    Ok(value) => return Next::Done(Ok(value)),
                    Err(e) => e,
                }
            }
            Err(NepseError::Cancelled) => return Next::Done(Err(NepseError::Cancelled)),
            Err(e) => e,
        };

        match retry.on_failure(err) {
            Step::Fail(e) => {
                self.log_failure(method, url, &e);
                Next::Done(Err(e))
            }
            Step::Retry { delay, refresh, cause } => {
                self.log_retry(method, url, retry.attempts, retry.max_attempts(), delay, &cause);
                Next::Retry {
                    delay,
                    refresh: credentials.filter(|_| refresh).map(|c| c.generation),
                }
            }
        }
    }

    pub(crate) fn log_failure(&self, method: &Method, url: &Url, err: &NepseError) {
        match err.root() {
            NepseError::Client { status, .. } | NepseError::Authentication { status, .. } => {
                warn!(%method, %url, status, error = %err, "Request rejected")
            }
            NepseError::Cancelled => debug!(%method, %url, "Request cancelled"),
            _ => error!(%method, %url, error = %err, "Request failed"),
        }
    }

    pub(crate) fn log_retry(&self, method: &Method, url: &Url, attempt: u32, max: u32, delay: Duration, cause: &NepseError) {
        warn!(
            %method,
            %url,
            attempt,
            max_attempts = max,
            delay_ms = delay.as_millis() as u64,
            error = %cause,
            "Retrying request"
        );
    }

    pub(crate) fn log_request(&self, method: &Method, url: &Url, attempt: u32, body: Option<&str>) {
        let body = body.map(|b| self.masker.mask_text(b));
        debug!(%method, %url, attempt, body = body.as_deref().unwrap_or(""), "Sending request");
    }
}

pub struct RequestDispatcher {
    transport: Arc<dyn AsyncTransport>,
    tokens: Arc<TokenManager>,
    ctx: DispatchContext,
}

impl RequestDispatcher {
    pub(crate) fn new(transport: Arc<dyn AsyncTransport>, tokens: Arc<TokenManager>, ctx: DispatchContext) -> Self {
        Self { transport, tokens, ctx }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.ctx.cancel
    }

    pub async fn request_get(&self, path: &str, include_auth: bool) -> Result<Value> {
        self.dispatch(Method::GET, path, include_auth, None).await
    }

    /// POSTs `{"id": payload(salts)}`; the payload is recomputed for every
    /// attempt from the salts of the credentials used by that attempt.
    pub async fn request_post<F>(&self, path: &str, payload: F) -> Result<Value>
    where
        F: Fn(&Salts) -> i64 + Send + Sync,
    {
        let payload: &(dyn Fn(&Salts) -> i64 + Send + Sync) = &payload;
        self.dispatch(Method::POST, path, true, Some(payload)).await
    }

    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        include_auth: bool,
        payload: Option<&(dyn Fn(&Salts) -> i64 + Send + Sync)>,
    ) -> Result<Value> {
        let url = endpoint_url(&self.ctx.base, path)?;
        let mut retry = RetryLoop::new(&self.ctx.retry);

        loop {
            if self.ctx.cancel.is_cancelled() {
                return Err(NepseError::Cancelled);
            }
            let attempt = retry.begin();

            let credentials = if include_auth {
                Some(self.tokens.get_credentials().await?)
            } else {
                None
            };
            let payload_id = match (payload, credentials.as_deref()) {
                (Some(payload), Some(credentials)) => Some(payload(&credentials.salts)),
                _ => None,
            };
            let request = self.ctx.prepare(&method, &url, attempt, payload_id, credentials.as_deref())?;

            let outcome = self.exchange(request).await;
            match self.ctx.settle(&retry, &method, &url, outcome, credentials.as_deref()) {
                Next::Done(result) => return result,
                Next::Retry { delay, refresh } => {
                    if let Some(rejected) = refresh {
                        self.tokens.refresh_after(rejected).await?;
                    }
                    tokio::select! {
                        _ = self.ctx.cancel.cancelled() => return Err(NepseError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn exchange(&self, request: HttpRequest) -> Result<HttpResponse> {
        let timeout = self.ctx.timeout;
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => Err(NepseError::Cancelled),
            result = tokio::time::timeout(timeout, self.transport.execute(request)) => match result {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(failure)) => Err(failure.into()),
                Err(_) => Err(TransportFailure::timeout(timeout).into()),
            },
        }
    }
}
