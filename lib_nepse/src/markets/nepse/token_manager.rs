//! # Token Manager
//!
//! Owns the session credentials and refreshes them single-flight: concurrent
//! callers that find the token missing, expired or rejected wait for one
//! refresh and all observe its result.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, Url};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::response::{classify, BodyMasker};
use super::salts::{Credentials, Grant, TokenDecoder, TokenResponse};
use crate::errors::{NepseError, Result};
use crate::retrieve::ky_http::{AsyncTransport, HttpRequest, TransportFailure};

/// Obtains new token material from the upstream.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<Grant>;
}

/// Rewrites any failure to obtain credentials as an authentication error.
pub(crate) fn as_authentication(err: NepseError) -> NepseError {
    match err {
        NepseError::Authentication { .. } => err,
        other => NepseError::Authentication {
            status: other.status().unwrap_or(0),
            body: other.to_string(),
        },
    }
}

/// Parses and decodes an authenticate response body.
pub(crate) fn decode_grant(value: serde_json::Value, decoder: &dyn TokenDecoder) -> Result<Grant> {
    let response: TokenResponse = serde_json::from_value(value)?;
    decoder.decode(response)
}

/// GETs the authenticate endpoint, without authorization, in one attempt.
pub struct HttpTokenSource {
    transport: Arc<dyn AsyncTransport>,
    url: Url,
    headers: HeaderMap,
    timeout: Duration,
    decoder: Arc<dyn TokenDecoder>,
    masker: BodyMasker,
}

impl HttpTokenSource {
    pub fn new(
        transport: Arc<dyn AsyncTransport>,
        url: Url,
        headers: HeaderMap,
        timeout: Duration,
        decoder: Arc<dyn TokenDecoder>,
        masker: BodyMasker,
    ) -> Self {
        Self {
            transport,
            url,
            headers,
            timeout,
            decoder,
            masker,
        }
    }

    async fn fetch_once(&self) -> Result<Grant> {
        let request = HttpRequest::new(Method::GET, self.url.clone(), self.headers.clone(), None);
        let response = tokio::time::timeout(self.timeout, self.transport.execute(request))
            .await
            .map_err(|_| TransportFailure::timeout(self.timeout))??;
        let value = classify(response, &self.masker)?;
        decode_grant(value, self.decoder.as_ref())
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch(&self) -> Result<Grant> {
        self.fetch_once().await.map_err(as_authentication)
    }
}

/// The published credentials, shared by the async and blocking managers.
#[derive(Debug, Default)]
pub(crate) struct TokenState {
    current: RwLock<Option<Arc<Credentials>>>,
    refreshes: AtomicU64,
    /// Completed fetches, successful or not.
    attempts: AtomicU64,
    /// Status and body of the last fetch when it failed.
    last_failure: RwLock<Option<(u16, String)>>,
}

impl TokenState {
    pub(crate) fn current(&self) -> Option<Arc<Credentials>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.current().map_or(0, |c| c.generation)
    }

    /// Fresh credentials, or the generation that needs replacing. Both come
    /// from a single read so a concurrent publish cannot be missed.
    pub(crate) fn observe(&self, validity: Duration) -> std::result::Result<Arc<Credentials>, u64> {
        match self.current() {
            Some(c) if c.is_fresh(validity) => Ok(c),
            Some(c) => Err(c.generation),
            None => Err(0),
        }
    }

    /// Credentials published after generation `observed`, if any.
    pub(crate) fn newer_than(&self, observed: u64) -> Option<Arc<Credentials>> {
        self.current().filter(|c| c.generation > observed)
    }

    /// Publishes token and salts together as the next generation.
    pub(crate) fn publish(&self, grant: Grant) -> Arc<Credentials> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let generation = guard.as_ref().map_or(0, |c| c.generation) + 1;
        let credentials = Arc::new(Credentials::from_grant(grant, generation));
        *guard = Some(Arc::clone(&credentials));
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.set_failure(None);
        self.attempts.fetch_add(1, Ordering::SeqCst);
        credentials
    }

    pub(crate) fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Remembers a failed fetch for the callers queued behind it.
    pub(crate) fn record_failure(&self, err: &NepseError) {
        let body = err.body().map_or_else(|| err.to_string(), str::to_string);
        self.set_failure(Some((err.status().unwrap_or(0), body)));
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }

    /// The failure of a fetch completed after `seen` attempts, if the last
    /// one failed.
    pub(crate) fn failed_since(&self, seen: u64) -> Option<NepseError> {
        if self.attempts() <= seen {
            return None;
        }
        let guard = match self.last_failure.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .as_ref()
            .map(|(status, body)| NepseError::Authentication { status: *status, body: body.clone() })
    }

    fn set_failure(&self, failure: Option<(u16, String)>) {
        let mut guard = match self.last_failure.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = failure;
    }

    pub(crate) fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

pub struct TokenManager {
    source: Arc<dyn TokenSource>,
    validity: Duration,
    state: TokenState,
    gate: Mutex<()>,
}

impl TokenManager {
    pub fn new(source: Arc<dyn TokenSource>, validity: Duration) -> Self {
        Self {
            source,
            validity,
            state: TokenState::default(),
            gate: Mutex::new(()),
        }
    }

    /// Currently valid credentials, refreshing first if there are none or
    /// they have outlived the validity window.
    pub async fn get_credentials(&self) -> Result<Arc<Credentials>> {
        match self.state.observe(self.validity) {
            Ok(credentials) => Ok(credentials),
            Err(observed) => self.refresh_after(observed).await,
        }
    }

    pub async fn get_access_token(&self) -> Result<String> {
        Ok(self.get_credentials().await?.access_token.clone())
    }

    /// Refreshes the credentials currently published.
    pub async fn refresh(&self) -> Result<Arc<Credentials>> {
        let observed = self.state.generation();
        self.refresh_after(observed).await
    }

    /// Refreshes unless credentials newer than generation `observed` have
    /// been published meanwhile, in which case those are returned. Callers
    /// queued behind a fetch that failed get its error instead of fetching
    /// again.
    pub async fn refresh_after(&self, observed: u64) -> Result<Arc<Credentials>> {
        let seen = self.state.attempts();
        let _gate = self.gate.lock().await;
        if let Some(credentials) = self.state.newer_than(observed) {
            return Ok(credentials);
        }
        if let Some(err) = self.state.failed_since(seen) {
            return Err(err);
        }

        match self.source.fetch().await {
            Ok(grant) => {
                let credentials = self.state.publish(grant);
                info!(generation = credentials.generation, "Access token refreshed");
                Ok(credentials)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                self.state.record_failure(&e);
                Err(e)
            }
        }
    }

    pub fn current(&self) -> Option<Arc<Credentials>> {
        self.state.current()
    }

    /// Number of refreshes that published new credentials.
    pub fn refresh_count(&self) -> u64 {
        self.state.refresh_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markets::nepse::salts::Salts;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn fetch(&self) -> Result<Grant> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(NepseError::Authentication { status: 401, body: String::new() });
            }
            Ok(Grant {
                access_token: format!("token-{n}"),
                refresh_token: format!("refresh-{n}"),
                salts: Salts::new(vec![1, 2, 3, 4, 5]).unwrap(),
            })
        }
    }

    fn manager(fail: bool, validity: Duration) -> (Arc<TokenManager>, Arc<CountingSource>) {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0), fail });
        (Arc::new(TokenManager::new(source.clone(), validity)), source)
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let (manager, source) = manager(false, Duration::from_secs(60));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_access_token().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "token-1");
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.refresh_count(), 1);
    }

    #[tokio::test]
    async fn stale_generation_does_not_refresh_twice() {
        let (manager, source) = manager(false, Duration::from_secs(60));
        let first = manager.get_credentials().await.unwrap();
        let second = manager.refresh_after(first.generation).await.unwrap();
        // A caller that saw the first token rejected arrives late.
        let late = manager.refresh_after(first.generation).await.unwrap();
        assert_eq!(second.generation, 2);
        assert_eq!(late.access_token, second.access_token);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_credentials_are_replaced() {
        let (manager, _) = manager(false, Duration::ZERO);
        manager.get_credentials().await.unwrap();
        let again = manager.get_credentials().await.unwrap();
        assert_eq!(again.generation, 2);
    }

    #[tokio::test]
    async fn failed_refresh_surfaces_authentication_error() {
        let (manager, _) = manager(true, Duration::from_secs(60));
        let err = manager.get_access_token().await.unwrap_err();
        assert!(err.is_authentication());
        assert!(manager.current().is_none());
    }

    #[tokio::test]
    async fn callers_queued_behind_a_failed_refresh_share_its_error() {
        let (manager, source) = manager(true, Duration::from_secs(60));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_access_token().await })
            })
            .collect();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, NepseError::Authentication { status: 401, .. }));
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // A caller arriving after the failure tries again.
        assert!(manager.get_access_token().await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.refresh_count(), 0);
    }

    #[test]
    fn foreign_failures_become_authentication_errors() {
        let err = as_authentication(NepseError::Server { status: 503, body: "down".into() });
        assert!(matches!(err, NepseError::Authentication { status: 503, .. }));
    }
}
