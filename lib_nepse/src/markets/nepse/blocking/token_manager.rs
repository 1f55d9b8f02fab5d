use reqwest::header::HeaderMap;
use reqwest::{Method, Url};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::errors::{NepseError, Result};
use crate::markets::nepse::response::{classify, BodyMasker};
use crate::markets::nepse::salts::{Credentials, Grant, TokenDecoder};
use crate::markets::nepse::token_manager::{as_authentication, decode_grant, TokenState};
use crate::retrieve::ky_http::HttpRequest;
use crate::retrieve::ky_http_blocking::BlockingTransport;

/// Blocking counterpart of [`TokenSource`](crate::markets::nepse::token_manager::TokenSource).
pub trait BlockingTokenSource: Send + Sync {
    fn fetch(&self) -> Result<Grant>;
}

pub struct BlockingHttpTokenSource {
    transport: Arc<dyn BlockingTransport>,
    url: Url,
    headers: HeaderMap,
    decoder: Arc<dyn TokenDecoder>,
    masker: BodyMasker,
}

impl BlockingHttpTokenSource {
    pub fn new(
        transport: Arc<dyn BlockingTransport>,
        url: Url,
        headers: HeaderMap,
        decoder: Arc<dyn TokenDecoder>,
        masker: BodyMasker,
    ) -> Self {
        Self {
            transport,
            url,
            headers,
            decoder,
            masker,
        }
    }
}

impl BlockingTokenSource for BlockingHttpTokenSource {
    fn fetch(&self) -> Result<Grant> {
        let request = HttpRequest::new(Method::GET, self.url.clone(), self.headers.clone(), None);
        let fetched = self
            .transport
            .execute(request)
            .map_err(NepseError::from)
            .and_then(|response| classify(response, &self.masker))
            .and_then(|value| decode_grant(value, self.decoder.as_ref()));
        fetched.map_err(as_authentication)
    }
}

/// Same single-flight contract as the async manager, on `std::sync`.
pub struct BlockingTokenManager {
    source: Arc<dyn BlockingTokenSource>,
    validity: Duration,
    state: TokenState,
    gate: Mutex<()>,
}

impl BlockingTokenManager {
    pub fn new(source: Arc<dyn BlockingTokenSource>, validity: Duration) -> Self {
        Self {
            source,
            validity,
            state: TokenState::default(),
            gate: Mutex::new(()),
        }
    }

    pub fn get_credentials(&self) -> Result<Arc<Credentials>> {
        match self.state.observe(self.validity) {
            Ok(credentials) => Ok(credentials),
            Err(observed) => self.refresh_after(observed),
        }
    }

    pub fn get_access_token(&self) -> Result<String> {
        Ok(self.get_credentials()?.access_token.clone())
    }

    pub fn refresh(&self) -> Result<Arc<Credentials>> {
        self.refresh_after(self.state.generation())
    }

    pub fn refresh_after(&self, observed: u64) -> Result<Arc<Credentials>> {
        let seen = self.state.attempts();
        let _gate = self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(credentials) = self.state.newer_than(observed) {
            return Ok(credentials);
        }
        if let Some(err) = self.state.failed_since(seen) {
            return Err(err);
        }

        match self.source.fetch() {
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

    pub fn refresh_count(&self) -> u64 {
        self.state.refresh_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markets::nepse::salts::Salts;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowSource(AtomicUsize);

    impl BlockingTokenSource for SlowSource {
        fn fetch(&self) -> Result<Grant> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            std::thread::sleep(Duration::from_millis(20));
            Ok(Grant {
                access_token: format!("token-{n}"),
                refresh_token: String::new(),
                salts: Salts::new(vec![1, 2, 3, 4]).unwrap(),
            })
        }
    }

    #[test]
    fn threads_sharing_a_manager_refresh_once() {
        let source = Arc::new(SlowSource(AtomicUsize::new(0)));
        let manager = Arc::new(BlockingTokenManager::new(source.clone(), Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || manager.get_access_token())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), "token-1");
        }
        assert_eq!(source.0.load(Ordering::SeqCst), 1);
    }

    struct RefusingSource(AtomicUsize);

    impl BlockingTokenSource for RefusingSource {
        fn fetch(&self) -> Result<Grant> {
            self.0.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Err(NepseError::Authentication { status: 503, body: "down".into() })
        }
    }

    #[test]
    fn threads_queued_behind_a_failed_refresh_share_its_error() {
        let source = Arc::new(RefusingSource(AtomicUsize::new(0)));
        let manager = Arc::new(BlockingTokenManager::new(source.clone(), Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || manager.get_access_token())
            })
            .collect();
        for handle in handles {
            let err = handle.join().unwrap().unwrap_err();
            assert_eq!(err.status(), Some(503));
        }
        assert_eq!(source.0.load(Ordering::SeqCst), 1);

        assert!(manager.refresh().is_err());
        assert_eq!(source.0.load(Ordering::SeqCst), 2);
    }
}
