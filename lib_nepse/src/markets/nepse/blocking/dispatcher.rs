use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;

use super::token_manager::BlockingTokenManager;
use crate::errors::{NepseError, Result};
use crate::markets::nepse::dispatcher::{endpoint_url, DispatchContext, Next, RetryLoop};
use crate::markets::nepse::salts::Salts;
use crate::retrieve::ky_http_blocking::BlockingTransport;

/// Blocking dispatcher. The per-call timeout is enforced by the transport;
/// cancellation is checked before every attempt and after every backoff sleep.
pub struct BlockingDispatcher {
    transport: Arc<dyn BlockingTransport>,
    tokens: Arc<BlockingTokenManager>,
    ctx: DispatchContext,
}

impl BlockingDispatcher {
    pub(crate) fn new(
        transport: Arc<dyn BlockingTransport>,
        tokens: Arc<BlockingTokenManager>,
        ctx: DispatchContext,
    ) -> Self {
        Self { transport, tokens, ctx }
    }

    pub fn tokens(&self) -> &Arc<BlockingTokenManager> {
        &self.tokens
    }

    pub fn cancellation_token(&self) -> &tokio_util::sync::CancellationToken {
        &self.ctx.cancel
    }

    pub fn request_get(&self, path: &str, include_auth: bool) -> Result<Value> {
        self.dispatch(Method::GET, path, include_auth, None)
    }

    pub fn request_post<F>(&self, path: &str, payload: F) -> Result<Value>
    where
        F: Fn(&Salts) -> i64,
    {
        let payload: &dyn Fn(&Salts) -> i64 = &payload;
        self.dispatch(Method::POST, path, true, Some(payload))
    }

    fn dispatch(
        &self,
        method: Method,
        path: &str,
        include_auth: bool,
        payload: Option<&dyn Fn(&Salts) -> i64>,
    ) -> Result<Value> {
        let url = endpoint_url(&self.ctx.base, path)?;
        let mut retry = RetryLoop::new(&self.ctx.retry);

        loop {
            if self.ctx.cancel.is_cancelled() {
                return Err(NepseError::Cancelled);
            }
            let attempt = retry.begin();

            let credentials = if include_auth {
                Some(self.tokens.get_credentials()?)
            } else {
                None
            };
            let payload_id = match (payload, credentials.as_deref()) {
                (Some(payload), Some(credentials)) => Some(payload(&credentials.salts)),
                _ => None,
            };
            let request = self.ctx.prepare(&method, &url, attempt, payload_id, credentials.as_deref())?;

            let outcome = self.transport.execute(request).map_err(NepseError::from);
            match self.ctx.settle(&retry, &method, &url, outcome, credentials.as_deref()) {
                Next::Done(result) => return result,
                Next::Retry { delay, refresh } => {
                    if let Some(rejected) = refresh {
                        self.tokens.refresh_after(rejected)?;
                    }
                    std::thread::sleep(delay);
                }
            }
        }
    }
}
