#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
#[cfg(feature = "blocking")]
use lib_nepse::BlockingTransport;
use lib_nepse::{AsyncTransport, Clock, HttpRequest, HttpResponse, NepseConfig, RetrySettings, TransportFailure, TransportKind};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BASE_URL: &str = "https://nepse.test";
pub const AUTH_PATH: &str = "/api/authenticate/prove";
pub const MARKET_OPEN_PATH: &str = "/api/nots/nepse-data/market-open";
pub const FLOOR_SHEET_PATH: &str = "/api/nots/nepse-data/floorsheet";
pub const COMPANY_LIST_PATH: &str = "/api/nots/company/list";
pub const SECURITY_LIST_PATH: &str = "/api/nots/security";

/// What a scripted route answers with.
#[derive(Clone)]
pub struct Scripted {
    pub delay: Duration,
    pub reply: Result<HttpResponse, TransportFailure>,
}

impl Scripted {
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

pub fn ok(body: Value) -> Scripted {
    status(200, &body.to_string())
}

pub fn status(code: u16, body: &str) -> Scripted {
    Scripted {
        delay: Duration::ZERO,
        reply: Ok(HttpResponse::new(code, body)),
    }
}

pub fn fail(kind: TransportKind) -> Scripted {
    Scripted {
        delay: Duration::ZERO,
        reply: Err(TransportFailure::new(kind, "scripted failure")),
    }
}

type Handler = Arc<dyn Fn(&HttpRequest, usize) -> Scripted + Send + Sync>;

struct Route {
    path: String,
    handler: Handler,
    calls: AtomicUsize,
}

/// In-memory upstream: routes by URL path, records every request.
pub struct ScriptedTransport {
    routes: Mutex<Vec<Arc<Route>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    /// An upstream that already answers the authenticate endpoint with
    /// `token-<n>` on the n-th call and salts 100, 200, 300, 400, 500.
    pub fn new() -> Arc<Self> {
        let transport = Arc::new(Self {
            routes: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        });
        transport.on(AUTH_PATH, |_, n| ok(token_body(n + 1)));
        transport
    }

    /// Answers requests to `path`; the handler also receives the 0-based call
    /// count of this route. Later registrations win.
    pub fn on<F>(&self, path: &str, handler: F)
    where
        F: Fn(&HttpRequest, usize) -> Scripted + Send + Sync + 'static,
    {
        self.routes.lock().unwrap().push(Arc::new(Route {
            path: path.to_string(),
            handler: Arc::new(handler),
            calls: AtomicUsize::new(0),
        }));
    }

    /// Standard market status (dummy id 42, as of `2024-01-15`).
    pub fn with_market_status(&self) {
        self.on(MARKET_OPEN_PATH, |_, _| {
            ok(json!({"isOpen": "CLOSE", "asOf": "2024-01-15T15:00:00", "id": 42}))
        });
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.path() == path)
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }

    fn answer(&self, request: &HttpRequest) -> Scripted {
        self.requests.lock().unwrap().push(request.clone());
        let route = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.path == request.url.path())
            .cloned();
        match route {
            Some(route) => {
                let n = route.calls.fetch_add(1, Ordering::SeqCst);
                (route.handler)(request, n)
            }
            None => status(404, "not found"),
        }
    }
}

#[async_trait]
impl AsyncTransport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
        let scripted = self.answer(&request);
        if !scripted.delay.is_zero() {
            tokio::time::sleep(scripted.delay).await;
        }
        scripted.reply
    }
}

#[cfg(feature = "blocking")]
impl BlockingTransport for ScriptedTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
        let scripted = self.answer(&request);
        if !scripted.delay.is_zero() {
            std::thread::sleep(scripted.delay);
        }
        scripted.reply
    }
}

pub fn token_body(n: usize) -> Value {
    json!({
        "accessToken": format!("token-{n}"),
        "refreshToken": format!("refresh-{n}"),
        "salt1": 100, "salt2": 200, "salt3": 300, "salt4": 400, "salt5": 500,
        "serverTime": 1705300000000_i64
    })
}

/// Value of the `page` query parameter, 0 when absent.
pub fn page_of(request: &HttpRequest) -> u32 {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == "page")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0)
}

pub fn body_of(request: &HttpRequest) -> Value {
    serde_json::from_str(request.body.as_deref().unwrap_or("null")).unwrap()
}

pub fn authorization(request: &HttpRequest) -> String {
    request
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Floor-sheet envelope for page `page` of `total`, two rows per page.
pub fn floor_sheet_page(page: u32, total: u32) -> Value {
    json!({
        "floorsheets": {
            "content": [
                {"contractId": page * 10 + 1, "page": page},
                {"contractId": page * 10 + 2, "page": page}
            ],
            "totalPages": total,
            "number": page
        }
    })
}

/// A clock that only moves when told to.
pub struct FixedClock(Mutex<NaiveDateTime>);

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().unwrap()
    }
}

pub fn today() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(11, 0, 0)
        .unwrap()
}

pub fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(today()))
}

/// Bundled config pointed at the scripted upstream, with fast retries and
/// `DummyData[42] = 55`.
pub fn config() -> NepseConfig {
    let mut config = NepseConfig::embedded().unwrap();
    config.base_url = BASE_URL.to_string();
    config.retry = RetrySettings::new(4, 1, 2);
    config.token_validity_secs = 3600;
    config.timeout_secs = 1;
    config.dummy_data[42] = 55;
    config
}

pub fn companies() -> Value {
    json!([
        {"id": 1, "symbol": "NABIL", "sectorName": "Commercial Banks"},
        {"id": 2, "symbol": "UPPER", "sectorName": "Hydro Power"}
    ])
}

pub fn securities() -> Value {
    json!([
        {"id": 131, "symbol": "NABIL"},
        {"id": 2890, "symbol": "NABILP"},
        {"id": 132, "symbol": "UPPER"}
    ])
}

pub fn with_listings(transport: &ScriptedTransport) {
    transport.on(COMPANY_LIST_PATH, |_, _| ok(companies()));
    transport.on(SECURITY_LIST_PATH, |_, _| ok(securities()));
}
