//! # Async NEPSE Client
//!
//! Cooperative-model facade over the request pipeline. Independent fetches
//! (remaining floor-sheet pages, details of many symbols) are issued
//! concurrently and gathered in input order.

use chrono::NaiveDate;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::dispatcher::{endpoint_url, DispatchContext, RequestDispatcher};
use super::dummy_id::{Clock, DummyData, DummyIdRule, DummyIdSource, DummySeed, MarketStatus, MarketStatusIdRule, SystemClock};
use super::identifier_cache::{
    as_list, build_company_id_map, build_sector_map, build_security_id_map, lookup, parse_listings,
    CompanyListing, IdentifierCache, SectorMap, SecurityListing, SymbolIdMap,
};
use super::pagination::{assemble, flatten, page_path, Page};
use super::payload::{payload_id, PayloadSeed, PayloadVariant};
use super::response::BodyMasker;
use super::routes::Routes;
use super::salts::{Credentials, PlainTokenDecoder, TokenDecoder};
use super::token_manager::{HttpTokenSource, TokenManager};
use crate::configs::nepse_config::NepseConfig;
use crate::errors::Result;
use crate::retrieve::ky_http::{AsyncTransport, ReqwestTransport};

/// Configures an [`AsyncNepseClient`].
pub struct AsyncNepseClientBuilder {
    config: NepseConfig,
    transport: Option<Arc<dyn AsyncTransport>>,
    clock: Option<Arc<dyn Clock>>,
    decoder: Arc<dyn TokenDecoder>,
    rule: Arc<dyn DummyIdRule>,
    cancel: CancellationToken,
}

impl AsyncNepseClientBuilder {
    /// Replaces the reqwest transport.
    pub fn transport(mut self, transport: Arc<dyn AsyncTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the system clock in the market timezone.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn token_decoder(mut self, decoder: Arc<dyn TokenDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn dummy_id_rule(mut self, rule: Arc<dyn DummyIdRule>) -> Self {
        self.rule = rule;
        self
    }

    /// Token observed by every request; cancelling it aborts in-flight and
    /// future requests with `NepseError::Cancelled`.
    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> Result<AsyncNepseClient> {
        let config = self.config;
        config.validate()?;

        let transport: Arc<dyn AsyncTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&config.transport_options())?),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock::new(config.timezone()?)),
        };

        let base = config.base()?;
        let headers = config.header_map()?;
        let masker = BodyMasker::from_config(&config);
        let auth_url = endpoint_url(&base, Routes::new(&config).authenticate()?)?;

        let source = HttpTokenSource::new(
            Arc::clone(&transport),
            auth_url,
            headers.clone(),
            config.timeout(),
            self.decoder,
            masker.clone(),
        );
        let tokens = Arc::new(TokenManager::new(Arc::new(source), config.token_validity()));
        let ctx = DispatchContext {
            base,
            headers,
            retry: config.retry,
            timeout: config.timeout(),
            masker,
            cancel: self.cancel,
        };
        let dummy = DummyIdSource::new(DummyData::new(config.dummy_data.clone())?, self.rule);

        Ok(AsyncNepseClient {
            dispatcher: RequestDispatcher::new(transport, tokens, ctx),
            dummy,
            dummy_gate: Mutex::new(()),
            clock,
            cache: IdentifierCache::new(),
            sector_gate: Mutex::new(()),
            config,
        })
    }
}

pub struct AsyncNepseClient {
    config: NepseConfig,
    dispatcher: RequestDispatcher,
    dummy: DummyIdSource,
    dummy_gate: Mutex<()>,
    clock: Arc<dyn Clock>,
    cache: IdentifierCache,
    sector_gate: Mutex<()>,
}

impl AsyncNepseClient {
    /// Client over the reqwest transport, configured by `config`.
    pub fn new(config: NepseConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: NepseConfig) -> AsyncNepseClientBuilder {
        AsyncNepseClientBuilder {
            config,
            transport: None,
            clock: None,
            decoder: Arc::new(PlainTokenDecoder),
            rule: Arc::new(MarketStatusIdRule),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &NepseConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.dispatcher.cancellation_token().clone()
    }

    // --- Session ---

    pub async fn get_access_token(&self) -> Result<String> {
        self.dispatcher.tokens().get_access_token().await
    }

    /// Forces a single-flight refresh and returns the new credentials.
    pub async fn refresh_token(&self) -> Result<Arc<Credentials>> {
        self.dispatcher.tokens().refresh().await
    }

    /// Refreshes that published new credentials so far.
    pub fn token_refreshes(&self) -> u64 {
        self.dispatcher.tokens().refresh_count()
    }

    pub async fn get_market_status(&self) -> Result<MarketStatus> {
        let value = self.request_get(Routes::new(&self.config).market_status()?, true).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// The current dummy id, fetching the market status when the cached one
    /// is stale.
    pub async fn get_dummy_id(&self) -> Result<usize> {
        if let Some(id) = self.dummy.cached(self.clock.today()) {
            return Ok(id);
        }
        let _gate = self.dummy_gate.lock().await;
        if let Some(id) = self.dummy.cached(self.clock.today()) {
            return Ok(id);
        }
        let status = self.get_market_status().await?;
        self.dummy.accept(&status, self.clock.now())
    }

    /// Uses `id` as today's dummy id without consulting the market status.
    pub fn seed_dummy_id(&self, id: usize) -> Result<()> {
        self.dummy.seed(DummySeed {
            id,
            stamp: self.clock.today(),
        })
    }

    pub fn dummy_data(&self) -> &DummyData {
        self.dummy.dummy_data()
    }

    async fn payload_seed(&self) -> Result<PayloadSeed> {
        let id = self.get_dummy_id().await?;
        let value = self.dummy.dummy_data().value_at(id)?;
        Ok(PayloadSeed::new(id, value, self.clock.today()))
    }

    pub async fn get_payload_id(&self, variant: PayloadVariant) -> Result<i64> {
        let seed = self.payload_seed().await?;
        let credentials = self.dispatcher.tokens().get_credentials().await?;
        Ok(payload_id(variant, &seed, &credentials.salts))
    }

    // --- Raw requests ---

    pub async fn request_get(&self, path: &str, include_auth: bool) -> Result<Value> {
        self.dispatcher.request_get(path, include_auth).await
    }

    pub async fn request_post(&self, path: &str, variant: PayloadVariant) -> Result<Value> {
        let seed = self.payload_seed().await?;
        self.dispatcher
            .request_post(path, move |salts| payload_id(variant, &seed, salts))
            .await
    }

    /// One page of a paginated endpoint; page 0 is `path` itself.
    pub async fn fetch_page(&self, path: &str, variant: PayloadVariant, page: u32) -> Result<Option<Page>> {
        let path = if page == 0 { path.to_string() } else { page_path(path, page) };
        Page::from_value(self.request_post(&path, variant).await?)
    }

    /// Every page's content in page order. An empty first page ends the
    /// fetch immediately.
    pub async fn fetch_pages(&self, path: &str, variant: PayloadVariant, concurrent: bool) -> Result<Vec<Vec<Value>>> {
        let Some(first) = self.fetch_page(path, variant, 0).await? else {
            return Ok(Vec::new());
        };
        let limit = if concurrent { self.config.page_concurrency } else { 1 };
        let total = first.total_pages;

        let pages = assemble(
            first,
            |page| {
                let path = page_path(path, page);
                async move { self.request_post(&path, variant).await }
            },
            limit,
        )
        .await?;
        debug!(path, total_pages = total, concurrency = limit, "Pages assembled");
        Ok(pages)
    }

    pub async fn fetch_all_pages(&self, path: &str, variant: PayloadVariant, concurrent: bool) -> Result<Vec<Value>> {
        Ok(flatten(self.fetch_pages(path, variant, concurrent).await?))
    }

    // --- Identifier lookups ---

    pub async fn get_company_list(&self) -> Result<Vec<Value>> {
        as_list(self.request_get(Routes::new(&self.config).company_list()?, true).await?)
    }

    pub async fn get_security_list(&self) -> Result<Vec<Value>> {
        as_list(self.request_get(Routes::new(&self.config).security_list()?, true).await?)
    }

    /// Security symbol to id, from the security list.
    pub async fn get_symbol_id_map(&self, force_refresh: bool) -> Result<SymbolIdMap> {
        if !force_refresh {
            if let Some(map) = self.cache.security_ids() {
                return Ok(map);
            }
        }
        let securities: Vec<SecurityListing> = parse_listings(&self.get_security_list().await?)?;
        Ok(self.cache.store_security_ids(build_security_id_map(&securities)))
    }

    /// Company symbol to id, from the company list.
    pub async fn get_company_id_map(&self, force_refresh: bool) -> Result<SymbolIdMap> {
        if !force_refresh {
            if let Some(map) = self.cache.company_ids() {
                return Ok(map);
            }
        }
        let companies: Vec<CompanyListing> = parse_listings(&self.get_company_list().await?)?;
        Ok(self.cache.store_company_ids(build_company_id_map(&companies)))
    }

    pub async fn get_sector_map(&self) -> Result<SectorMap> {
        if let Some(map) = self.cache.sectors() {
            return Ok(map);
        }
        let _gate = self.sector_gate.lock().await;
        if let Some(map) = self.cache.sectors() {
            return Ok(map);
        }
        let (companies, securities) = tokio::try_join!(self.get_company_list(), self.get_security_list())?;
        let companies: Vec<CompanyListing> = parse_listings(&companies)?;
        let securities: Vec<SecurityListing> = parse_listings(&securities)?;
        Ok(self.cache.store_sectors(build_sector_map(&companies, &securities)))
    }

    /// Drops every cached lookup.
    pub fn invalidate_identifiers(&self) {
        self.cache.invalidate();
    }

    async fn security_id(&self, symbol: &str) -> Result<i64> {
        lookup(&self.get_symbol_id_map(false).await?, symbol)
    }

    // --- Market data ---

    /// The whole floor sheet, remaining pages fetched concurrently.
    pub async fn get_floor_sheet(&self) -> Result<Vec<Value>> {
        self.fetch_all_pages(&Routes::new(&self.config).floor_sheet()?, PayloadVariant::FloorSheet, true)
            .await
    }

    pub async fn get_floor_sheet_pages(&self) -> Result<Vec<Vec<Value>>> {
        self.fetch_pages(&Routes::new(&self.config).floor_sheet()?, PayloadVariant::FloorSheet, true)
            .await
    }

    pub async fn get_floor_sheet_page(&self, page: u32) -> Result<Option<Page>> {
        self.fetch_page(&Routes::new(&self.config).floor_sheet()?, PayloadVariant::FloorSheet, page)
            .await
    }

    /// Floor sheet of one symbol on `business_date` (default today), fetched
    /// page by page.
    pub async fn get_floor_sheet_of(&self, symbol: &str, business_date: Option<NaiveDate>) -> Result<Vec<Value>> {
        let id = self.security_id(symbol).await?;
        let date = business_date.unwrap_or_else(|| self.clock.today());
        let path = Routes::new(&self.config).floor_sheet_of(id, date)?;
        let variant = business_date.map_or(PayloadVariant::FloorSheet, PayloadVariant::FloorSheetOn);
        self.fetch_all_pages(&path, variant, false).await
    }

    pub async fn get_company_details(&self, symbol: &str) -> Result<Value> {
        let id = self.security_id(symbol).await?;
        self.request_post(&Routes::new(&self.config).company_details(id)?, PayloadVariant::Scrip)
            .await
    }

    /// Details of every symbol, fetched concurrently, in input order.
    pub async fn get_company_details_many<S: AsRef<str>>(&self, symbols: &[S]) -> Result<Vec<Value>> {
        stream::iter(symbols)
            .map(|symbol| self.get_company_details(symbol.as_ref()))
            .buffered(self.config.page_concurrency.max(1))
            .try_collect()
            .await
    }

    pub async fn get_daily_scrip_price_graph(&self, symbol: &str) -> Result<Value> {
        let id = self.security_id(symbol).await?;
        self.request_post(&Routes::new(&self.config).daily_scrip_price_graph(id)?, PayloadVariant::Scrip)
            .await
    }

    pub async fn get_price_volume_history(&self, business_date: Option<NaiveDate>) -> Result<Value> {
        let path = Routes::new(&self.config).price_volume_history(business_date)?;
        self.request_post(&path, PayloadVariant::FloorSheet).await
    }
}
