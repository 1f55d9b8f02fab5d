//! # Blocking NEPSE Client
//!
//! Every call occupies the calling thread until the whole operation,
//! pagination included, has completed. Pages and symbols are fetched one after
//! another.

use chrono::NaiveDate;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::dispatcher::BlockingDispatcher;
use super::token_manager::{BlockingHttpTokenSource, BlockingTokenManager};
use crate::configs::nepse_config::NepseConfig;
use crate::errors::Result;
use crate::markets::nepse::dispatcher::{endpoint_url, DispatchContext};
use crate::markets::nepse::dummy_id::{
    Clock, DummyData, DummyIdRule, DummyIdSource, DummySeed, MarketStatus, MarketStatusIdRule, SystemClock,
};
use crate::markets::nepse::identifier_cache::{
    as_list, build_company_id_map, build_sector_map, build_security_id_map, lookup, parse_listings,
    CompanyListing, IdentifierCache, SectorMap, SecurityListing, SymbolIdMap,
};
use crate::markets::nepse::pagination::{assemble_blocking, flatten, page_path, Page};
use crate::markets::nepse::payload::{payload_id, PayloadSeed, PayloadVariant};
use crate::markets::nepse::response::BodyMasker;
use crate::markets::nepse::routes::Routes;
use crate::markets::nepse::salts::{Credentials, PlainTokenDecoder, TokenDecoder};
use crate::retrieve::ky_http_blocking::{BlockingTransport, ReqwestBlockingTransport};

pub struct BlockingNepseClientBuilder {
    config: NepseConfig,
    transport: Option<Arc<dyn BlockingTransport>>,
    clock: Option<Arc<dyn Clock>>,
    decoder: Arc<dyn TokenDecoder>,
    rule: Arc<dyn DummyIdRule>,
    cancel: CancellationToken,
}

impl BlockingNepseClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn BlockingTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

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

    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> Result<BlockingNepseClient> {
        let config = self.config;
        config.validate()?;

        let transport: Arc<dyn BlockingTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestBlockingTransport::new(&config.transport_options())?),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock::new(config.timezone()?)),
        };

        let base = config.base()?;
        let headers = config.header_map()?;
        let masker = BodyMasker::from_config(&config);
        let auth_url = endpoint_url(&base, Routes::new(&config).authenticate()?)?;

        let source = BlockingHttpTokenSource::new(
            Arc::clone(&transport),
            auth_url,
            headers.clone(),
            self.decoder,
            masker.clone(),
        );
        let tokens = Arc::new(BlockingTokenManager::new(Arc::new(source), config.token_validity()));
        let ctx = DispatchContext {
            base,
            headers,
            retry: config.retry,
            timeout: config.timeout(),
            masker,
            cancel: self.cancel,
        };
        let dummy = DummyIdSource::new(DummyData::new(config.dummy_data.clone())?, self.rule);

        Ok(BlockingNepseClient {
            dispatcher: BlockingDispatcher::new(transport, tokens, ctx),
            dummy,
            dummy_gate: Mutex::new(()),
            clock,
            cache: IdentifierCache::new(),
            config,
        })
    }
}

/// Blocking facade for single-threaded use; requests are never parallelized
/// internally. Sharing one instance between threads is unsupported unless
/// the caller serializes every call behind its own lock.
pub struct BlockingNepseClient {
    config: NepseConfig,
    dispatcher: BlockingDispatcher,
    dummy: DummyIdSource,
    dummy_gate: Mutex<()>,
    clock: Arc<dyn Clock>,
    cache: IdentifierCache,
}

impl BlockingNepseClient {
    pub fn new(config: NepseConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: NepseConfig) -> BlockingNepseClientBuilder {
        BlockingNepseClientBuilder {
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

    pub fn get_access_token(&self) -> Result<String> {
        self.dispatcher.tokens().get_access_token()
    }

    pub fn refresh_token(&self) -> Result<Arc<Credentials>> {
        self.dispatcher.tokens().refresh()
    }

    pub fn token_refreshes(&self) -> u64 {
        self.dispatcher.tokens().refresh_count()
    }

    pub fn get_market_status(&self) -> Result<MarketStatus> {
        let value = self.request_get(Routes::new(&self.config).market_status()?, true)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn get_dummy_id(&self) -> Result<usize> {
        if let Some(id) = self.dummy.cached(self.clock.today()) {
            return Ok(id);
        }
        let _gate = self.dummy_gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(id) = self.dummy.cached(self.clock.today()) {
            return Ok(id);
        }
        let status = self.get_market_status()?;
        self.dummy.accept(&status, self.clock.now())
    }

    pub fn seed_dummy_id(&self, id: usize) -> Result<()> {
        self.dummy.seed(DummySeed {
            id,
            stamp: self.clock.today(),
        })
    }

    pub fn dummy_data(&self) -> &DummyData {
        self.dummy.dummy_data()
    }

    fn payload_seed(&self) -> Result<PayloadSeed> {
        let id = self.get_dummy_id()?;
        let value = self.dummy.dummy_data().value_at(id)?;
        Ok(PayloadSeed::new(id, value, self.clock.today()))
    }

    pub fn get_payload_id(&self, variant: PayloadVariant) -> Result<i64> {
        let seed = self.payload_seed()?;
        let credentials = self.dispatcher.tokens().get_credentials()?;
        Ok(payload_id(variant, &seed, &credentials.salts))
    }

    pub fn request_get(&self, path: &str, include_auth: bool) -> Result<Value> {
        self.dispatcher.request_get(path, include_auth)
    }

    pub fn request_post(&self, path: &str, variant: PayloadVariant) -> Result<Value> {
        let seed = self.payload_seed()?;
        self.dispatcher
            .request_post(path, move |salts| payload_id(variant, &seed, salts))
    }

    pub fn fetch_page(&self, path: &str, variant: PayloadVariant, page: u32) -> Result<Option<Page>> {
        let path = if page == 0 { path.to_string() } else { page_path(path, page) };
        Page::from_value(self.request_post(&path, variant)?)
    }

    /// Every page's content in page order, fetched sequentially.
    pub fn fetch_pages(&self, path: &str, variant: PayloadVariant) -> Result<Vec<Vec<Value>>> {
        let Some(first) = self.fetch_page(path, variant, 0)? else {
            return Ok(Vec::new());
        };
        let total = first.total_pages;
        let pages = assemble_blocking(first, |page| self.request_post(&page_path(path, page), variant))?;
        debug!(path, total_pages = total, "Pages assembled");
        Ok(pages)
    }

    pub fn fetch_all_pages(&self, path: &str, variant: PayloadVariant) -> Result<Vec<Value>> {
        Ok(flatten(self.fetch_pages(path, variant)?))
    }

    pub fn get_company_list(&self) -> Result<Vec<Value>> {
        as_list(self.request_get(Routes::new(&self.config).company_list()?, true)?)
    }

    pub fn get_security_list(&self) -> Result<Vec<Value>> {
        as_list(self.request_get(Routes::new(&self.config).security_list()?, true)?)
    }

    pub fn get_symbol_id_map(&self, force_refresh: bool) -> Result<SymbolIdMap> {
        if !force_refresh {
            if let Some(map) = self.cache.security_ids() {
                return Ok(map);
            }
        }
        let securities: Vec<SecurityListing> = parse_listings(&self.get_security_list()?)?;
        Ok(self.cache.store_security_ids(build_security_id_map(&securities)))
    }

    pub fn get_company_id_map(&self, force_refresh: bool) -> Result<SymbolIdMap> {
        if !force_refresh {
            if let Some(map) = self.cache.company_ids() {
                return Ok(map);
            }
        }
        let companies: Vec<CompanyListing> = parse_listings(&self.get_company_list()?)?;
        Ok(self.cache.store_company_ids(build_company_id_map(&companies)))
    }

    pub fn get_sector_map(&self) -> Result<SectorMap> {
        if let Some(map) = self.cache.sectors() {
            return Ok(map);
        }
        let companies: Vec<CompanyListing> = parse_listings(&self.get_company_list()?)?;
        let securities: Vec<SecurityListing> = parse_listings(&self.get_security_list()?)?;
        Ok(self.cache.store_sectors(build_sector_map(&companies, &securities)))
    }

    pub fn invalidate_identifiers(&self) {
        self.cache.invalidate();
    }

    fn security_id(&self, symbol: &str) -> Result<i64> {
        lookup(&self.get_symbol_id_map(false)?, symbol)
    }

    pub fn get_floor_sheet(&self) -> Result<Vec<Value>> {
        self.fetch_all_pages(&Routes::new(&self.config).floor_sheet()?, PayloadVariant::FloorSheet)
    }

    pub fn get_floor_sheet_pages(&self) -> Result<Vec<Vec<Value>>> {
        self.fetch_pages(&Routes::new(&self.config).floor_sheet()?, PayloadVariant::FloorSheet)
    }

    pub fn get_floor_sheet_page(&self, page: u32) -> Result<Option<Page>> {
        self.fetch_page(&Routes::new(&self.config).floor_sheet()?, PayloadVariant::FloorSheet, page)
    }

    pub fn get_floor_sheet_of(&self, symbol: &str, business_date: Option<NaiveDate>) -> Result<Vec<Value>> {
        let id = self.security_id(symbol)?;
        let date = business_date.unwrap_or_else(|| self.clock.today());
        let path = Routes::new(&self.config).floor_sheet_of(id, date)?;
        let variant = business_date.map_or(PayloadVariant::FloorSheet, PayloadVariant::FloorSheetOn);
        self.fetch_all_pages(&path, variant)
    }

    pub fn get_company_details(&self, symbol: &str) -> Result<Value> {
        let id = self.security_id(symbol)?;
        self.request_post(&Routes::new(&self.config).company_details(id)?, PayloadVariant::Scrip)
    }

    pub fn get_company_details_many<S: AsRef<str>>(&self, symbols: &[S]) -> Result<Vec<Value>> {
        symbols
            .iter()
            .map(|symbol| self.get_company_details(symbol.as_ref()))
            .collect()
    }

    pub fn get_daily_scrip_price_graph(&self, symbol: &str) -> Result<Value> {
        let id = self.security_id(symbol)?;
        self.request_post(&Routes::new(&self.config).daily_scrip_price_graph(id)?, PayloadVariant::Scrip)
    }

    pub fn get_price_volume_history(&self, business_date: Option<NaiveDate>) -> Result<Value> {
        let path = Routes::new(&self.config).price_volume_history(business_date)?;
        self.request_post(&path, PayloadVariant::FloorSheet)
    }
}
