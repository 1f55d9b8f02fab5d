//! # lib_nepse
//!
//! Client for the NEPSE market-data service: token lifecycle, POST payload-id
//! derivation, bounded retry, response classification, pagination and
//! identifier caching, under both the async (tokio) and blocking execution
//! models.
//!
//! ```no_run
//! use lib_nepse::{AsyncNepseClient, NepseConfig};
//!
//! # async fn run() -> lib_nepse::Result<()> {
//! let client = AsyncNepseClient::new(NepseConfig::load()?)?;
//! let status = client.get_market_status().await?;
//! let rows = client.get_floor_sheet().await?;
//! println!("{} {}: {} trades", status.is_open, status.as_of, rows.len());
//! # Ok(())
//! # }
//! ```

pub mod configs;
pub mod errors;
pub mod loggers;
pub mod markets;
pub mod retrieve;

pub use configs::nepse_config::{ConfigError, NepseConfig};
pub use errors::{NepseError, Result};
pub use loggers::loggerlocal::{init_logging, LoggerLocalOptions};
pub use markets::nepse::client::{AsyncNepseClient, AsyncNepseClientBuilder};
pub use markets::nepse::dummy_id::{Clock, DummyIdRule, MarketStatus, MarketStatusIdRule, SystemClock};
pub use markets::nepse::identifier_cache::{SectorMap, SymbolIdMap, PROMOTER_SECTOR};
pub use markets::nepse::pagination::Page;
pub use markets::nepse::payload::PayloadVariant;
pub use markets::nepse::salts::{Credentials, Salts, TokenDecoder};
pub use retrieve::backoff::RetrySettings;
pub use retrieve::ky_http::{AsyncTransport, HttpRequest, HttpResponse, TransportFailure, TransportKind};

#[cfg(feature = "blocking")]
pub use markets::nepse::blocking::client::{BlockingNepseClient, BlockingNepseClientBuilder};
#[cfg(feature = "blocking")]
pub use retrieve::ky_http_blocking::BlockingTransport;
