//! # NEPSE API Integration Module
//!
//! The authenticated request pipeline for the NEPSE market-data service.
//!
//! ## Contained Modules:
//!
//! - **`salts`** and **`token_manager`**: the bearer token and its salts,
//!   refreshed single-flight.
//! - **`dummy_id`**: the dummy-data table and the rotating index into it.
//! - **`payload`**: the integer ids that authorize POST requests.
//! - **`response`**: status classification and body masking.
//! - **`dispatcher`**: GET/POST with bounded retry, timeouts and cancellation.
//! - **`pagination`**: page normalization and ordered assembly.
//! - **`identifier_cache`**: memoized symbol and sector lookups.
//! - **`client`** and **`blocking`**: the async and blocking facades.

pub mod client;
pub mod dispatcher;
pub mod dummy_id;
pub mod identifier_cache;
pub mod pagination;
pub mod payload;
pub mod response;
pub(crate) mod routes;
pub mod salts;
pub mod token_manager;

/// Blocking facade and its token manager and dispatcher.
#[cfg(feature = "blocking")]
pub mod blocking;
