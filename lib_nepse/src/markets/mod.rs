//! # Financial Market APIs Module
//!
//! Clients and data models for specific market-data providers.

/// Client for the NEPSE (Nepal Stock Exchange) API.
pub mod nepse;
