//! # Session Credentials
//!
//! The bearer token and the salts issued with it. Both are always replaced
//! together: a `Credentials` value is immutable once published.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::errors::{NepseError, Result};

/// Ordered salts issued alongside the access token; indices 0..=3 are always
/// addressable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salts(Vec<i64>);

impl Salts {
    pub const MIN_LEN: usize = 4;

    pub fn new(values: Vec<i64>) -> Result<Self> {
        if values.len() < Self::MIN_LEN {
            return Err(NepseError::InsufficientSalts(values.len()));
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }

    /// The `(salts[idx], salts[idx - 1])` pair used by payload derivation.
    /// `idx` is 1 or 3.
    pub(crate) fn pair(&self, idx: usize) -> (i64, i64) {
        (self.0[idx], self.0[idx - 1])
    }
}

/// Body of the authenticate endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub salt1: i64,
    pub salt2: i64,
    pub salt3: i64,
    pub salt4: i64,
    pub salt5: i64,
    /// Server time in epoch milliseconds.
    #[serde(default)]
    pub server_time: Option<i64>,
}

impl TokenResponse {
    pub fn salts(&self) -> Vec<i64> {
        vec![self.salt1, self.salt2, self.salt3, self.salt4, self.salt5]
    }
}

/// Freshly obtained token material, before it is stamped and published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub access_token: String,
    pub refresh_token: String,
    pub salts: Salts,
}

/// Turns the raw authenticate response into usable token material.
///
/// The upstream may obfuscate the tokens it returns; the decoding rule is an
/// external contract, so it is pluggable.
pub trait TokenDecoder: Send + Sync {
    fn decode(&self, response: TokenResponse) -> Result<Grant>;
}

/// Uses the tokens exactly as received.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTokenDecoder;

impl TokenDecoder for PlainTokenDecoder {
    fn decode(&self, response: TokenResponse) -> Result<Grant> {
        let salts = Salts::new(response.salts())?;
        if response.access_token.is_empty() {
            return Err(NepseError::Authentication {
                status: 200,
                body: "empty access token".into(),
            });
        }
        Ok(Grant {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            salts,
        })
    }
}

/// A published token and its salts.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    pub salts: Salts,
    pub fetched_at: Instant,
    /// Incremented on every refresh; 1 for the first credentials.
    pub generation: u64,
}

impl Credentials {
    pub fn from_grant(grant: Grant, generation: u64) -> Self {
        Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            salts: grant.salts,
            fetched_at: Instant::now(),
            generation,
        }
    }

    pub fn is_fresh(&self, validity: Duration) -> bool {
        self.fetched_at.elapsed() < validity
    }
}
