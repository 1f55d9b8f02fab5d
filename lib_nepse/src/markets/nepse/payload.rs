//! # POST Payload Identifiers
//!
//! Every POST body is `{"id": <payload>}` where the payload is derived from the
//! dummy id, its dummy-data value, the session salts and the day of month.
//! The thresholds and salt indices here are validated server-side and must not
//! change.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::salts::Salts;

/// Which derivation rule a POST endpoint expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadVariant {
    /// Per-symbol calls (company details, price graphs): the base value alone.
    Scrip,
    /// Index graphs and most other POST endpoints.
    Generic,
    /// Floor sheets and today's prices.
    FloorSheet,
    /// Floor-sheet rule with the salt multiplier taken from a business date.
    FloorSheetOn(NaiveDate),
}

/// Time-varying inputs shared by all variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadSeed {
    pub dummy_id: usize,
    /// `DummyData[dummy_id]`.
    pub dummy_value: i64,
    /// Day of month of the current exchange-local date.
    pub day: u32,
}

impl PayloadSeed {
    pub fn new(dummy_id: usize, dummy_value: i64, today: NaiveDate) -> Self {
        Self {
            dummy_id,
            dummy_value,
            day: today.day(),
        }
    }

    /// `DummyData[id] + id + 2 * day`.
    pub fn base_value(&self) -> i64 {
        self.dummy_value + self.dummy_id as i64 + 2 * i64::from(self.day)
    }
}

pub fn payload_id(variant: PayloadVariant, seed: &PayloadSeed, salts: &Salts) -> i64 {
    let e = seed.base_value();
    let last_digit = e.rem_euclid(10);
    match variant {
        PayloadVariant::Scrip => e,
        PayloadVariant::Generic => {
            let idx = if last_digit < 5 { 3 } else { 1 };
            salted(e, salts, idx, seed.day)
        }
        PayloadVariant::FloorSheet => {
            let idx = if last_digit < 4 { 1 } else { 3 };
            salted(e, salts, idx, seed.day)
        }
        PayloadVariant::FloorSheetOn(business_date) => {
            let idx = if last_digit < 4 { 1 } else { 3 };
            salted(e, salts, idx, business_date.day())
        }
    }
}

fn salted(e: i64, salts: &Salts, idx: usize, day: u32) -> i64 {
    let (multiplier, offset) = salts.pair(idx);
    e + multiplier * i64::from(day) - offset
}
