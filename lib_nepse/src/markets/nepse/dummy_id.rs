//! # Dummy Id Source
//!
//! The dummy-data table and the rotating index into it. The index is chosen
//! from the live market status by a pluggable [`DummyIdRule`] and cached per
//! exchange-local day.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::configs::nepse_config::ConfigError;
use crate::errors::{NepseError, Result};

/// Exchange-local wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// The system clock converted to the market's timezone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.tz).naive_local()
    }
}

/// Fixed entropy table indexed by the dummy id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummyData(Arc<[i64]>);

impl DummyData {
    pub fn new(values: Vec<i64>) -> Result<Self> {
        if values.is_empty() {
            return Err(ConfigError::EmptyDummyData.into());
        }
        Ok(Self(values.into()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn value_at(&self, id: usize) -> Result<i64> {
        self.0.get(id).copied().ok_or(NepseError::DummyIdOutOfRange {
            id: id as i64,
            len: self.0.len(),
        })
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }
}

/// Body of the market-open endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MarketStatus {
    pub id: i64,
    /// `OPEN` or `CLOSE`.
    #[serde(default)]
    pub is_open: String,
    /// Timestamp of the last market update, e.g. `2024-01-15T15:00:00`.
    #[serde(default)]
    pub as_of: String,
}

impl MarketStatus {
    pub fn is_open(&self) -> bool {
        self.is_open.eq_ignore_ascii_case("OPEN")
    }

    pub fn as_of_date(&self) -> Option<NaiveDate> {
        self.as_of
            .get(..10)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    }
}

/// Selects the dummy id from the live market status and the current time.
pub trait DummyIdRule: Send + Sync {
    fn select(&self, status: &MarketStatus, now: NaiveDateTime, table_len: usize) -> Result<usize>;
}

/// Uses the `id` reported by the market-open endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketStatusIdRule;

impl DummyIdRule for MarketStatusIdRule {
    fn select(&self, status: &MarketStatus, _now: NaiveDateTime, table_len: usize) -> Result<usize> {
        usize::try_from(status.id)
            .ok()
            .filter(|id| *id < table_len)
            .ok_or(NepseError::DummyIdOutOfRange {
                id: status.id,
                len: table_len,
            })
    }
}

/// A selected dummy id and the date until which it is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DummySeed {
    pub id: usize,
    pub stamp: NaiveDate,
}

pub struct DummyIdSource {
    data: DummyData,
    rule: Arc<dyn DummyIdRule>,
    seed: Mutex<Option<DummySeed>>,
}

impl DummyIdSource {
    pub fn new(data: DummyData, rule: Arc<dyn DummyIdRule>) -> Self {
        Self {
            data,
            rule,
            seed: Mutex::new(None),
        }
    }

    pub fn dummy_data(&self) -> &DummyData {
        &self.data
    }

    pub fn current(&self) -> Option<DummySeed> {
        *lock(&self.seed)
    }

    /// The cached id, unless its stamp is older than `today`.
    pub fn cached(&self, today: NaiveDate) -> Option<usize> {
        self.current().filter(|seed| seed.stamp >= today).map(|seed| seed.id)
    }

    /// Selects and caches the id for a freshly fetched market status.
    ///
    /// The first status is stamped with its `asOf` date. A later status whose
    /// `asOf` date equals the previous stamp means the market has not moved on
    /// since, so the stamp becomes `today` and no refetch happens again today.
    pub fn accept(&self, status: &MarketStatus, now: NaiveDateTime) -> Result<usize> {
        let id = self.rule.select(status, now, self.data.len())?;
        let today = now.date();
        let as_of = status.as_of_date();

        let mut guard = lock(&self.seed);
        let stamp = match (*guard, as_of) {
            (Some(previous), Some(as_of)) if as_of == previous.stamp => today,
            (_, Some(as_of)) => as_of,
            (_, None) => today,
        };
        if (*guard).map(|s| s.id) != Some(id) {
            tracing::info!(dummy_id = id, stamp = %stamp, is_open = status.is_open(), "Dummy id selected");
        }
        *guard = Some(DummySeed { id, stamp });
        Ok(id)
    }

    /// Installs a known id, bypassing the market status.
    pub fn seed(&self, seed: DummySeed) -> Result<()> {
        self.data.value_at(seed.id)?;
        *lock(&self.seed) = Some(seed);
        Ok(())
    }

    pub fn invalidate(&self) {
        *lock(&self.seed) = None;
    }
}

// A poisoned lock still holds a consistent value: every writer stores whole values.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(11, 0, 0)
            .unwrap()
    }

    fn status(id: i64, as_of: &str) -> MarketStatus {
        MarketStatus {
            id,
            is_open: "CLOSE".into(),
            as_of: as_of.into(),
        }
    }

    fn source() -> DummyIdSource {
        DummyIdSource::new(DummyData::new((0..100).collect()).unwrap(), Arc::new(MarketStatusIdRule))
    }

    #[test]
    fn out_of_range_ids_are_rejected() {
        let rule = MarketStatusIdRule;
        assert_eq!(rule.select(&status(99, ""), at(2024, 1, 1), 100).unwrap(), 99);
        assert!(rule.select(&status(100, ""), at(2024, 1, 1), 100).is_err());
        assert!(rule.select(&status(-1, ""), at(2024, 1, 1), 100).is_err());
    }

    #[test]
    fn first_status_is_stamped_with_its_as_of_date() {
        let source = source();
        assert_eq!(source.accept(&status(7, "2024-01-14T15:00:00"), at(2024, 1, 15)).unwrap(), 7);
        assert_eq!(source.current().unwrap().stamp, NaiveDate::from_ymd_opt(2024, 1, 14).unwrap());
        // Stamp older than today: refetch required.
        assert_eq!(source.cached(at(2024, 1, 15).date()), None);
    }

    #[test]
    fn unchanged_as_of_date_is_trusted_for_the_rest_of_today() {
        let source = source();
        source.accept(&status(7, "2024-01-14T15:00:00"), at(2024, 1, 15)).unwrap();
        source.accept(&status(8, "2024-01-14T15:00:00"), at(2024, 1, 15)).unwrap();
        assert_eq!(source.cached(at(2024, 1, 15).date()), Some(8));
        assert_eq!(source.cached(at(2024, 1, 16).date()), None);
    }

    #[test]
    fn seed_is_validated_and_invalidate_clears_it() {
        let source = source();
        let stamp = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert!(source.seed(DummySeed { id: 500, stamp }).is_err());
        source.seed(DummySeed { id: 3, stamp }).unwrap();
        assert_eq!(source.cached(stamp), Some(3));
        source.invalidate();
        assert_eq!(source.current(), None);
    }

    #[test]
    fn empty_table_is_rejected() {
        assert!(DummyData::new(Vec::new()).is_err());
        let data = DummyData::new(vec![5, 6]).unwrap();
        assert_eq!(data.value_at(1).unwrap(), 6);
        assert!(matches!(data.value_at(2), Err(NepseError::DummyIdOutOfRange { id: 2, len: 2 })));
    }
}
