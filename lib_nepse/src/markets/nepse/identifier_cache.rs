//! # Identifier Cache
//!
//! Memoized symbol to id and sector to symbols lookups built from the company
//! and security lists. Accessors hand out copies; the cached values only change
//! through `store_*` and [`IdentifierCache::invalidate`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::errors::{NepseError, Result};

/// Bucket for securities that have no entry in the company list.
pub const PROMOTER_SECTOR: &str = "Promoter Share";

pub type SymbolIdMap = HashMap<String, i64>;
pub type SectorMap = BTreeMap<String, Vec<String>>;

/// A memoized value with an explicit populated state.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    value: Option<T>,
}

impl<T> Default for CacheEntry<T> {
    fn default() -> Self {
        Self { value: None }
    }
}

impl<T: Clone> CacheEntry<T> {
    pub fn get(&self) -> Option<T> {
        self.value.clone()
    }

    pub fn set(&mut self, value: T) -> T {
        self.value = Some(value.clone());
        value
    }

    pub fn is_populated(&self) -> bool {
        self.value.is_some()
    }

    pub fn clear(&mut self) {
        self.value = None;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityListing {
    pub id: i64,
    pub symbol: String,
    #[serde(default)]
    pub security_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompanyListing {
    pub id: i64,
    pub symbol: String,
    pub sector_name: String,
    #[serde(default)]
    pub company_name: Option<String>,
}

/// The list body as an array of entries.
pub fn as_list(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(NepseError::UnexpectedShape(format!("expected a list, got {other}"))),
    }
}

pub fn parse_listings<T: serde::de::DeserializeOwned>(list: &[Value]) -> Result<Vec<T>> {
    list.iter()
        .map(|entry| T::deserialize(entry).map_err(NepseError::from))
        .collect()
}

pub fn build_security_id_map(securities: &[SecurityListing]) -> SymbolIdMap {
    securities.iter().map(|s| (s.symbol.clone(), s.id)).collect()
}

pub fn build_company_id_map(companies: &[CompanyListing]) -> SymbolIdMap {
    companies.iter().map(|c| (c.symbol.clone(), c.id)).collect()
}

/// Groups every security under its company's sector, or under
/// [`PROMOTER_SECTOR`] when the company list does not know it. Symbols keep
/// security-list order and appear once.
pub fn build_sector_map(companies: &[CompanyListing], securities: &[SecurityListing]) -> SectorMap {
    let sector_of: HashMap<&str, &str> = companies
        .iter()
        .map(|c| (c.symbol.as_str(), c.sector_name.as_str()))
        .collect();

    let mut sectors = SectorMap::new();
    for security in securities {
        let sector = sector_of
            .get(security.symbol.as_str())
            .copied()
            .unwrap_or(PROMOTER_SECTOR);
        let symbols = sectors.entry(sector.to_string()).or_default();
        if !symbols.contains(&security.symbol) {
            symbols.push(security.symbol.clone());
        }
    }
    sectors
}

/// Id of `symbol` (case-insensitive) in `map`.
pub fn lookup(map: &SymbolIdMap, symbol: &str) -> Result<i64> {
    let symbol = symbol.trim().to_uppercase();
    map.get(&symbol)
        .copied()
        .ok_or(NepseError::UnknownSymbol(symbol))
}

#[derive(Debug, Default)]
pub struct IdentifierCache {
    security_ids: Mutex<CacheEntry<SymbolIdMap>>,
    company_ids: Mutex<CacheEntry<SymbolIdMap>>,
    sectors: Mutex<CacheEntry<SectorMap>>,
}

impl IdentifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn security_ids(&self) -> Option<SymbolIdMap> {
        lock(&self.security_ids).get()
    }

    pub fn store_security_ids(&self, map: SymbolIdMap) -> SymbolIdMap {
        lock(&self.security_ids).set(map)
    }

    pub fn company_ids(&self) -> Option<SymbolIdMap> {
        lock(&self.company_ids).get()
    }

    pub fn store_company_ids(&self, map: SymbolIdMap) -> SymbolIdMap {
        lock(&self.company_ids).set(map)
    }

    pub fn sectors(&self) -> Option<SectorMap> {
        lock(&self.sectors).get()
    }

    pub fn store_sectors(&self, map: SectorMap) -> SectorMap {
        lock(&self.sectors).set(map)
    }

    /// Empties every entry; the next accessor call rebuilds from upstream.
    pub fn invalidate(&self) {
        lock(&self.security_ids).clear();
        lock(&self.company_ids).clear();
        lock(&self.sectors).clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn companies() -> Vec<CompanyListing> {
        parse_listings(&as_list(json!([
            {"id": 1, "symbol": "NABIL", "sectorName": "Commercial Banks", "companyName": "Nabil Bank"},
            {"id": 2, "symbol": "NICA", "sectorName": "Commercial Banks"},
            {"id": 3, "symbol": "UPPER", "sectorName": "Hydro Power"}
        ])).unwrap())
        .unwrap()
    }

    fn securities() -> Vec<SecurityListing> {
        parse_listings(&as_list(json!([
            {"id": 131, "symbol": "NABIL"},
            {"id": 2890, "symbol": "NABILP"},
            {"id": 132, "symbol": "UPPER"},
            {"id": 133, "symbol": "NICA"},
            {"id": 133, "symbol": "NICA"}
        ])).unwrap())
        .unwrap()
    }

    #[test]
    fn unknown_companies_fall_into_the_promoter_bucket() {
        let sectors = build_sector_map(&companies(), &securities());
        assert_eq!(sectors["Commercial Banks"], vec!["NABIL", "NICA"]);
        assert_eq!(sectors["Hydro Power"], vec!["UPPER"]);
        assert_eq!(sectors[PROMOTER_SECTOR], vec!["NABILP"]);
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let map = build_security_id_map(&securities());
        assert_eq!(lookup(&map, "nabil").unwrap(), 131);
        assert!(matches!(lookup(&map, "XYZ"), Err(NepseError::UnknownSymbol(s)) if s == "XYZ"));
    }

    #[test]
    fn returned_maps_are_copies() {
        let cache = IdentifierCache::new();
        let mut handed_out = cache.store_security_ids(build_security_id_map(&securities()));
        handed_out.insert("FAKE".into(), 0);
        handed_out.remove("NABIL");

        let cached = cache.security_ids().unwrap();
        assert!(!cached.contains_key("FAKE"));
        assert_eq!(cached["NABIL"], 131);
    }

    #[test]
    fn invalidate_clears_every_entry() {
        let cache = IdentifierCache::new();
        cache.store_security_ids(build_security_id_map(&securities()));
        cache.store_company_ids(build_company_id_map(&companies()));
        cache.store_sectors(build_sector_map(&companies(), &securities()));
        cache.invalidate();
        assert!(cache.security_ids().is_none());
        assert!(cache.company_ids().is_none());
        assert!(cache.sectors().is_none());
    }

    #[test]
    fn malformed_listings_are_rejected() {
        assert!(as_list(json!({"content": []})).is_err());
        assert!(parse_listings::<CompanyListing>(&[json!({"symbol": "X"})]).is_err());
    }
}
