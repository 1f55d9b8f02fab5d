//! Endpoint paths of the convenience methods, built from the configured
//! endpoint table.

use chrono::NaiveDate;

use crate::configs::nepse_config::NepseConfig;
use crate::errors::Result;

pub(crate) struct Routes<'a> {
    config: &'a NepseConfig,
}

impl<'a> Routes<'a> {
    pub(crate) fn new(config: &'a NepseConfig) -> Self {
        Self { config }
    }

    fn endpoint(&self, key: &str) -> Result<&'a str> {
        Ok(self.config.endpoint(key)?)
    }

    pub(crate) fn authenticate(&self) -> Result<&'a str> {
        self.endpoint("authenticate")
    }

    pub(crate) fn market_status(&self) -> Result<&'a str> {
        self.endpoint("nepse_open_url")
    }

    pub(crate) fn company_list(&self) -> Result<&'a str> {
        self.endpoint("company_list_url")
    }

    pub(crate) fn security_list(&self) -> Result<&'a str> {
        self.endpoint("security_list_url")
    }

    pub(crate) fn floor_sheet(&self) -> Result<String> {
        Ok(format!(
            "{}?&size={}&sort=contractId,desc",
            self.endpoint("floor_sheet")?,
            self.config.floor_sheet_size
        ))
    }

    pub(crate) fn floor_sheet_of(&self, security_id: i64, business_date: NaiveDate) -> Result<String> {
        Ok(format!(
            "{}{}?&businessDate={}&size={}&sort=contractid,desc",
            self.endpoint("company_floorsheet")?,
            security_id,
            business_date.format("%Y-%m-%d"),
            self.config.floor_sheet_size
        ))
    }

    pub(crate) fn company_details(&self, security_id: i64) -> Result<String> {
        Ok(format!("{}{}", self.endpoint("company_details")?, security_id))
    }

    pub(crate) fn daily_scrip_price_graph(&self, security_id: i64) -> Result<String> {
        Ok(format!("{}{}", self.endpoint("company_daily_graph")?, security_id))
    }

    pub(crate) fn price_volume_history(&self, business_date: Option<NaiveDate>) -> Result<String> {
        let date = business_date
            .map(|d| format!("&businessDate={}", d.format("%Y-%m-%d")))
            .unwrap_or_default();
        Ok(format!(
            "{}?&size={}{}",
            self.endpoint("todays_price")?,
            self.config.floor_sheet_size,
            date
        ))
    }
}
