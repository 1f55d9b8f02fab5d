use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fmt, fs};

use chrono_tz::Tz;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, HOST, REFERER};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::retrieve::backoff::RetrySettings;
use crate::retrieve::ky_http::TransportOptions;

pub const DEFAULT_BASE_URL: &str = "https://nepalstock.com.np";

pub const SETTINGS_FILE_NAME: &str = "nepse.settings.json";
pub const ENDPOINTS_FILE_NAME: &str = "API_ENDPOINTS.json";
pub const HEADERS_FILE_NAME: &str = "HEADERS.json";
pub const DUMMY_DATA_FILE_NAME: &str = "DUMMY_DATA.json";

const EMBEDDED_ENDPOINTS: &str = include_str!("../../data/API_ENDPOINTS.json");
const EMBEDDED_HEADERS: &str = include_str!("../../data/HEADERS.json");
const EMBEDDED_DUMMY_DATA: &str = include_str!("../../data/DUMMY_DATA.json");

/// Endpoints the pipeline itself depends on.
pub const REQUIRED_ENDPOINTS: [&str; 9] = [
    "authenticate",
    "nepse_open_url",
    "company_list_url",
    "security_list_url",
    "floor_sheet",
    "company_floorsheet",
    "company_details",
    "company_daily_graph",
    "todays_price",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Environment variable {var} has an invalid value: {value}")]
    InvalidEnv { var: String, value: String },

    #[error("Dummy data table is empty")]
    EmptyDummyData,

    #[error("Base URL is not an absolute http(s) URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Endpoint {0} is not configured")]
    MissingEndpoint(String),

    #[error("Unknown market timezone: {0}")]
    UnknownTimezone(String),

    #[error("Invalid header {0}")]
    InvalidHeader(String),
}

/// Scalar settings that may be overridden from `nepse.settings.json`.
///
/// Every field is optional; only present ones replace the current value.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NepseSettings {
    pub base_url: Option<String>,
    pub floor_sheet_size: Option<u32>,
    pub tls_verify: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub token_validity_secs: Option<u64>,
    pub market_timezone: Option<String>,
    pub page_concurrency: Option<usize>,
    pub mask_request_data: Option<bool>,
    pub masked_keys: Option<Vec<String>>,
    pub retry: Option<RetrySettings>,
}

/// Everything the client needs to talk to the upstream service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NepseConfig {
    pub base_url: String,
    /// Endpoint name to path template (path may carry a query string).
    pub endpoints: BTreeMap<String, String>,
    /// Static headers sent with every request.
    pub headers: BTreeMap<String, String>,
    pub dummy_data: Vec<i64>,
    pub floor_sheet_size: u32,
    pub tls_verify: bool,
    pub timeout_secs: u64,
    pub token_validity_secs: u64,
    pub market_timezone: String,
    pub page_concurrency: usize,
    /// Mask credential fields of bodies copied into errors and logs.
    pub mask_request_data: bool,
    pub masked_keys: Vec<String>,
    pub retry: RetrySettings,
}

impl NepseConfig {
    /// Bundled endpoints, headers and dummy data with default settings.
    pub fn embedded() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            endpoints: parse_json(EMBEDDED_ENDPOINTS, ENDPOINTS_FILE_NAME)?,
            headers: parse_json(EMBEDDED_HEADERS, HEADERS_FILE_NAME)?,
            dummy_data: parse_json(EMBEDDED_DUMMY_DATA, DUMMY_DATA_FILE_NAME)?,
            floor_sheet_size: 500,
            tls_verify: true,
            timeout_secs: 100,
            token_validity_secs: 45,
            market_timezone: "Asia/Kathmandu".to_string(),
            page_concurrency: 8,
            mask_request_data: true,
            masked_keys: ["token", "password", "accessToken", "refreshToken"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
            retry: RetrySettings::default(),
        })
    }

    /// Starts from [`embedded`](Self::embedded) and applies whatever of
    /// `nepse.settings.json`, `API_ENDPOINTS.json`, `HEADERS.json` and
    /// `DUMMY_DATA.json` exists in `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let mut config = Self::embedded()?;

        if let Some(settings) = read_optional::<NepseSettings>(&dir.join(SETTINGS_FILE_NAME))? {
            config = config.merge(settings);
        }
        if let Some(endpoints) = read_optional(&dir.join(ENDPOINTS_FILE_NAME))? {
            config.endpoints = endpoints;
        }
        if let Some(headers) = read_optional(&dir.join(HEADERS_FILE_NAME))? {
            config.headers = headers;
        }
        if let Some(dummy_data) = read_optional(&dir.join(DUMMY_DATA_FILE_NAME))? {
            config.dummy_data = dummy_data;
        }
        Ok(config)
    }

    /// Process configuration: `.env`, then `NEPSE_CONFIGS_LOCATION` (or the
    /// bundled data), then the `NEPSE_*` overrides. The result is validated.
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();

        let mut config = match env::var("NEPSE_CONFIGS_LOCATION") {
            Ok(location) if !location.trim().is_empty() => Self::from_dir(location.trim())?,
            _ => Self::embedded()?,
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `NEPSE_BASE_URL`, `NEPSE_TLS_VERIFY` and `NEPSE_TIMEOUT_SECS`
    /// as reported by `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup("NEPSE_BASE_URL") {
            self.base_url = base_url.trim().to_string();
        }
        if let Some(value) = lookup("NEPSE_TLS_VERIFY") {
            self.tls_verify = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::InvalidEnv { var: "NEPSE_TLS_VERIFY".into(), value }),
            };
        }
        if let Some(value) = lookup("NEPSE_TIMEOUT_SECS") {
            self.timeout_secs = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "NEPSE_TIMEOUT_SECS".into(),
                value: value.clone(),
            })?;
        }
        Ok(())
    }

    // Present settings win over the current values.
    fn merge(self, other: NepseSettings) -> Self {
        Self {
            base_url: other.base_url.unwrap_or(self.base_url),
            floor_sheet_size: other.floor_sheet_size.unwrap_or(self.floor_sheet_size),
            tls_verify: other.tls_verify.unwrap_or(self.tls_verify),
            timeout_secs: other.timeout_secs.unwrap_or(self.timeout_secs),
            token_validity_secs: other.token_validity_secs.unwrap_or(self.token_validity_secs),
            market_timezone: other.market_timezone.unwrap_or(self.market_timezone),
            page_concurrency: other.page_concurrency.unwrap_or(self.page_concurrency),
            mask_request_data: other.mask_request_data.unwrap_or(self.mask_request_data),
            masked_keys: other.masked_keys.unwrap_or(self.masked_keys),
            retry: other.retry.unwrap_or(self.retry),
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dummy_data.is_empty() {
            return Err(ConfigError::EmptyDummyData);
        }
        self.base()?;
        for key in REQUIRED_ENDPOINTS {
            self.endpoint(key)?;
        }
        self.timezone()?;
        self.header_map()?;
        Ok(())
    }

    pub fn base(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidBaseUrl(self.base_url.clone()))?;
        match url.scheme() {
            "http" | "https" if url.host_str().is_some() => Ok(url),
            _ => Err(ConfigError::InvalidBaseUrl(self.base_url.clone())),
        }
    }

    pub fn endpoint(&self, key: &str) -> Result<&str, ConfigError> {
        self.endpoints
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingEndpoint(key.to_string()))
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.market_timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.market_timezone.clone()))
    }

    /// Static headers plus `Host` and `Referer`, both the bare host of the
    /// base URL as the upstream expects.
    pub fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConfigError::InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ConfigError::InvalidHeader(name.to_string()))?;
            map.insert(name, value);
        }

        let base = self.base()?;
        let host = match (base.host_str(), base.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(ConfigError::InvalidBaseUrl(self.base_url.clone())),
        };
        map.insert(
            HOST,
            HeaderValue::from_str(&host).map_err(|_| ConfigError::InvalidHeader("Host".into()))?,
        );
        map.insert(
            REFERER,
            HeaderValue::from_str(&host).map_err(|_| ConfigError::InvalidHeader("Referer".into()))?,
        );
        Ok(map)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn token_validity(&self) -> Duration {
        Duration::from_secs(self.token_validity_secs)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            tls_verify: self.tls_verify,
            timeout: self.timeout(),
        }
    }
}

impl fmt::Display for NepseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NepseConfig
    Base URL: {},
    Endpoints: {},
    Headers: {},
    Dummy data entries: {},
    TLS verify: {},
    Timeout: {}s,
    Token validity: {}s,
    Market timezone: {},
    Page concurrency: {},
    Retry: {:?}
",
            self.base_url,
            self.endpoints.len(),
            self.headers.len(),
            self.dummy_data.len(),
            self.tls_verify,
            self.timeout_secs,
            self.token_validity_secs,
            self.market_timezone,
            self.page_concurrency,
            self.retry
        )
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(text: &str, origin: &str) -> Result<T, ConfigError> {
    serde_json::from_str(text).map_err(|source| ConfigError::Parse {
        origin: origin.to_string(),
        source,
    })
}

fn read_optional<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, ConfigError> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_json(&text, &path.display().to_string()).map(Some)
}
