//! # Response Classification
//!
//! Maps every HTTP status onto exactly one outcome and converts failures into
//! typed errors carrying the status and a masked copy of the body.

use serde_json::Value;
use std::collections::HashSet;

use crate::configs::nepse_config::NepseConfig;
use crate::errors::{NepseError, Result};
use crate::retrieve::ky_http::HttpResponse;

/// Replacement for the value of every masked key.
pub const MASK: &str = "***MASKED***";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Client,
    Authentication,
    BadGateway,
    Server,
    Network,
}

pub fn outcome_for(status: u16) -> Outcome {
    match status {
        200..=299 => Outcome::Success,
        400 => Outcome::Client,
        401 => Outcome::Authentication,
        502 => Outcome::BadGateway,
        500..=599 => Outcome::Server,
        _ => Outcome::Network,
    }
}

/// JSON when the body parses, otherwise the trimmed text as a JSON string.
pub fn parse_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.trim().to_string()))
}

/// Redacts credential fields from bodies before they reach errors or logs.
#[derive(Debug, Clone)]
pub struct BodyMasker {
    enabled: bool,
    keys: HashSet<String>,
}

impl BodyMasker {
    pub fn new<I, S>(enabled: bool, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            enabled,
            keys: keys.into_iter().map(|k| k.as_ref().to_ascii_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &NepseConfig) -> Self {
        Self::new(config.mask_request_data, &config.masked_keys)
    }

    /// Recursively replaces the value of every masked key, at any depth.
    pub fn mask_value(&self, value: &Value) -> Value {
        if !self.enabled {
            return value.clone();
        }
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        let masked = if self.keys.contains(&k.to_ascii_lowercase()) {
                            Value::String(MASK.to_string())
                        } else {
                            self.mask_value(v)
                        };
                        (k.clone(), masked)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.mask_value(v)).collect()),
            other => other.clone(),
        }
    }

    /// Serialized, masked copy of a raw body. Non-JSON text is kept as is.
    pub fn mask_text(&self, text: &str) -> String {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => self.mask_value(&value).to_string(),
            Err(_) => text.trim().to_string(),
        }
    }
}

impl Default for BodyMasker {
    fn default() -> Self {
        Self::new(true, ["token", "password", "accessToken", "refreshToken"])
    }
}

/// Parsed body on 2xx, the matching typed error otherwise.
pub fn classify(response: HttpResponse, masker: &BodyMasker) -> Result<Value> {
    let status = response.status;
    let outcome = outcome_for(status);
    if outcome == Outcome::Success {
        return Ok(parse_body(&response.body));
    }

    let body = masker.mask_text(&response.body);
    Err(match outcome {
        Outcome::Client => NepseError::Client { status, body },
        Outcome::Authentication => NepseError::Authentication { status, body },
        Outcome::BadGateway => NepseError::BadGateway { status, body },
        Outcome::Server => NepseError::Server { status, body },
        Outcome::Success | Outcome::Network => NepseError::Network { status, body },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classification_is_total() {
        let expected = [
            (200, Outcome::Success),
            (299, Outcome::Success),
            (300, Outcome::Network),
            (400, Outcome::Client),
            (401, Outcome::Authentication),
            (402, Outcome::Network),
            (499, Outcome::Network),
            (500, Outcome::Server),
            (502, Outcome::BadGateway),
            (503, Outcome::Server),
            (600, Outcome::Network),
        ];
        for (status, outcome) in expected {
            assert_eq!(outcome_for(status), outcome, "status {status}");
        }
    }

    #[test]
    fn success_body_falls_back_to_trimmed_text() {
        assert_eq!(parse_body(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_body("  plain text \n"), json!("plain text"));
    }

    #[test]
    fn nested_credentials_are_masked() {
        let masker = BodyMasker::default();
        let masked = masker.mask_value(&json!({
            "user": {"password": "hunter2", "name": "x"},
            "items": [{"accessToken": "abc"}],
            "token": 5
        }));
        assert_eq!(masked["user"]["password"], MASK);
        assert_eq!(masked["user"]["name"], "x");
        assert_eq!(masked["items"][0]["accessToken"], MASK);
        assert_eq!(masked["token"], MASK);
    }

    #[test]
    fn disabled_masker_keeps_bodies() {
        let masker = BodyMasker::new(false, ["token"]);
        assert_eq!(masker.mask_text(r#"{"token":"t"}"#), r#"{"token":"t"}"#);
    }

    #[test]
    fn errors_carry_status_and_masked_body() {
        let err = classify(
            HttpResponse::new(401, r#"{"token":"secret","message":"expired"}"#),
            &BodyMasker::default(),
        )
        .unwrap_err();
        assert!(err.is_authentication());
        assert_eq!(err.status(), Some(401));
        let body = err.body().unwrap();
        assert!(!body.contains("secret"));
        assert!(body.contains("expired"));
    }
}
