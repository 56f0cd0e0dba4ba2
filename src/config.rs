//! Container configuration.
//!
//! Values come from code, from a JSON document, or from the environment:
//!
//! - `GRANTFLOW_LOGGING`: `true`/`false`/`1`/`0`, per-request debug logging
//! - `GRANTFLOW_REQUEST_CODE`: integer request code echoed by the host

use serde::{Deserialize, Serialize};

use crate::host::DEFAULT_REQUEST_CODE;

/// Environment variable toggling per-request debug logging.
pub const ENV_LOGGING: &str = "GRANTFLOW_LOGGING";

/// Environment variable overriding the request code.
pub const ENV_REQUEST_CODE: &str = "GRANTFLOW_REQUEST_CODE";

/// Settings for a permissions container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Emit per-request `debug` records.
    pub logging: bool,
    /// Request code stamped on host prompts; answers with another code are
    /// ignored.
    pub request_code: i32,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            logging: false,
            request_code: DEFAULT_REQUEST_CODE,
        }
    }
}

impl PermissionsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: toggle per-request logging.
    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    /// Builder: override the request code.
    pub fn with_request_code(mut self, request_code: i32) -> Self {
        self.request_code = request_code;
        self
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Malformed values are logged and
    /// replaced by the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_LOGGING) {
            match parse_flag(&raw) {
                Some(flag) => config.logging = flag,
                None => log::warn!(
                    target: "grantflow",
                    "Ignoring {}={:?}: expected a boolean",
                    ENV_LOGGING,
                    raw
                ),
            }
        }

        if let Some(raw) = lookup(ENV_REQUEST_CODE) {
            match raw.trim().parse::<i32>() {
                Ok(code) => config.request_code = code,
                Err(e) => log::warn!(
                    target: "grantflow",
                    "Ignoring {}={:?}: {}",
                    ENV_REQUEST_CODE,
                    raw,
                    e
                ),
            }
        }

        config
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PermissionsConfig::default();
        assert!(!config.logging);
        assert_eq!(config.request_code, 42);
    }

    #[test]
    fn test_from_json_partial() {
        let config = PermissionsConfig::from_json(r#"{"logging": true}"#).unwrap();
        assert!(config.logging);
        assert_eq!(config.request_code, DEFAULT_REQUEST_CODE);
    }

    #[test]
    fn test_from_json_rejects_bad_types() {
        assert!(PermissionsConfig::from_json(r#"{"request_code": "x"}"#).is_err());
    }

    #[test]
    fn test_from_lookup() {
        let config = PermissionsConfig::from_lookup(lookup_from(&[
            (ENV_LOGGING, "on"),
            (ENV_REQUEST_CODE, " 7 "),
        ]));
        assert_eq!(config, PermissionsConfig::new().with_logging(true).with_request_code(7));
    }

    #[test]
    fn test_from_lookup_ignores_malformed() {
        let config = PermissionsConfig::from_lookup(lookup_from(&[
            (ENV_LOGGING, "maybe"),
            (ENV_REQUEST_CODE, "forty-two"),
        ]));
        assert_eq!(config, PermissionsConfig::default());
    }
}
