//! Client configuration, from code and from `COSIGN_*` environment variables.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::network::{NetworkOptions, RawNetworkOptions};
use crate::session::SessionSettings;

pub const DEFAULT_HOST: &str = "api.blocktrail.com";
pub const DEFAULT_API_VERSION: &str = "v1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const ENV_API_KEY: &str = "COSIGN_API_KEY";
const ENV_API_HOST: &str = "COSIGN_API_HOST";
const ENV_API_ENDPOINT: &str = "COSIGN_API_ENDPOINT";
const ENV_NETWORK: &str = "COSIGN_NETWORK";
const ENV_TESTNET: &str = "COSIGN_TESTNET";
const ENV_REGTEST: &str = "COSIGN_REGTEST";
const ENV_OFFLOAD_CRYPTO: &str = "COSIGN_OFFLOAD_CRYPTO";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Read but never written.
    #[serde(skip_serializing)]
    pub api_key: String,
    /// May carry an `http://` or `https://` prefix, which then decides `https`.
    pub host: String,
    pub port: Option<u16>,
    pub https: bool,
    pub api_version: String,
    /// Full base URL, replacing host, port, version and network.
    pub endpoint: Option<String>,
    pub network: String,
    pub testnet: bool,
    pub regtest: bool,
    pub request_timeout_secs: u64,
    pub offload_crypto: bool,
    pub auto_lock_minutes: u32,
    pub max_failed_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let sessions = SessionSettings::default();
        Self {
            api_key: String::new(),
            host: DEFAULT_HOST.to_string(),
            port: None,
            https: true,
            api_version: DEFAULT_API_VERSION.to_string(),
            endpoint: None,
            network: "BTC".to_string(),
            testnet: false,
            regtest: false,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            offload_crypto: true,
            auto_lock_minutes: (sessions.timeout.as_secs() / 60) as u32,
            max_failed_attempts: sessions.max_failed_attempts,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("https", &self.https)
            .field("api_version", &self.api_version)
            .field("endpoint", &self.endpoint)
            .field("network", &self.network)
            .field("testnet", &self.testnet)
            .field("regtest", &self.regtest)
            .field("has_api_key", &!self.api_key.is_empty())
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Defaults overridden by the `COSIGN_*` environment variables.
    pub fn from_env() -> WalletResult<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F) -> WalletResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| -> Option<String> {
            let value = lookup(key)?;
            if value.trim().is_empty() {
                log::warn!("Environment variable {} is empty", key);
                return None;
            }
            if value.chars().any(|c| c.is_control()) {
                log::warn!("Environment variable {} contains control characters, ignoring", key);
                return None;
            }
            log::debug!("Loaded configuration from environment variable {}", key);
            Some(value.trim().to_string())
        };

        if let Some(value) = read(ENV_API_KEY) {
            self.api_key = value;
        }
        if let Some(value) = read(ENV_API_HOST) {
            self.host = value;
        }
        if let Some(value) = read(ENV_API_ENDPOINT) {
            self.endpoint = Some(value);
        }
        if let Some(value) = read(ENV_NETWORK) {
            self.network = value;
        }
        if let Some(value) = read(ENV_TESTNET) {
            self.testnet = parse_bool_flag(&value, ENV_TESTNET)?;
        }
        if let Some(value) = read(ENV_REGTEST) {
            self.regtest = parse_bool_flag(&value, ENV_REGTEST)?;
        }
        if let Some(value) = read(ENV_OFFLOAD_CRYPTO) {
            self.offload_crypto = parse_bool_flag(&value, ENV_OFFLOAD_CRYPTO)?;
        }
        Ok(())
    }

    pub fn raw_network(&self) -> RawNetworkOptions {
        RawNetworkOptions::new(self.network.clone())
            .testnet(self.testnet)
            .regtest(self.regtest)
    }

    /// Scheme and host with any scheme prefix of `host` applied.
    fn scheme_and_host(&self) -> (&'static str, &str) {
        let host = self.host.trim().trim_end_matches('/');
        if let Some(rest) = host.strip_prefix("https://") {
            ("https", rest)
        } else if let Some(rest) = host.strip_prefix("http://") {
            ("http", rest)
        } else if self.https {
            ("https", host)
        } else {
            ("http", host)
        }
    }

    /// Base URL of every call: `{scheme}://{host}[:{port}]/{api_version}/{network}`.
    pub fn endpoint_url(&self, network: &NetworkOptions) -> String {
        if let Some(endpoint) = self.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
            return endpoint.trim().trim_end_matches('/').to_string();
        }
        let (scheme, host) = self.scheme_and_host();
        let default_port = if scheme == "https" { 443 } else { 80 };
        let authority = match self.port {
            Some(port) if port != default_port => format!("{}:{}", host, port),
            _ => host.to_string(),
        };
        format!(
            "{}://{}/{}/{}",
            scheme, authority, self.api_version, network.api_network
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            timeout: Duration::from_secs(u64::from(self.auto_lock_minutes.max(1)) * 60),
            max_failed_attempts: self.max_failed_attempts.max(1),
        }
    }

    pub fn validate(&self) -> WalletResult<()> {
        let mut issues = Vec::new();
        if self.host.trim().is_empty() && self.endpoint.is_none() {
            issues.push(WalletError::ValidationError("API host cannot be empty".to_string()));
        }
        if self.api_version.trim().is_empty() {
            issues.push(WalletError::ValidationError(
                "API version cannot be empty".to_string(),
            ));
        }
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("https://") && !endpoint.starts_with("http://") {
                issues.push(WalletError::ValidationError(format!(
                    "Endpoint {} must start with http:// or https://",
                    endpoint
                )));
            }
        }
        match WalletError::from_issues(issues) {
            Some(issue) => Err(issue),
            None => Ok(()),
        }
    }
}

fn parse_bool_flag(value: &str, key: &str) -> WalletResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(WalletError::ValidationError(format!(
            "Invalid boolean value '{}' for key '{}'",
            value, key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::normalize;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_endpoint_url() {
        let config = ClientConfig::new("key");
        let network = normalize(&config.raw_network()).unwrap();
        assert_eq!(
            config.endpoint_url(&network),
            "https://api.blocktrail.com/v1/BTC"
        );
    }

    #[test]
    fn host_prefix_and_port() {
        let config = ClientConfig {
            host: "http://localhost/".to_string(),
            port: Some(3000),
            testnet: true,
            ..Default::default()
        };
        let network = normalize(&config.raw_network()).unwrap();
        assert_eq!(config.endpoint_url(&network), "http://localhost:3000/v1/tBTC");

        let config = ClientConfig {
            port: Some(443),
            ..Default::default()
        };
        let network = normalize(&config.raw_network()).unwrap();
        assert!(config.endpoint_url(&network).starts_with("https://api.blocktrail.com/v1"));
    }

    #[test]
    fn explicit_endpoint_wins() {
        let config = ClientConfig {
            endpoint: Some("http://127.0.0.1:8080/custom/".to_string()),
            ..Default::default()
        };
        let network = NetworkOptions::bitcoin_mainnet();
        assert_eq!(config.endpoint_url(&network), "http://127.0.0.1:8080/custom");
    }

    #[test]
    fn env_overrides() {
        let mut config = ClientConfig::default();
        config
            .apply_env(env(&[
                (ENV_API_KEY, "abc"),
                (ENV_NETWORK, "BCC"),
                (ENV_TESTNET, "yes"),
                (ENV_OFFLOAD_CRYPTO, "0"),
                (ENV_API_HOST, "   "),
                (ENV_API_ENDPOINT, "http://x\n"),
            ]))
            .unwrap();
        assert_eq!(config.api_key, "abc");
        assert_eq!(config.network, "BCC");
        assert!(config.testnet);
        assert!(!config.offload_crypto);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.endpoint, None);
    }

    #[test]
    fn malformed_boolean_is_rejected() {
        let mut config = ClientConfig::default();
        let err = config.apply_env(env(&[(ENV_REGTEST, "maybe")])).unwrap_err();
        assert!(matches!(err, WalletError::ValidationError(msg) if msg.contains(ENV_REGTEST)));
    }

    #[test]
    fn serde_fills_missing_fields_with_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"api_key":"key","network":"BCC"}"#).unwrap();
        assert_eq!(config.api_key, "key");
        assert_eq!(config.network, "BCC");
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert!(config.https && config.offload_crypto);
        assert!(!format!("{:?}", config).contains("\"key\""));
    }

    #[test]
    fn api_key_is_not_serialized() {
        let encoded = serde_json::to_string(&ClientConfig::new("secret-api-key")).unwrap();
        assert!(!encoded.contains("api_key"));
        assert!(!encoded.contains("secret-api-key"));
    }

    #[test]
    fn validate_endpoint_scheme() {
        let config = ClientConfig {
            endpoint: Some("ftp://nope".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(ClientConfig::default().validate().is_ok());
    }
}
