//! Network selection normalization.
//!
//! Raw input is a coin token (`btc`, `bch`, `bcc`) with an optional `t`
//! (testnet) or `r` (regtest) prefix, plus separate testnet/regtest flags.
//! A prefix always wins over the flags.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};

static NETWORK_GRAMMAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([rt])?(btc|bch|bcc)$").expect("network grammar must compile")
});

const MAINNET_PUBKEY_HASH: u8 = 0x00;
const TESTNET_PUBKEY_HASH: u8 = 0x6f;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkCode {
    Bitcoin,
    BitcoinCash,
}

impl NetworkCode {
    /// Canonical coin code used in API paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkCode::Bitcoin => "BTC",
            NetworkCode::BitcoinCash => "BCC",
        }
    }
}

/// Network selection as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNetworkOptions {
    pub network: Option<String>,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default)]
    pub regtest: bool,
}

impl RawNetworkOptions {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: Some(network.into()),
            ..Default::default()
        }
    }

    pub fn testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    pub fn regtest(mut self, regtest: bool) -> Self {
        self.regtest = regtest;
        self
    }
}

/// Canonical network selection. `regtest` always implies `testnet`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkOptions {
    pub code: NetworkCode,
    pub testnet: bool,
    pub regtest: bool,
    pub api_network: String,
}

impl NetworkOptions {
    pub fn bitcoin_mainnet() -> Self {
        Self::build(NetworkCode::Bitcoin, false, false)
    }

    fn build(code: NetworkCode, testnet: bool, regtest: bool) -> Self {
        let prefix = if regtest {
            "r"
        } else if testnet {
            "t"
        } else {
            ""
        };
        Self {
            code,
            testnet: testnet || regtest,
            regtest,
            api_network: format!("{}{}", prefix, code.as_str()),
        }
    }

    /// Version byte used for pay-to-pubkey-hash encodings on this network.
    pub fn pubkey_hash_version(&self) -> u8 {
        if self.testnet {
            TESTNET_PUBKEY_HASH
        } else {
            MAINNET_PUBKEY_HASH
        }
    }

    /// Parameters used for extended key serialization.
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        if self.regtest {
            bitcoin::Network::Regtest
        } else if self.testnet {
            bitcoin::Network::Testnet
        } else {
            bitcoin::Network::Bitcoin
        }
    }

    pub fn network_kind(&self) -> bitcoin::NetworkKind {
        if self.testnet {
            bitcoin::NetworkKind::Test
        } else {
            bitcoin::NetworkKind::Main
        }
    }
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self::bitcoin_mainnet()
    }
}

/// Resolve raw network input into its canonical form.
pub fn normalize(raw: &RawNetworkOptions) -> WalletResult<NetworkOptions> {
    let token = raw.network.as_deref().unwrap_or("btc").trim();
    let captures = NETWORK_GRAMMAR
        .captures(token)
        .ok_or_else(|| WalletError::InvalidNetwork(token.to_string()))?;

    let code = match captures[2].to_ascii_lowercase().as_str() {
        "btc" => NetworkCode::Bitcoin,
        _ => NetworkCode::BitcoinCash,
    };

    let (testnet, regtest) = match captures.get(1).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(prefix) if prefix == "r" => (true, true),
        Some(_) => (true, false),
        None => (raw.testnet || raw.regtest, raw.regtest),
    };

    let options = NetworkOptions::build(code, testnet, regtest);
    log::debug!("Resolved network {} to {}", token, options.api_network);
    Ok(options)
}
