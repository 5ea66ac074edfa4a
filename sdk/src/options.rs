//! Caller-facing options of the provisioning flows and the single
//! validation pass that turns them into resolved records.
//!
//! Every problem found is collected; one problem is returned as-is, several
//! become [`WalletError::InvalidOptions`]. Nothing here performs I/O.

use std::fmt;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::encryption::{
    EncryptionPipeline, LegacyPipeline, ProvidedSecret, RecoverySecretOption, StoredBlob,
    StrengthenedPipeline, WalletSecret,
};
use crate::errors::{WalletError, WalletResult};
use crate::keys::{BackupKeyOptions, PrimaryKeyOptions, MAX_KEY_INDEX};
use crate::network::{normalize, NetworkOptions, RawNetworkOptions};
use crate::validation::InputValidator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "v1")]
    V1,
    #[serde(rename = "v2")]
    V2,
    #[default]
    #[serde(rename = "v3")]
    V3,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V1 => "v1",
            ProtocolVersion::V2 => "v2",
            ProtocolVersion::V3 => "v3",
        }
    }

    pub fn as_number(&self) -> u8 {
        match self {
            ProtocolVersion::V1 => 1,
            ProtocolVersion::V2 => 2,
            ProtocolVersion::V3 => 3,
        }
    }

    /// Parse an encrypted blob in the container format of this version.
    pub(crate) fn parse_blob(&self, wire: &str) -> WalletResult<StoredBlob> {
        match self {
            ProtocolVersion::V1 => Err(WalletError::InvalidResponse(
                "v1 wallets carry no encrypted data".to_string(),
            )),
            ProtocolVersion::V2 => LegacyPipeline.parse_blob(wire),
            ProtocolVersion::V3 => StrengthenedPipeline::default().parse_blob(wire),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(ProtocolVersion::V1),
            "v2" | "2" => Ok(ProtocolVersion::V2),
            "v3" | "3" => Ok(ProtocolVersion::V3),
            other => Err(WalletError::ValidationError(format!(
                "Invalid wallet version: {}",
                other
            ))),
        }
    }
}

/// Options of `create_wallet`. Consumed by validation.
#[derive(Default)]
pub struct WalletCreationOptions {
    pub identifier: String,
    pub version: ProtocolVersion,
    /// Overrides the client's network for this call.
    pub network: Option<RawNetworkOptions>,
    pub primary: PrimaryKeyOptions,
    pub backup: BackupKeyOptions,
    pub key_index: u32,
    pub segwit: bool,
    /// Defaults to true unless a primary seed is supplied.
    pub store_data_on_server: Option<bool>,
    /// Legacy spelling. For v2/v3 `Some(true)` forces storage, for v1 it
    /// decides whether the primary mnemonic is sent.
    pub store_primary_mnemonic: Option<bool>,
    pub secret: Option<ProvidedSecret>,
    /// Base64 container matching `secret`, passed through unchanged.
    pub encrypted_secret: Option<String>,
    pub recovery: RecoverySecretOption,
    pub support_secret: Option<String>,
}

impl WalletCreationOptions {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.primary.passphrase = Some(SecretString::from(passphrase.into()));
        self
    }

    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_key_index(mut self, key_index: u32) -> Self {
        self.key_index = key_index;
        self
    }

    /// Run every local check and resolve defaults.
    pub fn validate(
        self,
        default_network: &RawNetworkOptions,
        validator: &InputValidator,
    ) -> WalletResult<ValidatedCreation> {
        let mut issues = Vec::new();

        if let Err(issue) = validator.validate_identifier(&self.identifier) {
            issues.push(issue);
        }

        let network = match normalize(self.network.as_ref().unwrap_or(default_network)) {
            Ok(network) => Some(network),
            Err(issue) => {
                issues.push(issue);
                None
            }
        };

        issues.extend(self.primary.conflicts());
        issues.extend(self.backup.conflicts());

        if self.key_index > MAX_KEY_INDEX {
            issues.push(WalletError::ValidationError(format!(
                "Key index {} out of range",
                self.key_index
            )));
        }

        let has_passphrase = self
            .primary
            .effective_passphrase()
            .is_some_and(|p| !p.expose_secret().is_empty());
        let has_mnemonic = self.primary.primary_mnemonic.is_some();
        let has_seed = self.primary.primary_seed.is_some();

        if has_mnemonic && !has_passphrase {
            issues.push(WalletError::MissingPassphrase(
                "Can't generate wallet from mnemonic without passphrase".to_string(),
            ));
        }

        let mut store_data_on_server = false;
        let mut store_primary_mnemonic = false;
        let mut encrypted_secret = None;

        match self.version {
            ProtocolVersion::V1 => {
                if !has_mnemonic && !has_seed {
                    if !has_passphrase {
                        issues.push(WalletError::MissingPassphrase(
                            "Can't generate Primary Mnemonic without a passphrase".to_string(),
                        ));
                    }
                    store_primary_mnemonic = self.store_primary_mnemonic != Some(false);
                } else {
                    store_primary_mnemonic = has_mnemonic && self.store_primary_mnemonic == Some(true);
                }
                if self.secret.is_some() || self.encrypted_secret.is_some() {
                    issues.push(WalletError::ConflictingOptions(
                        "v1 wallets do not use a secret".to_string(),
                    ));
                }
            }
            ProtocolVersion::V2 | ProtocolVersion::V3 => {
                store_data_on_server = if self.store_primary_mnemonic == Some(true) {
                    true
                } else {
                    self.store_data_on_server.unwrap_or(!has_seed)
                };

                if !store_data_on_server && !has_seed && !has_mnemonic {
                    issues.push(WalletError::ConflictingOptions(
                        "A generated primary seed must be stored on the server".to_string(),
                    ));
                }

                match (&self.secret, self.version) {
                    (Some(WalletSecret::Bytes(_)), ProtocolVersion::V2) => {
                        issues.push(WalletError::ValidationError(
                            "Protocol v2 secrets must be text".to_string(),
                        ))
                    }
                    (Some(WalletSecret::Text(_)), ProtocolVersion::V3) => {
                        issues.push(WalletError::ValidationError(
                            "Protocol v3 secrets must be raw bytes".to_string(),
                        ))
                    }
                    (Some(secret), _) if secret.key_bytes().is_empty() => issues.push(
                        WalletError::ValidationError("Secret cannot be empty".to_string()),
                    ),
                    _ => {}
                }

                if self.secret.is_some() && !store_data_on_server {
                    issues.push(WalletError::ConflictingOptions(
                        "A secret is only used when data is stored on the server".to_string(),
                    ));
                }

                match (&self.secret, &self.encrypted_secret) {
                    (Some(_), Some(wire)) => match self.version.parse_blob(wire) {
                        Ok(blob) => encrypted_secret = Some(blob),
                        Err(_) => issues.push(WalletError::ValidationError(
                            "Malformed encrypted secret".to_string(),
                        )),
                    },
                    (None, Some(_)) => issues.push(WalletError::ConflictingOptions(
                        "An encrypted secret requires its secret".to_string(),
                    )),
                    (Some(_), None) => issues.push(WalletError::ConflictingOptions(
                        "A provided secret requires its encrypted secret".to_string(),
                    )),
                    (None, None) => {}
                }

                if store_data_on_server && self.secret.is_none() && !has_passphrase {
                    issues.push(WalletError::MissingPassphrase(
                        "Can't encrypt data without a passphrase".to_string(),
                    ));
                }
            }
        }

        if let Some(issue) = WalletError::from_issues(issues) {
            return Err(issue);
        }
        let network = network.ok_or_else(|| WalletError::InvalidNetwork("unresolved".to_string()))?;

        Ok(ValidatedCreation {
            identifier: self.identifier,
            version: self.version,
            network,
            primary: self.primary,
            backup: self.backup,
            key_index: self.key_index,
            segwit: self.segwit,
            store_data_on_server,
            store_primary_mnemonic,
            secret: self.secret,
            encrypted_secret,
            recovery: self.recovery,
            support_secret: self.support_secret,
        })
    }
}

/// Creation options after validation, with defaults applied.
pub struct ValidatedCreation {
    pub identifier: String,
    pub version: ProtocolVersion,
    pub network: NetworkOptions,
    pub primary: PrimaryKeyOptions,
    pub backup: BackupKeyOptions,
    pub key_index: u32,
    pub segwit: bool,
    pub store_data_on_server: bool,
    pub store_primary_mnemonic: bool,
    pub secret: Option<ProvidedSecret>,
    pub encrypted_secret: Option<StoredBlob>,
    pub recovery: RecoverySecretOption,
    pub support_secret: Option<String>,
}

impl fmt::Debug for ValidatedCreation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedCreation")
            .field("identifier", &self.identifier)
            .field("version", &self.version)
            .field("network", &self.network.api_network)
            .field("key_index", &self.key_index)
            .field("store_data_on_server", &self.store_data_on_server)
            .field("store_primary_mnemonic", &self.store_primary_mnemonic)
            .finish_non_exhaustive()
    }
}

/// Material used to unlock an existing wallet. Which fields are needed
/// depends on the wallet version and on whether its data is stored remotely.
#[derive(Default)]
pub struct UnlockOptions {
    pub passphrase: Option<SecretString>,
    /// v1 wallets whose mnemonic is not stored remotely.
    pub primary_mnemonic: Option<SecretString>,
    /// v2/v3 wallets created without server-side storage.
    pub primary_seed: Option<Zeroizing<Vec<u8>>>,
    pub secret: Option<WalletSecret>,
}

impl UnlockOptions {
    pub fn passphrase(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Some(SecretString::from(passphrase.into())),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.passphrase.is_none()
            && self.primary_mnemonic.is_none()
            && self.primary_seed.is_none()
            && self.secret.is_none()
    }

    pub(crate) fn conflicts(&self) -> Vec<WalletError> {
        let mut issues = Vec::new();
        if self.primary_mnemonic.is_some() && self.primary_seed.is_some() {
            issues.push(WalletError::ConflictingOptions(
                "Can only specify one of primary mnemonic or primary seed".to_string(),
            ));
        }
        if self.primary_seed.is_some() && self.secret.is_some() {
            issues.push(WalletError::ConflictingOptions(
                "Can only specify one of primary seed or secret".to_string(),
            ));
        }
        issues
    }
}

/// Options of `init_wallet`.
#[derive(Default)]
pub struct InitWalletOptions {
    pub identifier: String,
    pub network: Option<RawNetworkOptions>,
    pub unlock: UnlockOptions,
    /// Overrides the key index reported by the service.
    pub key_index: Option<u32>,
    /// Expected backup public key (base58); init fails when the service
    /// returns a different one.
    pub check_backup_key: Option<String>,
    /// Skip unlocking; the handle only exposes public data.
    pub read_only: bool,
}

impl InitWalletOptions {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.unlock.passphrase = Some(SecretString::from(passphrase.into()));
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn validate(
        self,
        default_network: &RawNetworkOptions,
        validator: &InputValidator,
    ) -> WalletResult<ValidatedInit> {
        let mut issues = Vec::new();

        if let Err(issue) = validator.validate_identifier(&self.identifier) {
            issues.push(issue);
        }

        let network = match normalize(self.network.as_ref().unwrap_or(default_network)) {
            Ok(network) => Some(network),
            Err(issue) => {
                issues.push(issue);
                None
            }
        };

        issues.extend(self.unlock.conflicts());

        if let Some(key_index) = self.key_index {
            if key_index > MAX_KEY_INDEX {
                issues.push(WalletError::ValidationError(format!(
                    "Key index {} out of range",
                    key_index
                )));
            }
        }

        if let Some(backup_key) = &self.check_backup_key {
            if backup_key.trim().is_empty() {
                issues.push(WalletError::ValidationError(
                    "Backup key to check must be an extended public key".to_string(),
                ));
            }
        }

        if !self.read_only && self.unlock.is_empty() {
            issues.push(WalletError::MissingPassphrase(
                "Unlocking requires a passphrase, primary seed or secret".to_string(),
            ));
        }

        if let Some(issue) = WalletError::from_issues(issues) {
            return Err(issue);
        }
        let network = network.ok_or_else(|| WalletError::InvalidNetwork("unresolved".to_string()))?;

        Ok(ValidatedInit {
            identifier: self.identifier,
            network,
            unlock: self.unlock,
            key_index: self.key_index,
            check_backup_key: self.check_backup_key,
            read_only: self.read_only,
        })
    }
}

pub struct ValidatedInit {
    pub identifier: String,
    pub network: NetworkOptions,
    pub unlock: UnlockOptions,
    pub key_index: Option<u32>,
    pub check_backup_key: Option<String>,
    pub read_only: bool,
}

impl fmt::Debug for ValidatedInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedInit")
            .field("identifier", &self.identifier)
            .field("network", &self.network.api_network)
            .field("key_index", &self.key_index)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> InputValidator {
        InputValidator::new().unwrap()
    }

    fn mainnet() -> RawNetworkOptions {
        RawNetworkOptions::new("btc")
    }

    #[test]
    fn version_wire_names() {
        assert_eq!(serde_json::to_string(&ProtocolVersion::V3).unwrap(), "\"v3\"");
        assert_eq!("V2".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V2);
        assert!("v4".parse::<ProtocolVersion>().is_err());
        assert_eq!(ProtocolVersion::default().as_number(), 3);
    }

    #[test]
    fn passphrase_only_creation_stores_data() {
        let validated = WalletCreationOptions::new("w1")
            .with_passphrase("correct horse")
            .validate(&mainnet(), &validator())
            .unwrap();
        assert_eq!(validated.version, ProtocolVersion::V3);
        assert!(validated.store_data_on_server);
        assert_eq!(validated.network.api_network, "BTC");
    }

    #[test]
    fn supplied_seed_disables_storage_by_default() {
        let mut options = WalletCreationOptions::new("w1");
        options.primary.primary_seed = Some(Zeroizing::new(vec![1u8; 32]));
        let validated = options.validate(&mainnet(), &validator()).unwrap();
        assert!(!validated.store_data_on_server);

        let mut options = WalletCreationOptions::new("w1").with_passphrase("pw");
        options.primary.primary_seed = Some(Zeroizing::new(vec![1u8; 32]));
        options.store_primary_mnemonic = Some(true);
        let validated = options.validate(&mainnet(), &validator()).unwrap();
        assert!(validated.store_data_on_server);
    }

    #[test]
    fn missing_identifier_is_reported_alone() {
        let err = WalletCreationOptions::new("")
            .with_passphrase("pw")
            .validate(&mainnet(), &validator())
            .unwrap_err();
        assert_eq!(err, WalletError::MissingIdentifier);
    }

    #[test]
    fn all_problems_are_collected() {
        let mut options = WalletCreationOptions::new("");
        options.primary.primary_mnemonic = Some(SecretString::from("abandon".to_string()));
        options.primary.primary_seed = Some(Zeroizing::new(vec![1u8; 32]));
        options.network = Some(RawNetworkOptions::new("ltc"));

        let err = options.validate(&mainnet(), &validator()).unwrap_err();
        let WalletError::InvalidOptions(issues) = err else {
            panic!("expected a collected error set");
        };
        assert!(issues.contains(&WalletError::MissingIdentifier));
        assert!(issues
            .iter()
            .any(|issue| matches!(issue, WalletError::ConflictingOptions(_))));
        assert!(issues
            .iter()
            .any(|issue| matches!(issue, WalletError::InvalidNetwork(_))));
    }

    #[test]
    fn storage_without_passphrase_is_rejected() {
        let err = WalletCreationOptions::new("w1")
            .validate(&mainnet(), &validator())
            .unwrap_err();
        assert!(matches!(err, WalletError::MissingPassphrase(_)));
    }

    #[test]
    fn secret_type_follows_version() {
        let mut options = WalletCreationOptions::new("w1")
            .with_passphrase("pw")
            .with_version(ProtocolVersion::V2);
        options.secret = Some(WalletSecret::Bytes(Zeroizing::new(vec![1u8; 32])));
        let err = options.validate(&mainnet(), &validator()).unwrap_err();
        let WalletError::InvalidOptions(issues) = err else {
            panic!("expected a collected error set");
        };
        assert!(issues
            .iter()
            .any(|issue| matches!(issue, WalletError::ValidationError(msg) if msg.contains("text"))));
    }

    #[test]
    fn v1_generation_needs_passphrase_and_stores_mnemonic() {
        let err = WalletCreationOptions::new("w1")
            .with_version(ProtocolVersion::V1)
            .validate(&mainnet(), &validator())
            .unwrap_err();
        assert!(matches!(err, WalletError::MissingPassphrase(_)));

        let validated = WalletCreationOptions::new("w1")
            .with_passphrase("pw")
            .with_version(ProtocolVersion::V1)
            .validate(&mainnet(), &validator())
            .unwrap();
        assert!(validated.store_primary_mnemonic);
        assert!(!validated.store_data_on_server);
    }

    #[test]
    fn init_requires_unlock_material_unless_read_only() {
        let err = InitWalletOptions::new("w1")
            .validate(&mainnet(), &validator())
            .unwrap_err();
        assert!(matches!(err, WalletError::MissingPassphrase(_)));

        let validated = InitWalletOptions::new("w1")
            .read_only()
            .validate(&RawNetworkOptions::new("tbtc"), &validator())
            .unwrap();
        assert!(validated.read_only);
        assert_eq!(validated.network.api_network, "tBTC");
    }
}
