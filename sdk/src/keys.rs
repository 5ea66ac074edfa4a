//! Primary and backup key material resolution.

use std::fmt;
use std::str::FromStr;

use bip39::Mnemonic;
use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::secp256k1::{All, Secp256k1};
use once_cell::sync::Lazy;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use crate::encryption::{random_bytes, CryptoWorker, WALLET_ENTROPY_BYTES};
use crate::errors::{WalletError, WalletResult};
use crate::network::NetworkOptions;

pub(crate) static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Path of the backup key on the wire.
pub const BACKUP_KEY_PATH: &str = "M";

/// Largest index of a hardened child.
pub const MAX_KEY_INDEX: u32 = (1 << 31) - 1;

/// Inputs that can produce the primary key.
#[derive(Default)]
pub struct PrimaryKeyOptions {
    pub passphrase: Option<SecretString>,
    /// Deprecated alias of `passphrase`.
    pub password: Option<SecretString>,
    pub primary_mnemonic: Option<SecretString>,
    pub primary_seed: Option<Zeroizing<Vec<u8>>>,
    /// Raw private keys are no longer accepted; present only to reject them.
    pub primary_private_key: Option<String>,
}

impl PrimaryKeyOptions {
    /// Conflicts that make the options unusable regardless of protocol version.
    pub fn conflicts(&self) -> Vec<WalletError> {
        let mut issues = Vec::new();
        if self.passphrase.is_some() && self.password.is_some() {
            issues.push(WalletError::ConflictingOptions(
                "Can't specify passphrase and password".to_string(),
            ));
        }
        if self.primary_private_key.is_some() {
            issues.push(WalletError::ConflictingOptions(
                "Specifying the primary private key is no longer supported".to_string(),
            ));
        }
        if self.primary_mnemonic.is_some() && self.primary_seed.is_some() {
            issues.push(WalletError::ConflictingOptions(
                "Can only specify one of primary mnemonic or primary seed".to_string(),
            ));
        }
        issues
    }

    pub fn effective_passphrase(&self) -> Option<&SecretString> {
        self.passphrase.as_ref().or(self.password.as_ref())
    }
}

/// Inputs that can produce the backup public key.
#[derive(Default)]
pub struct BackupKeyOptions {
    pub backup_mnemonic: Option<SecretString>,
    pub backup_public_key: Option<String>,
}

impl BackupKeyOptions {
    pub fn conflicts(&self) -> Vec<WalletError> {
        if self.backup_mnemonic.is_some() && self.backup_public_key.is_some() {
            vec![WalletError::ConflictingOptions(
                "Can only specify one of backup mnemonic or backup public key".to_string(),
            )]
        } else {
            Vec::new()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.backup_mnemonic.is_none() && self.backup_public_key.is_none()
    }
}

/// Seed and master key of the primary tree.
pub struct ResolvedPrimary {
    pub seed: Zeroizing<Vec<u8>>,
    pub private_key: Xpriv,
}

impl ResolvedPrimary {
    pub fn from_seed(seed: Zeroizing<Vec<u8>>, network: &NetworkOptions) -> WalletResult<Self> {
        let private_key = master_key(&seed, network)?;
        Ok(Self { seed, private_key })
    }

    pub fn master_public_key(&self) -> Xpub {
        Xpub::from_priv(&*SECP, &self.private_key)
    }
}

impl fmt::Debug for ResolvedPrimary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedPrimary")
            .field("fingerprint", &self.private_key.fingerprint(&*SECP))
            .finish_non_exhaustive()
    }
}

/// Resolve the primary seed and master private key.
pub async fn resolve_primary(
    options: &PrimaryKeyOptions,
    network: &NetworkOptions,
    worker: CryptoWorker,
) -> WalletResult<ResolvedPrimary> {
    if let Some(issue) = options.conflicts().into_iter().next() {
        return Err(issue);
    }

    let seed = match (&options.primary_mnemonic, &options.primary_seed) {
        (Some(mnemonic), None) => {
            let passphrase = options.effective_passphrase().ok_or_else(|| {
                WalletError::MissingPassphrase(
                    "Can't generate wallet from mnemonic without passphrase".to_string(),
                )
            })?;
            let phrase = Zeroizing::new(mnemonic.expose_secret().to_string());
            let passphrase = Zeroizing::new(passphrase.expose_secret().to_string());
            worker
                .run(move || mnemonic_to_seed(&phrase, &passphrase))
                .await?
        }
        (None, Some(seed)) => seed.clone(),
        _ => {
            return Err(WalletError::ConflictingOptions(
                "Either a primary mnemonic or a primary seed is required".to_string(),
            ))
        }
    };

    ResolvedPrimary::from_seed(seed, network)
}

/// Resolve the public-only backup key.
pub async fn resolve_backup(
    options: &BackupKeyOptions,
    network: &NetworkOptions,
    worker: CryptoWorker,
) -> WalletResult<Xpub> {
    if let Some(issue) = options.conflicts().into_iter().next() {
        return Err(issue);
    }

    if let Some(encoded) = &options.backup_public_key {
        return parse_public_key(encoded, network);
    }

    let mnemonic = options.backup_mnemonic.as_ref().ok_or_else(|| {
        WalletError::ValidationError(
            "Either a backup mnemonic or a backup public key is required".to_string(),
        )
    })?;
    let phrase = Zeroizing::new(mnemonic.expose_secret().to_string());
    let seed = worker.run(move || mnemonic_to_seed(&phrase, "")).await?;
    let master = master_key(&seed, network)?;
    Ok(Xpub::from_priv(&*SECP, &master))
}

/// Stretch a mnemonic and passphrase into a 64-byte seed.
pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> WalletResult<Zeroizing<Vec<u8>>> {
    let mnemonic = Mnemonic::parse_normalized(phrase.trim())
        .map_err(|e| WalletError::InvalidKey(format!("Invalid mnemonic: {}", e)))?;
    let mut seed = mnemonic.to_seed(passphrase);
    let buffer = Zeroizing::new(seed.to_vec());
    zeroize::Zeroize::zeroize(&mut seed);
    Ok(buffer)
}

/// Entropy behind a mnemonic, without stretching. Backup sheets of v2/v3
/// wallets carry the backup seed itself in this form.
pub fn mnemonic_to_entropy(phrase: &str) -> WalletResult<Zeroizing<Vec<u8>>> {
    let mnemonic = Mnemonic::parse_normalized(phrase.trim())
        .map_err(|e| WalletError::InvalidKey(format!("Invalid mnemonic: {}", e)))?;
    Ok(Zeroizing::new(mnemonic.to_entropy()))
}

/// Fresh 24-word mnemonic over `WALLET_ENTROPY_BYTES` of entropy.
pub fn generate_mnemonic() -> WalletResult<SecretString> {
    let entropy = random_bytes(WALLET_ENTROPY_BYTES);
    entropy_to_mnemonic(&entropy)
}

/// Render raw entropy as a mnemonic, used to hand seeds back to the caller.
pub fn entropy_to_mnemonic(entropy: &[u8]) -> WalletResult<SecretString> {
    let mnemonic = Mnemonic::from_entropy(entropy)
        .map_err(|e| WalletError::CryptoError(format!("Invalid entropy: {}", e)))?;
    Ok(SecretString::from(mnemonic.to_string()))
}

pub fn master_key(seed: &[u8], network: &NetworkOptions) -> WalletResult<Xpriv> {
    Xpriv::new_master(network.network_kind(), seed)
        .map_err(|e| WalletError::InvalidKey(format!("Failed to derive master key: {}", e)))
}

/// Path of the primary public key for a key index, e.g. `M/0'`.
pub fn primary_key_path(key_index: u32) -> String {
    format!("M/{}'", key_index)
}

/// Hardened child `key_index` of the primary master key, public part only.
pub fn derive_primary_public_key(master: &Xpriv, key_index: u32) -> WalletResult<Xpub> {
    let child = ChildNumber::from_hardened_idx(key_index)
        .map_err(|e| WalletError::InvalidKey(format!("Invalid key index: {}", e)))?;
    let derived = master
        .derive_priv(&*SECP, &[child])
        .map_err(|e| WalletError::InvalidKey(format!("Derivation failed: {}", e)))?;
    Ok(Xpub::from_priv(&*SECP, &derived))
}

/// Parse a base58 extended public key and check it belongs to `network`.
pub fn parse_public_key(encoded: &str, network: &NetworkOptions) -> WalletResult<Xpub> {
    let key = Xpub::from_str(encoded.trim())
        .map_err(|e| WalletError::InvalidKey(format!("Invalid extended public key: {}", e)))?;
    if key.network != network.network_kind() {
        return Err(WalletError::InvalidKey(format!(
            "Extended public key does not belong to {}",
            network.api_network
        )));
    }
    Ok(key)
}

/// Public key with its derivation path, encoded as `[xpub, path]` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyEntry {
    pub key: Xpub,
    pub path: String,
}

impl PublicKeyEntry {
    pub fn new(key: Xpub, path: impl Into<String>) -> Self {
        Self {
            key,
            path: path.into(),
        }
    }

    /// Only public derivation paths may cross the service boundary.
    pub fn verify_public_only(&self) -> WalletResult<()> {
        if !self.path.starts_with('M') {
            return Err(WalletError::InvalidKey(format!(
                "Path {} is not a public derivation path",
                self.path
            )));
        }
        Ok(())
    }
}

impl Serialize for PublicKeyEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.key.to_string(), &self.path).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKeyEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (key, path): (String, String) = Deserialize::deserialize(deserializer)?;
        let key = Xpub::from_str(&key).map_err(serde::de::Error::custom)?;
        Ok(Self { key, path })
    }
}
