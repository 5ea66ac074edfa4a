//! A provisioned wallet: its public key set and, while unlocked, its
//! decrypted primary seed.

use std::collections::BTreeMap;
use std::fmt;

use bitcoin::bip32::Xpub;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::checksum;
use crate::encryption::{
    CryptoWorker, EncryptionPipeline, LegacyPipeline, StoredBlob, StrengthenedPipeline,
    WalletSecret,
};
use crate::errors::{WalletError, WalletResult};
use crate::keys::{self, master_key, mnemonic_to_seed, PublicKeyEntry, SECP};
use crate::network::NetworkOptions;
use crate::options::{ProtocolVersion, UnlockOptions};
use crate::service::WalletRecord;
use crate::session::{UnlockedSecrets, WalletSession};

/// Everything needed to build a handle.
pub(crate) struct HandleParts {
    pub identifier: String,
    pub version: ProtocolVersion,
    pub key_index: u32,
    pub segwit: bool,
    pub network: NetworkOptions,
    pub checksum: String,
    pub upgrade_key_index: Option<u32>,
    pub primary_public_keys: BTreeMap<u32, Xpub>,
    pub backup_public_key: Xpub,
    pub cosigner_public_keys: BTreeMap<u32, Xpub>,
    pub primary_mnemonic: Option<SecretString>,
    pub encrypted_primary_seed: Option<StoredBlob>,
    pub encrypted_secret: Option<StoredBlob>,
}

pub struct WalletHandle {
    identifier: String,
    version: ProtocolVersion,
    key_index: u32,
    segwit: bool,
    network: NetworkOptions,
    checksum: String,
    upgrade_key_index: Option<u32>,
    primary_public_keys: BTreeMap<u32, Xpub>,
    backup_public_key: Xpub,
    cosigner_public_keys: BTreeMap<u32, Xpub>,
    primary_mnemonic: Option<SecretString>,
    encrypted_primary_seed: Option<StoredBlob>,
    encrypted_secret: Option<StoredBlob>,
    worker: CryptoWorker,
    session: WalletSession,
}

impl WalletHandle {
    pub(crate) fn from_parts(parts: HandleParts, worker: CryptoWorker, session: WalletSession) -> Self {
        Self {
            identifier: parts.identifier,
            version: parts.version,
            key_index: parts.key_index,
            segwit: parts.segwit,
            network: parts.network,
            checksum: parts.checksum,
            upgrade_key_index: parts.upgrade_key_index,
            primary_public_keys: parts.primary_public_keys,
            backup_public_key: parts.backup_public_key,
            cosigner_public_keys: parts.cosigner_public_keys,
            primary_mnemonic: parts.primary_mnemonic,
            encrypted_primary_seed: parts.encrypted_primary_seed,
            encrypted_secret: parts.encrypted_secret,
            worker,
            session,
        }
    }

    /// Interpret a wallet returned by the service.
    pub(crate) fn parts_from_record(
        identifier: &str,
        record: WalletRecord,
        network: &NetworkOptions,
        key_index_override: Option<u32>,
    ) -> WalletResult<HandleParts> {
        let version = record
            .wallet_version
            .ok_or_else(|| WalletError::InvalidResponse("Missing wallet version".to_string()))?;
        let checksum = record
            .checksum
            .filter(|c| !c.is_empty())
            .ok_or_else(|| WalletError::InvalidResponse("Missing checksum".to_string()))?;
        let backup = record
            .backup_public_key
            .ok_or_else(|| WalletError::InvalidResponse("Missing backup public key".to_string()))?;

        let blob = |wire: Option<String>| -> WalletResult<Option<StoredBlob>> {
            match (version, wire) {
                (ProtocolVersion::V1, _) | (_, None) => Ok(None),
                (_, Some(wire)) => version.parse_blob(&wire).map(Some),
            }
        };

        Ok(HandleParts {
            identifier: identifier.to_string(),
            version,
            key_index: key_index_override.or(record.key_index).unwrap_or(0),
            segwit: record.segwit,
            network: network.clone(),
            checksum,
            upgrade_key_index: record.upgrade_key_index,
            primary_public_keys: public_keys(record.primary_public_keys, network)?,
            backup_public_key: on_network(backup, network)?,
            cosigner_public_keys: public_keys(record.cosigner_public_keys, network)?,
            primary_mnemonic: record.primary_mnemonic.map(SecretString::from),
            encrypted_primary_seed: blob(record.encrypted_primary_seed)?,
            encrypted_secret: blob(record.encrypted_secret)?,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn key_index(&self) -> u32 {
        self.key_index
    }

    pub fn segwit(&self) -> bool {
        self.segwit
    }

    pub fn network(&self) -> &NetworkOptions {
        &self.network
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn upgrade_key_index(&self) -> Option<u32> {
        self.upgrade_key_index
    }

    pub fn backup_public_key(&self) -> &Xpub {
        &self.backup_public_key
    }

    pub fn primary_public_key(&self, key_index: u32) -> Option<&Xpub> {
        self.primary_public_keys.get(&key_index)
    }

    pub fn cosigner_public_key(&self, key_index: u32) -> Option<&Xpub> {
        self.cosigner_public_keys.get(&key_index)
    }

    pub fn cosigner_public_keys(&self) -> &BTreeMap<u32, Xpub> {
        &self.cosigner_public_keys
    }

    /// True when the service keeps the encrypted seed (or v1 mnemonic).
    pub fn has_server_data(&self) -> bool {
        match self.version {
            ProtocolVersion::V1 => self.primary_mnemonic.is_some(),
            _ => self.encrypted_primary_seed.is_some(),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.session.is_locked()
    }

    pub fn lock(&self) {
        self.session.lock();
        log::info!("Wallet {} locked", self.identifier);
    }

    /// Decrypt the primary seed and verify it against the stored checksum.
    ///
    /// Wrong passphrases and checksum mismatches count as failed attempts.
    pub async fn unlock(&self, options: UnlockOptions) -> WalletResult<()> {
        self.session.ensure_attempt_allowed()?;

        match self.recover_secrets(options).await {
            Ok(secrets) => {
                self.session.unlock(secrets);
                log::info!("Wallet {} unlocked", self.identifier);
                Ok(())
            }
            Err(error @ (WalletError::DecryptionError | WalletError::ChecksumMismatch { .. })) => {
                // the attempt that uses up the budget still reports its own failure
                match self.session.register_failed_attempt() {
                    Ok(remaining) => log::warn!(
                        "Failed to unlock wallet {}, {} attempts remaining",
                        self.identifier,
                        remaining
                    ),
                    Err(denied) => log::warn!(
                        "Failed to unlock wallet {}, further attempts denied: {}",
                        self.identifier,
                        denied
                    ),
                }
                Err(error)
            }
            Err(error) => Err(error),
        }
    }

    /// Public key of the hardened primary account `M/{key_index}'`.
    /// Requires the wallet to be unlocked.
    pub fn derive_primary_public_key(&self, key_index: u32) -> WalletResult<Xpub> {
        self.session.with_unlocked(|secrets| {
            keys::derive_primary_public_key(&secrets.primary_private_key, key_index)
        })
    }

    /// Switch to a new key index after the service accepted the upgrade.
    pub(crate) fn apply_upgrade(
        &mut self,
        key_index: u32,
        primary_public_key: Xpub,
        record: WalletRecord,
    ) -> WalletResult<()> {
        let cosigners = public_keys(record.cosigner_public_keys, &self.network)?;
        self.primary_public_keys.insert(key_index, primary_public_key);
        self.cosigner_public_keys.extend(cosigners);
        self.key_index = key_index;
        self.upgrade_key_index = record.upgrade_key_index;
        Ok(())
    }

    /// Hand unlocked material from provisioning straight to the session.
    pub(crate) fn unlock_with(&self, secrets: UnlockedSecrets) -> WalletResult<()> {
        let public_key = Xpub::from_priv(&*SECP, &secrets.primary_private_key);
        checksum::verify(&self.checksum, &checksum::checksum(&public_key, &self.network))?;
        self.session.unlock(secrets);
        Ok(())
    }

    async fn recover_secrets(&self, options: UnlockOptions) -> WalletResult<UnlockedSecrets> {
        let (seed, secret) = match self.version {
            ProtocolVersion::V1 => (self.recover_v1_seed(options).await?, None),
            ProtocolVersion::V2 => self.recover_encrypted_seed(&LegacyPipeline, options).await?,
            ProtocolVersion::V3 => {
                let pipeline = StrengthenedPipeline::new(self.worker);
                self.recover_encrypted_seed(&pipeline, options).await?
            }
        };

        let primary_private_key = master_key(&seed, &self.network)?;
        let public_key = Xpub::from_priv(&*SECP, &primary_private_key);
        checksum::verify(&self.checksum, &checksum::checksum(&public_key, &self.network))?;

        Ok(UnlockedSecrets {
            primary_seed: seed,
            secret,
            primary_private_key,
        })
    }

    async fn recover_v1_seed(&self, options: UnlockOptions) -> WalletResult<Zeroizing<Vec<u8>>> {
        if let Some(seed) = options.primary_seed {
            return Ok(seed);
        }
        let mnemonic = options
            .primary_mnemonic
            .as_ref()
            .or(self.primary_mnemonic.as_ref())
            .ok_or_else(|| {
                WalletError::MissingPassphrase(
                    "The primary mnemonic is not stored on the server".to_string(),
                )
            })?;
        let passphrase = options.passphrase.as_ref().ok_or_else(|| {
            WalletError::MissingPassphrase("Can't unlock without a passphrase".to_string())
        })?;

        let phrase = Zeroizing::new(mnemonic.expose_secret().to_string());
        let passphrase = Zeroizing::new(passphrase.expose_secret().to_string());
        self.worker
            .run(move || mnemonic_to_seed(&phrase, &passphrase))
            .await
    }

    async fn recover_encrypted_seed(
        &self,
        pipeline: &dyn EncryptionPipeline,
        options: UnlockOptions,
    ) -> WalletResult<(Zeroizing<Vec<u8>>, Option<WalletSecret>)> {
        if let Some(seed) = options.primary_seed {
            return Ok((seed, options.secret));
        }

        let encrypted_primary_seed = self.encrypted_primary_seed.as_ref().ok_or_else(|| {
            WalletError::ValidationError(
                "Wallet data is not stored on the server, the primary seed is required"
                    .to_string(),
            )
        })?;

        let secret = match options.secret {
            Some(secret) => secret,
            None => {
                let passphrase = options.passphrase.as_ref().ok_or_else(|| {
                    WalletError::MissingPassphrase("Can't unlock without a passphrase".to_string())
                })?;
                let encrypted_secret = self.encrypted_secret.as_ref().ok_or_else(|| {
                    WalletError::InvalidResponse("Missing encrypted secret".to_string())
                })?;
                pipeline.decrypt_secret(encrypted_secret, passphrase).await?
            }
        };

        let seed = pipeline
            .decrypt_primary_seed(encrypted_primary_seed, &secret)
            .await?;
        Ok((seed, Some(secret)))
    }
}

impl fmt::Debug for WalletHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletHandle")
            .field("identifier", &self.identifier)
            .field("version", &self.version)
            .field("key_index", &self.key_index)
            .field("network", &self.network.api_network)
            .field("checksum", &self.checksum)
            .field("locked", &self.session.is_locked())
            .finish_non_exhaustive()
    }
}

fn on_network(entry: PublicKeyEntry, network: &NetworkOptions) -> WalletResult<Xpub> {
    if entry.key.network != network.network_kind() {
        return Err(WalletError::InvalidResponse(format!(
            "Public key at {} does not belong to {}",
            entry.path, network.api_network
        )));
    }
    Ok(entry.key)
}

pub(crate) fn public_keys(
    entries: BTreeMap<u32, PublicKeyEntry>,
    network: &NetworkOptions,
) -> WalletResult<BTreeMap<u32, Xpub>> {
    entries
        .into_iter()
        .map(|(index, entry)| Ok((index, on_network(entry, network)?)))
        .collect()
}
