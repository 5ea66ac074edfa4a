//! Wallet provisioning: the create and init flows.
//!
//! A creation runs through
//! `Start -> ResolveKeys -> Encrypt -> DeriveRemaining -> Submit -> ServerInit -> Unlock -> Done`
//! and ends in `Failed` on the first error. The protocol version picks one
//! [`VersionStrategy`] at the start; everything from `Submit` on is shared.
//! No handle is returned unless the whole flow succeeds.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::bip32::Xpub;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::checksum;
use crate::encryption::{
    random_bytes, CryptoWorker, EncryptedWalletData, EncryptionPipeline, LegacyPipeline,
    PipelineInput, StoredBlob, StrengthenedPipeline, WalletSecret, WALLET_ENTROPY_BYTES,
};
use crate::errors::{WalletError, WalletResult};
use crate::handle::{self, HandleParts, WalletHandle};
use crate::keys::{
    self, entropy_to_mnemonic, generate_mnemonic, master_key, mnemonic_to_entropy,
    resolve_backup, resolve_primary, BackupKeyOptions, PublicKeyEntry,
    ResolvedPrimary, BACKUP_KEY_PATH, SECP,
};
use crate::options::{ProtocolVersion, ValidatedCreation, ValidatedInit};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::network::NetworkOptions;
use crate::service::{CreateWalletRequest, StoredWalletData, WalletService};
use crate::session::{SessionSettings, UnlockedSecrets};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisioningState {
    Start,
    ResolveKeys,
    Encrypt,
    DeriveRemaining,
    Submit,
    ServerInit,
    Unlock,
    Done,
    Failed,
}

/// What the caller must keep to recover the wallet without the service.
#[derive(Default)]
pub struct BackupInfo {
    /// v1 only.
    pub primary_mnemonic: Option<SecretString>,
    /// v1: the backup mnemonic. v2/v3: the backup seed as a mnemonic.
    pub backup_mnemonic: Option<SecretString>,
    /// Word renderings of the encrypted blobs (v2/v3).
    pub encrypted_primary_seed: Option<String>,
    pub encrypted_secret: Option<String>,
    pub recovery_encrypted_secret: Option<String>,
    pub cosigner_public_keys: BTreeMap<u32, Xpub>,
}

impl fmt::Debug for BackupInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupInfo")
            .field("has_primary_mnemonic", &self.primary_mnemonic.is_some())
            .field("has_backup_mnemonic", &self.backup_mnemonic.is_some())
            .field("cosigner_public_keys", &self.cosigner_public_keys)
            .finish_non_exhaustive()
    }
}

/// Result of a successful creation.
#[derive(Debug)]
pub struct CreatedWallet {
    pub handle: WalletHandle,
    pub version: ProtocolVersion,
    pub backup: BackupInfo,
}

/// One provisioning run: its state and progress sink.
struct Flow<'a> {
    identifier: String,
    state: ProvisioningState,
    progress: &'a mut ProgressSink,
}

impl<'a> Flow<'a> {
    fn new(identifier: &str, progress: &'a mut ProgressSink) -> Self {
        Self {
            identifier: identifier.to_string(),
            state: ProvisioningState::Start,
            progress,
        }
    }

    fn enter(&mut self, next: ProvisioningState) {
        log::debug!("Wallet {}: {:?} -> {:?}", self.identifier, self.state, next);
        self.state = next;
    }

    fn checkpoint(&mut self, event: ProgressEvent) {
        self.progress.emit(event);
    }

    fn fail(&mut self, error: &WalletError) {
        log::warn!(
            "Provisioning of wallet {} failed in {:?}: {}",
            self.identifier,
            self.state,
            error
        );
        self.state = ProvisioningState::Failed;
    }
}

/// Warns when a flow is abandoned after the create request went out.
struct SubmitGuard {
    identifier: String,
    armed: bool,
}

impl SubmitGuard {
    fn arm(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SubmitGuard {
    fn drop(&mut self) {
        if self.armed {
            log::warn!(
                "Provisioning of wallet {} was dropped after submit; the wallet may already exist on the service",
                self.identifier
            );
        }
    }
}

/// Keys and data produced before anything is sent.
struct PreparedWallet {
    primary: ResolvedPrimary,
    backup_public_key: Xpub,
    data: StoredWalletData,
    secret: Option<WalletSecret>,
    primary_mnemonic: Option<SecretString>,
    encrypted_primary_seed: Option<StoredBlob>,
    encrypted_secret: Option<StoredBlob>,
    backup: BackupInfo,
}

/// Version-specific part of a creation: `ResolveKeys`, `Encrypt` and
/// `DeriveRemaining`.
#[async_trait]
trait VersionStrategy: Send + Sync {
    fn version(&self) -> ProtocolVersion;

    async fn prepare(
        &self,
        options: &mut ValidatedCreation,
        flow: &mut Flow<'_>,
    ) -> WalletResult<PreparedWallet>;
}

fn strategy_for(version: ProtocolVersion, worker: CryptoWorker) -> Box<dyn VersionStrategy> {
    match version {
        ProtocolVersion::V1 => Box::new(MnemonicStrategy { worker }),
        ProtocolVersion::V2 => Box::new(LegacyStrategy { worker }),
        ProtocolVersion::V3 => Box::new(StrengthenedStrategy { worker }),
    }
}

/// v1: the primary mnemonic itself is stored, unencrypted but useless
/// without the passphrase.
struct MnemonicStrategy {
    worker: CryptoWorker,
}

#[async_trait]
impl VersionStrategy for MnemonicStrategy {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V1
    }

    async fn prepare(
        &self,
        options: &mut ValidatedCreation,
        flow: &mut Flow<'_>,
    ) -> WalletResult<PreparedWallet> {
        flow.enter(ProvisioningState::ResolveKeys);
        if options.primary.primary_mnemonic.is_none() && options.primary.primary_seed.is_none() {
            options.primary.primary_mnemonic = Some(generate_mnemonic()?);
        }
        let mut backup_options = std::mem::take(&mut options.backup);
        if backup_options.is_empty() {
            backup_options.backup_mnemonic = Some(generate_mnemonic()?);
        }

        let primary = resolve_primary(&options.primary, &options.network, self.worker).await?;
        flow.enter(ProvisioningState::DeriveRemaining);
        flow.checkpoint(ProgressEvent::PrimaryKey);

        let backup_public_key =
            resolve_backup(&backup_options, &options.network, self.worker).await?;
        flow.checkpoint(ProgressEvent::BackupKey);

        let primary_mnemonic = options.primary.primary_mnemonic.take();
        let stored_mnemonic = primary_mnemonic
            .as_ref()
            .filter(|_| options.store_primary_mnemonic)
            .map(|m| m.expose_secret().to_string());

        Ok(PreparedWallet {
            primary,
            backup_public_key,
            data: StoredWalletData::Mnemonic {
                primary_mnemonic: stored_mnemonic,
            },
            secret: None,
            primary_mnemonic: primary_mnemonic
                .as_ref()
                .filter(|_| options.store_primary_mnemonic)
                .map(|m| SecretString::from(m.expose_secret().to_string())),
            encrypted_primary_seed: None,
            encrypted_secret: None,
            backup: BackupInfo {
                primary_mnemonic,
                backup_mnemonic: backup_options.backup_mnemonic,
                ..Default::default()
            },
        })
    }
}

/// v2: OpenSSL containers keyed by a hex text secret.
struct LegacyStrategy {
    worker: CryptoWorker,
}

#[async_trait]
impl VersionStrategy for LegacyStrategy {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V2
    }

    async fn prepare(
        &self,
        options: &mut ValidatedCreation,
        flow: &mut Flow<'_>,
    ) -> WalletResult<PreparedWallet> {
        prepare_encrypted(&LegacyPipeline, self.worker, options, flow).await
    }
}

/// v3: strengthened containers keyed by a raw byte secret.
struct StrengthenedStrategy {
    worker: CryptoWorker,
}

#[async_trait]
impl VersionStrategy for StrengthenedStrategy {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V3
    }

    async fn prepare(
        &self,
        options: &mut ValidatedCreation,
        flow: &mut Flow<'_>,
    ) -> WalletResult<PreparedWallet> {
        let pipeline = StrengthenedPipeline::new(self.worker);
        prepare_encrypted(&pipeline, self.worker, options, flow).await
    }
}

async fn prepare_encrypted(
    pipeline: &dyn EncryptionPipeline,
    worker: CryptoWorker,
    options: &mut ValidatedCreation,
    flow: &mut Flow<'_>,
) -> WalletResult<PreparedWallet> {
    flow.enter(ProvisioningState::ResolveKeys);
    let primary = if options.primary.primary_mnemonic.is_some() || options.primary.primary_seed.is_some() {
        resolve_primary(&options.primary, &options.network, worker).await?
    } else {
        ResolvedPrimary::from_seed(random_bytes(WALLET_ENTROPY_BYTES), &options.network)?
    };

    let encrypted = if options.store_data_on_server {
        flow.enter(ProvisioningState::Encrypt);
        let input = PipelineInput {
            primary_seed: &primary.seed,
            passphrase: options.primary.effective_passphrase(),
            secret: options.secret.take(),
            encrypted_secret: options.encrypted_secret.take(),
            recovery: options.recovery,
        };
        Some(pipeline.encrypt(input, &mut *flow.progress).await?)
    } else {
        None
    };

    flow.enter(ProvisioningState::DeriveRemaining);
    flow.checkpoint(ProgressEvent::PrimaryKey);
    let (backup_public_key, backup_seed) =
        resolve_encrypted_backup(&options.backup, &options.network, worker).await?;
    flow.checkpoint(ProgressEvent::BackupKey);

    let mut backup = BackupInfo {
        backup_mnemonic: match &backup_seed {
            Some(seed) => Some(entropy_to_mnemonic(seed)?),
            None => None,
        },
        ..Default::default()
    };

    let Some(encrypted) = encrypted else {
        return Ok(PreparedWallet {
            primary,
            backup_public_key,
            data: StoredWalletData::Encrypted {
                encrypted_primary_seed: None,
                encrypted_secret: None,
                recovery_secret: None,
                support_secret: options.support_secret.clone(),
            },
            secret: None,
            primary_mnemonic: None,
            encrypted_primary_seed: None,
            encrypted_secret: None,
            backup,
        });
    };

    let EncryptedWalletData {
        secret,
        encrypted_secret,
        encrypted_primary_seed,
        recovery_secret,
        recovery_encrypted_secret,
    } = encrypted;

    backup.encrypted_primary_seed = Some(encrypted_primary_seed.to_words()?);
    backup.encrypted_secret = encrypted_secret.as_ref().map(StoredBlob::to_words).transpose()?;
    backup.recovery_encrypted_secret = recovery_encrypted_secret
        .as_ref()
        .map(StoredBlob::to_words)
        .transpose()?;

    Ok(PreparedWallet {
        primary,
        backup_public_key,
        data: StoredWalletData::Encrypted {
            encrypted_primary_seed: Some(encrypted_primary_seed.to_wire()),
            encrypted_secret: encrypted_secret.as_ref().map(StoredBlob::to_wire),
            recovery_secret: recovery_secret.as_ref().map(|hex| hex.to_string()),
            support_secret: options.support_secret.clone(),
        },
        secret: Some(secret),
        primary_mnemonic: None,
        encrypted_primary_seed: Some(encrypted_primary_seed),
        encrypted_secret,
        backup,
    })
}

/// Backup key of a v2/v3 wallet. Without a supplied public key the key is the
/// master of a random backup seed, which is handed back as a mnemonic.
async fn resolve_encrypted_backup(
    options: &BackupKeyOptions,
    network: &NetworkOptions,
    worker: CryptoWorker,
) -> WalletResult<(Xpub, Option<Zeroizing<Vec<u8>>>)> {
    if options.backup_public_key.is_some() {
        return Ok((resolve_backup(options, network, worker).await?, None));
    }
    let backup_seed = match &options.backup_mnemonic {
        Some(mnemonic) => mnemonic_to_entropy(mnemonic.expose_secret())?,
        None => random_bytes(WALLET_ENTROPY_BYTES),
    };
    let master = master_key(&backup_seed, network)?;
    Ok((Xpub::from_priv(&*SECP, &master), Some(backup_seed)))
}

/// Drives creation and initialization against a [`WalletService`].
pub struct WalletProvisioningOrchestrator {
    service: Arc<dyn WalletService>,
    worker: CryptoWorker,
    sessions: SessionSettings,
}

impl WalletProvisioningOrchestrator {
    pub fn new(service: Arc<dyn WalletService>, worker: CryptoWorker, sessions: SessionSettings) -> Self {
        Self {
            service,
            worker,
            sessions,
        }
    }

    pub async fn create_wallet(
        &self,
        mut options: ValidatedCreation,
        progress: &mut ProgressSink,
    ) -> WalletResult<CreatedWallet> {
        let mut flow = Flow::new(&options.identifier, progress);
        flow.checkpoint(ProgressEvent::Start);
        log::info!(
            "Creating {} wallet {} on {}",
            options.version,
            options.identifier,
            options.network.api_network
        );

        match self.run_creation(&mut options, &mut flow).await {
            Ok(created) => {
                flow.enter(ProvisioningState::Done);
                flow.checkpoint(ProgressEvent::Done);
                Ok(created)
            }
            Err(error) => {
                flow.fail(&error);
                Err(error)
            }
        }
    }

    async fn run_creation(
        &self,
        options: &mut ValidatedCreation,
        flow: &mut Flow<'_>,
    ) -> WalletResult<CreatedWallet> {
        let strategy = strategy_for(options.version, self.worker);
        let prepared = strategy.prepare(options, flow).await?;

        let master_public_key = prepared.primary.master_public_key();
        let local_checksum = checksum::checksum(&master_public_key, &options.network);
        let primary_public_key =
            keys::derive_primary_public_key(&prepared.primary.private_key, options.key_index)?;

        let request = CreateWalletRequest {
            identifier: options.identifier.clone(),
            wallet_version: strategy.version(),
            primary_public_key: PublicKeyEntry::new(
                primary_public_key,
                keys::primary_key_path(options.key_index),
            ),
            backup_public_key: PublicKeyEntry::new(prepared.backup_public_key, BACKUP_KEY_PATH),
            data: prepared.data.clone(),
            checksum: local_checksum.clone(),
            key_index: options.key_index,
            segwit: options.segwit,
        };
        request.primary_public_key.verify_public_only()?;
        request.backup_public_key.verify_public_only()?;

        flow.enter(ProvisioningState::Submit);
        flow.checkpoint(ProgressEvent::Submit);
        let guard = SubmitGuard::arm(&options.identifier);
        let result = self
            .finish_creation(options, flow, request, prepared, local_checksum)
            .await;
        guard.disarm();
        result
    }

    async fn finish_creation(
        &self,
        options: &ValidatedCreation,
        flow: &mut Flow<'_>,
        request: CreateWalletRequest,
        prepared: PreparedWallet,
        local_checksum: String,
    ) -> WalletResult<CreatedWallet> {
        let record = self.service.create_wallet(&request).await?;

        flow.enter(ProvisioningState::ServerInit);
        flow.checkpoint(ProgressEvent::Init);
        if let Some(server_checksum) = record.checksum.as_deref().filter(|c| !c.is_empty()) {
            checksum::verify(server_checksum, &local_checksum)?;
        }

        let key_index = record.key_index.unwrap_or(options.key_index);
        let primary_public_key = if key_index == options.key_index {
            request.primary_public_key.key
        } else {
            log::info!(
                "Service assigned key index {} to wallet {}",
                key_index,
                options.identifier
            );
            keys::derive_primary_public_key(&prepared.primary.private_key, key_index)?
        };
        let cosigner_public_keys =
            handle::public_keys(record.cosigner_public_keys.clone(), &options.network)?;

        let PreparedWallet {
            primary,
            backup_public_key,
            secret,
            primary_mnemonic,
            encrypted_primary_seed,
            encrypted_secret,
            mut backup,
            ..
        } = prepared;

        let handle = WalletHandle::from_parts(
            HandleParts {
                identifier: options.identifier.clone(),
                version: options.version,
                key_index,
                segwit: record.segwit,
                network: options.network.clone(),
                checksum: local_checksum,
                upgrade_key_index: record.upgrade_key_index,
                primary_public_keys: BTreeMap::from([(key_index, primary_public_key)]),
                backup_public_key,
                cosigner_public_keys: cosigner_public_keys.clone(),
                primary_mnemonic,
                encrypted_primary_seed,
                encrypted_secret,
            },
            self.worker,
            self.sessions.new_session(),
        );

        flow.enter(ProvisioningState::Unlock);
        handle.unlock_with(UnlockedSecrets {
            primary_seed: primary.seed,
            secret,
            primary_private_key: primary.private_key,
        })?;

        backup.cosigner_public_keys = cosigner_public_keys;
        log::info!(
            "Wallet {} created with key index {}",
            options.identifier,
            key_index
        );
        Ok(CreatedWallet {
            handle,
            version: options.version,
            backup,
        })
    }

    /// Fetch an existing wallet and, unless read-only, unlock it.
    pub async fn init_wallet(
        &self,
        options: ValidatedInit,
        progress: &mut ProgressSink,
    ) -> WalletResult<WalletHandle> {
        let mut flow = Flow::new(&options.identifier, progress);
        flow.checkpoint(ProgressEvent::Start);

        match self.run_init(options, &mut flow).await {
            Ok(handle) => {
                flow.enter(ProvisioningState::Done);
                flow.checkpoint(ProgressEvent::Done);
                Ok(handle)
            }
            Err(error) => {
                flow.fail(&error);
                Err(error)
            }
        }
    }

    async fn run_init(&self, options: ValidatedInit, flow: &mut Flow<'_>) -> WalletResult<WalletHandle> {
        flow.enter(ProvisioningState::ServerInit);
        let record = self.service.get_wallet(&options.identifier).await?;
        flow.checkpoint(ProgressEvent::Init);

        if let Some(expected) = &options.check_backup_key {
            let actual = record
                .backup_public_key
                .as_ref()
                .map(|entry| entry.key.to_string());
            if actual.as_deref() != Some(expected.trim()) {
                return Err(WalletError::InvalidResponse(
                    "Backup key returned from server didn't match our own copy".to_string(),
                ));
            }
        }

        let parts =
            WalletHandle::parts_from_record(&options.identifier, record, &options.network, options.key_index)?;
        let handle = WalletHandle::from_parts(parts, self.worker, self.sessions.new_session());

        if !options.read_only {
            flow.enter(ProvisioningState::Unlock);
            handle.unlock(options.unlock).await?;
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_match_versions() {
        for version in [ProtocolVersion::V1, ProtocolVersion::V2, ProtocolVersion::V3] {
            assert_eq!(strategy_for(version, CryptoWorker::Inline).version(), version);
        }
    }

    #[test]
    fn flow_records_failure() {
        let mut sink = ProgressSink::disabled();
        let mut flow = Flow::new("w1", &mut sink);
        flow.enter(ProvisioningState::Submit);
        flow.fail(&WalletError::NetworkError("down".to_string()));
        assert_eq!(flow.state, ProvisioningState::Failed);
    }

    #[tokio::test]
    async fn generated_backup_seed_round_trips_through_mnemonic() {
        let network = NetworkOptions::bitcoin_mainnet();
        let (key, seed) = resolve_encrypted_backup(&BackupKeyOptions::default(), &network, CryptoWorker::Inline)
            .await
            .unwrap();
        let seed = seed.unwrap();
        let mnemonic = entropy_to_mnemonic(&seed).unwrap();

        let options = BackupKeyOptions {
            backup_mnemonic: Some(mnemonic),
            backup_public_key: None,
        };
        let (again, _) = resolve_encrypted_backup(&options, &network, CryptoWorker::Inline)
            .await
            .unwrap();
        assert_eq!(key, again);
    }
}
