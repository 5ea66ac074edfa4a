use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use super::strengthened::{self, DEFAULT_ITERATIONS, SUBKEY_ITERATIONS};
use super::{legacy, random_bytes, words, CryptoWorker, EncryptedPayload, WALLET_ENTROPY_BYTES};
use crate::errors::{WalletError, WalletResult};
use crate::progress::{ProgressEvent, ProgressSink};

/// Key that encrypts the primary seed. Text for v2, raw bytes for v3.
pub enum WalletSecret {
    Text(Zeroizing<String>),
    Bytes(Zeroizing<Vec<u8>>),
}

impl WalletSecret {
    pub fn key_bytes(&self) -> &[u8] {
        match self {
            WalletSecret::Text(text) => text.as_bytes(),
            WalletSecret::Bytes(bytes) => &bytes[..],
        }
    }
}

/// A secret handed in by the caller instead of a generated one.
pub type ProvidedSecret = WalletSecret;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoverySecretOption {
    #[default]
    Generate,
    /// Do not create a recovery secret at all.
    Skip,
}

/// An encrypted blob as stored by the co-signing service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredBlob {
    /// Base64 OpenSSL container, kept verbatim.
    Legacy(String),
    Strengthened(EncryptedPayload),
}

impl StoredBlob {
    /// Base64 text sent to and received from the service.
    pub fn to_wire(&self) -> String {
        match self {
            StoredBlob::Legacy(encoded) => encoded.clone(),
            StoredBlob::Strengthened(payload) => payload.to_base64(),
        }
    }

    /// Word rendering for backup sheets.
    pub fn to_words(&self) -> WalletResult<String> {
        match self {
            StoredBlob::Legacy(encoded) => {
                let bytes = BASE64
                    .decode(encoded)
                    .map_err(|e| WalletError::CryptoError(format!("Invalid container: {}", e)))?;
                words::encode(&bytes)
            }
            StoredBlob::Strengthened(payload) => payload.to_words(),
        }
    }
}

/// Everything a pipeline produces for one wallet.
pub struct EncryptedWalletData {
    pub secret: WalletSecret,
    pub encrypted_secret: Option<StoredBlob>,
    pub encrypted_primary_seed: StoredBlob,
    /// Hex encoded.
    pub recovery_secret: Option<Zeroizing<String>>,
    pub recovery_encrypted_secret: Option<StoredBlob>,
}

pub struct PipelineInput<'a> {
    pub primary_seed: &'a [u8],
    pub passphrase: Option<&'a SecretString>,
    pub secret: Option<ProvidedSecret>,
    /// Only meaningful together with `secret`.
    pub encrypted_secret: Option<StoredBlob>,
    pub recovery: RecoverySecretOption,
}

/// Versioned encryption of the wallet secret and primary seed.
#[async_trait]
pub trait EncryptionPipeline: Send + Sync {
    async fn encrypt(
        &self,
        input: PipelineInput<'_>,
        progress: &mut ProgressSink,
    ) -> WalletResult<EncryptedWalletData>;

    async fn decrypt_secret(
        &self,
        encrypted_secret: &StoredBlob,
        passphrase: &SecretString,
    ) -> WalletResult<WalletSecret>;

    async fn decrypt_primary_seed(
        &self,
        encrypted_primary_seed: &StoredBlob,
        secret: &WalletSecret,
    ) -> WalletResult<Zeroizing<Vec<u8>>>;

    /// Interpret a blob received from the service.
    fn parse_blob(&self, wire: &str) -> WalletResult<StoredBlob>;
}

fn passphrase_for_secret(passphrase: Option<&SecretString>) -> WalletResult<&SecretString> {
    passphrase
        .filter(|p| !p.expose_secret().is_empty())
        .ok_or_else(|| {
            WalletError::MissingPassphrase("Can't encrypt data without a passphrase".to_string())
        })
}

/// Protocol v2: OpenSSL containers with hex text secrets.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyPipeline;

#[async_trait]
impl EncryptionPipeline for LegacyPipeline {
    async fn encrypt(
        &self,
        input: PipelineInput<'_>,
        progress: &mut ProgressSink,
    ) -> WalletResult<EncryptedWalletData> {
        let (secret, encrypted_secret) = match input.secret {
            Some(WalletSecret::Text(secret)) => (secret, input.encrypted_secret),
            Some(WalletSecret::Bytes(_)) => {
                return Err(WalletError::ValidationError(
                    "Protocol v2 secrets must be text".to_string(),
                ))
            }
            None => {
                let passphrase = passphrase_for_secret(input.passphrase)?;
                let secret = Zeroizing::new(hex::encode(&random_bytes(WALLET_ENTROPY_BYTES)[..]));
                let encrypted = legacy::encrypt(&secret, passphrase.expose_secret())?;
                progress.emit(ProgressEvent::EncryptSecret);
                (secret, Some(StoredBlob::Legacy(encrypted)))
            }
        };

        let seed_text = Zeroizing::new(BASE64.encode(input.primary_seed));
        let encrypted_primary_seed = StoredBlob::Legacy(legacy::encrypt(&seed_text, &secret)?);
        progress.emit(ProgressEvent::EncryptPrimary);

        // v2 always rotates a recovery secret
        let recovery_secret = Zeroizing::new(hex::encode(&random_bytes(WALLET_ENTROPY_BYTES)[..]));
        let recovery_encrypted_secret =
            StoredBlob::Legacy(legacy::encrypt(&secret, &recovery_secret)?);
        progress.emit(ProgressEvent::EncryptRecovery);

        Ok(EncryptedWalletData {
            secret: WalletSecret::Text(secret),
            encrypted_secret,
            encrypted_primary_seed,
            recovery_secret: Some(recovery_secret),
            recovery_encrypted_secret: Some(recovery_encrypted_secret),
        })
    }

    async fn decrypt_secret(
        &self,
        encrypted_secret: &StoredBlob,
        passphrase: &SecretString,
    ) -> WalletResult<WalletSecret> {
        match encrypted_secret {
            StoredBlob::Legacy(encoded) => Ok(WalletSecret::Text(legacy::decrypt(
                encoded,
                passphrase.expose_secret(),
            )?)),
            StoredBlob::Strengthened(_) => Err(WalletError::DecryptionError),
        }
    }

    async fn decrypt_primary_seed(
        &self,
        encrypted_primary_seed: &StoredBlob,
        secret: &WalletSecret,
    ) -> WalletResult<Zeroizing<Vec<u8>>> {
        let (StoredBlob::Legacy(encoded), WalletSecret::Text(secret)) =
            (encrypted_primary_seed, secret)
        else {
            return Err(WalletError::DecryptionError);
        };
        let seed_text = legacy::decrypt(encoded, secret)?;
        let seed = BASE64
            .decode(seed_text.as_bytes())
            .map_err(|_| WalletError::DecryptionError)?;
        Ok(Zeroizing::new(seed))
    }

    fn parse_blob(&self, wire: &str) -> WalletResult<StoredBlob> {
        let payload = EncryptedPayload::from_base64(wire).map_err(|_| {
            WalletError::InvalidResponse("Malformed encrypted payload".to_string())
        })?;
        if payload.format != super::PayloadFormat::OpenSsl {
            return Err(WalletError::InvalidResponse(
                "Expected an OpenSSL container".to_string(),
            ));
        }
        Ok(StoredBlob::Legacy(wire.trim().to_string()))
    }
}

/// Protocol v3: strengthened containers with raw byte secrets.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrengthenedPipeline {
    worker: CryptoWorker,
}

impl StrengthenedPipeline {
    pub fn new(worker: CryptoWorker) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl EncryptionPipeline for StrengthenedPipeline {
    async fn encrypt(
        &self,
        input: PipelineInput<'_>,
        progress: &mut ProgressSink,
    ) -> WalletResult<EncryptedWalletData> {
        let (secret, encrypted_secret) = match input.secret {
            Some(WalletSecret::Bytes(secret)) => (secret, input.encrypted_secret),
            Some(WalletSecret::Text(_)) => {
                return Err(WalletError::ValidationError(
                    "Protocol v3 secrets must be raw bytes".to_string(),
                ))
            }
            None => {
                let passphrase = passphrase_for_secret(input.passphrase)?;
                let secret = random_bytes(WALLET_ENTROPY_BYTES);
                let payload = strengthened::encrypt_on(
                    self.worker,
                    secret.clone(),
                    Zeroizing::new(passphrase.expose_secret().as_bytes().to_vec()),
                    DEFAULT_ITERATIONS,
                )
                .await?;
                progress.emit(ProgressEvent::EncryptSecret);
                (secret, Some(StoredBlob::Strengthened(payload)))
            }
        };

        let encrypted_primary_seed = strengthened::encrypt_on(
            self.worker,
            Zeroizing::new(input.primary_seed.to_vec()),
            secret.clone(),
            SUBKEY_ITERATIONS,
        )
        .await?;
        progress.emit(ProgressEvent::EncryptPrimary);

        let (recovery_secret, recovery_encrypted_secret) = match input.recovery {
            RecoverySecretOption::Skip => (None, None),
            RecoverySecretOption::Generate => {
                let recovery_secret = random_bytes(WALLET_ENTROPY_BYTES);
                let payload = strengthened::encrypt_on(
                    self.worker,
                    secret.clone(),
                    recovery_secret.clone(),
                    DEFAULT_ITERATIONS,
                )
                .await?;
                progress.emit(ProgressEvent::EncryptRecovery);
                (
                    Some(Zeroizing::new(hex::encode(&recovery_secret[..]))),
                    Some(StoredBlob::Strengthened(payload)),
                )
            }
        };

        Ok(EncryptedWalletData {
            secret: WalletSecret::Bytes(secret),
            encrypted_secret,
            encrypted_primary_seed: StoredBlob::Strengthened(encrypted_primary_seed),
            recovery_secret,
            recovery_encrypted_secret,
        })
    }

    async fn decrypt_secret(
        &self,
        encrypted_secret: &StoredBlob,
        passphrase: &SecretString,
    ) -> WalletResult<WalletSecret> {
        let StoredBlob::Strengthened(payload) = encrypted_secret else {
            return Err(WalletError::DecryptionError);
        };
        let secret = strengthened::decrypt_on(
            self.worker,
            payload.clone(),
            Zeroizing::new(passphrase.expose_secret().as_bytes().to_vec()),
        )
        .await?;
        Ok(WalletSecret::Bytes(secret))
    }

    async fn decrypt_primary_seed(
        &self,
        encrypted_primary_seed: &StoredBlob,
        secret: &WalletSecret,
    ) -> WalletResult<Zeroizing<Vec<u8>>> {
        let (StoredBlob::Strengthened(payload), WalletSecret::Bytes(secret)) =
            (encrypted_primary_seed, secret)
        else {
            return Err(WalletError::DecryptionError);
        };
        strengthened::decrypt_on(self.worker, payload.clone(), secret.clone()).await
    }

    fn parse_blob(&self, wire: &str) -> WalletResult<StoredBlob> {
        let payload = EncryptedPayload::from_base64(wire).map_err(|_| {
            WalletError::InvalidResponse("Malformed encrypted payload".to_string())
        })?;
        if payload.format != super::PayloadFormat::Strengthened {
            return Err(WalletError::InvalidResponse(
                "Expected a strengthened container".to_string(),
            ));
        }
        Ok(StoredBlob::Strengthened(payload))
    }
}
