//! Password-strengthened authenticated encryption used by protocol v3 wallets.
//!
//! The key is PBKDF2-HMAC-SHA512 over the key material and a random salt.
//! The cipher is AES-256-GCM with a 16-byte IV, authenticating the
//! `saltLen || salt || iterations` header.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;
use zeroize::Zeroizing;

use super::payload::{EncryptedPayload, PayloadFormat, IV_LEN};
use super::{random_bytes, CryptoWorker};
use crate::errors::{WalletError, WalletResult};

/// Iterations used when the key is a user passphrase or a recovery secret.
pub const DEFAULT_ITERATIONS: u32 = 35_000;
/// Iterations used when the key is already a full-entropy secret.
pub const SUBKEY_ITERATIONS: u32 = 1;
pub const SALT_LEN: usize = 10;
const KEY_LEN: usize = 32;

type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Salt and IV drawn by the caller before any work is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherParams {
    pub salt: Vec<u8>,
    pub iv: [u8; IV_LEN],
}

impl CipherParams {
    pub fn generate() -> Self {
        let salt = random_bytes(SALT_LEN).to_vec();
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&random_bytes(IV_LEN));
        Self { salt, iv }
    }
}

pub fn derive_key(key_material: &[u8], salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha512>(key_material, salt, iterations, &mut key[..]);
    key
}

pub fn encrypt_with_params(
    plaintext: &[u8],
    key_material: &[u8],
    iterations: u32,
    params: &CipherParams,
) -> WalletResult<EncryptedPayload> {
    if key_material.is_empty() {
        return Err(WalletError::MissingPassphrase(
            "Can't encrypt data without a key".to_string(),
        ));
    }
    if iterations == 0 || params.salt.is_empty() || params.salt.len() > u8::MAX as usize {
        return Err(WalletError::CryptoError(
            "Invalid key derivation parameters".to_string(),
        ));
    }

    let mut payload = EncryptedPayload {
        format: PayloadFormat::Strengthened,
        salt: params.salt.clone(),
        iterations,
        iv: params.iv.to_vec(),
        ciphertext: Vec::new(),
    };

    let key = derive_key(key_material, &payload.salt, iterations);
    let cipher = Aes256Gcm16::new_from_slice(&key[..])
        .map_err(|e| WalletError::CryptoError(format!("Invalid key length: {}", e)))?;
    let header = payload.header();
    payload.ciphertext = cipher
        .encrypt(
            GenericArray::from_slice(&params.iv),
            Payload {
                msg: plaintext,
                aad: &header,
            },
        )
        .map_err(|_| WalletError::CryptoError("Encryption failure".to_string()))?;

    Ok(payload)
}

pub fn encrypt(
    plaintext: &[u8],
    key_material: &[u8],
    iterations: u32,
) -> WalletResult<EncryptedPayload> {
    encrypt_with_params(plaintext, key_material, iterations, &CipherParams::generate())
}

pub fn decrypt(payload: &EncryptedPayload, key_material: &[u8]) -> WalletResult<Zeroizing<Vec<u8>>> {
    if payload.format != PayloadFormat::Strengthened || payload.iv.len() != IV_LEN {
        return Err(WalletError::DecryptionError);
    }

    let key = derive_key(key_material, &payload.salt, payload.iterations);
    let cipher =
        Aes256Gcm16::new_from_slice(&key[..]).map_err(|_| WalletError::DecryptionError)?;
    let header = payload.header();
    let plaintext = cipher
        .decrypt(
            GenericArray::from_slice(&payload.iv),
            Payload {
                msg: &payload.ciphertext,
                aad: &header,
            },
        )
        .map_err(|_| WalletError::DecryptionError)?;
    Ok(Zeroizing::new(plaintext))
}

/// Encrypt on `worker`. Salt and IV are generated here, on the calling side.
pub async fn encrypt_on(
    worker: CryptoWorker,
    plaintext: Zeroizing<Vec<u8>>,
    key_material: Zeroizing<Vec<u8>>,
    iterations: u32,
) -> WalletResult<EncryptedPayload> {
    let params = CipherParams::generate();
    worker
        .run(move || encrypt_with_params(&plaintext, &key_material, iterations, &params))
        .await
}

pub async fn decrypt_on(
    worker: CryptoWorker,
    payload: EncryptedPayload,
    key_material: Zeroizing<Vec<u8>>,
) -> WalletResult<Zeroizing<Vec<u8>>> {
    worker.run(move || decrypt(&payload, &key_material)).await
}
