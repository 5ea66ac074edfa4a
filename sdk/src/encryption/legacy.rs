//! OpenSSL-compatible passphrase encryption used by protocol v2 wallets.
//!
//! Keys and plaintexts are text. The key and IV come from a single MD5 round
//! of `EVP_BytesToKey` over the passphrase and an 8-byte salt, and the output
//! is `base64("Salted__" || salt || AES-256-CBC ciphertext)`. These parameters
//! are weak, but existing wallets depend on them.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};
use zeroize::Zeroizing;

use super::payload::{EncryptedPayload, PayloadFormat, OPENSSL_SALT_LEN};
use super::random_bytes;
use crate::errors::{WalletError, WalletResult};

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

type Encryptor = cbc::Encryptor<Aes256>;
type Decryptor = cbc::Decryptor<Aes256>;

/// Encrypt `plaintext` under `passphrase` with a fresh random salt.
pub fn encrypt(plaintext: &str, passphrase: &str) -> WalletResult<String> {
    let salt = random_bytes(OPENSSL_SALT_LEN);
    let mut fixed = [0u8; OPENSSL_SALT_LEN];
    fixed.copy_from_slice(&salt);
    encrypt_with_salt(plaintext, passphrase, &fixed)
}

pub fn encrypt_with_salt(
    plaintext: &str,
    passphrase: &str,
    salt: &[u8; OPENSSL_SALT_LEN],
) -> WalletResult<String> {
    if passphrase.is_empty() {
        return Err(WalletError::MissingPassphrase(
            "Can't encrypt data without a passphrase".to_string(),
        ));
    }

    let (key, iv) = evp_bytes_to_key(passphrase.as_bytes(), salt);
    let ciphertext = Encryptor::new_from_slices(&key[..], &iv[..])
        .map_err(|e| WalletError::CryptoError(format!("Invalid cipher parameters: {}", e)))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let payload = EncryptedPayload {
        format: PayloadFormat::OpenSsl,
        salt: salt.to_vec(),
        iterations: 1,
        iv: Vec::new(),
        ciphertext,
    };
    Ok(payload.to_base64())
}

/// Decrypt a base64 container back to text.
pub fn decrypt(encoded: &str, passphrase: &str) -> WalletResult<Zeroizing<String>> {
    let payload = EncryptedPayload::from_base64(encoded)?;
    decrypt_payload(&payload, passphrase)
}

pub fn decrypt_payload(
    payload: &EncryptedPayload,
    passphrase: &str,
) -> WalletResult<Zeroizing<String>> {
    if payload.format != PayloadFormat::OpenSsl {
        return Err(WalletError::DecryptionError);
    }

    let (key, iv) = evp_bytes_to_key(passphrase.as_bytes(), &payload.salt);
    let plaintext = Decryptor::new_from_slices(&key[..], &iv[..])
        .map_err(|_| WalletError::DecryptionError)?
        .decrypt_padded_vec_mut::<Pkcs7>(&payload.ciphertext)
        .map_err(|_| WalletError::DecryptionError)?;
    let plaintext = Zeroizing::new(plaintext);

    // A wrong key can still yield valid padding; it almost never yields text.
    let text = std::str::from_utf8(&plaintext).map_err(|_| WalletError::DecryptionError)?;
    if text.is_empty() {
        return Err(WalletError::DecryptionError);
    }
    Ok(Zeroizing::new(text.to_string()))
}

fn evp_bytes_to_key(password: &[u8], salt: &[u8]) -> (Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>) {
    let mut derived = Zeroizing::new(Vec::with_capacity(KEY_LEN + IV_LEN + 16));
    let mut previous: Vec<u8> = Vec::new();
    while derived.len() < KEY_LEN + IV_LEN {
        let mut hasher = Md5::new();
        hasher.update(&previous);
        hasher.update(password);
        hasher.update(salt);
        previous = hasher.finalize().to_vec();
        derived.extend_from_slice(&previous);
    }
    zeroize::Zeroize::zeroize(&mut previous);

    let key = Zeroizing::new(derived[..KEY_LEN].to_vec());
    let iv = Zeroizing::new(derived[KEY_LEN..KEY_LEN + IV_LEN].to_vec());
    (key, iv)
}
