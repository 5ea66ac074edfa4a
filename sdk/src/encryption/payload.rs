use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::errors::{WalletError, WalletResult};

pub(crate) const OPENSSL_MAGIC: &[u8; 8] = b"Salted__";
pub(crate) const OPENSSL_SALT_LEN: usize = 8;
pub(crate) const IV_LEN: usize = 16;
pub(crate) const TAG_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// `Salted__ || salt[8] || ciphertext`, key and IV derived from the salt.
    OpenSsl,
    /// `saltLen || salt || iterations(u32 LE) || iv[16] || ciphertext || tag[16]`.
    Strengthened,
}

/// Self-describing encrypted blob. Everything except the key is carried inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub format: PayloadFormat,
    pub salt: Vec<u8>,
    pub iterations: u32,
    /// Empty for the OpenSSL format, where the IV is derived.
    pub iv: Vec<u8>,
    /// Ciphertext, with the authentication tag appended for the strengthened format.
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    /// Authenticated header of the strengthened format.
    pub fn header(&self) -> Vec<u8> {
        let mut header = Vec::with_capacity(1 + self.salt.len() + 4);
        header.push(self.salt.len() as u8);
        header.extend_from_slice(&self.salt);
        header.extend_from_slice(&self.iterations.to_le_bytes());
        header
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self.format {
            PayloadFormat::OpenSsl => {
                let mut out = Vec::with_capacity(16 + self.ciphertext.len());
                out.extend_from_slice(OPENSSL_MAGIC);
                out.extend_from_slice(&self.salt);
                out.extend_from_slice(&self.ciphertext);
                out
            }
            PayloadFormat::Strengthened => {
                let mut out = self.header();
                out.extend_from_slice(&self.iv);
                out.extend_from_slice(&self.ciphertext);
                out
            }
        }
    }

    /// Parse either container. Malformed input is reported as a plain
    /// decryption failure.
    pub fn from_bytes(bytes: &[u8]) -> WalletResult<Self> {
        if bytes.starts_with(OPENSSL_MAGIC) {
            let body = &bytes[OPENSSL_MAGIC.len()..];
            if body.len() <= OPENSSL_SALT_LEN {
                return Err(WalletError::DecryptionError);
            }
            let (salt, ciphertext) = body.split_at(OPENSSL_SALT_LEN);
            return Ok(Self {
                format: PayloadFormat::OpenSsl,
                salt: salt.to_vec(),
                iterations: 1,
                iv: Vec::new(),
                ciphertext: ciphertext.to_vec(),
            });
        }

        let (&salt_len, rest) = bytes.split_first().ok_or(WalletError::DecryptionError)?;
        let salt_len = salt_len as usize;
        if salt_len == 0 || rest.len() < salt_len + 4 + IV_LEN + TAG_LEN {
            return Err(WalletError::DecryptionError);
        }
        let (salt, rest) = rest.split_at(salt_len);
        let (iterations, rest) = rest.split_at(4);
        let (iv, ciphertext) = rest.split_at(IV_LEN);
        let iterations = u32::from_le_bytes(
            iterations
                .try_into()
                .map_err(|_| WalletError::DecryptionError)?,
        );
        if iterations == 0 {
            return Err(WalletError::DecryptionError);
        }

        Ok(Self {
            format: PayloadFormat::Strengthened,
            salt: salt.to_vec(),
            iterations,
            iv: iv.to_vec(),
            ciphertext: ciphertext.to_vec(),
        })
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> WalletResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|_| WalletError::DecryptionError)?;
        Self::from_bytes(&bytes)
    }

    /// Word rendering for backup sheets.
    pub fn to_words(&self) -> WalletResult<String> {
        super::words::encode(&self.to_bytes())
    }

    pub fn from_words(words: &str) -> WalletResult<Self> {
        let bytes = super::words::decode(words)?;
        Self::from_bytes(&bytes)
    }
}
