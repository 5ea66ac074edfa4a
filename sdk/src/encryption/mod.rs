//! Encryption of wallet secrets for storage by the co-signing service.
//!
//! Two container formats coexist. Wallets created with protocol v2 use the
//! OpenSSL-compatible `legacy` container with text keys. Protocol v3 uses the
//! `strengthened` container (PBKDF2-SHA512 + AES-256-GCM) with raw byte keys.
//! Both parse into an [`EncryptedPayload`].

pub mod legacy;
mod payload;
pub mod pipeline;
pub mod strengthened;
pub mod words;
mod worker;

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

pub use payload::{EncryptedPayload, PayloadFormat};
pub use pipeline::{
    EncryptedWalletData, EncryptionPipeline, LegacyPipeline, PipelineInput, ProvidedSecret,
    RecoverySecretOption, StoredBlob, StrengthenedPipeline, WalletSecret,
};
pub use worker::CryptoWorker;

/// Entropy width of generated seeds and secrets.
pub const WALLET_ENTROPY_BITS: usize = 256;
pub const WALLET_ENTROPY_BYTES: usize = WALLET_ENTROPY_BITS / 8;

/// Fill a buffer of `len` bytes from the operating system RNG.
pub fn random_bytes(len: usize) -> Zeroizing<Vec<u8>> {
    let mut buffer = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(&mut buffer);
    buffer
}
