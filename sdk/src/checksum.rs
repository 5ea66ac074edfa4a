//! Network-bound fingerprint of the primary master key.

use bitcoin::bip32::Xpub;
use bitcoin::{Address, PublicKey};

use crate::errors::{WalletError, WalletResult};
use crate::network::NetworkOptions;

/// Base58check P2PKH address of the key's HASH160. The version byte follows
/// `NetworkOptions::pubkey_hash_version`, so test networks never collide with
/// mainnet.
pub fn checksum(public_key: &Xpub, network: &NetworkOptions) -> String {
    let hash = PublicKey::new(public_key.public_key).pubkey_hash();
    Address::p2pkh(hash, network.network_kind()).to_string()
}

/// Fail unless the stored checksum matches the locally computed one.
pub fn verify(expected: &str, actual: &str) -> WalletResult<()> {
    if expected != actual {
        log::warn!("Wallet checksum mismatch");
        return Err(WalletError::ChecksumMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}
