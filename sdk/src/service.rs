//! Boundary to the remote co-signing service and its wire types.
//!
//! Only public keys, checksums and encrypted blobs are ever part of a
//! request. Plaintext seeds, secrets and passphrases have no field here.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::coin_selection::{FeeStrategy, PaymentOutputs};
use crate::errors::WalletResult;
use crate::keys::PublicKeyEntry;
use crate::options::ProtocolVersion;
use crate::submission::SignedTransaction;

/// Operations of the co-signing service used by the SDK.
///
/// Implementations surface transport failures as `NetworkError` and
/// non-success replies as `ServerRejected`, without retrying.
#[async_trait]
pub trait WalletService: Send + Sync {
    /// `POST /wallet`
    async fn create_wallet(&self, request: &CreateWalletRequest) -> WalletResult<WalletRecord>;

    /// `GET /wallet/{identifier}`
    async fn get_wallet(&self, identifier: &str) -> WalletResult<WalletRecord>;

    /// `POST /wallet/{identifier}/coin-selection`
    async fn coin_selection(
        &self,
        identifier: &str,
        outputs: &PaymentOutputs,
        query: &CoinSelectionQuery,
    ) -> WalletResult<CoinSelectionResponse>;

    /// `GET /wallet/{identifier}/max-spendable`
    async fn max_spendable(
        &self,
        identifier: &str,
        query: &MaxSpendableQuery,
    ) -> WalletResult<MaxSpendable>;

    /// `GET /fee-per-kb`
    async fn fee_per_kb(&self) -> WalletResult<FeePerKb>;

    /// `POST /wallet/{identifier}/send`
    async fn send_transaction(
        &self,
        identifier: &str,
        request: &SendRequest,
        query: &SendQuery,
    ) -> WalletResult<SendResponse>;

    /// `POST /wallet/{identifier}/path`
    async fn new_derivation(&self, identifier: &str, path: &str) -> WalletResult<NewDerivation>;

    /// `POST /wallet/{identifier}/upgrade`
    async fn upgrade_key_index(
        &self,
        identifier: &str,
        request: &UpgradeKeyIndexRequest,
    ) -> WalletResult<WalletRecord>;
}

/// Body of `POST /wallet`.
#[derive(Clone, Serialize)]
pub struct CreateWalletRequest {
    pub identifier: String,
    pub wallet_version: ProtocolVersion,
    pub primary_public_key: PublicKeyEntry,
    pub backup_public_key: PublicKeyEntry,
    #[serde(flatten)]
    pub data: StoredWalletData,
    pub checksum: String,
    pub key_index: u32,
    pub segwit: bool,
}

impl fmt::Debug for CreateWalletRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateWalletRequest")
            .field("identifier", &self.identifier)
            .field("wallet_version", &self.wallet_version)
            .field("primary_public_key", &self.primary_public_key)
            .field("backup_public_key", &self.backup_public_key)
            .field("checksum", &self.checksum)
            .field("key_index", &self.key_index)
            .finish_non_exhaustive()
    }
}

/// Version-specific data stored by the service. Fields not stored are sent
/// as `false`.
#[derive(Clone, Serialize)]
#[serde(untagged)]
pub enum StoredWalletData {
    Mnemonic {
        #[serde(serialize_with = "string_or_false")]
        primary_mnemonic: Option<String>,
    },
    Encrypted {
        #[serde(serialize_with = "string_or_false")]
        encrypted_primary_seed: Option<String>,
        #[serde(serialize_with = "string_or_false")]
        encrypted_secret: Option<String>,
        /// Hex text.
        #[serde(serialize_with = "string_or_false")]
        recovery_secret: Option<String>,
        support_secret: Option<String>,
    },
}

/// A wallet as returned by create, init and upgrade calls.
#[derive(Clone, Default, Deserialize)]
pub struct WalletRecord {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub wallet_version: Option<ProtocolVersion>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub key_index: Option<u32>,
    #[serde(default)]
    pub primary_public_keys: BTreeMap<u32, PublicKeyEntry>,
    #[serde(default)]
    pub backup_public_key: Option<PublicKeyEntry>,
    #[serde(default)]
    pub cosigner_public_keys: BTreeMap<u32, PublicKeyEntry>,
    #[serde(default)]
    pub upgrade_key_index: Option<u32>,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub segwit: bool,
    #[serde(default, deserialize_with = "string_or_false_de")]
    pub primary_mnemonic: Option<String>,
    #[serde(default, deserialize_with = "string_or_false_de")]
    pub encrypted_primary_seed: Option<String>,
    #[serde(default, deserialize_with = "string_or_false_de")]
    pub encrypted_secret: Option<String>,
    #[serde(default, deserialize_with = "string_or_false_de")]
    pub recovery_secret: Option<String>,
}

impl fmt::Debug for WalletRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletRecord")
            .field("identifier", &self.identifier)
            .field("wallet_version", &self.wallet_version)
            .field("checksum", &self.checksum)
            .field("key_index", &self.key_index)
            .field("cosigner_public_keys", &self.cosigner_public_keys.len())
            .field("upgrade_key_index", &self.upgrade_key_index)
            .field("segwit", &self.segwit)
            .finish_non_exhaustive()
    }
}

/// Query of `POST /wallet/{identifier}/coin-selection`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoinSelectionQuery {
    pub lock: bool,
    pub zeroconf: u8,
    pub zeroconfself: u8,
    pub fee_strategy: FeeStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forcefee: Option<u64>,
}

/// An unspent output chosen by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub hash: String,
    pub idx: u32,
    pub value: u64,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub scriptpubkey_hex: Option<String>,
    #[serde(default)]
    pub redeem_script: Option<String>,
    #[serde(default)]
    pub witness_script: Option<String>,
    #[serde(default)]
    pub sign_mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoinSelectionResponse {
    #[serde(default)]
    pub utxos: Vec<Utxo>,
    pub fee: u64,
    pub change: u64,
}

/// Query of `GET /wallet/{identifier}/max-spendable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaxSpendableQuery {
    pub outputs: u32,
    pub zeroconf: u8,
    pub zeroconfself: u8,
    pub fee_strategy: FeeStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forcefee: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxSpendable {
    pub max: u64,
    pub fee: u64,
    #[serde(default)]
    pub change: u64,
}

/// Current fee rates in satoshi per kilobyte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePerKb {
    pub optimal: u64,
    pub low_priority: u64,
    #[serde(default)]
    pub high_priority: Option<u64>,
    #[serde(default)]
    pub min_relay_fee: Option<u64>,
}

/// Body of `POST /wallet/{identifier}/send`.
#[derive(Debug, Clone, Serialize)]
pub struct SendRequest {
    pub paths: Vec<String>,
    pub two_factor_token: Option<String>,
    #[serde(flatten)]
    pub transaction: SignedTransaction,
}

/// Query of `POST /wallet/{identifier}/send`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendQuery {
    pub check_fee: u8,
    pub prioboost: u8,
    #[serde(rename = "bip70PaymentUrl", skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    #[serde(rename = "bip70MerchantData", skip_serializing_if = "Option::is_none")]
    pub merchant_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SendResponse {
    #[serde(alias = "hash")]
    pub txid: String,
}

/// A fresh receiving path issued by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDerivation {
    pub path: String,
    pub address: String,
}

/// Body of `POST /wallet/{identifier}/upgrade`.
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeKeyIndexRequest {
    pub key_index: u32,
    pub primary_public_key: PublicKeyEntry,
}

/// Error body of a non-success reply.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceErrorBody {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default, alias = "message")]
    pub msg: String,
}

fn string_or_false<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => serializer.serialize_str(value),
        None => serializer.serialize_bool(false),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrBool {
    Text(String),
    Flag(bool),
}

fn string_or_false_de<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<StringOrBool>::deserialize(deserializer)? {
        Some(StringOrBool::Text(text)) if !text.is_empty() => Some(text),
        _ => None,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrInt {
    Flag(bool),
    Number(i64),
}

fn bool_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Option::<BoolOrInt>::deserialize(deserializer)? {
        Some(BoolOrInt::Flag(flag)) => flag,
        Some(BoolOrInt::Number(number)) => number != 0,
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{master_key, SECP, BACKUP_KEY_PATH};
    use crate::network::NetworkOptions;
    use bitcoin::bip32::Xpub;
    use serde_json::json;

    fn entry(path: &str) -> PublicKeyEntry {
        let master = master_key(&[3u8; 32], &NetworkOptions::bitcoin_mainnet()).unwrap();
        PublicKeyEntry::new(Xpub::from_priv(&*SECP, &master), path)
    }

    #[test]
    fn unstored_encrypted_fields_are_false() {
        let request = CreateWalletRequest {
            identifier: "w1".to_string(),
            wallet_version: ProtocolVersion::V3,
            primary_public_key: entry("M/0'"),
            backup_public_key: entry(BACKUP_KEY_PATH),
            data: StoredWalletData::Encrypted {
                encrypted_primary_seed: None,
                encrypted_secret: None,
                recovery_secret: None,
                support_secret: None,
            },
            checksum: "1abc".to_string(),
            key_index: 0,
            segwit: false,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["wallet_version"], json!("v3"));
        assert_eq!(body["encrypted_primary_seed"], json!(false));
        assert_eq!(body["encrypted_secret"], json!(false));
        assert_eq!(body["recovery_secret"], json!(false));
        assert_eq!(body["support_secret"], json!(null));
        assert_eq!(body["primary_public_key"][1], json!("M/0'"));
        assert!(body.get("primary_mnemonic").is_none());
    }

    #[test]
    fn v1_request_carries_only_the_mnemonic() {
        let request = CreateWalletRequest {
            identifier: "w1".to_string(),
            wallet_version: ProtocolVersion::V1,
            primary_public_key: entry("M/0'"),
            backup_public_key: entry(BACKUP_KEY_PATH),
            data: StoredWalletData::Mnemonic {
                primary_mnemonic: Some("abandon about".to_string()),
            },
            checksum: "1abc".to_string(),
            key_index: 0,
            segwit: true,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["primary_mnemonic"], json!("abandon about"));
        assert!(body.get("encrypted_secret").is_none());
    }

    #[test]
    fn wallet_record_tolerates_service_quirks() {
        let key = entry("M/9999'");
        let record: WalletRecord = serde_json::from_value(json!({
            "wallet_version": "v2",
            "checksum": "1abc",
            "key_index": 9999,
            "segwit": 1,
            "primary_mnemonic": false,
            "encrypted_secret": "U2FsdGVkX1+abc=",
            "cosigner_public_keys": {"9999": [key.key.to_string(), "M/9999'"]},
            "upgrade_key_index": null
        }))
        .unwrap();
        assert_eq!(record.wallet_version, Some(ProtocolVersion::V2));
        assert!(record.segwit);
        assert!(record.primary_mnemonic.is_none());
        assert_eq!(record.encrypted_secret.as_deref(), Some("U2FsdGVkX1+abc="));
        assert_eq!(record.cosigner_public_keys[&9999], key);
        assert!(record.upgrade_key_index.is_none());
    }

    #[test]
    fn send_request_shapes() {
        let request = SendRequest {
            paths: vec!["M/0'/0/1".to_string()],
            two_factor_token: None,
            transaction: SignedTransaction::raw("0100"),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["raw_transaction"], json!("0100"));
        assert_eq!(body["two_factor_token"], json!(null));

        let response: SendResponse = serde_json::from_value(json!({"hash": "ab"})).unwrap();
        assert_eq!(response.txid, "ab");
    }
}
