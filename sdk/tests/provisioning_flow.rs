use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::bip32::{Xpriv, Xpub};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::NetworkKind;
use parking_lot::Mutex;
use serde_json::{json, Value};
use zeroize::Zeroizing;

use cosign_wallet::coin_selection::PaymentOutputs;
use cosign_wallet::progress;
use cosign_wallet::service::{
    CoinSelectionQuery, CoinSelectionResponse, CreateWalletRequest, FeePerKb, MaxSpendable,
    MaxSpendableQuery, NewDerivation, SendQuery, SendRequest, SendResponse,
    UpgradeKeyIndexRequest, Utxo, WalletRecord, WalletService,
};
use cosign_wallet::{
    ClientConfig, CoinSelectionPolicy, InitWalletOptions, PaymentProtocolOptions, ProgressEvent,
    ProtocolVersion, SignedTransaction, SubmitOptions, UnlockOptions, WalletCreationOptions,
    WalletError, WalletResult, WalletSdk,
};

const ADDRESS: &str = "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2";

/// Plays the co-signing service: keeps wallets as their JSON records.
struct FakeCosigner {
    calls: AtomicUsize,
    wallets: Mutex<HashMap<String, Value>>,
    sends: Mutex<Vec<(Value, Value)>>,
    /// Fields replaced in the record answered to a create.
    create_overrides: Mutex<Vec<(&'static str, Value)>>,
    balance: u64,
    cosigner: Xpub,
}

impl FakeCosigner {
    fn new(balance: u64) -> Arc<Self> {
        let secp = Secp256k1::new();
        let master = Xpriv::new_master(NetworkKind::Main, &[9u8; 32]).unwrap();
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            wallets: Mutex::new(HashMap::new()),
            sends: Mutex::new(Vec::new()),
            create_overrides: Mutex::new(Vec::new()),
            balance,
            cosigner: Xpub::from_priv(&secp, &master),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self, identifier: &str) -> WalletResult<WalletRecord> {
        let wallets = self.wallets.lock();
        let stored = wallets.get(identifier).ok_or_else(|| WalletError::ServerRejected {
            status: 404,
            message: "Wallet not found".to_string(),
        })?;
        Ok(serde_json::from_value(stored.clone())?)
    }

    fn answer_create_with(&self, field: &'static str, value: Value) {
        self.create_overrides.lock().push((field, value));
    }

    fn tamper(&self, identifier: &str, field: &str, value: Value) {
        self.wallets.lock().get_mut(identifier).unwrap()[field] = value;
    }
}

#[async_trait]
impl WalletService for FakeCosigner {
    async fn create_wallet(&self, request: &CreateWalletRequest) -> WalletResult<WalletRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut body = serde_json::to_value(request)?;
        for (field, value) in self.create_overrides.lock().iter() {
            body[*field] = value.clone();
        }
        let key_index = body["key_index"].as_u64().unwrap();
        let index = key_index.to_string();
        let fields = body.as_object_mut().unwrap();
        let primary = fields.remove("primary_public_key").unwrap();
        fields.insert("primary_public_keys".into(), json!({ index.clone(): primary }));
        fields.insert(
            "cosigner_public_keys".into(),
            json!({ index: [self.cosigner.to_string(), format!("M/{}'", key_index)] }),
        );
        self.wallets.lock().insert(request.identifier.clone(), body);
        self.record(&request.identifier)
    }

    async fn get_wallet(&self, identifier: &str) -> WalletResult<WalletRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.record(identifier)
    }

    async fn coin_selection(
        &self,
        _identifier: &str,
        outputs: &PaymentOutputs,
        query: &CoinSelectionQuery,
    ) -> WalletResult<CoinSelectionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fee = query.forcefee.unwrap_or(1_000);
        let total: u64 = outputs.values().sum();
        if total + fee > self.balance {
            return Err(WalletError::ServerRejected {
                status: 400,
                message: format!("Wallet balance is too low to pay the fee [{}]", fee),
            });
        }
        Ok(CoinSelectionResponse {
            utxos: vec![Utxo {
                hash: "aa".repeat(32),
                idx: 0,
                value: self.balance,
                address: Some(ADDRESS.to_string()),
                path: Some("M/0'/0/0".to_string()),
                scriptpubkey_hex: None,
                redeem_script: None,
                witness_script: None,
                sign_mode: None,
            }],
            fee,
            change: self.balance - total - fee,
        })
    }

    async fn max_spendable(
        &self,
        _identifier: &str,
        query: &MaxSpendableQuery,
    ) -> WalletResult<MaxSpendable> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fee = 1_000 * u64::from(query.outputs);
        Ok(MaxSpendable {
            max: self.balance.saturating_sub(fee),
            fee,
            change: 0,
        })
    }

    async fn fee_per_kb(&self) -> WalletResult<FeePerKb> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FeePerKb {
            optimal: 20_000,
            low_priority: 5_000,
            high_priority: None,
            min_relay_fee: Some(1_000),
        })
    }

    async fn send_transaction(
        &self,
        _identifier: &str,
        request: &SendRequest,
        query: &SendQuery,
    ) -> WalletResult<SendResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sends
            .lock()
            .push((serde_json::to_value(request)?, serde_json::to_value(query)?));
        Ok(SendResponse {
            txid: "AB".repeat(32),
        })
    }

    async fn new_derivation(&self, _identifier: &str, path: &str) -> WalletResult<NewDerivation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(NewDerivation {
            path: format!("{}/0/7", path),
            address: ADDRESS.to_string(),
        })
    }

    async fn upgrade_key_index(
        &self,
        identifier: &str,
        request: &UpgradeKeyIndexRequest,
    ) -> WalletResult<WalletRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index = request.key_index.to_string();
        let mut wallets = self.wallets.lock();
        let stored = wallets.get_mut(identifier).unwrap();
        stored["key_index"] = json!(request.key_index);
        stored["primary_public_keys"][&index] = serde_json::to_value(&request.primary_public_key)?;
        stored["cosigner_public_keys"][&index] =
            json!([self.cosigner.to_string(), format!("M/{}'", request.key_index)]);
        Ok(serde_json::from_value(stored.clone())?)
    }
}

fn sdk(service: &Arc<FakeCosigner>) -> WalletSdk {
    WalletSdk::with_service(ClientConfig::new("test-key"), service.clone()).unwrap()
}

#[tokio::test]
async fn v3_wallet_is_created_and_unlocked() {
    let service = FakeCosigner::new(100_000);
    let sdk = sdk(&service);
    let (sink, mut events) = progress::channel();

    let created = sdk
        .create_wallet(
            WalletCreationOptions::new("w1").with_passphrase("correct horse"),
            Some(sink),
        )
        .await
        .unwrap();

    assert_eq!(created.version, ProtocolVersion::V3);
    assert_eq!(created.handle.version().as_number(), 3);
    assert!(!created.handle.checksum().is_empty());
    assert!(!created.handle.is_locked());
    assert!(created.handle.cosigner_public_key(0).is_some());
    assert_eq!(service.calls(), 1);

    let backup = &created.backup;
    assert!(backup.backup_mnemonic.is_some());
    assert!(backup.encrypted_primary_seed.is_some());
    assert!(backup.encrypted_secret.is_some());
    assert!(backup.recovery_encrypted_secret.is_some());
    assert_eq!(backup.cosigner_public_keys.len(), 1);

    let stored = service.wallets.lock()["w1"].clone();
    assert_eq!(stored["wallet_version"], "v3");
    assert_eq!(stored["backup_public_key"][1], "M");
    assert!(stored["encrypted_primary_seed"].is_string());
    assert!(stored["recovery_secret"].is_string());
    assert!(stored["support_secret"].is_null());

    let events = events.drain();
    assert_eq!(
        events,
        vec![
            ProgressEvent::Start,
            ProgressEvent::EncryptSecret,
            ProgressEvent::EncryptPrimary,
            ProgressEvent::EncryptRecovery,
            ProgressEvent::PrimaryKey,
            ProgressEvent::BackupKey,
            ProgressEvent::Submit,
            ProgressEvent::Init,
            ProgressEvent::Done,
        ]
    );
    assert!(events.windows(2).all(|pair| pair[0].ordinal() < pair[1].ordinal()));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn v3_wallet_can_be_initialized_again() {
    let service = FakeCosigner::new(100_000);
    let sdk = sdk(&service);
    let created = sdk
        .create_wallet(
            WalletCreationOptions::new("w1").with_passphrase("correct horse"),
            None,
        )
        .await
        .unwrap();

    let handle = sdk
        .init_wallet(InitWalletOptions::new("w1").with_passphrase("correct horse"), None)
        .await
        .unwrap();
    assert!(!handle.is_locked());
    assert_eq!(handle.checksum(), created.handle.checksum());
    assert_eq!(
        handle.primary_public_key(0),
        created.handle.primary_public_key(0)
    );
    assert_eq!(handle.backup_public_key(), created.handle.backup_public_key());
    assert!(handle.has_server_data());

    let read_only = sdk
        .init_wallet(InitWalletOptions::new("w1").read_only(), None)
        .await
        .unwrap();
    assert!(read_only.is_locked());
}

#[tokio::test]
async fn conflicting_options_never_reach_the_service() {
    let service = FakeCosigner::new(100_000);
    let sdk = sdk(&service);

    let mut options = WalletCreationOptions::new("w1").with_passphrase("correct horse");
    options.primary.primary_mnemonic = Some("abandon ".repeat(11).trim().to_string().into());
    options.primary.primary_seed = Some(Zeroizing::new(vec![1u8; 32]));

    let err = sdk.create_wallet(options, None).await.unwrap_err();
    assert!(matches!(err, WalletError::ConflictingOptions(_)));
    assert!(err.is_validation());
    assert_eq!(service.calls(), 0);

    let err = sdk
        .create_wallet(WalletCreationOptions::new(""), None)
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(service.calls(), 0);
}

#[tokio::test]
async fn checksum_mismatch_on_init_yields_no_handle() {
    let service = FakeCosigner::new(100_000);
    let sdk = sdk(&service);
    sdk.create_wallet(
        WalletCreationOptions::new("w1").with_passphrase("correct horse"),
        None,
    )
    .await
    .unwrap();

    service.tamper("w1", "checksum", json!("1BoatSLRHtKNngkdXEeobR76b53LETtpyT"));
    let err = sdk
        .init_wallet(InitWalletOptions::new("w1").with_passphrase("correct horse"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::ChecksumMismatch { .. }));
}

#[tokio::test]
async fn create_rejects_a_foreign_checksum() {
    let service = FakeCosigner::new(100_000);
    service.answer_create_with("checksum", json!("1BoatSLRHtKNngkdXEeobR76b53LETtpyT"));
    let sdk = sdk(&service);
    let (sink, mut events) = progress::channel();

    let err = sdk
        .create_wallet(
            WalletCreationOptions::new("w1").with_passphrase("correct horse"),
            Some(sink),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WalletError::ChecksumMismatch { ref expected, .. } if expected == "1BoatSLRHtKNngkdXEeobR76b53LETtpyT"
    ));
    assert_eq!(service.calls(), 1);
    assert!(!events.drain().contains(&ProgressEvent::Done));
}

#[tokio::test]
async fn create_follows_the_key_index_assigned_by_the_service() {
    let service = FakeCosigner::new(100_000);
    service.answer_create_with("key_index", json!(7));
    let sdk = sdk(&service);

    let created = sdk
        .create_wallet(
            WalletCreationOptions::new("w1").with_passphrase("correct horse"),
            None,
        )
        .await
        .unwrap();

    let handle = &created.handle;
    assert_eq!(handle.key_index(), 7);
    assert!(handle.primary_public_key(0).is_none());
    assert_eq!(
        handle.primary_public_key(7),
        Some(&handle.derive_primary_public_key(7).unwrap())
    );
    assert_ne!(
        handle.derive_primary_public_key(7).unwrap(),
        handle.derive_primary_public_key(0).unwrap()
    );
    assert!(handle.cosigner_public_key(7).is_some());
}

#[tokio::test]
async fn wrong_passphrase_is_a_generic_decryption_error() {
    let service = FakeCosigner::new(100_000);
    let sdk = sdk(&service);
    sdk.create_wallet(
        WalletCreationOptions::new("w1").with_passphrase("correct horse"),
        None,
    )
    .await
    .unwrap();

    let err = sdk
        .init_wallet(InitWalletOptions::new("w1").with_passphrase("battery staple"), None)
        .await
        .unwrap_err();
    assert_eq!(err, WalletError::DecryptionError);
}

#[tokio::test]
async fn backup_key_check_on_init() {
    let service = FakeCosigner::new(100_000);
    let sdk = sdk(&service);
    sdk.create_wallet(
        WalletCreationOptions::new("w1").with_passphrase("correct horse"),
        None,
    )
    .await
    .unwrap();

    let mut options = InitWalletOptions::new("w1").read_only();
    options.check_backup_key = Some(service.cosigner.to_string());
    let err = sdk.init_wallet(options, None).await.unwrap_err();
    assert!(matches!(err, WalletError::InvalidResponse(_)));
}

#[tokio::test]
async fn seed_kept_by_caller_when_not_stored() {
    let service = FakeCosigner::new(100_000);
    let sdk = sdk(&service);

    let mut options = WalletCreationOptions::new("w1");
    options.primary.primary_seed = Some(Zeroizing::new(vec![42u8; 32]));
    let created = sdk.create_wallet(options, None).await.unwrap();
    assert!(!created.handle.has_server_data());
    assert!(created.backup.encrypted_primary_seed.is_none());

    let stored = service.wallets.lock()["w1"].clone();
    assert_eq!(stored["encrypted_primary_seed"], json!(false));
    assert_eq!(stored["encrypted_secret"], json!(false));

    let mut init = InitWalletOptions::new("w1");
    init.unlock = UnlockOptions {
        primary_seed: Some(Zeroizing::new(vec![42u8; 32])),
        ..Default::default()
    };
    let handle = sdk.init_wallet(init, None).await.unwrap();
    assert!(!handle.is_locked());
}

#[tokio::test]
async fn v1_wallet_stores_its_mnemonic() {
    let service = FakeCosigner::new(100_000);
    let sdk = sdk(&service);
    let (sink, mut events) = progress::channel();

    let created = sdk
        .create_wallet(
            WalletCreationOptions::new("legacy-1")
                .with_passphrase("correct horse")
                .with_version(ProtocolVersion::V1),
            Some(sink),
        )
        .await
        .unwrap();
    assert!(created.backup.primary_mnemonic.is_some());
    assert!(created.backup.backup_mnemonic.is_some());
    assert!(created.backup.encrypted_primary_seed.is_none());

    let stored = service.wallets.lock()["legacy-1"].clone();
    assert_eq!(stored["wallet_version"], "v1");
    assert_eq!(
        stored["primary_mnemonic"].as_str().unwrap().split_whitespace().count(),
        24
    );
    assert!(stored.get("encrypted_primary_seed").is_none());

    assert_eq!(
        events.drain(),
        vec![
            ProgressEvent::Start,
            ProgressEvent::PrimaryKey,
            ProgressEvent::BackupKey,
            ProgressEvent::Submit,
            ProgressEvent::Init,
            ProgressEvent::Done,
        ]
    );

    let handle = sdk
        .init_wallet(
            InitWalletOptions::new("legacy-1").with_passphrase("correct horse"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(handle.checksum(), created.handle.checksum());
}

#[tokio::test]
async fn v2_wallet_round_trips_through_init() {
    let service = FakeCosigner::new(100_000);
    let sdk = sdk(&service);

    let created = sdk
        .create_wallet(
            WalletCreationOptions::new("w2")
                .with_passphrase("correct horse")
                .with_version(ProtocolVersion::V2),
            None,
        )
        .await
        .unwrap();
    assert!(created.backup.recovery_encrypted_secret.is_some());

    let stored = service.wallets.lock()["w2"].clone();
    assert_eq!(stored["wallet_version"], "v2");
    assert!(stored["encrypted_primary_seed"]
        .as_str()
        .unwrap()
        .starts_with("U2FsdGVkX1"));

    let handle = sdk
        .init_wallet(InitWalletOptions::new("w2").with_passphrase("correct horse"), None)
        .await
        .unwrap();
    assert_eq!(handle.version(), ProtocolVersion::V2);
    assert_eq!(handle.checksum(), created.handle.checksum());
}

#[tokio::test]
async fn fee_rejection_becomes_insufficient_fee() {
    let service = FakeCosigner::new(10_000);
    let sdk = sdk(&service);
    let created = sdk
        .create_wallet(
            WalletCreationOptions::new("w1").with_passphrase("correct horse"),
            None,
        )
        .await
        .unwrap();

    let outputs = PaymentOutputs::from([(ADDRESS.to_string(), 9_500)]);
    let (sink, mut events) = progress::channel();
    let err = sdk
        .select_coins(&created.handle, &outputs, &CoinSelectionPolicy::default(), Some(sink))
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InsufficientFee(_)));
    assert_eq!(events.drain(), vec![ProgressEvent::Start, ProgressEvent::Submit]);

    let outputs = PaymentOutputs::from([(ADDRESS.to_string(), 5_000)]);
    let (sink, mut events) = progress::channel();
    let selection = sdk
        .select_coins(&created.handle, &outputs, &CoinSelectionPolicy::default(), Some(sink))
        .await
        .unwrap();
    assert_eq!(
        events.drain(),
        vec![ProgressEvent::Start, ProgressEvent::Submit, ProgressEvent::Done]
    );
    assert_eq!(selection.total_input(), 10_000);
    assert_eq!(selection.fee + selection.change + 5_000, 10_000);

    let max = sdk
        .max_spendable(&created.handle, &CoinSelectionPolicy::default(), 0)
        .await
        .unwrap();
    assert_eq!(max.max, 9_000);
    assert_eq!(sdk.fee_per_kb().await.unwrap().optimal, 20_000);
}

#[tokio::test]
async fn submission_is_shaped_for_the_service() {
    let service = FakeCosigner::new(100_000);
    let sdk = sdk(&service);
    let created = sdk
        .create_wallet(
            WalletCreationOptions::new("w1").with_passphrase("correct horse"),
            None,
        )
        .await
        .unwrap();

    let options = SubmitOptions {
        check_fee: true,
        two_factor_token: Some("123456".to_string()),
        prioboost: false,
        payment: Some(PaymentProtocolOptions {
            payment_url: "https://merchant.example/pay".to_string(),
            merchant_data: None,
        }),
    };
    let (sink, mut events) = progress::channel();
    let txid = sdk
        .submit_transaction(
            &created.handle,
            SignedTransaction::raw("0100000001"),
            vec!["M/0'/0/0".to_string()],
            &options,
            Some(sink),
        )
        .await
        .unwrap();
    assert_eq!(txid, "ab".repeat(32));
    assert_eq!(events.drain().last(), Some(&ProgressEvent::Done));

    let (body, query) = service.sends.lock()[0].clone();
    assert_eq!(body["raw_transaction"], "0100000001");
    assert_eq!(body["paths"], json!(["M/0'/0/0"]));
    assert_eq!(body["two_factor_token"], "123456");
    assert_eq!(query["check_fee"], 1);
    assert_eq!(query["prioboost"], 0);
    assert_eq!(query["bip70PaymentUrl"], "https://merchant.example/pay");

    let calls = service.calls();
    let err = sdk
        .submit_transaction(
            &created.handle,
            SignedTransaction::raw("0100000001"),
            vec!["m/0'/0/0".to_string()],
            &SubmitOptions::default(),
            None,
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(service.calls(), calls);
}

#[tokio::test]
async fn key_index_upgrade_and_new_derivation() {
    let service = FakeCosigner::new(100_000);
    let sdk = sdk(&service);
    let mut created = sdk
        .create_wallet(
            WalletCreationOptions::new("w1").with_passphrase("correct horse"),
            None,
        )
        .await
        .unwrap();

    sdk.upgrade_key_index(&mut created.handle, 9000).await.unwrap();
    assert_eq!(created.handle.key_index(), 9000);
    assert!(created.handle.primary_public_key(9000).is_some());
    assert!(created.handle.cosigner_public_key(9000).is_some());

    let derivation = sdk
        .new_derivation(&created.handle, "M/9000'")
        .await
        .unwrap();
    assert_eq!(derivation.path, "M/9000'/0/7");

    created.handle.lock();
    let err = sdk
        .upgrade_key_index(&mut created.handle, 9001)
        .await
        .unwrap_err();
    assert_eq!(err, WalletError::Locked);
}
