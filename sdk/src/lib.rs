// lib.rs - Core library structure of the co-signing wallet SDK

pub mod checksum;
pub mod client;
pub mod coin_selection;
pub mod config;
pub mod config_store;
pub mod encryption;
pub mod errors;
pub mod handle;
pub mod keys;
pub mod network;
pub mod options;
pub mod progress;
pub mod provisioning;
pub mod sdk;
pub mod service;
pub mod session;
pub mod submission;
pub mod validation;

// Re-export common types
pub use client::HttpWalletService;
pub use coin_selection::{
    CoinSelection, CoinSelectionCoordinator, CoinSelectionPolicy, FeeStrategy, PaymentOutputs,
};
pub use config::ClientConfig;
pub use config_store::ConfigStore;
pub use encryption::{CryptoWorker, RecoverySecretOption, WalletSecret};
pub use errors::{WalletError, WalletResult};
pub use handle::WalletHandle;
pub use keys::{BackupKeyOptions, PrimaryKeyOptions, PublicKeyEntry};
pub use network::{NetworkOptions, RawNetworkOptions};
pub use options::{InitWalletOptions, ProtocolVersion, UnlockOptions, WalletCreationOptions};
pub use progress::{ProgressEvent, ProgressSink, ProgressStream};
pub use provisioning::{BackupInfo, CreatedWallet, ProvisioningState, WalletProvisioningOrchestrator};
pub use sdk::WalletSdk;
pub use service::{WalletRecord, WalletService};
pub use session::{SessionSettings, WalletSession};
pub use submission::{MerchantData, PaymentProtocolOptions, SignedTransaction, SubmitOptions};
pub use validation::InputValidator;
