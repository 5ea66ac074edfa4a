//! Entry point bundling configuration, the service and the coordinators.

use std::sync::Arc;

use crate::client::HttpWalletService;
use crate::coin_selection::{CoinSelection, CoinSelectionCoordinator, CoinSelectionPolicy, PaymentOutputs};
use crate::config::ClientConfig;
use crate::encryption::CryptoWorker;
use crate::errors::{WalletError, WalletResult};
use crate::handle::WalletHandle;
use crate::keys::{self, PublicKeyEntry};
use crate::network::{self, RawNetworkOptions};
use crate::options::{InitWalletOptions, WalletCreationOptions};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::provisioning::{CreatedWallet, WalletProvisioningOrchestrator};
use crate::service::{FeePerKb, MaxSpendable, NewDerivation, UpgradeKeyIndexRequest, WalletService};
use crate::submission::{SignedTransaction, SubmitOptions, TransactionSubmissionCoordinator};
use crate::validation::InputValidator;

pub struct WalletSdk {
    config: ClientConfig,
    default_network: RawNetworkOptions,
    service: Arc<dyn WalletService>,
    validator: Arc<InputValidator>,
    provisioning: WalletProvisioningOrchestrator,
    coin_selection: CoinSelectionCoordinator,
    submission: TransactionSubmissionCoordinator,
}

impl WalletSdk {
    /// SDK talking HTTP to the endpoint described by `config`.
    pub fn new(config: ClientConfig) -> WalletResult<Self> {
        let network = network::normalize(&config.raw_network())?;
        let service = HttpWalletService::new(&config, &network)?;
        log::info!("Using co-signing service at {}", service.base_url());
        Self::with_service(config, Arc::new(service))
    }

    pub fn with_service(config: ClientConfig, service: Arc<dyn WalletService>) -> WalletResult<Self> {
        let validator = Arc::new(InputValidator::new()?);
        let default_network = config.raw_network();
        network::normalize(&default_network)?;

        let worker = CryptoWorker::from_flag(config.offload_crypto);
        Ok(Self {
            provisioning: WalletProvisioningOrchestrator::new(
                service.clone(),
                worker,
                config.session_settings(),
            ),
            coin_selection: CoinSelectionCoordinator::new(service.clone(), validator.clone()),
            submission: TransactionSubmissionCoordinator::new(service.clone(), validator.clone()),
            config,
            default_network,
            service,
            validator,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create a wallet. All options are checked before anything is sent.
    pub async fn create_wallet(
        &self,
        options: WalletCreationOptions,
        progress: Option<ProgressSink>,
    ) -> WalletResult<CreatedWallet> {
        let mut progress = progress.unwrap_or_default();
        let options = options.validate(&self.default_network, &self.validator)?;
        self.provisioning.create_wallet(options, &mut progress).await
    }

    pub async fn init_wallet(
        &self,
        options: InitWalletOptions,
        progress: Option<ProgressSink>,
    ) -> WalletResult<WalletHandle> {
        let mut progress = progress.unwrap_or_default();
        let options = options.validate(&self.default_network, &self.validator)?;
        self.provisioning.init_wallet(options, &mut progress).await
    }

    /// Emits `Start`, `Submit` when the request goes out, and `Done` on success.
    pub async fn select_coins(
        &self,
        wallet: &WalletHandle,
        outputs: &PaymentOutputs,
        policy: &CoinSelectionPolicy,
        progress: Option<ProgressSink>,
    ) -> WalletResult<CoinSelection> {
        let mut progress = progress.unwrap_or_default();
        progress.emit(ProgressEvent::Start);
        progress.emit(ProgressEvent::Submit);
        let selection = self
            .coin_selection
            .select(wallet.identifier(), outputs, policy)
            .await?;
        progress.emit(ProgressEvent::Done);
        Ok(selection)
    }

    /// Send a transaction signed by the primary key for cosigning. Returns its hash.
    /// Progress as for [`select_coins`](Self::select_coins).
    pub async fn submit_transaction(
        &self,
        wallet: &WalletHandle,
        transaction: SignedTransaction,
        paths: Vec<String>,
        options: &SubmitOptions,
        progress: Option<ProgressSink>,
    ) -> WalletResult<String> {
        let mut progress = progress.unwrap_or_default();
        progress.emit(ProgressEvent::Start);
        progress.emit(ProgressEvent::Submit);
        let txid = self
            .submission
            .submit(wallet.identifier(), transaction, paths, options)
            .await?;
        progress.emit(ProgressEvent::Done);
        Ok(txid)
    }

    pub async fn max_spendable(
        &self,
        wallet: &WalletHandle,
        policy: &CoinSelectionPolicy,
        outputs: u32,
    ) -> WalletResult<MaxSpendable> {
        self.coin_selection
            .max_spendable(wallet.identifier(), policy, outputs)
            .await
    }

    pub async fn fee_per_kb(&self) -> WalletResult<FeePerKb> {
        self.coin_selection.fee_per_kb().await
    }

    /// Ask the service for the next receiving path under `path`.
    pub async fn new_derivation(&self, wallet: &WalletHandle, path: &str) -> WalletResult<NewDerivation> {
        self.validator.validate_cosign_path(path)?;
        let derivation = self.service.new_derivation(wallet.identifier(), path).await?;
        self.validator
            .validate_cosign_path(&derivation.path)
            .and_then(|_| self.validator.validate_address(&derivation.address))
            .map_err(|e| WalletError::InvalidResponse(format!("Unexpected derivation: {}", e)))?;
        Ok(derivation)
    }

    /// Move the wallet to a new primary key index. The wallet must be unlocked.
    pub async fn upgrade_key_index(&self, wallet: &mut WalletHandle, key_index: u32) -> WalletResult<()> {
        if key_index > keys::MAX_KEY_INDEX {
            return Err(WalletError::ValidationError(format!(
                "Key index {} is out of range",
                key_index
            )));
        }
        let primary_public_key = wallet.derive_primary_public_key(key_index)?;
        let request = UpgradeKeyIndexRequest {
            key_index,
            primary_public_key: PublicKeyEntry::new(primary_public_key, keys::primary_key_path(key_index)),
        };
        let record = self
            .service
            .upgrade_key_index(wallet.identifier(), &request)
            .await?;
        wallet.apply_upgrade(key_index, primary_public_key, record)?;
        log::info!("Wallet {} upgraded to key index {}", wallet.identifier(), key_index);
        Ok(())
    }
}
