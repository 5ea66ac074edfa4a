//! Coin selection against a provisioned wallet.
//!
//! The selection algorithm runs on the service. This module shapes the
//! request from a [`CoinSelectionPolicy`] and turns the one known
//! "fee too low" rejection into [`WalletError::InsufficientFee`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::service::{
    CoinSelectionQuery, FeePerKb, MaxSpendable, MaxSpendableQuery, Utxo, WalletService,
};
use crate::validation::InputValidator;

static FEE_TOO_LOW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"too low to pay the fee").expect("fee pattern must compile"));

/// How long the service keeps selected outputs reserved when `lock` is set.
pub const UTXO_LOCK_WINDOW: Duration = Duration::from_secs(10);

/// Payment outputs, address to value in satoshi.
pub type PaymentOutputs = BTreeMap<String, u64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeStrategy {
    #[default]
    Optimal,
    LowPriority,
    HighPriority,
    MinRelayFee,
    BaseFee,
    /// Requires `forced_fee`.
    ForceFee,
}

impl FeeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeStrategy::Optimal => "optimal",
            FeeStrategy::LowPriority => "low_priority",
            FeeStrategy::HighPriority => "high_priority",
            FeeStrategy::MinRelayFee => "min_relay_fee",
            FeeStrategy::BaseFee => "base_fee",
            FeeStrategy::ForceFee => "force_fee",
        }
    }
}

impl fmt::Display for FeeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelectionPolicy {
    /// Reserve the selected outputs for `UTXO_LOCK_WINDOW`.
    pub lock: bool,
    pub allow_zero_conf: bool,
    /// Unconfirmed change of this wallet, allowed by default.
    pub allow_zero_conf_self: bool,
    pub fee_strategy: FeeStrategy,
    pub forced_fee: Option<u64>,
}

impl Default for CoinSelectionPolicy {
    fn default() -> Self {
        Self {
            lock: false,
            allow_zero_conf: false,
            allow_zero_conf_self: true,
            fee_strategy: FeeStrategy::Optimal,
            forced_fee: None,
        }
    }
}

impl CoinSelectionPolicy {
    pub fn validate(&self) -> WalletResult<()> {
        if self.fee_strategy == FeeStrategy::ForceFee && self.forced_fee.is_none() {
            return Err(WalletError::ValidationError(
                "The force_fee strategy requires a forced fee".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_query(&self) -> CoinSelectionQuery {
        CoinSelectionQuery {
            lock: self.lock,
            zeroconf: self.allow_zero_conf as u8,
            zeroconfself: self.allow_zero_conf_self as u8,
            fee_strategy: self.fee_strategy,
            forcefee: self.forced_fee,
        }
    }

    pub fn to_max_spendable_query(&self, outputs: u32) -> MaxSpendableQuery {
        MaxSpendableQuery {
            outputs: outputs.max(1),
            zeroconf: self.allow_zero_conf as u8,
            zeroconfself: self.allow_zero_conf_self as u8,
            fee_strategy: self.fee_strategy,
            forcefee: self.forced_fee,
        }
    }
}

/// Outputs chosen by the service, in its order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelection {
    pub utxos: Vec<Utxo>,
    pub fee: u64,
    pub change: u64,
    pub locked: bool,
    selected_at: Instant,
}

impl CoinSelection {
    pub fn total_input(&self) -> u64 {
        self.utxos.iter().map(|utxo| utxo.value).sum()
    }

    /// False once a lock reservation may have lapsed.
    pub fn lock_is_fresh(&self) -> bool {
        self.locked && self.selected_at.elapsed() < UTXO_LOCK_WINDOW
    }
}

/// Map the service's fee rejection onto its own error kind.
pub fn reclassify_fee_error(error: WalletError) -> WalletError {
    match error {
        WalletError::ServerRejected { message, .. } if FEE_TOO_LOW.is_match(&message) => {
            WalletError::InsufficientFee(message)
        }
        other => other,
    }
}

pub struct CoinSelectionCoordinator {
    service: Arc<dyn WalletService>,
    validator: Arc<InputValidator>,
}

impl CoinSelectionCoordinator {
    pub fn new(service: Arc<dyn WalletService>, validator: Arc<InputValidator>) -> Self {
        Self { service, validator }
    }

    pub async fn select(
        &self,
        identifier: &str,
        outputs: &PaymentOutputs,
        policy: &CoinSelectionPolicy,
    ) -> WalletResult<CoinSelection> {
        self.validator.validate_identifier(identifier)?;
        self.validate_outputs(outputs)?;
        policy.validate()?;

        let query = policy.to_query();
        log::debug!(
            "Requesting coin selection for {} ({} outputs, strategy {})",
            identifier,
            outputs.len(),
            query.fee_strategy
        );

        let response = self
            .service
            .coin_selection(identifier, outputs, &query)
            .await
            .map_err(reclassify_fee_error)?;

        Ok(CoinSelection {
            utxos: response.utxos,
            fee: response.fee,
            change: response.change,
            locked: policy.lock,
            selected_at: Instant::now(),
        })
    }

    pub async fn max_spendable(
        &self,
        identifier: &str,
        policy: &CoinSelectionPolicy,
        outputs: u32,
    ) -> WalletResult<MaxSpendable> {
        self.validator.validate_identifier(identifier)?;
        policy.validate()?;
        self.service
            .max_spendable(identifier, &policy.to_max_spendable_query(outputs))
            .await
            .map_err(reclassify_fee_error)
    }

    pub async fn fee_per_kb(&self) -> WalletResult<FeePerKb> {
        self.service.fee_per_kb().await
    }

    fn validate_outputs(&self, outputs: &PaymentOutputs) -> WalletResult<()> {
        if outputs.is_empty() {
            return Err(WalletError::ValidationError(
                "At least one output is required".to_string(),
            ));
        }
        let mut issues = Vec::new();
        for (address, value) in outputs {
            if let Err(issue) = self.validator.validate_address(address) {
                issues.push(issue);
            }
            if let Err(issue) = self.validator.validate_amount(*value) {
                issues.push(issue);
            }
        }
        match WalletError::from_issues(issues) {
            Some(issue) => Err(issue),
            None => Ok(()),
        }
    }
}
