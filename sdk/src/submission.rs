//! Submission of partially signed transactions for co-signing.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;

use crate::errors::{WalletError, WalletResult};
use crate::service::{SendQuery, SendRequest, WalletService};
use crate::validation::InputValidator;

/// A transaction signed by the primary key, waiting for the cosignature.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SignedTransaction {
    Raw { raw_transaction: String },
    /// Extra body fields, used by coins whose signing needs more than the
    /// raw transaction. Sent as-is.
    Fields(serde_json::Map<String, serde_json::Value>),
}

impl SignedTransaction {
    pub fn raw(hex: impl Into<String>) -> Self {
        SignedTransaction::Raw {
            raw_transaction: hex.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MerchantData {
    /// Already base64.
    Encoded(String),
    Raw(Vec<u8>),
}

impl MerchantData {
    fn to_wire(&self) -> String {
        match self {
            MerchantData::Encoded(encoded) => encoded.clone(),
            MerchantData::Raw(bytes) => BASE64.encode(bytes),
        }
    }
}

/// Payment protocol request the transaction pays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentProtocolOptions {
    pub payment_url: String,
    pub merchant_data: Option<MerchantData>,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Ask the service to verify the fee before cosigning.
    pub check_fee: bool,
    pub two_factor_token: Option<String>,
    pub prioboost: bool,
    pub payment: Option<PaymentProtocolOptions>,
}

/// Build body and query of a send call.
pub fn shape_request(
    transaction: SignedTransaction,
    paths: Vec<String>,
    options: &SubmitOptions,
) -> (SendRequest, SendQuery) {
    let mut query = SendQuery {
        check_fee: options.check_fee as u8,
        prioboost: options.prioboost as u8,
        ..Default::default()
    };
    if let Some(payment) = &options.payment {
        query.payment_url = Some(payment.payment_url.clone());
        query.merchant_data = payment.merchant_data.as_ref().map(MerchantData::to_wire);
    }

    let request = SendRequest {
        paths,
        two_factor_token: options.two_factor_token.clone(),
        transaction,
    };
    (request, query)
}

pub struct TransactionSubmissionCoordinator {
    service: Arc<dyn WalletService>,
    validator: Arc<InputValidator>,
}

impl TransactionSubmissionCoordinator {
    pub fn new(service: Arc<dyn WalletService>, validator: Arc<InputValidator>) -> Self {
        Self { service, validator }
    }

    /// Submit for cosigning and return the transaction hash.
    pub async fn submit(
        &self,
        identifier: &str,
        transaction: SignedTransaction,
        paths: Vec<String>,
        options: &SubmitOptions,
    ) -> WalletResult<String> {
        self.validator.validate_identifier(identifier)?;
        if let SignedTransaction::Raw { raw_transaction } = &transaction {
            self.validator.validate_raw_transaction(raw_transaction)?;
        }
        if paths.is_empty() {
            return Err(WalletError::ValidationError(
                "At least one path to cosign is required".to_string(),
            ));
        }
        for path in &paths {
            self.validator.validate_cosign_path(path)?;
        }
        if let Some(token) = &options.two_factor_token {
            self.validator.validate_two_factor_token(token)?;
        }
        if let Some(payment) = &options.payment {
            if payment.payment_url.trim().is_empty() {
                return Err(WalletError::ValidationError(
                    "Payment URL cannot be empty".to_string(),
                ));
            }
        }

        let (request, query) = shape_request(transaction, paths, options);
        log::info!(
            "Submitting transaction for {} ({} inputs to cosign)",
            identifier,
            request.paths.len()
        );

        let response = self
            .service
            .send_transaction(identifier, &request, &query)
            .await?;
        parse_txid(&response.txid)
    }
}

/// Transaction hashes are 32 bytes of hex.
fn parse_txid(txid: &str) -> WalletResult<String> {
    let txid = txid.trim();
    if txid.len() != 64 || !txid.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(WalletError::InvalidResponse(format!(
            "Unexpected transaction hash: {}",
            txid
        )));
    }
    Ok(txid.to_ascii_lowercase())
}
