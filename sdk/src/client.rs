/// HTTP client for the co-signing service.
///
/// Every call goes to `{endpoint_url}{path}` with the API key as a query
/// parameter. Failures are reported once; nothing is retried.
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::coin_selection::PaymentOutputs;
use crate::config::ClientConfig;
use crate::errors::{WalletError, WalletResult};
use crate::network::NetworkOptions;
use crate::service::{
    CoinSelectionQuery, CoinSelectionResponse, CreateWalletRequest, FeePerKb, MaxSpendable,
    MaxSpendableQuery, NewDerivation, SendQuery, SendRequest, SendResponse, ServiceErrorBody,
    UpgradeKeyIndexRequest, WalletRecord, WalletService,
};

pub struct HttpWalletService {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct PathBody<'a> {
    path: &'a str,
}

impl HttpWalletService {
    pub fn new(config: &ClientConfig, network: &NetworkOptions) -> WalletResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                WalletError::NetworkError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(HttpWalletService {
            client,
            base_url: config.endpoint_url(network),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        log::debug!("{} {}", method, path);
        self.client
            .request(method, self.url(path))
            .query(&[("api_key", self.api_key.as_str())])
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> WalletResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| WalletError::NetworkError(format!("HTTP request failed: {}", e)))?;
        read_response(response).await
    }
}

async fn read_response<T: DeserializeOwned>(response: Response) -> WalletResult<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| WalletError::NetworkError(format!("Failed to read response: {}", e)))?;

    if !status.is_success() {
        return Err(rejection(status.as_u16(), &body));
    }

    serde_json::from_str(&body)
        .map_err(|e| WalletError::InvalidResponse(format!("Failed to parse response: {}", e)))
}

/// Error reply of the service, falling back to the raw body.
fn rejection(status: u16, body: &str) -> WalletError {
    let message = match serde_json::from_str::<ServiceErrorBody>(body) {
        Ok(error) if !error.msg.is_empty() => error.msg,
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => format!("HTTP error: {}", status),
    };
    WalletError::ServerRejected { status, message }
}

fn wallet_path(identifier: &str, suffix: &str) -> String {
    format!("/wallet/{}{}", identifier, suffix)
}

#[async_trait]
impl WalletService for HttpWalletService {
    async fn create_wallet(&self, request: &CreateWalletRequest) -> WalletResult<WalletRecord> {
        self.send(self.request(Method::POST, "/wallet").json(request))
            .await
    }

    async fn get_wallet(&self, identifier: &str) -> WalletResult<WalletRecord> {
        self.send(self.request(Method::GET, &wallet_path(identifier, "")))
            .await
    }

    async fn coin_selection(
        &self,
        identifier: &str,
        outputs: &PaymentOutputs,
        query: &CoinSelectionQuery,
    ) -> WalletResult<CoinSelectionResponse> {
        let request = self
            .request(Method::POST, &wallet_path(identifier, "/coin-selection"))
            .query(query)
            .json(outputs);
        self.send(request).await
    }

    async fn max_spendable(
        &self,
        identifier: &str,
        query: &MaxSpendableQuery,
    ) -> WalletResult<MaxSpendable> {
        let request = self
            .request(Method::GET, &wallet_path(identifier, "/max-spendable"))
            .query(query);
        self.send(request).await
    }

    async fn fee_per_kb(&self) -> WalletResult<FeePerKb> {
        self.send(self.request(Method::GET, "/fee-per-kb")).await
    }

    async fn send_transaction(
        &self,
        identifier: &str,
        request: &SendRequest,
        query: &SendQuery,
    ) -> WalletResult<SendResponse> {
        let request = self
            .request(Method::POST, &wallet_path(identifier, "/send"))
            .query(query)
            .json(request);
        self.send(request).await
    }

    async fn new_derivation(&self, identifier: &str, path: &str) -> WalletResult<NewDerivation> {
        let request = self
            .request(Method::POST, &wallet_path(identifier, "/path"))
            .json(&PathBody { path });
        self.send(request).await
    }

    async fn upgrade_key_index(
        &self,
        identifier: &str,
        request: &UpgradeKeyIndexRequest,
    ) -> WalletResult<WalletRecord> {
        let request = self
            .request(Method::POST, &wallet_path(identifier, "/upgrade"))
            .json(request);
        self.send(request).await
    }
}
